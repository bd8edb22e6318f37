//! End-to-end tests for live (sync mode) correlation through the gateway.

use gateway_apm::apm::Outcome;
use gateway_apm::config::{ApmConfig, TimeoutConfig};

mod common;

use common::{inbound_traceparent, split_traceparent, INBOUND_SPAN_ID, INBOUND_TRACE_ID};

#[tokio::test]
async fn test_sampled_trace_is_continued_to_upstream() {
    let backend = common::start_recording_backend(503).await;
    let mut gateway = common::start_gateway(common::apm_config(), backend.addr).await;

    let res = reqwest::Client::new()
        .get(gateway.url("/orders/7"))
        .header("traceparent", inbound_traceparent("01"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 503);

    let upstream = backend.last_request();
    let (trace_id, span_id, flags) = split_traceparent(&upstream["traceparent"]);
    assert_eq!(trace_id, INBOUND_TRACE_ID);
    assert_ne!(span_id, INBOUND_SPAN_ID);
    assert_eq!(flags, "01");

    let span = gateway.next_event().await;
    let span = span.as_span().expect("span is reported first");
    assert_eq!(span.id.to_string(), span_id);
    assert_eq!(span.trace_id.to_string(), INBOUND_TRACE_ID);
    assert_eq!(span.status_code(), Some(503));
    assert_eq!(span.outcome, Outcome::Failure);
    assert_eq!(span.kind, "external");
    assert_eq!(span.action.as_deref(), Some("GET"));
    assert_eq!(span.subtype.as_deref(), Some("http"));
    let destination = span.context.destination.as_ref().unwrap();
    assert_eq!(destination.port, Some(backend.addr.port()));
    assert_eq!(
        destination.service_resource.as_deref(),
        Some(format!("127.0.0.1:{}", backend.addr.port()).as_str())
    );

    let tx = gateway.next_event().await;
    let tx = tx.as_transaction().expect("transaction is reported last");
    assert_eq!(tx.trace_id.to_string(), INBOUND_TRACE_ID);
    assert_eq!(tx.parent_id.unwrap().to_string(), INBOUND_SPAN_ID);
    assert_eq!(tx.result.as_deref(), Some("HTTP 503"));
    assert_eq!(tx.outcome, Outcome::Failure);
    assert!(tx.sampled);
    assert_eq!(tx.name, format!("GET 127.0.0.1:{}/orders/7", gateway.addr.port()));
    assert_eq!(span.parent_id, tx.id);
    assert_eq!(span.transaction_id, tx.id);

    assert!(gateway.plugin.registry().is_empty());
    gateway.assert_no_more_events().await;
}

#[tokio::test]
async fn test_unsampled_trace_propagates_identity_without_span() {
    let backend = common::start_recording_backend(200).await;
    let mut gateway = common::start_gateway(common::apm_config(), backend.addr).await;

    reqwest::Client::new()
        .get(gateway.url("/"))
        .header("traceparent", inbound_traceparent("00"))
        .send()
        .await
        .unwrap();

    let tx = gateway.next_event().await;
    let tx = tx.as_transaction().expect("only a transaction is reported");
    assert!(!tx.sampled);
    assert!(tx.context.is_none());

    let (trace_id, span_id, flags) = split_traceparent(&backend.last_request()["traceparent"]);
    assert_eq!(trace_id, INBOUND_TRACE_ID);
    assert_eq!(span_id, tx.id.to_string());
    assert_eq!(flags, "00");

    gateway.assert_no_more_events().await;
}

#[tokio::test]
async fn test_malformed_traceparent_starts_new_trace() {
    let backend = common::start_recording_backend(200).await;
    let mut gateway = common::start_gateway(common::apm_config(), backend.addr).await;

    reqwest::Client::new()
        .get(gateway.url("/"))
        .header("traceparent", "00-4BF92F3577B34DA6A3CE929D0E0E4736-00f067aa0ba902b7-01")
        .send()
        .await
        .unwrap();

    let _span = gateway.next_event().await;
    let tx = gateway.next_event().await;
    let tx = tx.as_transaction().unwrap();
    assert_ne!(tx.trace_id.to_string(), INBOUND_TRACE_ID);
    assert!(tx.parent_id.is_none());
    assert_eq!(tx.result.as_deref(), Some("HTTP 200"));
    assert_eq!(tx.outcome, Outcome::Success);

    let (trace_id, _, _) = split_traceparent(&backend.last_request()["traceparent"]);
    assert_eq!(trace_id, tx.trace_id.to_string());
}

#[tokio::test]
async fn test_tracestate_is_forwarded() {
    let backend = common::start_recording_backend(200).await;
    let mut gateway = common::start_gateway(common::apm_config(), backend.addr).await;

    reqwest::Client::new()
        .get(gateway.url("/"))
        .header("traceparent", inbound_traceparent("01"))
        .header("tracestate", "es=s:1,vendor=x")
        .send()
        .await
        .unwrap();

    let _span = gateway.next_event().await;
    let _tx = gateway.next_event().await;
    assert_eq!(backend.last_request()["tracestate"], "es=s:1,vendor=x");
}

#[tokio::test]
async fn test_sample_rate_zero_never_samples_new_traces() {
    let backend = common::start_recording_backend(200).await;
    let apm = ApmConfig {
        transaction_sample_rate: 0.0,
        ..common::apm_config()
    };
    let mut gateway = common::start_gateway(apm, backend.addr).await;

    reqwest::get(gateway.url("/")).await.unwrap();

    let tx = gateway.next_event().await;
    assert!(!tx.as_transaction().unwrap().sampled);
    let (_, _, flags) = split_traceparent(&backend.last_request()["traceparent"]);
    assert_eq!(flags, "00");
    gateway.assert_no_more_events().await;
}

#[tokio::test]
async fn test_inactive_plugin_leaves_requests_alone() {
    let backend = common::start_recording_backend(200).await;
    let apm = ApmConfig {
        active: false,
        ..common::apm_config()
    };
    let mut gateway = common::start_gateway(apm, backend.addr).await;

    let res = reqwest::Client::new()
        .get(gateway.url("/"))
        .header("traceparent", inbound_traceparent("01"))
        .send()
        .await
        .unwrap();
    assert!(res.status().is_success());

    assert_eq!(backend.last_request()["traceparent"], inbound_traceparent("01"));
    gateway.assert_no_more_events().await;
}

#[tokio::test]
async fn test_unreachable_upstream_still_ends_trace() {
    // bind then drop to get a port nothing listens on
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let dead = listener.local_addr().unwrap();
    drop(listener);

    let mut gateway = common::start_gateway(common::apm_config(), dead).await;
    let res = reqwest::get(gateway.url("/")).await.unwrap();
    assert_eq!(res.status().as_u16(), 502);

    let span = gateway.next_event().await;
    let span = span.as_span().unwrap();
    assert_eq!(span.status_code(), Some(502));
    assert_eq!(span.outcome, Outcome::Failure);

    let tx = gateway.next_event().await;
    let tx = tx.as_transaction().unwrap();
    assert_eq!(tx.result.as_deref(), Some("HTTP 502"));
    assert_eq!(tx.outcome, Outcome::Failure);
    assert!(gateway.plugin.registry().is_empty());
}

#[tokio::test]
async fn test_upstream_timeout_still_ends_trace() {
    let silent = common::start_silent_backend().await;
    let timeouts = TimeoutConfig {
        connect_secs: 1,
        request_secs: 1,
    };
    let mut gateway =
        common::start_gateway_with_timeouts(common::apm_config(), silent, timeouts).await;

    let res = reqwest::Client::new()
        .get(gateway.url("/slow"))
        .header("traceparent", inbound_traceparent("01"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 504);

    let span = gateway.next_event().await;
    let span = span.as_span().unwrap();
    assert_eq!(span.status_code(), Some(504));
    assert_eq!(span.trace_id.to_string(), INBOUND_TRACE_ID);

    let tx = gateway.next_event().await;
    let tx = tx.as_transaction().unwrap();
    assert_eq!(tx.result.as_deref(), Some("HTTP 504"));
    assert_eq!(tx.outcome, Outcome::Failure);
    assert!(gateway.plugin.registry().is_empty());
    gateway.assert_no_more_events().await;
}

#[tokio::test]
async fn test_shutdown_stops_gateway() {
    let backend = common::start_recording_backend(200).await;
    let gateway = common::start_gateway(common::apm_config(), backend.addr).await;

    gateway.shutdown.trigger();
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert!(reqwest::get(gateway.url("/")).await.is_err());
}
