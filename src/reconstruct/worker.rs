//! Background task feeding finished requests' log records to the reconstructor.

use tokio::sync::{broadcast, mpsc};

use crate::reconstruct::record::LogRecord;
use crate::reconstruct::reconstructor::Reconstructor;

pub struct ReconstructionWorker {
    reconstructor: Reconstructor,
    records: mpsc::UnboundedReceiver<LogRecord>,
}

impl ReconstructionWorker {
    pub fn new(reconstructor: Reconstructor, records: mpsc::UnboundedReceiver<LogRecord>) -> Self {
        Self {
            reconstructor,
            records,
        }
    }

    /// Process records until every sender is gone or shutdown is signalled.
    /// Records already queued at shutdown are still processed.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!("Log reconstruction worker started");

        loop {
            tokio::select! {
                record = self.records.recv() => match record {
                    Some(record) => {
                        self.reconstructor.process(&record);
                    }
                    None => break,
                },
                _ = shutdown.recv() => {
                    let mut drained = 0usize;
                    while let Ok(record) = self.records.try_recv() {
                        self.reconstructor.process(&record);
                        drained += 1;
                    }
                    tracing::info!(drained, "Log reconstruction worker shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apm::{ChannelReporter, Tracer};
    use crate::config::ApmConfig;
    use std::sync::Arc;

    const RECORD: &str = r#"{
        "started_at": 1700000000000,
        "latencies": {"request": 120, "kong": 20, "proxy": 100},
        "request": {"method": "GET", "url": "http://gw:8000/a",
                    "headers": {"traceparent": "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01"}},
        "response": {"status": 200},
        "service": {"host": "up", "port": 80}
    }"#;

    #[tokio::test]
    async fn test_worker_drains_queue_on_shutdown() {
        let (reporter, mut events) = ChannelReporter::new();
        let config = ApmConfig {
            active: true,
            ..ApmConfig::default()
        };
        let tracer = Arc::new(Tracer::new(&config, Arc::new(reporter)).unwrap());
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        for _ in 0..3 {
            tx.send(LogRecord::from_json(RECORD).unwrap()).unwrap();
        }
        shutdown_tx.send(()).unwrap();

        ReconstructionWorker::new(Reconstructor::new(tracer, config.prior_hop_header), rx)
            .run(shutdown_rx)
            .await;

        let mut count = 0;
        while events.try_recv().is_ok() {
            count += 1;
        }
        assert_eq!(count, 6);
    }
}
