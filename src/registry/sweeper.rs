//! Background TTL sweep of the registry.
//!
//! # Responsibilities
//! - Periodically evict transactions whose response phase never ran
//! - Stop when shutdown is broadcast

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::broadcast;
use tokio::time;

use crate::registry::store::ActiveTraceRegistry;

pub struct RegistrySweeper {
    registry: Arc<ActiveTraceRegistry>,
    ttl: Duration,
    interval: Duration,
}

impl RegistrySweeper {
    pub fn new(registry: Arc<ActiveTraceRegistry>, ttl: Duration, interval: Duration) -> Self {
        Self {
            registry,
            ttl,
            interval,
        }
    }

    /// Run one sweep now.
    pub fn sweep(&self) -> usize {
        let evicted = self.registry.evict_older_than(self.ttl, SystemTime::now());
        if evicted > 0 {
            tracing::info!(
                evicted,
                remaining = self.registry.len(),
                "Registry sweep evicted stale transactions"
            );
        }
        evicted
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            ttl_secs = self.ttl.as_secs(),
            interval_secs = self.interval.as_secs(),
            "Registry sweeper starting"
        );

        let mut ticker = time::interval(self.interval);
        // first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep();
                }
                _ = shutdown.recv() => {
                    tracing::info!("Registry sweeper received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}
