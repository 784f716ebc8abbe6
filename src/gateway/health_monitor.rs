//! Background task probing every catalog provider on an interval

use super::orchestrator::Orchestrator;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Periodically feeds active health checks into the SLA balancer
pub struct HealthMonitor {
    orchestrator: Arc<Orchestrator>,
    interval: Duration,
    shutdown_rx: mpsc::Receiver<()>,
}

impl HealthMonitor {
    pub fn new(orchestrator: Arc<Orchestrator>, interval: Duration) -> (Self, mpsc::Sender<()>) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let monitor = Self {
            orchestrator,
            interval,
            shutdown_rx,
        };

        (monitor, shutdown_tx)
    }

    /// Run until a shutdown signal arrives or the sender is dropped
    pub async fn run(mut self) {
        info!(interval_secs = self.interval.as_secs(), "Health monitor started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => break,
                _ = ticker.tick() => {
                    self.probe_all().await;
                }
            }
        }

        info!("Health monitor stopped");
    }

    /// Probe every provider once; returns how many reported healthy
    pub async fn probe_all(&self) -> usize {
        let mut healthy = 0;
        for provider in self.orchestrator.catalog().provider_names() {
            let ok = self.orchestrator.connector().health_check(&provider).await;
            self.orchestrator.record_health_check(&provider, ok);
            if ok {
                healthy += 1;
                debug!(provider = %provider, "Health check passed");
            } else {
                warn!(provider = %provider, "Health check failed");
            }
        }
        healthy
    }
}
