//! ---
//! gr_section: "01-core-runtime"
//! gr_subsection: "module"
//! gr_type: "source"
//! gr_scope: "code"
//! gr_description: "Periodic peripheral health probe."
//! gr_version: "v0.1.0"
//! gr_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use gr_common::storage::StorageVolume;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::scheduler::{RateLimiter, SharedGauge};
use crate::state::{BroadcastState, HealthReport};

/// Probes storage and the fuel gauge; reports, never repairs.
pub struct HealthMonitor {
    state: Arc<BroadcastState>,
    storage: StorageVolume,
    gauge: Option<SharedGauge>,
    interval: Duration,
}

impl HealthMonitor {
    pub fn new(
        state: Arc<BroadcastState>,
        storage: StorageVolume,
        gauge: Option<SharedGauge>,
        interval: Duration,
    ) -> Self {
        Self {
            state,
            storage,
            gauge,
            interval,
        }
    }

    /// Run one probe round and store the report.
    pub fn check(&self) -> HealthReport {
        let storage_ok = self.storage.probe().is_ok();
        let gauge_ok = self.gauge.as_ref().map(|gauge| gauge.lock().probe().is_ok());
        let report = HealthReport {
            checked_at: Utc::now(),
            storage_ok,
            gauge_ok,
        };
        let previous = self.state.record_health(report.clone());
        log_transition("storage", previous.as_ref().map(|r| r.storage_ok), Some(storage_ok));
        log_transition("fuel_gauge", previous.and_then(|r| r.gauge_ok), gauge_ok);
        report
    }

    /// Probe on every interval. Probes touch the filesystem, so each round
    /// runs on the blocking pool.
    pub fn spawn(self, shutdown: &broadcast::Sender<()>) -> JoinHandle<()> {
        let mut shutdown = shutdown.subscribe();
        let monitor = Arc::new(self);
        tokio::spawn(async move {
            let mut limiter = RateLimiter::new(monitor.interval);
            loop {
                tokio::select! {
                    _ = limiter.tick() => {}
                    _ = shutdown.recv() => break,
                }
                let round = monitor.clone();
                if let Err(err) = tokio::task::spawn_blocking(move || round.check()).await {
                    warn!(error = %err, "health probe task failed");
                }
            }
        })
    }
}

fn log_transition(peripheral: &str, previous: Option<bool>, current: Option<bool>) {
    match (previous.unwrap_or(true), current) {
        (true, Some(false)) => warn!(peripheral, "health check failed"),
        (false, Some(true)) => info!(peripheral, "health check recovered"),
        _ => {}
    }
}
