//! ---
//! gr_section: "01-core-runtime"
//! gr_subsection: "module"
//! gr_type: "source"
//! gr_scope: "code"
//! gr_description: "Shared broadcaster state and the serialised outbound path."
//! gr_version: "v0.1.0"
//! gr_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use gr_common::config::{OperatingMode, Units};
use gr_common::metrics::RoverMetrics;
use gr_net::{
    ClientId, FrameBroadcaster, HealthStatus, ProducerStatus, StatusProvider, StatusSnapshot,
};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::indicator::{IndicatorState, LedColor};
use crate::message::{FrameError, OutboundMessage};
use crate::session::{ConnectionRegistry, Session};

/// What an outbound frame carries, for metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Position,
    Power,
    Reply,
}

impl FrameKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameKind::Position => "position",
            FrameKind::Power => "power",
            FrameKind::Reply => "reply",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Producer {
    Position,
    Power,
}

/// Result of one health probe round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub checked_at: DateTime<Utc>,
    pub storage_ok: bool,
    pub gauge_ok: Option<bool>,
}

/// Run/pause switch for one producer. A retired producer never resumes.
#[derive(Debug)]
struct ProducerSwitch {
    enabled: AtomicBool,
    retired: AtomicBool,
}

impl ProducerSwitch {
    fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            retired: AtomicBool::new(false),
        }
    }

    fn resume(&self) {
        if !self.retired.load(Ordering::SeqCst) {
            self.enabled.store(true, Ordering::SeqCst);
        }
    }

    fn pause(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
        self.enabled.store(false, Ordering::SeqCst);
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
}

/// All mutable state shared by the dispatcher, producers and indicator.
#[derive(Debug)]
pub struct BroadcastState {
    registry: Mutex<ConnectionRegistry>,
    position: ProducerSwitch,
    power: ProducerSwitch,
    indicator: watch::Sender<IndicatorState>,
    outbound: Mutex<()>,
    broadcaster: FrameBroadcaster,
    metrics: RoverMetrics,
    max_frame_bytes: usize,
    version: String,
    degraded: Mutex<Vec<String>>,
    health: Mutex<Option<HealthReport>>,
}

impl BroadcastState {
    pub fn new(
        mode: OperatingMode,
        units: Units,
        version: String,
        broadcaster: FrameBroadcaster,
        metrics: RoverMetrics,
        max_frame_bytes: usize,
        start_enabled: bool,
    ) -> Self {
        let (indicator, _) = watch::channel(IndicatorState::solid(LedColor::Red));
        Self {
            registry: Mutex::new(ConnectionRegistry::new(mode, units)),
            position: ProducerSwitch::new(start_enabled),
            power: ProducerSwitch::new(start_enabled),
            indicator,
            outbound: Mutex::new(()),
            broadcaster,
            metrics,
            max_frame_bytes,
            version,
            degraded: Mutex::new(Vec::new()),
            health: Mutex::new(None),
        }
    }

    /// Version string reported on `operate:ready`.
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn metrics(&self) -> &RoverMetrics {
        &self.metrics
    }

    /// Largest outbound frame, in bytes.
    pub fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes
    }

    pub fn session(&self) -> Session {
        self.registry.lock().session().clone()
    }

    pub fn connected(&self) -> usize {
        self.registry.lock().connected()
    }

    pub fn client_connected(&self, client: ClientId) {
        let (indicator, connected) = {
            let mut registry = self.registry.lock();
            (registry.on_connect(client), registry.connected())
        };
        self.metrics.set_connected(connected);
        self.set_indicator(indicator);
    }

    pub fn client_disconnected(&self, client: ClientId) {
        let (indicator, connected) = {
            let mut registry = self.registry.lock();
            (registry.on_disconnect(client), registry.connected())
        };
        self.metrics.set_connected(connected);
        if let Some(indicator) = indicator {
            self.set_indicator(indicator);
        }
    }

    pub fn touch(&self, client: ClientId) {
        self.registry.lock().touch(client);
    }

    /// Enable both producers. Idempotent.
    pub fn resume_producers(&self) {
        self.position.resume();
        self.power.resume();
        debug!("producers resumed");
    }

    /// Disable both producers from their next tick on.
    pub fn pause_producers(&self) {
        self.position.pause();
        self.power.pause();
        debug!("producers paused");
    }

    /// Permanently silence one producer, e.g. after a failed peripheral init.
    pub fn disable_producer(&self, producer: Producer) {
        self.switch(producer).retire();
    }

    pub fn is_enabled(&self, producer: Producer) -> bool {
        self.switch(producer).is_enabled()
    }

    fn switch(&self, producer: Producer) -> &ProducerSwitch {
        match producer {
            Producer::Position => &self.position,
            Producer::Power => &self.power,
        }
    }

    pub fn set_indicator(&self, state: IndicatorState) {
        let previous = self.indicator.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "indicator transition");
        }
    }

    pub fn indicator(&self) -> IndicatorState {
        *self.indicator.borrow()
    }

    pub fn watch_indicator(&self) -> watch::Receiver<IndicatorState> {
        self.indicator.subscribe()
    }

    pub fn mark_degraded(&self, peripheral: impl Into<String>) {
        self.degraded.lock().push(peripheral.into());
    }

    pub fn degraded(&self) -> Vec<String> {
        self.degraded.lock().clone()
    }

    /// Store a health report, returning the previous one.
    pub fn record_health(&self, report: HealthReport) -> Option<HealthReport> {
        self.health.lock().replace(report)
    }

    pub fn health(&self) -> Option<HealthReport> {
        self.health.lock().clone()
    }

    /// Encode and broadcast one frame. Only one frame is encoded and queued
    /// at a time. Oversized frames are dropped, never truncated.
    pub fn publish(&self, kind: FrameKind, message: &OutboundMessage) -> Result<usize, FrameError> {
        let _guard = self.outbound.lock();
        let text = match message.encode(self.max_frame_bytes) {
            Ok(text) => text,
            Err(err) => {
                if matches!(err, FrameError::TooLarge { .. }) {
                    self.metrics.record_rejected();
                }
                warn!(kind = kind.as_str(), error = %err, "outbound frame dropped");
                return Err(err);
            }
        };
        debug!(kind = kind.as_str(), frame = %text, "outbound frame");
        let reached = self.broadcaster.send(text);
        self.metrics.record_sent(kind.as_str());
        Ok(reached)
    }
}

impl StatusProvider for BroadcastState {
    fn snapshot(&self) -> StatusSnapshot {
        let (session, connected) = {
            let registry = self.registry.lock();
            (registry.session().clone(), registry.connected())
        };
        StatusSnapshot {
            version: self.version.clone(),
            mode: session.mode.as_str().to_owned(),
            units: session.units.as_str().to_owned(),
            connected_clients: connected,
            active_client: session.active_client,
            producers: ProducerStatus {
                position: self.is_enabled(Producer::Position),
                power: self.is_enabled(Producer::Power),
            },
            indicator: self.indicator().to_string(),
            degraded: self.degraded(),
            health: self.health().map(|report| HealthStatus {
                checked_at: report.checked_at,
                storage_ok: report.storage_ok,
                gauge_ok: report.gauge_ok,
            }),
        }
    }
}
