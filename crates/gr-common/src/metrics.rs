//! ---
//! gr_section: "02-telemetry"
//! gr_subsection: "module"
//! gr_type: "source"
//! gr_scope: "code"
//! gr_description: "Prometheus counters and producer loop timing."
//! gr_version: "v0.1.0"
//! gr_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use parking_lot::Mutex;
use prometheus::{Gauge, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;

/// Shared registry type used across the workspace.
pub type SharedRegistry = Arc<Registry>;

pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Counters and gauges recorded by the broadcaster.
#[derive(Clone)]
pub struct RoverMetrics {
    registry: SharedRegistry,
    frames_sent: IntCounterVec,
    frames_rejected: IntCounter,
    inbound_frames: IntCounterVec,
    connected_clients: IntGauge,
    battery_soc: Gauge,
    runtime_starts: IntCounter,
}

impl std::fmt::Debug for RoverMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoverMetrics")
            .field("connected_clients", &self.connected_clients.get())
            .finish_non_exhaustive()
    }
}

impl RoverMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let frames_sent = IntCounterVec::new(
            Opts::new("gr_frames_sent_total", "Outbound frames broadcast, by kind"),
            &["kind"],
        )?;
        registry.register(Box::new(frames_sent.clone()))?;

        let frames_rejected = IntCounter::with_opts(Opts::new(
            "gr_frames_rejected_total",
            "Outbound frames dropped because they exceeded the frame size limit",
        ))?;
        registry.register(Box::new(frames_rejected.clone()))?;

        let inbound_frames = IntCounterVec::new(
            Opts::new("gr_inbound_frames_total", "Inbound control frames, by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(inbound_frames.clone()))?;

        let connected_clients = IntGauge::with_opts(Opts::new(
            "gr_connected_clients",
            "WebSocket clients currently connected",
        ))?;
        registry.register(Box::new(connected_clients.clone()))?;

        let battery_soc = Gauge::with_opts(Opts::new(
            "gr_battery_soc_percent",
            "Last battery state of charge reported by the fuel gauge",
        ))?;
        registry.register(Box::new(battery_soc.clone()))?;

        let runtime_starts = IntCounter::with_opts(Opts::new(
            "gr_runtime_starts_total",
            "Number of times the broadcaster runtime has started",
        ))?;
        registry.register(Box::new(runtime_starts.clone()))?;

        Ok(Self {
            registry,
            frames_sent,
            frames_rejected,
            inbound_frames,
            connected_clients,
            battery_soc,
            runtime_starts,
        })
    }

    /// Metrics on a private registry, for tests and embedded use.
    pub fn unregistered() -> Result<Self> {
        Self::new(new_registry())
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn record_sent(&self, kind: &str) {
        self.frames_sent.with_label_values(&[kind]).inc();
    }

    pub fn record_rejected(&self) {
        self.frames_rejected.inc();
    }

    pub fn record_inbound(&self, outcome: &str) {
        self.inbound_frames.with_label_values(&[outcome]).inc();
    }

    pub fn set_connected(&self, count: usize) {
        self.connected_clients.set(count as i64);
    }

    pub fn set_battery_soc(&self, soc: f64) {
        self.battery_soc.set(soc);
    }

    pub fn record_start(&self) {
        self.runtime_starts.inc();
    }

    pub fn sent(&self, kind: &str) -> u64 {
        self.frames_sent.with_label_values(&[kind]).get()
    }

    pub fn rejected(&self) -> u64 {
        self.frames_rejected.get()
    }

    pub fn inbound(&self, outcome: &str) -> u64 {
        self.inbound_frames.with_label_values(&[outcome]).get()
    }

    /// Text exposition of every family in the registry.
    pub fn render(&self) -> Result<String> {
        let families = self.registry.gather();
        Ok(TextEncoder::new().encode_to_string(&families)?)
    }
}

/// Running jitter totals; constant size however long the loop runs.
#[derive(Debug, Default)]
pub struct JitterHistogram {
    totals: Mutex<JitterTotals>,
}

#[derive(Debug, Default, Clone, Copy)]
struct JitterTotals {
    count: u64,
    sum_ms: f64,
    max_ms: f64,
}

impl JitterHistogram {
    pub fn record(&self, jitter: Duration) {
        let jitter_ms = jitter.as_secs_f64() * 1_000.0;
        let mut totals = self.totals.lock();
        totals.count += 1;
        totals.sum_ms += jitter_ms;
        totals.max_ms = totals.max_ms.max(jitter_ms);
    }

    pub fn summary(&self) -> Option<JitterSummary> {
        let totals = *self.totals.lock();
        if totals.count == 0 {
            return None;
        }
        Some(JitterSummary {
            mean_ms: totals.sum_ms / totals.count as f64,
            max_ms: totals.max_ms,
            samples: totals.count,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JitterSummary {
    pub mean_ms: f64,
    pub max_ms: f64,
    pub samples: u64,
}

/// Measures producer tick spacing against the configured period.
#[derive(Debug)]
pub struct LoopTimingReporter {
    target_interval: Duration,
    last_tick: Mutex<Option<Instant>>,
    histogram: JitterHistogram,
}

impl LoopTimingReporter {
    pub fn new(target_interval: Duration) -> Self {
        Self {
            target_interval,
            last_tick: Mutex::new(None),
            histogram: JitterHistogram::default(),
        }
    }

    pub fn record_tick(&self) {
        let mut last_tick = self.last_tick.lock();
        let now = Instant::now();
        if let Some(previous) = *last_tick {
            let actual = now.duration_since(previous);
            let jitter = if actual > self.target_interval {
                actual - self.target_interval
            } else {
                self.target_interval - actual
            };
            self.histogram.record(jitter);
        }
        *last_tick = Some(now);
    }

    /// Forget the previous tick, e.g. after a pause.
    pub fn reset(&self) {
        *self.last_tick.lock() = None;
    }

    pub fn summary(&self) -> Option<JitterSummary> {
        self.histogram.summary()
    }
}
