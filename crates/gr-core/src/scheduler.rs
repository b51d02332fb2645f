//! ---
//! gr_section: "01-core-runtime"
//! gr_subsection: "module"
//! gr_type: "source"
//! gr_scope: "code"
//! gr_description: "Periodic producer tasks feeding the outbound channel."
//! gr_version: "v0.1.0"
//! gr_owner: "tbd"
//! ---
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use gr_common::metrics::LoopTimingReporter;
use gr_telemetry::{FuelGauge, PositionSource};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{info, warn};

use crate::message::OutboundMessage;
use crate::state::{BroadcastState, FrameKind, Producer};

/// Fuel gauge shared between the power producer and the health task.
pub type SharedGauge = Arc<Mutex<Box<dyn FuelGauge>>>;

/// Fixed-period ticker; late ticks push the schedule back instead of bursting.
#[derive(Debug)]
pub struct RateLimiter {
    interval: tokio::time::Interval,
}

impl RateLimiter {
    pub fn new(period: Duration) -> Self {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }

    pub async fn tick(&mut self) -> Instant {
        self.interval.tick().await
    }
}

/// Owns the two telemetry producers until they are spawned.
pub struct BroadcastScheduler {
    state: Arc<BroadcastState>,
    position: Box<dyn PositionSource>,
    position_period: Duration,
    gauge: Option<SharedGauge>,
    power_period: Duration,
}

impl BroadcastScheduler {
    pub fn new(
        state: Arc<BroadcastState>,
        position: Box<dyn PositionSource>,
        position_period: Duration,
        gauge: Option<SharedGauge>,
        power_period: Duration,
    ) -> Self {
        Self {
            state,
            position,
            position_period,
            gauge,
            power_period,
        }
    }

    /// Start one task per producer. A missing gauge means no power task.
    pub fn spawn(self, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::with_capacity(2);

        let position = Arc::new(Mutex::new(self.position));
        tasks.push(tokio::spawn(run_producer(
            Producer::Position,
            FrameKind::Position,
            self.position_period,
            self.state.clone(),
            shutdown.subscribe(),
            move || {
                let position = position.clone();
                async move {
                    let sample = position.lock().sample();
                    match sample {
                        Ok(fix) => Some(OutboundMessage::from(fix.to_message())),
                        Err(err) => {
                            warn!(producer = "position", error = %err, "position sample failed");
                            None
                        }
                    }
                }
            },
        )));

        match self.gauge {
            Some(gauge) => {
                let state = self.state.clone();
                tasks.push(tokio::spawn(run_producer(
                    Producer::Power,
                    FrameKind::Power,
                    self.power_period,
                    self.state.clone(),
                    shutdown.subscribe(),
                    move || read_power(gauge.clone(), state.clone()),
                )));
            }
            None => info!(producer = "power", "no fuel gauge; power producer not started"),
        }

        tasks
    }
}

/// Gauge drivers may touch the filesystem, so reads go to the blocking pool.
async fn read_power(gauge: SharedGauge, state: Arc<BroadcastState>) -> Option<OutboundMessage> {
    match tokio::task::spawn_blocking(move || gauge.lock().read()).await {
        Ok(Ok(reading)) => {
            state.metrics().set_battery_soc(reading.soc);
            Some(OutboundMessage::from(reading.to_message()))
        }
        Ok(Err(err)) => {
            warn!(producer = "power", error = %err, "fuel gauge read failed");
            None
        }
        Err(err) => {
            warn!(producer = "power", error = %err, "fuel gauge read task failed");
            None
        }
    }
}

async fn run_producer<F, Fut>(
    producer: Producer,
    kind: FrameKind,
    period: Duration,
    state: Arc<BroadcastState>,
    mut shutdown: broadcast::Receiver<()>,
    mut sample: F,
) where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Option<OutboundMessage>> + Send,
{
    let mut limiter = RateLimiter::new(period);
    let timing = LoopTimingReporter::new(period);
    info!(producer = kind.as_str(), period_ms = period.as_millis() as u64, "producer started");

    loop {
        tokio::select! {
            _ = limiter.tick() => {}
            _ = shutdown.recv() => break,
        }
        if !state.is_enabled(producer) {
            timing.reset();
            continue;
        }
        timing.record_tick();
        if let Some(message) = sample().await {
            // Rejections are logged and counted inside publish.
            let _ = state.publish(kind, &message);
        }
    }

    match timing.summary() {
        Some(summary) => info!(
            producer = kind.as_str(),
            mean_jitter_ms = summary.mean_ms,
            max_jitter_ms = summary.max_ms,
            ticks = summary.samples,
            "producer stopped"
        ),
        None => info!(producer = kind.as_str(), "producer stopped"),
    }
}
