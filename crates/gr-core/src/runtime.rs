//! ---
//! gr_section: "01-core-runtime"
//! gr_subsection: "module"
//! gr_type: "source"
//! gr_scope: "code"
//! gr_description: "Runtime assembly and lifecycle control for the broadcaster."
//! gr_version: "v0.1.0"
//! gr_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use gr_common::config::AppConfig;
use gr_common::metrics::RoverMetrics;
use gr_common::storage::StorageVolume;
use gr_common::version::VersionInfo;
use gr_net::{ControlHandler, FrameBroadcaster, ServerBuilder, ServerHandle, StatusProvider};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::control::RestartSignal;
use crate::dispatcher::CommandDispatcher;
use crate::health::HealthMonitor;
use crate::indicator::{run_indicator, IndicatorState, Led, LedColor, LogLed};
use crate::scheduler::{BroadcastScheduler, SharedGauge};
use crate::state::{BroadcastState, Producer};

/// Peripherals that came up degraded.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct StartupReport {
    pub degraded: Vec<String>,
}

impl StartupReport {
    pub fn is_clean(&self) -> bool {
        self.degraded.is_empty()
    }
}

/// Builds and starts one broadcaster runtime.
pub struct RoverRuntime {
    config: Arc<AppConfig>,
    metrics: RoverMetrics,
    led: Box<dyn Led>,
}

impl RoverRuntime {
    pub fn new(config: AppConfig, metrics: RoverMetrics) -> Self {
        Self {
            config: Arc::new(config),
            metrics,
            led: Box::new(LogLed::default()),
        }
    }

    /// Replace the log-only indicator with a real sink.
    pub fn with_led(mut self, led: Box<dyn Led>) -> Self {
        self.led = led;
        self
    }

    /// Open storage and peripherals, bind the listener and spawn every task.
    pub async fn start(self) -> Result<RuntimeHandle> {
        let config = self.config;
        config.validate().context("invalid configuration")?;
        self.metrics.record_start();

        let storage = StorageVolume::from_config(&config.storage)
            .context("storage volume unavailable")?;

        let version = VersionInfo::current();
        let broadcaster = FrameBroadcaster::new(config.network.broadcast_capacity);
        let state = Arc::new(BroadcastState::new(
            config.session.mode,
            config.session.units,
            version.short(),
            broadcaster.clone(),
            self.metrics.clone(),
            config.network.max_frame_bytes,
            config.telemetry.start_enabled,
        ));

        let mut report = StartupReport::default();
        let position = gr_telemetry::position_source(&config.telemetry.position);
        let gauge: Option<SharedGauge> = match gr_telemetry::open_gauge(&config.telemetry.power) {
            Ok(gauge) => {
                info!(gauge = gauge.name(), "fuel gauge ready");
                Some(Arc::new(Mutex::new(gauge)))
            }
            Err(err) if config.telemetry.power.required => {
                return Err(err).context("fuel gauge is required but unavailable");
            }
            Err(err) => {
                warn!(error = %err, "fuel gauge unavailable; power producer disabled");
                state.disable_producer(Producer::Power);
                state.mark_degraded("fuel_gauge");
                report.degraded.push("fuel_gauge".to_owned());
                None
            }
        };
        info!(source = position.name(), "position source ready");

        let (shutdown_tx, _) = broadcast::channel(4);
        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(run_indicator(
            self.led,
            state.watch_indicator(),
            config.indicator.clone(),
            shutdown_tx.subscribe(),
        )));
        state.set_indicator(IndicatorState::solid(LedColor::Yellow));

        let restart = RestartSignal::new();
        let dispatcher = Arc::new(CommandDispatcher::new(
            state.clone(),
            storage.clone(),
            config.dispatch.policy,
            config.storage.listing_limit_bytes,
            restart.clone(),
        ));

        let handler: Arc<dyn ControlHandler> = dispatcher;
        let status: Arc<dyn StatusProvider> = state.clone();
        let mut builder = ServerBuilder::new(
            config.network.clone(),
            storage.clone(),
            broadcaster,
            handler,
            status,
        );
        if config.metrics.enabled {
            builder = builder.with_metrics(self.metrics.clone());
        }
        let server = match builder.spawn().await {
            Ok(server) => server,
            Err(err) => {
                let _ = shutdown_tx.send(());
                return Err(err.context("rover server failed to start"));
            }
        };

        tasks.extend(
            BroadcastScheduler::new(
                state.clone(),
                position,
                config.telemetry.position.period,
                gauge.clone(),
                config.telemetry.power.period,
            )
            .spawn(&shutdown_tx),
        );
        tasks.push(
            HealthMonitor::new(state.clone(), storage, gauge, config.health.interval)
                .spawn(&shutdown_tx),
        );

        info!(
            address = %server.local_addr(),
            version = %version.short(),
            mode = config.session.mode.as_str(),
            units = config.session.units.as_str(),
            degraded = ?report.degraded,
            "rover runtime started"
        );

        Ok(RuntimeHandle {
            config,
            state,
            server,
            tasks,
            shutdown: shutdown_tx,
            restart,
            report,
        })
    }
}

/// Handle to a running runtime.
pub struct RuntimeHandle {
    config: Arc<AppConfig>,
    state: Arc<BroadcastState>,
    server: ServerHandle,
    tasks: Vec<JoinHandle<()>>,
    shutdown: broadcast::Sender<()>,
    restart: RestartSignal,
    report: StartupReport,
}

impl RuntimeHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn state(&self) -> Arc<BroadcastState> {
        self.state.clone()
    }

    pub fn startup_report(&self) -> &StartupReport {
        &self.report
    }

    /// Resolves once a client has sent `{"mcu":"restart"}`.
    pub async fn restart_requested(&self) {
        self.restart.requested().await;
    }

    /// Stop producers and the indicator, then close every client.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown.send(());
        let server = self.server.shutdown().await;
        for task in self.tasks {
            if let Err(err) = task.await {
                error!(error = %err, "runtime task ended abnormally");
            }
        }
        server?;
        info!("rover runtime stopped");
        Ok(())
    }
}
