//! ---
//! gr_section: "01-core-runtime"
//! gr_subsection: "module"
//! gr_type: "source"
//! gr_scope: "code"
//! gr_description: "Shared primitives and utilities for the rover runtime."
//! gr_version: "v0.1.0"
//! gr_owner: "tbd"
//! ---
//! Shared building blocks for the Ghost Rover workspace: configuration
//! loading, tracing setup, version metadata, the storage volume and metrics.

pub mod config;
pub mod logging;
pub mod metrics;
pub mod storage;
pub mod version;

pub use config::{
    AppConfig, BindRetryConfig, DispatchPolicy, GaugeKind, IndicatorConfig, LoadedAppConfig,
    LoggingConfig, NetworkConfig, OperatingMode, PositionConfig, PowerConfig, RetryPolicy,
    StepRange, StorageConfig, TelemetryConfig, Units,
};
pub use logging::{init_tracing, LogFormat};
pub use metrics::{LoopTimingReporter, RoverMetrics, SharedRegistry};
pub use storage::{StorageError, StorageVolume};
pub use version::VersionInfo;
