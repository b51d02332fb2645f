//! ---
//! gr_section: "02-telemetry"
//! gr_subsection: "module"
//! gr_type: "source"
//! gr_scope: "code"
//! gr_description: "Telemetry sources feeding the broadcast scheduler."
//! gr_version: "v0.1.0"
//! gr_owner: "tbd"
//! ---
//! Position and power sources plus the payloads they render.

pub mod error;
pub mod frames;
pub mod position;
pub mod power;

use gr_common::config::{GaugeKind, PositionConfig, PositionSourceKind, PowerConfig};

pub use error::TelemetryError;
pub use frames::{Payload, PositionFix, PowerReading};
pub use position::{PositionSource, SyntheticPosition};
pub use power::{FuelGauge, SimulatedFuelGauge, SysfsFuelGauge};

/// Build the configured position source.
pub fn position_source(config: &PositionConfig) -> Box<dyn PositionSource> {
    match config.source {
        PositionSourceKind::Synthetic => Box::new(SyntheticPosition::new(config.clone())),
    }
}

/// Open the configured fuel gauge.
pub fn open_gauge(config: &PowerConfig) -> Result<Box<dyn FuelGauge>, TelemetryError> {
    match config.gauge {
        GaugeKind::Simulated => Ok(Box::new(SimulatedFuelGauge::new(
            config.simulated_start_soc,
            config.simulated_drain_per_hour,
        ))),
        GaugeKind::Sysfs => Ok(Box::new(SysfsFuelGauge::open(&config.sysfs_path)?)),
    }
}
