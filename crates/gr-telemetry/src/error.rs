//! ---
//! gr_section: "02-telemetry"
//! gr_subsection: "module"
//! gr_type: "source"
//! gr_scope: "code"
//! gr_description: "Error type for telemetry sources."
//! gr_version: "v0.1.0"
//! gr_owner: "tbd"
//! ---
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("fuel gauge at {path} is unavailable: {reason}")]
    GaugeUnavailable { path: PathBuf, reason: String },
    #[error("telemetry read failed: {0}")]
    Read(String),
}
