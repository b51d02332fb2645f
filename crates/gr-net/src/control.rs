//! ---
//! gr_section: "03-networking"
//! gr_subsection: "module"
//! gr_type: "source"
//! gr_scope: "code"
//! gr_description: "Seams between the network surface and the broadcaster core."
//! gr_version: "v0.1.0"
//! gr_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier assigned to each WebSocket connection, starting at 1.
pub type ClientId = u64;

/// Receives control-channel events. Calls run on the connection task and
/// must not block for long.
pub trait ControlHandler: Send + Sync + 'static {
    fn on_connect(&self, client: ClientId);

    fn on_disconnect(&self, client: ClientId);

    /// One inbound text frame. Replies go out through the shared broadcaster.
    fn on_text(&self, client: ClientId, text: &str);
}

/// Provides snapshots for `/api/status`.
pub trait StatusProvider: Send + Sync + 'static {
    fn snapshot(&self) -> StatusSnapshot;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusSnapshot {
    pub version: String,
    pub mode: String,
    pub units: String,
    pub connected_clients: usize,
    pub active_client: Option<ClientId>,
    pub producers: ProducerStatus,
    pub indicator: String,
    /// Peripherals that failed to initialise at startup.
    pub degraded: Vec<String>,
    pub health: Option<HealthStatus>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProducerStatus {
    pub position: bool,
    pub power: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthStatus {
    pub checked_at: DateTime<Utc>,
    pub storage_ok: bool,
    /// `None` when no fuel gauge is attached.
    pub gauge_ok: Option<bool>,
}
