//! ---
//! gr_section: "03-networking"
//! gr_subsection: "module"
//! gr_type: "source"
//! gr_scope: "code"
//! gr_description: "Network surface for the rover: control channel and file routes."
//! gr_version: "v0.1.0"
//! gr_owner: "tbd"
//! ---
//! One axum server carries the WebSocket control channel, the storage
//! volume's HTTP routes, `/api/status` and `/metrics`.

pub mod bind;
pub mod broadcast;
pub mod control;
mod http;
pub mod server;
mod websocket;

pub use bind::bind_with_retry;
pub use broadcast::FrameBroadcaster;
pub use control::{
    ClientId, ControlHandler, HealthStatus, ProducerStatus, StatusProvider, StatusSnapshot,
};
pub use server::{ServerBuilder, ServerHandle};
