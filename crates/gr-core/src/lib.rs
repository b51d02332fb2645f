//! ---
//! gr_section: "01-core-runtime"
//! gr_subsection: "module"
//! gr_type: "source"
//! gr_scope: "code"
//! gr_description: "Message-driven telemetry broadcaster core."
//! gr_version: "v0.1.0"
//! gr_owner: "tbd"
//! ---
//! Control-frame dispatch, periodic telemetry producers, the status
//! indicator and the runtime that wires them to the network surface.

pub mod control;
pub mod dispatcher;
pub mod health;
pub mod indicator;
pub mod message;
pub mod runtime;
pub mod scheduler;
pub mod session;
pub mod state;

pub use control::RestartSignal;
pub use dispatcher::{CommandDispatcher, Dispatch};
pub use health::HealthMonitor;
pub use indicator::{IndicatorState, Led, LedColor, LogLed};
pub use message::{FrameError, InboundCommand, OutboundMessage};
pub use runtime::{RoverRuntime, RuntimeHandle, StartupReport};
pub use scheduler::{BroadcastScheduler, RateLimiter, SharedGauge};
pub use session::{ConnectionRegistry, Session};
pub use state::{BroadcastState, FrameKind, HealthReport, Producer};
