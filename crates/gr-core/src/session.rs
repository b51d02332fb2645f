//! ---
//! gr_section: "01-core-runtime"
//! gr_subsection: "module"
//! gr_type: "source"
//! gr_scope: "code"
//! gr_description: "Operator session and connection registry."
//! gr_version: "v0.1.0"
//! gr_owner: "tbd"
//! ---
use std::collections::BTreeSet;

use gr_common::config::{OperatingMode, Units};
use gr_net::ClientId;

use crate::indicator::{IndicatorState, LedColor};

/// The operator's control channel. One operator at a time; the most recent
/// client to speak wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub active_client: Option<ClientId>,
    pub mode: OperatingMode,
    pub units: Units,
}

/// Tracks open connections and the active client.
#[derive(Debug)]
pub struct ConnectionRegistry {
    session: Session,
    connected: BTreeSet<ClientId>,
}

impl ConnectionRegistry {
    pub fn new(mode: OperatingMode, units: Units) -> Self {
        Self {
            session: Session {
                active_client: None,
                mode,
                units,
            },
            connected: BTreeSet::new(),
        }
    }

    /// Record a new client; the indicator goes solid green.
    pub fn on_connect(&mut self, client: ClientId) -> IndicatorState {
        self.connected.insert(client);
        self.session.active_client = Some(client);
        IndicatorState::solid(LedColor::Green)
    }

    /// Forget a client. Returns solid yellow once nobody is left.
    pub fn on_disconnect(&mut self, client: ClientId) -> Option<IndicatorState> {
        self.connected.remove(&client);
        if self.session.active_client == Some(client) {
            self.session.active_client = None;
        }
        self.connected
            .is_empty()
            .then(|| IndicatorState::solid(LedColor::Yellow))
    }

    /// A control frame arrived from `client`.
    pub fn touch(&mut self, client: ClientId) {
        self.session.active_client = Some(client);
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn connected(&self) -> usize {
        self.connected.len()
    }
}
