//! ---
//! gr_section: "03-networking"
//! gr_subsection: "module"
//! gr_type: "source"
//! gr_scope: "code"
//! gr_description: "Fan-out of outbound text frames to every connected client."
//! gr_version: "v0.1.0"
//! gr_owner: "tbd"
//! ---
use tokio::sync::broadcast;

/// Broadcasts encoded text frames to all connected clients.
#[derive(Debug, Clone)]
pub struct FrameBroadcaster {
    tx: broadcast::Sender<String>,
}

impl FrameBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Queue a frame for every subscriber. Returns the number of peers reached;
    /// zero when nobody is connected.
    pub fn send(&self, frame: String) -> usize {
        self.tx.send(frame).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }
}
