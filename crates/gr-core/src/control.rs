//! ---
//! gr_section: "01-core-runtime"
//! gr_subsection: "module"
//! gr_type: "source"
//! gr_scope: "code"
//! gr_description: "Restart request latch shared by the dispatcher and the daemon."
//! gr_version: "v0.1.0"
//! gr_owner: "tbd"
//! ---
use std::sync::Arc;

use tokio::sync::watch;

/// One-shot latch raised by `{"mcu":"restart"}`.
#[derive(Debug, Clone)]
pub struct RestartSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for RestartSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl RestartSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the latch has been raised, including before the call.
    pub async fn requested(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|raised| *raised).await;
    }
}
