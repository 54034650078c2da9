use std::sync::Arc;

use coach_core::Engine;
use tokio::sync::Notify;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    /// Wakes the inbound worker as soon as a webhook call queued a message.
    pub inbound_wake: Arc<Notify>,
}

impl AppState {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            inbound_wake: Arc::new(Notify::new()),
        }
    }
}
