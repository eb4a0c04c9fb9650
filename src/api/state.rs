//! Application state for the API server

use crate::Config;
use crate::store::JobStore;
use crate::worker::JobQueue;
use std::sync::Arc;

/// Shared application state accessible to all route handlers
///
/// Cloned for each request; every field is an `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Job records mirrored by the worker
    pub store: Arc<dyn JobStore>,

    /// Queue new jobs are published to; None makes the API read-only
    pub queue: Option<Arc<dyn JobQueue>>,

    /// Configuration (read-only)
    pub config: Arc<Config>,
}

impl AppState {
    /// Create a new AppState
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Option<Arc<dyn JobQueue>>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            store,
            queue,
            config,
        }
    }
}
