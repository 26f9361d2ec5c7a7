//! The shared application context.

use std::sync::Arc;

use crate::auth::AuthGate;
use crate::metrics::Metrics;
use crate::store::WorkerStore;

/// Everything a request needs, built once at startup and shared behind an
/// `Arc` by every connection task.
pub struct App {
    pub store: Arc<dyn WorkerStore>,
    pub auth: AuthGate,
    pub metrics: Metrics,
}

impl App {
    pub fn new(store: Arc<dyn WorkerStore>, auth: AuthGate, metrics: Metrics) -> Self {
        Self { store, auth, metrics }
    }
}
