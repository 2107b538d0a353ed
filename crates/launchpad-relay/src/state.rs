//! Application state.

use std::sync::Arc;

use crate::hub::RelayHub;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<RelayHub>,
}

impl AppState {
    pub fn new(hub: Arc<RelayHub>) -> Self {
        Self { hub }
    }
}
