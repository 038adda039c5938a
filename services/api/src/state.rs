//! Shared Application State
//!
//! Built once at startup and handed to every handler.

use crate::ws::backend::BackendStrategy;
use livebridge_core::retry::RetryPolicy;

/// Everything a connection needs to reach the agent.
#[derive(Clone)]
pub struct AppState {
    pub backend: BackendStrategy,
    pub retry_policy: RetryPolicy,
}
