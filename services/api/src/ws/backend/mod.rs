//! Backend Connectors
//!
//! The relay talks to exactly one kind of agent per process, chosen at
//! startup: an in-process agent (`local`) or a managed remote session over
//! its own WebSocket (`remote`).

pub mod local;
pub mod remote;

use livebridge_core::backend::{AgentBackend, RemoteConnector};
use std::{sync::Arc, time::Duration};

/// How sessions reach the agent.
#[derive(Clone)]
pub enum BackendStrategy {
    Local {
        agent: Arc<dyn AgentBackend>,
        /// Pause before a local session announces readiness.
        warmup: Duration,
    },
    Remote {
        connector: Arc<dyn RemoteConnector>,
    },
}

impl BackendStrategy {
    pub fn mode_name(&self) -> &'static str {
        match self {
            BackendStrategy::Local { .. } => "local",
            BackendStrategy::Remote { .. } => "remote",
        }
    }
}
