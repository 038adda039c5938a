use super::{
    RelayError,
    protocol::{ClientOutlet, ClientStream},
    reconnect::run_with_reconnect,
};
use crate::state::AppState;
use axum::{
    extract::{
        Query, State,
        ws::{WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::StreamExt;
use livebridge_core::{codec::SetupInfo, event::AgentEvent};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, instrument};
use uuid::Uuid;

/// Query parameters accepted on `/ws`.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    pub user_id: Option<String>,
    pub run_id: Option<String>,
}

/// Who a connection belongs to. Survives session rebuilds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    pub run_id: String,
    pub user_id: Option<String>,
}

impl SessionIdentity {
    pub fn from_params(params: ConnectParams) -> Self {
        Self {
            run_id: params
                .run_id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            user_id: params.user_id.filter(|id| !id.is_empty()),
        }
    }

    /// Takes over whatever a setup frame announces; absent fields are kept.
    pub fn apply_setup(&mut self, setup: &SetupInfo) {
        if let Some(run_id) = setup.run_id.as_ref().filter(|id| !id.is_empty()) {
            self.run_id = run_id.clone();
        }
        if let Some(user_id) = setup.user_id.as_ref().filter(|id| !id.is_empty()) {
            self.user_id = Some(user_id.clone());
        }
    }
}

/// Shared, updatable identity of one connection.
pub type IdentityHandle = Arc<watch::Sender<SessionIdentity>>;

pub fn identity_handle(identity: SessionIdentity) -> IdentityHandle {
    let (sender, _) = watch::channel(identity);
    Arc::new(sender)
}

/// Upgrades to a WebSocket and relays it to the configured agent backend.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, params, state))
}

#[instrument(name = "ws_session", skip_all, fields(run_id, user_id, mode))]
async fn handle_socket(socket: WebSocket, params: ConnectParams, state: Arc<AppState>) {
    let identity = SessionIdentity::from_params(params);
    let span = tracing::Span::current();
    span.record("run_id", identity.run_id.as_str());
    if let Some(user_id) = &identity.user_id {
        span.record("user_id", user_id.as_str());
    }
    span.record("mode", state.backend.mode_name());
    info!("WebSocket connection accepted.");

    let (sink, stream) = socket.split();
    let outlet = ClientOutlet::new(sink);
    let mut inlet: ClientStream = Box::pin(stream);

    // Already logged and reported to the client.
    let _ = serve_connection(&state, identity, outlet, &mut inlet).await;
}

/// Runs one accepted connection until it ends, then closes the socket.
///
/// Terminal failures are reported to the client as an `error` frame unless
/// the client is gone or already heard about it from the agent.
pub async fn serve_connection(
    state: &AppState,
    identity: SessionIdentity,
    outlet: ClientOutlet,
    inlet: &mut ClientStream,
) -> Result<(), RelayError> {
    let identity = identity_handle(identity);
    let result = run_with_reconnect(
        &state.retry_policy,
        &state.backend,
        &outlet,
        &identity,
        inlet,
    )
    .await;

    match &result {
        Ok(()) => info!("Session closed."),
        Err(e) => {
            error!(error = %e, "Session terminated.");
            if let Some(message) = e.client_message() {
                if let Err(send_err) = outlet.send_event(AgentEvent::Error(message)).await {
                    info!(error = %send_err, "Could not report failure to client.");
                }
            }
        }
    }
    outlet.close().await;
    result
}
