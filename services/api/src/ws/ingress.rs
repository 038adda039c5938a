//! Ingress Pump: client frames into the session queue.

use super::{RelayError, protocol::ClientStream, session::IdentityHandle};
use axum::extract::ws::Message;
use futures_util::StreamExt;
use livebridge_core::codec::{
    InboundFrame, LiveRequest, classify_inbound_binary, classify_inbound_text,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Reads client frames until the client leaves or sends something
/// unparseable.
///
/// Setup frames update the session identity and stay here; everything else
/// is queued for the backend in arrival order. Returns `Ok` when the client
/// disconnects or the backend stops consuming.
pub async fn run_ingress(
    inlet: &mut ClientStream,
    queue: mpsc::Sender<LiveRequest>,
    identity: &IdentityHandle,
) -> Result<(), RelayError> {
    while let Some(received) = inlet.next().await {
        let message = match received {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Error receiving from client WebSocket.");
                return Err(RelayError::ClientSocket(e.to_string()));
            }
        };

        let frame = match message {
            Message::Text(text) => classify_inbound_text(text.as_str()).map_err(|e| {
                error!(error = %e, "Malformed client frame; ending session.");
                RelayError::from(e)
            })?,
            Message::Binary(data) => classify_inbound_binary(data),
            Message::Close(close_frame) => {
                info!(?close_frame, "Client sent close frame.");
                return Ok(());
            }
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        match frame {
            InboundFrame::Setup(setup) => {
                info!(run_id = ?setup.run_id, user_id = ?setup.user_id, "Received setup frame.");
                identity.send_modify(|current| current.apply_setup(&setup));
                let current = identity.borrow().clone();
                let span = tracing::Span::current();
                span.record("run_id", current.run_id.as_str());
                if let Some(user_id) = &current.user_id {
                    span.record("user_id", user_id.as_str());
                }
            }
            other => {
                debug!(kind = other.kind(), "Queueing client frame.");
                if let Some(request) = other.into_request() {
                    if queue.send(request).await.is_err() {
                        debug!("Backend stopped consuming; ending ingress.");
                        return Ok(());
                    }
                }
            }
        }
    }

    info!("Client disconnected.");
    Ok(())
}
