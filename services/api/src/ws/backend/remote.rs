//! Remote connector: a managed agent session over its own WebSocket.
//!
//! Opening a session sends a `setup` naming the agent resource and waits for
//! `setupComplete`. Once open, two pumps run until either ends: queued client
//! requests go out (the first one wrapped with the user id), and remote events
//! come back unwrapped and normalized for the client.

use crate::{
    config::RemoteTarget,
    ws::{RelayError, protocol::ClientOutlet, session::IdentityHandle},
};
use async_trait::async_trait;
use futures_util::{SinkExt, Stream, StreamExt, future};
use livebridge_core::{
    backend::{BackendError, EventStream, RemoteConnector, RemoteLink},
    codec::{FirstMessageEnvelope, LiveRequest, unwrap_remote},
    event::AgentEvent,
};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        Error as WsError,
        client::IntoClientRequest,
        http::HeaderValue,
        protocol::{CloseFrame, Message as WsMessage, frame::coding::CloseCode},
    },
};
use tracing::{debug, info, warn};

const STREAM_METHOD: &str = "bidi_stream_query";

/// Opens a remote session, mapping connector failures onto relay errors.
pub async fn open_remote(connector: &dyn RemoteConnector) -> Result<RemoteLink, RelayError> {
    let link = connector.open().await.map_err(|e| {
        warn!(error = %e, "Failed to open remote agent session.");
        RelayError::Backend(e.to_string())
    })?;
    info!("Remote agent session is open.");
    Ok(link)
}

/// Pumps one open remote session until either direction ends.
pub async fn run_remote(
    link: RemoteLink,
    mut queue: mpsc::Receiver<LiveRequest>,
    outlet: ClientOutlet,
    identity: IdentityHandle,
) -> Result<(), RelayError> {
    let RemoteLink {
        mut outbound,
        mut inbound,
    } = link;

    let forward = async {
        let mut envelope = FirstMessageEnvelope::new();
        while let Some(request) = queue.recv().await {
            let user_id = identity.borrow().user_id.clone();
            let payload = envelope.wrap(request.into_json(), user_id.as_deref());
            outbound.send(payload).await?;
        }
        debug!("Session queue closed.");
        Ok::<(), RelayError>(())
    };

    let relay = async {
        while let Some(response) = inbound.next().await {
            let event = AgentEvent::normalize(unwrap_remote(response?));
            if let AgentEvent::Error(message) = &event {
                warn!(%message, "Remote agent reported an error.");
            }
            outlet.send_event(event).await?;
        }
        info!("Remote agent closed the session normally.");
        Ok::<(), RelayError>(())
    };

    tokio::select! {
        result = forward => result,
        result = relay => result,
    }
}

// --- Tungstenite Connector ---

/// Connects to a remote agent endpoint with `tokio-tungstenite`.
pub struct TungsteniteConnector {
    target: RemoteTarget,
    access_token: Option<String>,
}

impl TungsteniteConnector {
    pub fn new(target: RemoteTarget, access_token: Option<String>) -> Self {
        Self {
            target,
            access_token,
        }
    }

    fn setup_message(&self) -> Value {
        json!({
            "setup": {
                "name": self.target.resource,
                "class_method": STREAM_METHOD,
            }
        })
    }
}

#[async_trait]
impl RemoteConnector for TungsteniteConnector {
    async fn open(&self) -> Result<RemoteLink, BackendError> {
        let mut request = self
            .target
            .endpoint
            .as_str()
            .into_client_request()
            .map_err(handshake_error)?;
        if let Some(token) = &self.access_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(handshake_error)?;
            request.headers_mut().insert("Authorization", value);
        }

        let (socket, _) = connect_async(request).await.map_err(handshake_error)?;
        info!(endpoint = %self.target.endpoint, "Connected to remote agent; sending setup.");
        let (mut tx, mut rx) = socket.split();

        tx.send(WsMessage::Text(self.setup_message().to_string().into()))
            .await
            .map_err(handshake_error)?;
        await_setup_complete(&mut rx).await?;

        let outbound = tx
            .sink_map_err(|e| BackendError::TransportClosed(e.to_string()))
            .with(|payload: Value| {
                future::ready(Ok::<_, BackendError>(WsMessage::Text(
                    payload.to_string().into(),
                )))
            });
        Ok(RemoteLink {
            outbound: Box::pin(outbound),
            inbound: remote_events(rx),
        })
    }
}

fn handshake_error(e: impl std::fmt::Display) -> BackendError {
    BackendError::Handshake(e.to_string())
}

/// Waits for the remote to confirm the session.
async fn await_setup_complete<S>(rx: &mut S) -> Result<(), BackendError>
where
    S: Stream<Item = Result<WsMessage, WsError>> + Unpin,
{
    while let Some(message) = rx.next().await {
        let text = match message.map_err(handshake_error)? {
            WsMessage::Text(text) => text,
            WsMessage::Close(frame) => {
                return Err(BackendError::Handshake(format!(
                    "remote closed during setup: {}",
                    describe_close(frame.as_ref())
                )));
            }
            _ => continue,
        };
        let Ok(value) = serde_json::from_str::<Value>(text.as_str()) else {
            debug!("Ignoring non-JSON frame during setup.");
            continue;
        };
        match AgentEvent::normalize(unwrap_remote(value)) {
            AgentEvent::SetupComplete => return Ok(()),
            AgentEvent::Error(message) => return Err(BackendError::Handshake(message)),
            other => debug!(?other, "Ignoring frame received before setupComplete."),
        }
    }
    Err(BackendError::Handshake(
        "remote stream ended during setup".to_string(),
    ))
}

/// Turns the remote socket into a stream of JSON events.
///
/// A close with 1000 or 1001 ends the stream; any other ending is reported
/// once as `TransportClosed`.
fn remote_events<S>(rx: S) -> EventStream
where
    S: Stream<Item = Result<WsMessage, WsError>> + Send + Unpin + 'static,
{
    futures_util::stream::unfold(Some(rx), |state| async move {
        let mut rx = state?;
        loop {
            let payload = match rx.next().await {
                Some(Ok(WsMessage::Text(text))) => serde_json::from_str::<Value>(text.as_str()),
                Some(Ok(WsMessage::Binary(data))) => serde_json::from_slice::<Value>(&data),
                Some(Ok(WsMessage::Close(frame))) => {
                    return abnormal_close(frame.as_ref()).map(|err| (Err(err), None));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    return Some((Err(BackendError::TransportClosed(e.to_string())), None));
                }
                None => {
                    let err = BackendError::TransportClosed(
                        "remote stream ended without a close frame".to_string(),
                    );
                    return Some((Err(err), None));
                }
            };
            match payload {
                Ok(value) => return Some((Ok(value), Some(rx))),
                Err(e) => warn!(error = %e, "Remote agent sent a frame that is not JSON; skipping."),
            }
        }
    })
    .boxed()
}

fn abnormal_close(frame: Option<&CloseFrame>) -> Option<BackendError> {
    match frame {
        Some(frame) if matches!(frame.code, CloseCode::Normal | CloseCode::Away) => None,
        other => Some(BackendError::TransportClosed(describe_close(other))),
    }
}

fn describe_close(frame: Option<&CloseFrame>) -> String {
    match frame {
        Some(frame) => format!(
            "close code {} ({})",
            u16::from(frame.code),
            frame.reason.as_str()
        ),
        None => "close without status code".to_string(),
    }
}
