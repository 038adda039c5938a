//! Backend Capabilities
//!
//! The two ways a relay session can reach an agent. A local agent is an
//! in-process object that turns a stream of requests into a stream of events.
//! A remote agent is reached through a [`RemoteConnector`] that hands back a
//! [`RemoteLink`] once its handshake is done.

use crate::codec::LiveRequest;
use async_trait::async_trait;
use base64::Engine;
use futures::{Sink, StreamExt, stream::BoxStream};
use serde_json::{Value, json};
use std::pin::Pin;

/// Requests drained from a session's queue, in client order.
pub type RequestStream = BoxStream<'static, LiveRequest>;

/// Raw backend responses, in backend order.
pub type EventStream = BoxStream<'static, Result<Value, BackendError>>;

/// The sending half of a remote link.
pub type RemoteSink = Pin<Box<dyn Sink<Value, Error = BackendError> + Send>>;

/// Failures reported by a backend leg.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The transport went away without a normal close. Worth a retry.
    #[error("backend transport closed abnormally: {0}")]
    TransportClosed(String),
    #[error("backend handshake failed: {0}")]
    Handshake(String),
    #[error("backend failed: {0}")]
    Failed(String),
}

impl BackendError {
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::TransportClosed(_))
    }
}

/// An in-process agent driven through one bidirectional streaming call.
pub trait AgentBackend: Send + Sync {
    /// Starts a streaming call fed by `requests`. The returned stream ends
    /// when the agent has nothing more to say.
    fn stream_turns(&self, requests: RequestStream) -> EventStream;
}

/// An open, handshaken session with a remote agent.
pub struct RemoteLink {
    pub outbound: RemoteSink,
    pub inbound: EventStream,
}

/// Opens managed streaming sessions against a remote agent.
#[async_trait]
pub trait RemoteConnector: Send + Sync {
    /// Resolves only once the remote session is confirmed open.
    async fn open(&self) -> Result<RemoteLink, BackendError>;
}

// --- Echo Agent ---

/// A local agent that answers every turn with the turn itself.
///
/// Text and structured turns come back as ADK events closing the turn, audio
/// comes back as inline audio, and a text part reading `error` produces an
/// error event.
#[derive(Debug, Clone, Default)]
pub struct EchoAgent;

impl EchoAgent {
    fn respond(request: LiveRequest) -> Option<Value> {
        match request {
            LiveRequest::Binary(data) => Some(audio_event(
                "audio/pcm;rate=24000",
                &base64::engine::general_purpose::STANDARD.encode(&data),
            )),
            LiveRequest::Json(value) => {
                if let Some(blob) = value.get("blob") {
                    let mime_type = blob.get("mimeType").and_then(Value::as_str)?;
                    let data = blob.get("data").and_then(Value::as_str)?;
                    return mime_type
                        .starts_with("audio/")
                        .then(|| audio_event(mime_type, data));
                }

                let parts = value.get("content")?.get("parts")?.as_array()?;
                let asked_to_fail = parts
                    .iter()
                    .any(|part| part.get("text").and_then(Value::as_str) == Some("error"));
                if asked_to_fail {
                    return Some(json!({"error": "echo agent was asked to fail"}));
                }
                Some(json!({
                    "author": "echo",
                    "content": {"role": "model", "parts": parts},
                    "turn_complete": true
                }))
            }
        }
    }
}

fn audio_event(mime_type: &str, data: &str) -> Value {
    json!({
        "author": "echo",
        "content": {
            "role": "model",
            "parts": [{"inline_data": {"mime_type": mime_type, "data": data}}]
        }
    })
}

impl AgentBackend for EchoAgent {
    fn stream_turns(&self, requests: RequestStream) -> EventStream {
        requests
            .filter_map(|request| async move { EchoAgent::respond(request).map(Ok) })
            .boxed()
    }
}
