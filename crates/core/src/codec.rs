//! Envelope Codec
//!
//! Pure functions that classify client frames and add or remove the two
//! envelopes the relay has to reconcile: the `{user_id, live_request}` wrapper
//! on the first message of a remote session, and the `bidiStreamOutput`
//! wrapper on events coming back from a remote backend.

use crate::BINARY_DATA_KEY;
use base64::Engine;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{Map, Value, json};

/// Key of the envelope a remote backend wraps each event in.
pub const REMOTE_ENVELOPE_KEY: &str = "bidiStreamOutput";

/// Errors raised while decoding a frame received from the client.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("client frame is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("client frame must be a JSON object, got {0}")]
    UnexpectedShape(&'static str),
}

/// Session identity a client announces in its `setup` frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SetupInfo {
    #[serde(default, alias = "runId")]
    pub run_id: Option<String>,
    #[serde(default, alias = "userId")]
    pub user_id: Option<String>,
}

/// The classified form of one frame received from the client.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Client metadata. Never forwarded to a backend.
    Setup(SetupInfo),
    /// `{blob: {mimeType, data}}` realtime input.
    Blob(Value),
    /// `{content: {parts}}` text or structured turn.
    Content(Value),
    /// `{toolResponse: {...}}`.
    ToolResponse(Value),
    /// Any other JSON object. Forwarded verbatim.
    Unrecognized(Value),
    /// A binary websocket frame carrying a raw realtime chunk.
    Binary(Bytes),
}

/// One entry of the per-session request queue.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveRequest {
    Json(Value),
    Binary(Bytes),
}

impl InboundFrame {
    /// Converts the frame into a queue entry, or `None` for frames that stay
    /// inside the relay.
    pub fn into_request(self) -> Option<LiveRequest> {
        match self {
            InboundFrame::Setup(_) => None,
            InboundFrame::Blob(v)
            | InboundFrame::Content(v)
            | InboundFrame::ToolResponse(v)
            | InboundFrame::Unrecognized(v) => Some(LiveRequest::Json(v)),
            InboundFrame::Binary(data) => Some(LiveRequest::Binary(data)),
        }
    }

    /// Short label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            InboundFrame::Setup(_) => "setup",
            InboundFrame::Blob(_) => "blob",
            InboundFrame::Content(_) => "content",
            InboundFrame::ToolResponse(_) => "tool_response",
            InboundFrame::Unrecognized(_) => "unrecognized",
            InboundFrame::Binary(_) => "binary",
        }
    }
}

impl LiveRequest {
    /// Expresses the request as JSON. Binary chunks become
    /// `{"binary_data": "<base64>"}`.
    pub fn into_json(self) -> Value {
        match self {
            LiveRequest::Json(v) => v,
            LiveRequest::Binary(data) => json!({
                BINARY_DATA_KEY: base64::engine::general_purpose::STANDARD.encode(&data)
            }),
        }
    }
}

/// Classifies a text frame. Anything that is not a JSON object is an error.
pub fn classify_inbound_text(text: &str) -> Result<InboundFrame, CodecError> {
    let value: Value = serde_json::from_str(text)?;
    classify_inbound_value(value)
}

/// Classifies a binary frame.
pub fn classify_inbound_binary(data: Bytes) -> InboundFrame {
    InboundFrame::Binary(data)
}

/// Classifies an already-parsed JSON frame.
///
/// Keys are checked in the order `setup`, `blob`, `content`, `toolResponse`;
/// the first one present decides the variant.
pub fn classify_inbound_value(value: Value) -> Result<InboundFrame, CodecError> {
    let map = match value {
        Value::Object(map) => map,
        other => return Err(CodecError::UnexpectedShape(json_type_name(&other))),
    };

    if let Some(setup) = map.get("setup") {
        // A setup frame with odd contents still identifies as setup.
        let info = serde_json::from_value::<SetupInfo>(setup.clone()).unwrap_or_default();
        return Ok(InboundFrame::Setup(info));
    }

    let value = Value::Object(map);
    let frame = if value.get("blob").is_some() {
        InboundFrame::Blob(value)
    } else if value.get("content").is_some() {
        InboundFrame::Content(value)
    } else if value.get("toolResponse").is_some() {
        InboundFrame::ToolResponse(value)
    } else {
        InboundFrame::Unrecognized(value)
    };
    Ok(frame)
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Strips every `bidiStreamOutput` envelope from a remote event.
///
/// Events without the envelope come back untouched, and nested envelopes are
/// peeled until none is left, so applying it twice equals applying it once.
pub fn unwrap_remote(mut event: Value) -> Value {
    loop {
        match event {
            Value::Object(mut map) if map.contains_key(REMOTE_ENVELOPE_KEY) => {
                event = map.remove(REMOTE_ENVELOPE_KEY).unwrap_or(Value::Null);
            }
            other => return other,
        }
    }
}

/// One-shot wrapper for the first message a session sends to its backend.
#[derive(Debug, Default)]
pub struct FirstMessageEnvelope {
    sent: bool,
}

impl FirstMessageEnvelope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `{user_id, live_request: payload}` the first time it is called
    /// and `payload` unchanged afterwards.
    pub fn wrap(&mut self, payload: Value, user_id: Option<&str>) -> Value {
        if self.sent {
            return payload;
        }
        self.sent = true;
        let mut envelope = Map::new();
        envelope.insert(
            "user_id".to_string(),
            user_id.map_or(Value::Null, |id| Value::String(id.to_string())),
        );
        envelope.insert("live_request".to_string(), payload);
        Value::Object(envelope)
    }

    pub fn is_sent(&self) -> bool {
        self.sent
    }
}
