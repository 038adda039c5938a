//! Canonical Agent Events
//!
//! Backends speak two dialects: the legacy live-API shape (`serverContent`,
//! `toolCall`, ...) and ADK-style events (`content.parts`, `turn_complete`,
//! `interrupted`). [`AgentEvent::normalize`] folds both into one type, and
//! [`AgentEvent::into_client_frames`] decides what the browser receives.

use base64::Engine;
use bytes::Bytes;
use serde_json::{Map, Value, json};
use tracing::warn;

/// Which dialect an outbound event is written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundShape {
    Legacy,
    Adk,
}

/// Decides the dialect of a (remote-unwrapped) backend event.
pub fn classify_outbound(event: &Value) -> OutboundShape {
    let has_parts = event
        .get("content")
        .and_then(|content| content.get("parts"))
        .is_some_and(Value::is_array);
    if has_parts || event.get("turn_complete").is_some() || event.get("interrupted").is_some() {
        OutboundShape::Adk
    } else {
        OutboundShape::Legacy
    }
}

/// A frame ready to be written to the client socket.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    Json(Value),
    Binary(Bytes),
}

/// An ADK event with its parts partitioned by how they reach the client.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdkEvent {
    /// Decoded bytes of every `audio/*` inline part, in order.
    pub audio: Vec<Bytes>,
    /// Inner `function_call` objects.
    pub function_calls: Vec<Value>,
    /// Every other part, untouched.
    pub parts: Vec<Value>,
    pub role: Option<Value>,
    /// Top-level fields other than `content`.
    pub metadata: Map<String, Value>,
}

/// The single internal event type every backend response is folded into.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    SetupComplete,
    Status(String),
    Error(String),
    /// Legacy-shaped events (`serverContent`, `toolCall`, `toolCallCancellation`, ...).
    Legacy(Value),
    Adk(AdkEvent),
}

const SIGNAL_FIELDS: [&str; 4] = [
    "input_transcription",
    "output_transcription",
    "turn_complete",
    "interrupted",
];

impl AgentEvent {
    /// Folds a backend response into the canonical event type.
    pub fn normalize(event: Value) -> Self {
        let map = match event {
            Value::Object(map) => map,
            other => return AgentEvent::Legacy(other),
        };

        if map.contains_key("setupComplete") {
            return AgentEvent::SetupComplete;
        }
        if let Some(message) = error_message(&map) {
            return AgentEvent::Error(message);
        }
        if let Some(Value::String(status)) = map.get("status") {
            return AgentEvent::Status(status.clone());
        }

        let event = Value::Object(map);
        match classify_outbound(&event) {
            OutboundShape::Legacy => AgentEvent::Legacy(event),
            OutboundShape::Adk => match event {
                Value::Object(map) => AgentEvent::Adk(AdkEvent::from_map(map)),
                other => AgentEvent::Legacy(other),
            },
        }
    }

    /// Whether this event reports a backend error.
    pub fn is_error(&self) -> bool {
        matches!(self, AgentEvent::Error(_))
    }

    /// Renders the event as the frames the client should receive, in order.
    /// May be empty when there is nothing worth sending.
    pub fn into_client_frames(self) -> Vec<ClientFrame> {
        match self {
            AgentEvent::SetupComplete => vec![ClientFrame::Json(json!({"setupComplete": {}}))],
            AgentEvent::Status(message) => vec![ClientFrame::Json(json!({"status": message}))],
            AgentEvent::Error(message) => vec![ClientFrame::Json(json!({"error": message}))],
            AgentEvent::Legacy(event) => vec![ClientFrame::Json(event)],
            AgentEvent::Adk(event) => event.into_client_frames(),
        }
    }
}

/// Extracts the error text of an event that carries one.
fn error_message(map: &Map<String, Value>) -> Option<String> {
    match map.get("error") {
        Some(Value::String(message)) => return Some(message.clone()),
        Some(Value::Object(error)) => {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| Value::Object(error.clone()).to_string());
            return Some(message);
        }
        Some(Value::Null) | None => {}
        Some(other) => return Some(other.to_string()),
    }

    let message = map
        .get("error_message")
        .or_else(|| map.get("errorMessage"))
        .and_then(Value::as_str)?;
    let code = map
        .get("error_code")
        .or_else(|| map.get("errorCode"))
        .and_then(Value::as_str);
    Some(match code {
        Some(code) => format!("{code}: {message}"),
        None => message.to_string(),
    })
}

impl AdkEvent {
    fn from_map(mut metadata: Map<String, Value>) -> Self {
        let mut event = AdkEvent::default();
        if let Some(Value::Object(mut content)) = metadata.remove("content") {
            event.role = content.remove("role");
            if let Some(Value::Array(parts)) = content.remove("parts") {
                for part in parts {
                    event.push_part(part);
                }
            }
        }
        event.metadata = metadata;
        event
    }

    fn push_part(&mut self, part: Value) {
        if let Some(call) = part.get("function_call").or_else(|| part.get("functionCall")) {
            self.function_calls.push(call.clone());
            return;
        }
        if let Some(audio) = decode_audio_part(&part) {
            self.audio.push(audio);
            return;
        }
        self.parts.push(part);
    }

    fn has_signal(&self) -> bool {
        SIGNAL_FIELDS.iter().any(|field| match self.metadata.get(*field) {
            None | Some(Value::Null) | Some(Value::Bool(false)) => false,
            Some(_) => true,
        })
    }

    /// Audio goes out as binary frames, function calls as one synthesized
    /// `toolCall`, and the remaining parts as one `content` event. An event
    /// left with no parts is only sent when it carries a transcription or a
    /// turn signal.
    pub fn into_client_frames(self) -> Vec<ClientFrame> {
        let has_signal = self.has_signal();
        let AdkEvent {
            audio,
            function_calls,
            parts,
            role,
            mut metadata,
        } = self;

        let mut frames: Vec<ClientFrame> = audio.into_iter().map(ClientFrame::Binary).collect();

        if !function_calls.is_empty() {
            frames.push(ClientFrame::Json(
                json!({"toolCall": {"functionCalls": function_calls}}),
            ));
        }

        if !parts.is_empty() {
            let mut content = Map::new();
            if let Some(role) = role {
                content.insert("role".to_string(), role);
            }
            content.insert("parts".to_string(), Value::Array(parts));
            metadata.insert("content".to_string(), Value::Object(content));
            frames.push(ClientFrame::Json(Value::Object(metadata)));
        } else if has_signal {
            frames.push(ClientFrame::Json(Value::Object(metadata)));
        }

        frames
    }
}

/// Returns the decoded bytes of an `audio/*` inline-data part.
fn decode_audio_part(part: &Value) -> Option<Bytes> {
    let inline = part.get("inline_data").or_else(|| part.get("inlineData"))?;
    let mime_type = inline
        .get("mime_type")
        .or_else(|| inline.get("mimeType"))
        .and_then(Value::as_str)?;
    if !mime_type.starts_with("audio/") {
        return None;
    }
    let data = inline.get("data").and_then(Value::as_str)?;
    // ADK serializes bytes url-safe; the live API uses the standard alphabet.
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(data)
        .or_else(|_| base64::engine::general_purpose::URL_SAFE.decode(data));
    match decoded {
        Ok(bytes) => Some(Bytes::from(bytes)),
        Err(e) => {
            warn!(mime_type, error = %e, "Audio part is not valid base64; forwarding as content.");
            None
        }
    }
}
