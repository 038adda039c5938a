//! A Rust client for the relay's `/ws` endpoint.
//!
//! Mirrors what the browser frontend does: announce identity with a `setup`
//! frame, send turns and realtime chunks, and read back JSON events and raw
//! audio. Every realtime send goes through the [`OutboundRateLimiter`].

use crate::limiter::{MediaMix, OutboundRateLimiter, SendDecision};
use anyhow::{Context, Result};
use bytes::Bytes;
use futures::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message as WsMessage,
};
use tracing::{debug, warn};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One realtime chunk: a mime type and base64 data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaChunk {
    pub mime_type: String,
    pub data: String,
}

impl MediaChunk {
    pub fn new(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }

    fn to_frame(&self) -> Value {
        json!({"blob": {"mimeType": self.mime_type, "data": self.data}})
    }
}

/// Something the relay sent back.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Json(Value),
    Audio(Bytes),
}

impl ClientEvent {
    pub fn is_setup_complete(&self) -> bool {
        matches!(self, ClientEvent::Json(v) if v.get("setupComplete").is_some())
    }

    pub fn status(&self) -> Option<&str> {
        match self {
            ClientEvent::Json(v) => v.get("status").and_then(Value::as_str),
            ClientEvent::Audio(_) => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            ClientEvent::Json(v) => v.get("error").and_then(Value::as_str),
            ClientEvent::Audio(_) => None,
        }
    }
}

pub struct LiveClient {
    sink: SplitSink<Socket, WsMessage>,
    stream: SplitStream<Socket>,
    limiter: OutboundRateLimiter,
    open: bool,
}

impl LiveClient {
    /// Connects to a relay, e.g. `ws://127.0.0.1:8000/ws?user_id=u1`.
    pub async fn connect(url: &str) -> Result<Self> {
        let (socket, _) = connect_async(url)
            .await
            .with_context(|| format!("Failed to connect to relay at {url}"))?;
        let (sink, stream) = socket.split();
        Ok(Self {
            sink,
            stream,
            limiter: OutboundRateLimiter::new(),
            open: true,
        })
    }

    /// Replaces the pacing state, e.g. to use a custom policy.
    pub fn with_limiter(mut self, limiter: OutboundRateLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn limiter(&self) -> &OutboundRateLimiter {
        &self.limiter
    }

    pub async fn send_setup(&mut self, run_id: Option<&str>, user_id: Option<&str>) -> Result<()> {
        self.send_json(&json!({"setup": {"run_id": run_id, "user_id": user_id}}))
            .await
    }

    /// Sends a user text turn.
    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        self.send_json(&json!({"content": {"role": "user", "parts": [{"text": text}]}}))
            .await
    }

    pub async fn send_tool_response(&mut self, response: Value) -> Result<()> {
        self.send_json(&json!({ "toolResponse": response })).await
    }

    /// Sends one frame's worth of realtime chunks, subject to the rate limiter.
    /// Dropped frames are reported, not retried.
    pub async fn send_realtime(&mut self, chunks: &[MediaChunk]) -> Result<SendDecision> {
        let mix = MediaMix::from_mime_types(chunks.iter().map(|c| c.mime_type.as_str()));
        let decision = self.limiter.check(mix, self.open);
        if let SendDecision::Drop(reason) = decision {
            debug!(?reason, "Dropped realtime frame.");
            return Ok(decision);
        }
        for chunk in chunks {
            self.send_json(&chunk.to_frame()).await?;
        }
        Ok(decision)
    }

    /// Sends raw audio bytes as a binary frame, subject to the rate limiter.
    pub async fn send_audio_bytes(&mut self, data: Bytes) -> Result<SendDecision> {
        let mix = MediaMix {
            audio: true,
            video: false,
        };
        let decision = self.limiter.check(mix, self.open);
        if decision.is_send() {
            self.send_message(WsMessage::Binary(data)).await?;
        }
        Ok(decision)
    }

    /// Sends an arbitrary JSON frame, bypassing the limiter.
    pub async fn send_json(&mut self, frame: &Value) -> Result<()> {
        self.send_message(WsMessage::Text(frame.to_string().into()))
            .await
    }

    /// Sends raw text, bypassing any encoding. Useful to exercise the relay's
    /// handling of malformed input.
    pub async fn send_raw_text(&mut self, text: &str) -> Result<()> {
        self.send_message(WsMessage::Text(text.to_string().into()))
            .await
    }

    async fn send_message(&mut self, message: WsMessage) -> Result<()> {
        if let Err(e) = self.sink.send(message).await {
            self.open = false;
            return Err(e).context("Failed to send frame to relay");
        }
        Ok(())
    }

    /// Next event from the relay, or `None` once the relay closed the socket.
    pub async fn next_event(&mut self) -> Option<Result<ClientEvent>> {
        loop {
            let message = match self.stream.next().await {
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    self.open = false;
                    return Some(Err(e).context("Error reading from relay"));
                }
                None => {
                    self.open = false;
                    return None;
                }
            };
            match message {
                WsMessage::Text(text) => match serde_json::from_str::<Value>(text.as_str()) {
                    Ok(value) => return Some(Ok(ClientEvent::Json(value))),
                    Err(e) => warn!(error = %e, "Relay sent a text frame that is not JSON."),
                },
                WsMessage::Binary(data) => return Some(Ok(ClientEvent::Audio(data))),
                WsMessage::Close(_) => {
                    self.open = false;
                    return None;
                }
                _ => {}
            }
        }
    }

    /// Sends a close frame and waits for the relay to finish.
    pub async fn close(mut self) -> Result<()> {
        self.open = false;
        self.sink.close().await.context("Failed to close relay socket")?;
        Ok(())
    }
}
