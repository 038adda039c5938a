//! The write side of the client WebSocket.
//!
//! Relay-to-client frames are JSON text, except audio which goes out as raw
//! binary. All writers share one sink behind a mutex, and the frames of a
//! single event are written without interleaving.

use super::RelayError;
use axum::extract::ws::Message;
use futures_util::{Sink, SinkExt, Stream};
use livebridge_core::event::{AgentEvent, ClientFrame};
use std::{pin::Pin, sync::Arc};
use tokio::sync::Mutex;
use tracing::debug;

/// The read side of a client connection.
pub type ClientStream = Pin<Box<dyn Stream<Item = Result<Message, axum::Error>> + Send>>;

type ClientSink = Pin<Box<dyn Sink<Message, Error = axum::Error> + Send>>;

/// A cloneable handle for writing to one client.
#[derive(Clone)]
pub struct ClientOutlet {
    sink: Arc<Mutex<ClientSink>>,
}

impl ClientOutlet {
    pub fn new<S>(sink: S) -> Self
    where
        S: Sink<Message, Error = axum::Error> + Send + 'static,
    {
        Self {
            sink: Arc::new(Mutex::new(Box::pin(sink))),
        }
    }

    pub async fn send_event(&self, event: AgentEvent) -> Result<(), RelayError> {
        self.send_frames(event.into_client_frames()).await
    }

    pub async fn send_frames(&self, frames: Vec<ClientFrame>) -> Result<(), RelayError> {
        if frames.is_empty() {
            return Ok(());
        }
        let mut sink = self.sink.lock().await;
        for frame in frames {
            sink.send(to_message(frame))
                .await
                .map_err(|e| RelayError::ClientSocket(e.to_string()))?;
        }
        Ok(())
    }

    /// Closes the client socket. Errors are ignored; the peer may be gone.
    pub async fn close(&self) {
        if let Err(e) = self.sink.lock().await.close().await {
            debug!(error = %e, "Client socket was already closed.");
        }
    }
}

fn to_message(frame: ClientFrame) -> Message {
    match frame {
        ClientFrame::Json(value) => Message::Text(value.to_string().into()),
        ClientFrame::Binary(data) => Message::Binary(data),
    }
}
