//! In-memory client sockets and scripted backends for relay tests.

use super::protocol::{ClientOutlet, ClientStream};
use async_trait::async_trait;
use axum::extract::ws::Message;
use bytes::Bytes;
use futures::{
    SinkExt, StreamExt,
    channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded},
};
use livebridge_core::backend::{BackendError, RemoteConnector, RemoteLink};
use mockall::mock;
use serde_json::Value;
use std::{
    sync::atomic::{AtomicU32, Ordering},
    time::Duration,
};

const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

/// The browser end of an in-memory client connection.
pub(crate) struct TestClient {
    pub input: UnboundedSender<Result<Message, axum::Error>>,
    pub outbox: UnboundedReceiver<Message>,
}

/// Returns the client end plus the relay's outlet and inlet.
pub(crate) fn test_client() -> (TestClient, ClientOutlet, ClientStream) {
    let (relay_tx, outbox) = unbounded::<Message>();
    let (input, relay_rx) = unbounded::<Result<Message, axum::Error>>();
    let outlet = ClientOutlet::new(relay_tx.sink_map_err(axum::Error::new));
    (TestClient { input, outbox }, outlet, Box::pin(relay_rx))
}

impl TestClient {
    pub fn send(&self, message: Message) {
        self.input
            .unbounded_send(Ok(message))
            .expect("relay inlet dropped");
    }

    pub fn send_text(&self, text: &str) {
        self.send(Message::Text(text.to_string().into()));
    }

    pub fn send_binary(&self, data: Bytes) {
        self.send(Message::Binary(data));
    }

    pub async fn next_frame(&mut self) -> Option<Message> {
        tokio::time::timeout(FRAME_TIMEOUT, self.outbox.next())
            .await
            .expect("timed out waiting for a relay frame")
    }

    pub async fn next_json(&mut self) -> Value {
        match self.next_frame().await {
            Some(Message::Text(text)) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("expected a JSON text frame, got {other:?}"),
        }
    }

    pub async fn next_binary(&mut self) -> Bytes {
        match self.next_frame().await {
            Some(Message::Binary(data)) => data,
            other => panic!("expected a binary frame, got {other:?}"),
        }
    }
}

/// A link whose stream fails as soon as it is polled.
pub(crate) fn dropping_link() -> RemoteLink {
    RemoteLink {
        outbound: Box::pin(
            futures::sink::drain::<Value>().sink_map_err(|never| -> BackendError { match never {} }),
        ),
        inbound: futures::stream::once(async {
            Err(BackendError::TransportClosed("connection reset".to_string()))
        })
        .boxed(),
    }
}

mock! {
    pub Connector {}

    #[async_trait]
    impl RemoteConnector for Connector {
        async fn open(&self) -> Result<RemoteLink, BackendError>;
    }
}

/// How a scripted remote stream ends after its events.
#[derive(Clone, Copy)]
pub(crate) enum Ending {
    StayOpen,
    Normal,
    Abnormal,
}

/// A remote connector that replays the same events on every open and
/// captures everything the relay sends.
pub(crate) struct ScriptedConnector {
    pub open_delay: Duration,
    pub events: Vec<Value>,
    pub ending: Ending,
    pub opens: AtomicU32,
    sent: UnboundedSender<Value>,
}

impl ScriptedConnector {
    pub fn new(
        open_delay: Duration,
        events: Vec<Value>,
        ending: Ending,
    ) -> (Self, UnboundedReceiver<Value>) {
        let (sent, received) = unbounded();
        let connector = Self {
            open_delay,
            events,
            ending,
            opens: AtomicU32::new(0),
            sent,
        };
        (connector, received)
    }

    pub fn open_count(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteConnector for ScriptedConnector {
    async fn open(&self) -> Result<RemoteLink, BackendError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.open_delay).await;

        let events = futures::stream::iter(self.events.clone().into_iter().map(Ok));
        let inbound = match self.ending {
            Ending::StayOpen => events.chain(futures::stream::pending()).boxed(),
            Ending::Normal => events.boxed(),
            Ending::Abnormal => events
                .chain(futures::stream::once(async {
                    Err(BackendError::TransportClosed("close code 1011".to_string()))
                }))
                .boxed(),
        };
        let outbound = self
            .sent
            .clone()
            .sink_map_err(|e| BackendError::Failed(e.to_string()));
        Ok(RemoteLink {
            outbound: Box::pin(outbound),
            inbound,
        })
    }
}
