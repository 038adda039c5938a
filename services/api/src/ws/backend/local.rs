//! Local connector: drives an in-process agent from the session queue.

use crate::ws::{RelayError, protocol::ClientOutlet};
use futures_util::StreamExt;
use livebridge_core::{
    backend::AgentBackend,
    codec::LiveRequest,
    event::AgentEvent,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info};

/// Feeds queued requests to `agent` and relays everything it says.
///
/// An error event from the agent is forwarded and then ends the session.
pub async fn run_local(
    agent: Arc<dyn AgentBackend>,
    queue: mpsc::Receiver<LiveRequest>,
    outlet: ClientOutlet,
) -> Result<(), RelayError> {
    let mut responses = agent.stream_turns(ReceiverStream::new(queue).boxed());

    while let Some(response) = responses.next().await {
        let event = AgentEvent::normalize(response?);
        if let AgentEvent::Error(message) = &event {
            error!(%message, "Local agent reported an error; stopping session.");
            let message = message.clone();
            outlet.send_event(event).await?;
            return Err(RelayError::BackendReported(message));
        }
        outlet.send_event(event).await?;
    }

    info!("Local agent stream ended.");
    Ok(())
}
