//! WebSocket Relay
//!
//! Bridges one browser WebSocket to one agent backend. Submodules:
//!
//! - `protocol`: the write side of the client socket.
//! - `ingress`: reads client frames into the session queue.
//! - `backend`: the local and remote connector strategies.
//! - `orchestrator`: one session bring-up and streaming run.
//! - `reconnect`: rebuilds the session after transient failures.
//! - `session`: the `/ws` handler and per-connection identity.

pub mod backend;
pub mod ingress;
pub mod orchestrator;
pub mod protocol;
pub mod reconnect;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

use livebridge_core::{backend::BackendError, codec::CodecError};

pub use session::ws_handler;

/// Why a relay session ended abnormally.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The backend transport closed abnormally while streaming.
    #[error("backend connection lost: {0}")]
    TransientTransport(String),
    #[error("malformed client frame: {0}")]
    MalformedFrame(#[from] CodecError),
    /// The backend sent an error event, which was already forwarded.
    #[error("agent reported an error: {0}")]
    BackendReported(String),
    #[error("backend failure: {0}")]
    Backend(String),
    #[error("backend connection lost {retries} times, giving up: {last}")]
    RetriesExhausted { retries: u32, last: String },
    #[error("client socket failure: {0}")]
    ClientSocket(String),
}

impl RelayError {
    /// Only transient transport failures are retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, RelayError::TransientTransport(_))
    }

    /// The final `error` text owed to the client, if the client can still
    /// hear it and has not already been told.
    pub fn client_message(&self) -> Option<String> {
        match self {
            RelayError::ClientSocket(_) | RelayError::BackendReported(_) => None,
            other => Some(other.to_string()),
        }
    }
}

impl From<BackendError> for RelayError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::TransportClosed(reason) => RelayError::TransientTransport(reason),
            other => RelayError::Backend(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_errors_map_onto_taxonomy() {
        let transient = RelayError::from(BackendError::TransportClosed("reset".into()));
        assert!(transient.is_transient());

        let handshake = RelayError::from(BackendError::Handshake("refused".into()));
        assert!(matches!(handshake, RelayError::Backend(_)));
        assert!(!handshake.is_transient());
    }

    #[test]
    fn test_client_message_skips_already_reported_errors() {
        assert_eq!(RelayError::ClientSocket("gone".into()).client_message(), None);
        assert_eq!(RelayError::BackendReported("boom".into()).client_message(), None);
        assert_eq!(
            RelayError::RetriesExhausted {
                retries: 10,
                last: "reset".into()
            }
            .client_message()
            .as_deref(),
            Some("backend connection lost 10 times, giving up: reset")
        );
    }
}
