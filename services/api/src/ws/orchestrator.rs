//! Session Orchestrator
//!
//! Brings one session up and runs it:
//!
//! ```text
//! Accepted -> WarmingUp      -> Ready -> Streaming -> Closed   (local)
//! Accepted -> OpeningSession -> Ready -> Streaming -> Closed   (remote)
//! ```
//!
//! `setupComplete` goes to the client on entering `Ready`, and never before
//! the backend is usable. While streaming, the ingress pump and the backend
//! connector run side by side; the first to finish ends the session.

use super::{
    RelayError,
    backend::{BackendStrategy, local, remote},
    ingress,
    protocol::{ClientOutlet, ClientStream},
    session::IdentityHandle,
};
use livebridge_core::{codec::LiveRequest, event::AgentEvent};
use std::future::Future;
use tokio::sync::mpsc;
use tracing::debug;

/// Requests buffered between the ingress pump and the backend.
const QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Accepted,
    WarmingUp,
    OpeningSession,
    Ready,
    Streaming,
    Closed,
}

/// One session attempt. Built fresh for every reconnect, so its queue and
/// first-message state never outlive a failed backend.
pub struct SessionOrchestrator {
    strategy: BackendStrategy,
    outlet: ClientOutlet,
    identity: IdentityHandle,
    phases: Vec<SessionPhase>,
}

impl SessionOrchestrator {
    pub fn new(strategy: BackendStrategy, outlet: ClientOutlet, identity: IdentityHandle) -> Self {
        Self {
            strategy,
            outlet,
            identity,
            phases: vec![SessionPhase::Accepted],
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phases
            .last()
            .copied()
            .unwrap_or(SessionPhase::Accepted)
    }

    /// Every phase entered so far, in order.
    pub fn history(&self) -> &[SessionPhase] {
        &self.phases
    }

    /// Runs the session to completion. An orchestrator runs at most once.
    pub async fn run(&mut self, inlet: &mut ClientStream) -> Result<(), RelayError> {
        if self.phase() != SessionPhase::Accepted {
            return Err(RelayError::Backend(
                "session orchestrator has already run".to_string(),
            ));
        }
        let result = self.drive(inlet).await;
        self.enter(SessionPhase::Closed);
        result
    }

    async fn drive(&mut self, inlet: &mut ClientStream) -> Result<(), RelayError> {
        let (queue_tx, queue_rx) = mpsc::channel(QUEUE_CAPACITY);

        match self.strategy.clone() {
            BackendStrategy::Local { agent, warmup } => {
                self.enter(SessionPhase::WarmingUp);
                tokio::time::sleep(warmup).await;
                self.announce_ready().await?;
                let backend = local::run_local(agent, queue_rx, self.outlet.clone());
                self.stream(inlet, queue_tx, backend).await
            }
            BackendStrategy::Remote { connector } => {
                self.enter(SessionPhase::OpeningSession);
                let link = remote::open_remote(connector.as_ref()).await?;
                self.announce_ready().await?;
                let backend =
                    remote::run_remote(link, queue_rx, self.outlet.clone(), self.identity.clone());
                self.stream(inlet, queue_tx, backend).await
            }
        }
    }

    async fn announce_ready(&mut self) -> Result<(), RelayError> {
        self.enter(SessionPhase::Ready);
        self.outlet.send_event(AgentEvent::SetupComplete).await
    }

    async fn stream<F>(
        &mut self,
        inlet: &mut ClientStream,
        queue: mpsc::Sender<LiveRequest>,
        backend: F,
    ) -> Result<(), RelayError>
    where
        F: Future<Output = Result<(), RelayError>>,
    {
        self.enter(SessionPhase::Streaming);
        let ingress = ingress::run_ingress(inlet, queue, &self.identity);
        tokio::select! {
            result = ingress => {
                debug!(ok = result.is_ok(), "Ingress pump finished first.");
                result
            }
            result = backend => {
                debug!(ok = result.is_ok(), "Backend connector finished first.");
                result
            }
        }
    }

    fn enter(&mut self, next: SessionPhase) {
        debug!(from = ?self.phase(), to = ?next, "Session phase change.");
        self.phases.push(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::{
        session::{SessionIdentity, identity_handle},
        testing::{Ending, ScriptedConnector, test_client},
    };
    use futures::StreamExt;
    use livebridge_core::backend::EchoAgent;
    use serde_json::json;
    use std::{
        sync::Arc,
        time::{Duration, Instant},
    };
    use SessionPhase::*;

    fn identity(user_id: Option<&str>) -> IdentityHandle {
        identity_handle(SessionIdentity {
            run_id: "run-1".to_string(),
            user_id: user_id.map(str::to_string),
        })
    }

    #[tokio::test]
    async fn test_local_session_waits_for_warmup_before_ready() {
        let warmup = Duration::from_millis(60);
        let (mut client, outlet, mut inlet) = test_client();
        let strategy = BackendStrategy::Local {
            agent: Arc::new(EchoAgent),
            warmup,
        };

        let started = Instant::now();
        let mut session = SessionOrchestrator::new(strategy, outlet, identity(None));
        client.send_text(r#"{"content": {"role": "user", "parts": [{"text": "early"}]}}"#);

        let run = async move {
            let result = session.run(&mut inlet).await;
            (result, session)
        };
        let check = async {
            assert_eq!(client.next_json().await, json!({"setupComplete": {}}));
            assert!(started.elapsed() >= warmup);
            let echoed = client.next_json().await;
            assert_eq!(echoed["content"]["parts"][0]["text"], "early");
            drop(client);
        };
        let ((result, session), ()) = tokio::join!(run, check);

        assert!(result.is_ok());
        assert_eq!(
            session.history(),
            &[Accepted, WarmingUp, Ready, Streaming, Closed]
        );
    }

    #[tokio::test]
    async fn test_remote_ready_follows_session_open() {
        let open_delay = Duration::from_millis(80);
        let (connector, mut sent) = ScriptedConnector::new(open_delay, vec![], Ending::StayOpen);
        let connector = Arc::new(connector);
        let (mut client, outlet, mut inlet) = test_client();
        let strategy = BackendStrategy::Remote {
            connector: connector.clone(),
        };

        // Sent before the session exists; still the first message it sees.
        client.send_text(r#"{"content": {"parts": [{"text": "first"}]}}"#);
        client.send_text(r#"{"content": {"parts": [{"text": "second"}]}}"#);

        let started = Instant::now();
        let mut session = SessionOrchestrator::new(strategy, outlet, identity(Some("ada")));
        let run = async move {
            let result = session.run(&mut inlet).await;
            (result, session)
        };
        let check = async {
            assert_eq!(client.next_json().await, json!({"setupComplete": {}}));
            assert!(started.elapsed() >= open_delay);
            assert_eq!(
                sent.next().await.unwrap(),
                json!({"user_id": "ada", "live_request": {"content": {"parts": [{"text": "first"}]}}})
            );
            assert_eq!(
                sent.next().await.unwrap(),
                json!({"content": {"parts": [{"text": "second"}]}})
            );
            drop(client);
        };
        let ((result, session), ()) = tokio::join!(run, check);

        assert!(result.is_ok());
        assert_eq!(connector.open_count(), 1);
        assert_eq!(
            session.history(),
            &[Accepted, OpeningSession, Ready, Streaming, Closed]
        );
    }

    #[tokio::test]
    async fn test_mixed_media_frames_pass_through_unthrottled() {
        let (connector, mut sent) = ScriptedConnector::new(Duration::ZERO, vec![], Ending::StayOpen);
        let (mut client, outlet, mut inlet) = test_client();
        let strategy = BackendStrategy::Remote {
            connector: Arc::new(connector),
        };

        for _ in 0..5 {
            client.send_text(
                r#"{"blob": {"mimeType": "image/jpeg", "data": "AAAA"}}"#,
            );
        }

        let mut session = SessionOrchestrator::new(strategy, outlet, identity(None));
        let run = session.run(&mut inlet);
        let check = async {
            assert_eq!(client.next_json().await, json!({"setupComplete": {}}));
            for _ in 0..5 {
                assert!(sent.next().await.is_some());
            }
            drop(client);
        };
        let (result, ()) = tokio::join!(run, check);
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_failed_open_never_announces_ready() {
        let (mut client, outlet, mut inlet) = test_client();
        let mut connector = crate::ws::testing::MockConnector::new();
        connector.expect_open().times(1).returning(|| {
            Err(livebridge_core::backend::BackendError::Handshake(
                "401 Unauthorized".to_string(),
            ))
        });
        let strategy = BackendStrategy::Remote {
            connector: Arc::new(connector),
        };

        let mut session = SessionOrchestrator::new(strategy, outlet.clone(), identity(None));
        let err = session.run(&mut inlet).await.unwrap_err();
        assert!(matches!(err, RelayError::Backend(_)));
        assert_eq!(session.phase(), Closed);
        assert!(!session.history().contains(&Ready));

        outlet.close().await;
        assert!(client.next_frame().await.is_none());
    }

    #[tokio::test]
    async fn test_orchestrator_runs_once() {
        let (client, outlet, mut inlet) = test_client();
        let strategy = BackendStrategy::Local {
            agent: Arc::new(EchoAgent),
            warmup: Duration::ZERO,
        };
        let mut session = SessionOrchestrator::new(strategy, outlet, identity(None));
        drop(client.input);
        session.run(&mut inlet).await.unwrap();
        assert!(session.run(&mut inlet).await.is_err());
        assert_eq!(session.history().iter().filter(|p| **p == Ready).count(), 1);
    }
}
