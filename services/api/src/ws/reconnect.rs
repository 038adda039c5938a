//! Reconnect controller.
//!
//! A session whose backend transport drops is rebuilt from scratch with a
//! fresh orchestrator, after an exponential, jittered wait. The client socket
//! stays open throughout and hears a `status` frame before every wait. Any
//! other failure ends the connection.
//!
//! Requests already queued for the failed backend are not replayed.

use super::{
    RelayError,
    backend::BackendStrategy,
    orchestrator::SessionOrchestrator,
    protocol::{ClientOutlet, ClientStream},
    session::IdentityHandle,
};
use livebridge_core::{event::AgentEvent, retry::RetryPolicy};
use std::time::Duration;
use tracing::{error, info, warn};

pub async fn run_with_reconnect(
    policy: &RetryPolicy,
    strategy: &BackendStrategy,
    outlet: &ClientOutlet,
    identity: &IdentityHandle,
    inlet: &mut ClientStream,
) -> Result<(), RelayError> {
    let mut retries = 0u32;

    loop {
        let mut orchestrator =
            SessionOrchestrator::new(strategy.clone(), outlet.clone(), identity.clone());
        let err = match orchestrator.run(inlet).await {
            Ok(()) => return Ok(()),
            Err(err) if !err.is_transient() => return Err(err),
            Err(err) => err,
        };

        if !policy.allows_retry(retries) {
            error!(retries, error = %err, "Backend connection lost; retry budget exhausted.");
            return Err(RelayError::RetriesExhausted {
                retries,
                last: err.to_string(),
            });
        }

        retries += 1;
        let delay = policy.delay_for(retries);
        warn!(
            attempt = retries,
            max_retries = policy.max_retries,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Backend connection lost; rebuilding session."
        );
        outlet
            .send_event(AgentEvent::Status(retry_notice(
                delay,
                retries,
                policy.max_retries,
            )))
            .await?;
        tokio::time::sleep(delay).await;
        info!(attempt = retries, "Reconnecting to backend.");
    }
}

/// Text of the `status` frame sent before each retry.
pub fn retry_notice(delay: Duration, attempt: u32, max_retries: u32) -> String {
    format!(
        "Agent connection lost, retrying in {:.1} seconds (attempt {attempt}/{max_retries})...",
        delay.as_secs_f64()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::{
        session::{SessionIdentity, identity_handle},
        testing::{Ending, MockConnector, ScriptedConnector, dropping_link, test_client},
    };
    use futures::StreamExt;
    use livebridge_core::{
        backend::{AgentBackend, BackendError, EventStream, RequestStream},
        codec::LiveRequest,
    };
    use serde_json::json;
    use std::sync::{
        Arc, Mutex,
        atomic::{AtomicU32, Ordering},
    };

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            jitter_ratio: 0.0,
        }
    }

    fn identity() -> IdentityHandle {
        identity_handle(SessionIdentity {
            run_id: "run-1".to_string(),
            user_id: Some("ada".to_string()),
        })
    }

    #[test]
    fn test_retry_notice_text() {
        assert_eq!(
            retry_notice(Duration::from_millis(2500), 3, 10),
            "Agent connection lost, retrying in 2.5 seconds (attempt 3/10)..."
        );
    }

    #[tokio::test]
    async fn test_gives_up_after_ten_retries() {
        let mut connector = MockConnector::new();
        connector
            .expect_open()
            .times(11)
            .returning(|| Ok(dropping_link()));
        let strategy = BackendStrategy::Remote {
            connector: Arc::new(connector),
        };
        let (mut client, outlet, mut inlet) = test_client();

        let err = run_with_reconnect(&fast_policy(), &strategy, &outlet, &identity(), &mut inlet)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::RetriesExhausted { retries: 10, .. }));
        assert!(!err.is_transient());

        outlet.close().await;
        let mut ready = 0;
        let mut statuses = Vec::new();
        while let Some(frame) = client.next_frame().await {
            let value: serde_json::Value = match frame {
                axum::extract::ws::Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
                other => panic!("unexpected frame {other:?}"),
            };
            if value == json!({"setupComplete": {}}) {
                ready += 1;
            } else {
                statuses.push(value["status"].as_str().unwrap().to_string());
            }
        }
        assert_eq!(ready, 11);
        assert_eq!(statuses.len(), 10);
        assert!(statuses[0].ends_with("(attempt 1/10)..."));
        assert!(statuses[9].ends_with("(attempt 10/10)..."));
    }

    #[tokio::test]
    async fn test_each_retry_rebuilds_the_session() {
        let (connector, _sent) =
            ScriptedConnector::new(Duration::ZERO, vec![json!({"status": "hello"})], Ending::Abnormal);
        let connector = Arc::new(connector);
        let strategy = BackendStrategy::Remote {
            connector: connector.clone(),
        };
        let policy = RetryPolicy {
            max_retries: 1,
            ..fast_policy()
        };
        let (mut client, outlet, mut inlet) = test_client();

        let err = run_with_reconnect(&policy, &strategy, &outlet, &identity(), &mut inlet)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::RetriesExhausted { retries: 1, .. }));
        assert_eq!(connector.open_count(), 2);

        assert_eq!(client.next_json().await, json!({"setupComplete": {}}));
        assert_eq!(client.next_json().await, json!({"status": "hello"}));
        let notice = client.next_json().await;
        assert!(notice["status"].as_str().unwrap().starts_with("Agent connection lost"));
        assert_eq!(client.next_json().await, json!({"setupComplete": {}}));
        assert_eq!(client.next_json().await, json!({"status": "hello"}));
    }

    #[tokio::test]
    async fn test_normal_close_is_not_retried() {
        let (connector, _sent) = ScriptedConnector::new(Duration::ZERO, vec![], Ending::Normal);
        let connector = Arc::new(connector);
        let strategy = BackendStrategy::Remote {
            connector: connector.clone(),
        };
        let (_client, outlet, mut inlet) = test_client();

        run_with_reconnect(&fast_policy(), &strategy, &outlet, &identity(), &mut inlet)
            .await
            .unwrap();
        assert_eq!(connector.open_count(), 1);
    }

    #[tokio::test]
    async fn test_malformed_input_is_not_retried() {
        let (connector, _sent) = ScriptedConnector::new(Duration::ZERO, vec![], Ending::StayOpen);
        let connector = Arc::new(connector);
        let strategy = BackendStrategy::Remote {
            connector: connector.clone(),
        };
        let (client, outlet, mut inlet) = test_client();
        client.send_text("}{");

        let err = run_with_reconnect(&fast_policy(), &strategy, &outlet, &identity(), &mut inlet)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::MalformedFrame(_)));
        assert_eq!(connector.open_count(), 1);
    }

    /// First attempt takes one request and then loses its transport; later
    /// attempts record what they are given.
    struct FlakyAgent {
        attempts: AtomicU32,
        seen: Arc<Mutex<Vec<LiveRequest>>>,
    }

    impl AgentBackend for FlakyAgent {
        fn stream_turns(&self, requests: RequestStream) -> EventStream {
            if self.attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                return requests
                    .take(1)
                    .map(|_| Err(BackendError::TransportClosed("agent restarted".into())))
                    .boxed();
            }
            let seen = self.seen.clone();
            requests
                .map(move |request| {
                    seen.lock().unwrap().push(request);
                    Ok(json!({"turn_complete": true}))
                })
                .boxed()
        }
    }

    #[tokio::test]
    async fn test_requests_queued_for_failed_backend_are_dropped() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let strategy = BackendStrategy::Local {
            agent: Arc::new(FlakyAgent {
                attempts: AtomicU32::new(0),
                seen: seen.clone(),
            }),
            warmup: Duration::ZERO,
        };
        let (mut client, outlet, inlet) = test_client();
        for n in 1..=3 {
            client.send_text(&format!(r#"{{"content": {{"parts": [{{"text": "{n}"}}]}}}}"#));
        }

        let relay = tokio::spawn(async move {
            let mut inlet = inlet;
            run_with_reconnect(&fast_policy(), &strategy, &outlet, &identity(), &mut inlet).await
        });

        assert_eq!(client.next_json().await, json!({"setupComplete": {}}));
        assert!(client.next_json().await["status"].is_string());
        assert_eq!(client.next_json().await, json!({"setupComplete": {}}));

        client.send_text(r#"{"content": {"parts": [{"text": "4"}]}}"#);
        assert_eq!(client.next_json().await, json!({"turn_complete": true}));
        drop(client);

        relay.await.unwrap().unwrap();
        // Frames 2 and 3 were queued for the first backend and are gone.
        assert_eq!(
            *seen.lock().unwrap(),
            vec![LiveRequest::Json(json!({"content": {"parts": [{"text": "4"}]}}))]
        );
    }
}
