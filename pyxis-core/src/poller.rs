//! Poller - Repeated status observation until convergence, failure, or timeout
//!
//! One poll loop per remote identifier, strictly sequential describes, a
//! monotonic deadline, and a cap on consecutive transport failures. The sleep
//! between ticks is the only suspension point and observes cancellation.

use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::finder::{self, FindError};
use crate::remote::{RemoteClient, RemoteError};
use crate::resource::RemoteState;
use crate::retry::with_jitter;
use crate::status::{StatusClass, StatusClassifier};

/// What the loop is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollTarget {
    /// Wait for a terminal-success status; the resource must exist, so an
    /// absent resource is a failure (create and update polling)
    TerminalStatus,
    /// Wait for the resource to stop existing (delete polling)
    Absence,
}

/// Tuning for one poll loop
#[derive(Debug, Clone)]
pub struct PollConfig {
    pub timeout: Duration,
    pub interval: Duration,
    /// Upper bound of the multiplicative jitter applied to each sleep
    pub jitter_fraction: f64,
    /// Consecutive transport failures tolerated before giving up early
    pub max_transport_errors: u32,
    pub target: PollTarget,
}

impl PollConfig {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self {
            timeout,
            interval,
            jitter_fraction: 0.1,
            max_transport_errors: 3,
            target: PollTarget::TerminalStatus,
        }
    }

    pub fn for_deletion(timeout: Duration, interval: Duration) -> Self {
        Self {
            target: PollTarget::Absence,
            ..Self::new(timeout, interval)
        }
    }
}

/// Why a poll loop stopped without converging
#[derive(Debug, Clone, Error)]
pub enum PollFailure {
    #[error("resource {identifier} reached failure status '{status}'")]
    Status { identifier: String, status: String },

    #[error("resource {identifier} no longer exists")]
    Gone { identifier: String },

    #[error("describe failed for {identifier}")]
    Transport {
        identifier: String,
        #[source]
        cause: RemoteError,
    },

    #[error("{count} consecutive transport failures polling {identifier}")]
    TooManyTransportErrors {
        identifier: String,
        count: u32,
        #[source]
        cause: RemoteError,
    },

    #[error("polling cancelled for {identifier}")]
    Cancelled { identifier: String },
}

/// Result of one poll loop
#[derive(Debug, Clone)]
pub enum PollOutcome {
    /// The target was reached; carries the final observation, or `None` when
    /// the target was the resource's absence
    Converged(Option<RemoteState>),
    Failed(PollFailure),
    TimedOut {
        identifier: String,
        last_status: Option<String>,
    },
}

/// Poll a resource until it reaches the configured target.
///
/// The deadline is measured from loop start on the monotonic clock; transient
/// transport failures count against their own cap but never extend the
/// deadline. Cancellation is observed at each iteration boundary and during
/// the sleep.
pub async fn poll(
    client: &dyn RemoteClient,
    remote_type: &str,
    identifier: &str,
    statuses: &StatusClassifier,
    config: &PollConfig,
    cancel: &CancellationToken,
) -> PollOutcome {
    let deadline = tokio::time::Instant::now() + config.timeout;
    let mut consecutive_transport_errors = 0u32;
    let mut last_status: Option<String> = None;

    loop {
        if cancel.is_cancelled() {
            return PollOutcome::Failed(PollFailure::Cancelled {
                identifier: identifier.to_string(),
            });
        }

        match finder::find(client, remote_type, identifier).await {
            Err(FindError::NotFound { .. }) => match config.target {
                PollTarget::Absence => {
                    debug!("{} {} is gone, converged", remote_type, identifier);
                    return PollOutcome::Converged(None);
                }
                PollTarget::TerminalStatus => {
                    return PollOutcome::Failed(PollFailure::Gone {
                        identifier: identifier.to_string(),
                    });
                }
            },
            Err(FindError::Transport { cause, .. }) => {
                if !cause.is_transient() {
                    return PollOutcome::Failed(PollFailure::Transport {
                        identifier: identifier.to_string(),
                        cause,
                    });
                }
                consecutive_transport_errors += 1;
                warn!(
                    "transport failure {}/{} polling {} {}: {}",
                    consecutive_transport_errors,
                    config.max_transport_errors,
                    remote_type,
                    identifier,
                    cause
                );
                if consecutive_transport_errors >= config.max_transport_errors {
                    return PollOutcome::Failed(PollFailure::TooManyTransportErrors {
                        identifier: identifier.to_string(),
                        count: consecutive_transport_errors,
                        cause,
                    });
                }
            }
            Ok(state) => {
                consecutive_transport_errors = 0;
                last_status = Some(state.status.clone());
                match (config.target, statuses.classify(&state.status)) {
                    (PollTarget::TerminalStatus, StatusClass::Success) => {
                        return PollOutcome::Converged(Some(state));
                    }
                    (_, StatusClass::Failure) => {
                        return PollOutcome::Failed(PollFailure::Status {
                            identifier: identifier.to_string(),
                            status: state.status,
                        });
                    }
                    _ => {
                        debug!(
                            "{} {} still '{}', polling",
                            remote_type, identifier, state.status
                        );
                    }
                }
            }
        }

        let now = tokio::time::Instant::now();
        if now >= deadline {
            return PollOutcome::TimedOut {
                identifier: identifier.to_string(),
                last_status,
            };
        }

        let sleep_for =
            with_jitter(config.interval, config.jitter_fraction).min(deadline.duration_since(now));
        tokio::select! {
            _ = cancel.cancelled() => {
                return PollOutcome::Failed(PollFailure::Cancelled {
                    identifier: identifier.to_string(),
                });
            }
            _ = tokio::time::sleep(sleep_for) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::differ::Patch;
    use crate::remote::RemoteResult;
    use crate::resource::Value;

    /// Client double replaying a scripted sequence of describe responses
    struct ScriptedRemote {
        responses: Mutex<VecDeque<RemoteResult<RemoteState>>>,
        /// Replayed once the script runs out
        fallback: Option<RemoteResult<RemoteState>>,
        describes: AtomicU32,
    }

    impl ScriptedRemote {
        fn new(responses: Vec<RemoteResult<RemoteState>>) -> Self {
            Self {
                responses: Mutex::new(VecDeque::from(responses)),
                fallback: None,
                describes: AtomicU32::new(0),
            }
        }

        fn with_fallback(mut self, fallback: RemoteResult<RemoteState>) -> Self {
            self.fallback = Some(fallback);
            self
        }

        fn describe_count(&self) -> u32 {
            self.describes.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RemoteClient for ScriptedRemote {
        async fn create(
            &self,
            _remote_type: &str,
            _attributes: &HashMap<String, Value>,
        ) -> RemoteResult<String> {
            unimplemented!("not used by poller tests")
        }

        async fn describe(
            &self,
            _remote_type: &str,
            _identifier: &str,
        ) -> RemoteResult<RemoteState> {
            self.describes.fetch_add(1, Ordering::SeqCst);
            let next = self
                .responses
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .pop_front();
            match next {
                Some(response) => response,
                None => self
                    .fallback
                    .clone()
                    .unwrap_or_else(|| panic!("describe script exhausted")),
            }
        }

        async fn modify(
            &self,
            _remote_type: &str,
            _identifier: &str,
            _patch: &Patch,
        ) -> RemoteResult<()> {
            unimplemented!("not used by poller tests")
        }

        async fn delete(&self, _remote_type: &str, _identifier: &str) -> RemoteResult<()> {
            unimplemented!("not used by poller tests")
        }
    }

    fn vpc_statuses() -> StatusClassifier {
        StatusClassifier::new(&["available"], &["failed"])
    }

    fn fast_config(target: PollTarget) -> PollConfig {
        PollConfig {
            timeout: Duration::from_secs(10),
            interval: Duration::from_millis(1),
            jitter_fraction: 0.0,
            max_transport_errors: 3,
            target,
        }
    }

    #[tokio::test]
    async fn converges_after_transient_statuses() {
        let client = ScriptedRemote::new(vec![
            Ok(RemoteState::new("vpc-123", "pending")),
            Ok(RemoteState::new("vpc-123", "pending")),
            Ok(RemoteState::new("vpc-123", "available")),
        ]);

        let outcome = poll(
            &client,
            "AWS::EC2::VPC",
            "vpc-123",
            &vpc_statuses(),
            &fast_config(PollTarget::TerminalStatus),
            &CancellationToken::new(),
        )
        .await;

        match outcome {
            PollOutcome::Converged(Some(state)) => {
                assert_eq!(state.identifier, "vpc-123");
                assert_eq!(state.status, "available");
            }
            other => panic!("Expected convergence, got {:?}", other),
        }
        assert_eq!(client.describe_count(), 3);
    }

    #[tokio::test]
    async fn failure_status_stops_polling() {
        let client = ScriptedRemote::new(vec![Ok(RemoteState::new("nat-123", "failed"))]);

        let outcome = poll(
            &client,
            "AWS::EC2::NatGateway",
            "nat-123",
            &vpc_statuses(),
            &fast_config(PollTarget::TerminalStatus),
            &CancellationToken::new(),
        )
        .await;

        match outcome {
            PollOutcome::Failed(PollFailure::Status { identifier, status }) => {
                assert_eq!(identifier, "nat-123");
                assert_eq!(status, "failed");
            }
            other => panic!("Expected status failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn delete_poll_converges_on_first_not_found_without_sleeping() {
        let client =
            ScriptedRemote::new(vec![Err(RemoteError::NotFound("vpc-123".to_string()))]);
        // An hour-long interval: the test only completes if no sleep happens.
        let config = PollConfig {
            interval: Duration::from_secs(3600),
            ..fast_config(PollTarget::Absence)
        };

        let outcome = tokio::time::timeout(
            Duration::from_secs(1),
            poll(
                &client,
                "AWS::EC2::VPC",
                "vpc-123",
                &vpc_statuses(),
                &config,
                &CancellationToken::new(),
            ),
        )
        .await
        .expect("poll must return on the first tick");

        assert!(matches!(outcome, PollOutcome::Converged(None)));
        assert_eq!(client.describe_count(), 1);
    }

    #[tokio::test]
    async fn not_found_fails_creation_polling() {
        let client =
            ScriptedRemote::new(vec![Err(RemoteError::NotFound("vpc-123".to_string()))]);

        let outcome = poll(
            &client,
            "AWS::EC2::VPC",
            "vpc-123",
            &vpc_statuses(),
            &fast_config(PollTarget::TerminalStatus),
            &CancellationToken::new(),
        )
        .await;

        assert!(matches!(
            outcome,
            PollOutcome::Failed(PollFailure::Gone { identifier }) if identifier == "vpc-123"
        ));
    }

    #[tokio::test]
    async fn consecutive_transport_errors_escalate_before_timeout() {
        let throttled = Err(RemoteError::Throttled("slow down".to_string()));
        let client = ScriptedRemote::new(vec![
            throttled.clone(),
            throttled.clone(),
            throttled.clone(),
            throttled.clone(),
            throttled,
        ]);

        let start = std::time::Instant::now();
        let outcome = poll(
            &client,
            "AWS::EC2::VPC",
            "vpc-123",
            &vpc_statuses(),
            &fast_config(PollTarget::TerminalStatus),
            &CancellationToken::new(),
        )
        .await;

        match outcome {
            PollOutcome::Failed(PollFailure::TooManyTransportErrors { count, cause, .. }) => {
                assert_eq!(count, 3);
                assert!(cause.is_transient());
            }
            other => panic!("Expected transport escalation, got {:?}", other),
        }
        assert_eq!(client.describe_count(), 3);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn transport_error_count_resets_on_successful_describe() {
        let throttled = Err(RemoteError::Throttled("slow down".to_string()));
        let client = ScriptedRemote::new(vec![
            throttled.clone(),
            throttled.clone(),
            Ok(RemoteState::new("vpc-123", "pending")),
            throttled.clone(),
            throttled,
            Ok(RemoteState::new("vpc-123", "available")),
        ]);

        let outcome = poll(
            &client,
            "AWS::EC2::VPC",
            "vpc-123",
            &vpc_statuses(),
            &fast_config(PollTarget::TerminalStatus),
            &CancellationToken::new(),
        )
        .await;

        assert!(matches!(outcome, PollOutcome::Converged(Some(_))));
        assert_eq!(client.describe_count(), 6);
    }

    #[tokio::test]
    async fn non_transient_transport_failure_stops_immediately() {
        let client = ScriptedRemote::new(vec![Err(RemoteError::Validation(
            "malformed identifier".to_string(),
        ))]);

        let outcome = poll(
            &client,
            "AWS::EC2::VPC",
            "vpc-123",
            &vpc_statuses(),
            &fast_config(PollTarget::TerminalStatus),
            &CancellationToken::new(),
        )
        .await;

        assert!(matches!(
            outcome,
            PollOutcome::Failed(PollFailure::Transport { .. })
        ));
        assert_eq!(client.describe_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_within_timeout_plus_interval() {
        let client = ScriptedRemote::new(vec![])
            .with_fallback(Ok(RemoteState::new("vpc-123", "pending")));
        let config = PollConfig {
            timeout: Duration::from_secs(10),
            interval: Duration::from_secs(1),
            jitter_fraction: 0.0,
            max_transport_errors: 3,
            target: PollTarget::TerminalStatus,
        };

        let start = tokio::time::Instant::now();
        let outcome = poll(
            &client,
            "AWS::EC2::VPC",
            "vpc-123",
            &vpc_statuses(),
            &config,
            &CancellationToken::new(),
        )
        .await;

        match outcome {
            PollOutcome::TimedOut { last_status, .. } => {
                assert_eq!(last_status.as_deref(), Some("pending"));
            }
            other => panic!("Expected timeout, got {:?}", other),
        }
        assert!(start.elapsed() <= config.timeout + config.interval);
    }

    #[tokio::test]
    async fn cancellation_mid_sleep_returns_promptly() {
        let client = ScriptedRemote::new(vec![])
            .with_fallback(Ok(RemoteState::new("vpc-123", "pending")));
        let config = PollConfig {
            timeout: Duration::from_secs(30),
            interval: Duration::from_millis(500),
            jitter_fraction: 0.0,
            max_transport_errors: 3,
            target: PollTarget::TerminalStatus,
        };

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let start = std::time::Instant::now();
        let outcome = poll(
            &client,
            "AWS::EC2::VPC",
            "vpc-123",
            &vpc_statuses(),
            &config,
            &cancel,
        )
        .await;

        assert!(matches!(
            outcome,
            PollOutcome::Failed(PollFailure::Cancelled { .. })
        ));
        assert!(start.elapsed() < config.interval);
    }
}
