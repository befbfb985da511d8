//! Reconciler - Orchestrates create, update, and delete toward convergence
//!
//! Each operation issues the minimal remote calls for its lifecycle step and
//! then hands the identifier to the poller. An identifier obtained from a
//! create is never discarded: every failure past that point carries it, so
//! callers can clean up or adopt the partially created resource.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::descriptor::{Registry, ResourceDescriptor};
use crate::differ;
use crate::finder::{self, FindError};
use crate::poller::{self, PollConfig, PollFailure, PollOutcome};
use crate::remote::{RemoteClient, RemoteError};
use crate::resource::{RemoteState, Resource};
use crate::retry::{self, RetryError, RetryPolicy};

/// Failure of a reconciliation operation
///
/// Variants carry the remote identifier whenever one exists and the last
/// observed status where the poller saw one.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("no descriptor registered for resource type '{0}'")]
    UnknownResourceType(String),

    #[error("another reconciliation is already in progress for {identifier}")]
    InProgress { identifier: String },

    #[error("remote API rejected the request: {cause}")]
    RemoteRejected {
        identifier: Option<String>,
        #[source]
        cause: RemoteError,
    },

    #[error("transient remote failure persisted across {attempts} attempts: {cause}")]
    Transient {
        identifier: Option<String>,
        attempts: u32,
        #[source]
        cause: RemoteError,
    },

    #[error("resource {identifier} reached failure status '{status}'")]
    StatusFailure { identifier: String, status: String },

    #[error("{count} consecutive transport failures while polling {identifier}")]
    Transport {
        identifier: String,
        count: u32,
        #[source]
        cause: RemoteError,
    },

    #[error("timed out waiting for {identifier} (last status: {last_status:?})")]
    Timeout {
        identifier: String,
        last_status: Option<String>,
    },

    #[error("resource {identifier} does not exist")]
    Gone { identifier: String },

    #[error("attributes {attributes:?} cannot change in place; the resource must be replaced")]
    RequiresReplacement {
        identifier: String,
        attributes: Vec<String>,
    },

    #[error("operation cancelled")]
    Cancelled { identifier: Option<String> },
}

impl ReconcileError {
    /// Remote identifier involved in the failure, when one exists
    pub fn identifier(&self) -> Option<&str> {
        match self {
            Self::UnknownResourceType(_) => None,
            Self::InProgress { identifier }
            | Self::StatusFailure { identifier, .. }
            | Self::Transport { identifier, .. }
            | Self::Timeout { identifier, .. }
            | Self::Gone { identifier }
            | Self::RequiresReplacement { identifier, .. } => Some(identifier),
            Self::RemoteRejected { identifier, .. }
            | Self::Transient { identifier, .. }
            | Self::Cancelled { identifier } => identifier.as_deref(),
        }
    }
}

impl From<PollFailure> for ReconcileError {
    fn from(failure: PollFailure) -> Self {
        match failure {
            PollFailure::Status { identifier, status } => {
                Self::StatusFailure { identifier, status }
            }
            PollFailure::Gone { identifier } => Self::Gone { identifier },
            PollFailure::Transport { identifier, cause } => Self::RemoteRejected {
                identifier: Some(identifier),
                cause,
            },
            PollFailure::TooManyTransportErrors {
                identifier,
                count,
                cause,
            } => Self::Transport {
                identifier,
                count,
                cause,
            },
            PollFailure::Cancelled { identifier } => Self::Cancelled {
                identifier: Some(identifier),
            },
        }
    }
}

/// Removes the identifier from the in-flight set when the operation ends
struct InFlightGuard {
    set: Arc<Mutex<HashSet<String>>>,
    identifier: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.identifier);
    }
}

/// Drives remote resources toward their declared desired state
///
/// Cheap to clone; concurrent operations on independent resources share the
/// client and the in-flight identifier set and nothing else.
#[derive(Clone)]
pub struct Reconciler {
    client: Arc<dyn RemoteClient>,
    registry: Registry,
    retry: RetryPolicy,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl Reconciler {
    pub fn new(client: Arc<dyn RemoteClient>, registry: Registry) -> Self {
        Self {
            client,
            registry,
            retry: RetryPolicy::default(),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Create the resource and wait until it reaches a terminal-success
    /// status.
    ///
    /// Exactly one create call is issued per transaction; retries apply only
    /// while no identifier exists yet.
    pub async fn create(
        &self,
        desired: &Resource,
        cancel: &CancellationToken,
    ) -> Result<RemoteState, ReconcileError> {
        let descriptor = self.descriptor(&desired.id.resource_type)?;
        info!(
            "creating {} '{}'",
            desired.id.resource_type, desired.id.name
        );

        let identifier = retry::retry_transient(&self.retry, cancel, || {
            self.client
                .create(&descriptor.remote_type_name, &desired.attributes)
        })
        .await
        .map_err(|err| self.initiation_error(err, None))?;

        info!(
            "{} '{}' assigned identifier {}",
            desired.id.resource_type, desired.id.name, identifier
        );

        let _guard = self.claim(&identifier)?;
        self.poll_terminal(descriptor, &identifier, descriptor.create_poll_config(), cancel)
            .await
    }

    /// Apply the drifted attributes in place and wait for convergence.
    ///
    /// Attribute changes the remote API only supports through replacement are
    /// surfaced as [`ReconcileError::RequiresReplacement`]; the caller decides
    /// whether to delete and recreate.
    pub async fn update(
        &self,
        identifier: &str,
        desired: &Resource,
        cancel: &CancellationToken,
    ) -> Result<RemoteState, ReconcileError> {
        let descriptor = self.descriptor(&desired.id.resource_type)?;
        let _guard = self.claim(identifier)?;

        debug!(
            "refreshing {} {} before update",
            desired.id.resource_type, identifier
        );
        let current = match retry::retry_transient(&self.retry, cancel, || {
            self.client.describe(&descriptor.remote_type_name, identifier)
        })
        .await
        {
            Ok(state) => state,
            Err(RetryError::Remote(RemoteError::NotFound(_))) => {
                return Err(ReconcileError::Gone {
                    identifier: identifier.to_string(),
                });
            }
            Err(err) => return Err(self.initiation_error(err, Some(identifier.to_string()))),
        };

        let diff = differ::diff_attributes(
            &desired.attributes,
            &current.attributes,
            &descriptor.replacement_attributes,
        );
        if diff.requires_replacement() {
            return Err(ReconcileError::RequiresReplacement {
                identifier: identifier.to_string(),
                attributes: diff.replacement,
            });
        }
        if diff.changed.is_empty() {
            debug!(
                "{} {} matches desired state, nothing to do",
                desired.id.resource_type, identifier
            );
            return Ok(current);
        }

        let patch = differ::build_patch(&desired.attributes, &diff.changed);
        info!(
            "updating {} attribute(s) on {} {}",
            patch.ops.len(),
            desired.id.resource_type,
            identifier
        );
        match retry::retry_transient(&self.retry, cancel, || {
            self.client
                .modify(&descriptor.remote_type_name, identifier, &patch)
        })
        .await
        {
            Ok(()) => {}
            Err(RetryError::Remote(RemoteError::NotFound(_))) => {
                return Err(ReconcileError::Gone {
                    identifier: identifier.to_string(),
                });
            }
            Err(err) => return Err(self.initiation_error(err, Some(identifier.to_string()))),
        }

        self.poll_terminal(descriptor, identifier, descriptor.update_poll_config(), cancel)
            .await
    }

    /// Delete the resource and wait until it is gone.
    ///
    /// An already-absent resource is success, both on the delete call and
    /// while polling.
    pub async fn delete(
        &self,
        resource_type: &str,
        identifier: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ReconcileError> {
        let descriptor = self.descriptor(resource_type)?;
        let _guard = self.claim(identifier)?;
        info!("deleting {} {}", resource_type, identifier);

        match retry::retry_transient(&self.retry, cancel, || {
            self.client.delete(&descriptor.remote_type_name, identifier)
        })
        .await
        {
            Ok(()) => {}
            Err(RetryError::Remote(RemoteError::NotFound(_))) => {
                debug!("{} {} already gone", resource_type, identifier);
                return Ok(());
            }
            Err(err) => return Err(self.initiation_error(err, Some(identifier.to_string()))),
        }

        match poller::poll(
            self.client.as_ref(),
            &descriptor.remote_type_name,
            identifier,
            &descriptor.statuses,
            &descriptor.delete_poll_config(),
            cancel,
        )
        .await
        {
            PollOutcome::Converged(_) => Ok(()),
            PollOutcome::Failed(failure) => Err(failure.into()),
            PollOutcome::TimedOut {
                identifier,
                last_status,
            } => Err(ReconcileError::Timeout {
                identifier,
                last_status,
            }),
        }
    }

    /// Look up the current remote state for refresh and import flows.
    ///
    /// Returns `Ok(None)` when the resource does not exist.
    pub async fn find(
        &self,
        resource_type: &str,
        identifier: &str,
    ) -> Result<Option<RemoteState>, ReconcileError> {
        let descriptor = self.descriptor(resource_type)?;
        match finder::find(self.client.as_ref(), &descriptor.remote_type_name, identifier).await {
            Ok(state) => Ok(Some(state)),
            Err(FindError::NotFound { .. }) => Ok(None),
            Err(FindError::Transport { cause, .. }) if cause.is_transient() => {
                Err(ReconcileError::Transient {
                    identifier: Some(identifier.to_string()),
                    attempts: 1,
                    cause,
                })
            }
            Err(FindError::Transport { cause, .. }) => Err(ReconcileError::RemoteRejected {
                identifier: Some(identifier.to_string()),
                cause,
            }),
        }
    }

    fn descriptor(&self, resource_type: &str) -> Result<&ResourceDescriptor, ReconcileError> {
        self.registry
            .get(resource_type)
            .ok_or_else(|| ReconcileError::UnknownResourceType(resource_type.to_string()))
    }

    /// Mark the identifier as being reconciled, rejecting a second concurrent
    /// transaction against the same resource.
    fn claim(&self, identifier: &str) -> Result<InFlightGuard, ReconcileError> {
        let mut set = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !set.insert(identifier.to_string()) {
            return Err(ReconcileError::InProgress {
                identifier: identifier.to_string(),
            });
        }
        Ok(InFlightGuard {
            set: Arc::clone(&self.in_flight),
            identifier: identifier.to_string(),
        })
    }

    async fn poll_terminal(
        &self,
        descriptor: &ResourceDescriptor,
        identifier: &str,
        config: PollConfig,
        cancel: &CancellationToken,
    ) -> Result<RemoteState, ReconcileError> {
        match poller::poll(
            self.client.as_ref(),
            &descriptor.remote_type_name,
            identifier,
            &descriptor.statuses,
            &config,
            cancel,
        )
        .await
        {
            PollOutcome::Converged(Some(state)) => Ok(state),
            PollOutcome::Converged(None) => Err(ReconcileError::Gone {
                identifier: identifier.to_string(),
            }),
            PollOutcome::Failed(failure) => Err(failure.into()),
            PollOutcome::TimedOut {
                identifier,
                last_status,
            } => Err(ReconcileError::Timeout {
                identifier,
                last_status,
            }),
        }
    }

    fn initiation_error(&self, err: RetryError, identifier: Option<String>) -> ReconcileError {
        match err {
            RetryError::Cancelled => ReconcileError::Cancelled { identifier },
            RetryError::Remote(cause) if cause.is_transient() => ReconcileError::Transient {
                identifier,
                attempts: self.retry.max_attempts,
                cause,
            },
            RetryError::Remote(cause) => ReconcileError::RemoteRejected { identifier, cause },
        }
    }
}
