//! Remote client - Trait abstracting single remote control-plane operations
//!
//! A RemoteClient issues exactly one remote call per method and reports
//! failures pre-classified, so the layers above (finder, poller, reconciler)
//! can decide what to retry, what to surface, and what to tolerate without
//! inspecting provider-specific error shapes.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::differ::Patch;
use crate::resource::{RemoteState, Value};

/// Classified failure of a single remote operation
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RemoteError {
    /// The remote system has no resource with the given identifier
    #[error("resource not found: {0}")]
    NotFound(String),

    /// The remote API is shedding load; the same request may succeed later
    #[error("request throttled: {0}")]
    Throttled(String),

    /// The request itself is invalid and will never succeed as-is
    #[error("request rejected: {0}")]
    Validation(String),

    /// Another mutation of the same resource is in progress
    #[error("conflicting change in progress: {0}")]
    Conflict(String),

    /// The remote service failed or was unreachable (5xx-equivalent)
    #[error("remote service unavailable: {0}")]
    Unavailable(String),

    /// Anything the provider could not classify
    #[error("remote call failed: {0}")]
    Unknown(String),
}

impl RemoteError {
    /// Throttling and availability failures are worth retrying; the rest are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Throttled(_) | Self::Unavailable(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Result type for remote operations
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Single-shot remote control-plane operations
///
/// Implementations must be safe for concurrent use; independent
/// reconciliations share one client. No method retries internally;
/// retry policy belongs to the callers.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Create a resource and return the identifier the remote system assigned
    async fn create(
        &self,
        remote_type: &str,
        attributes: &HashMap<String, Value>,
    ) -> RemoteResult<String>;

    /// Fetch the current remote state of a resource
    async fn describe(&self, remote_type: &str, identifier: &str) -> RemoteResult<RemoteState>;

    /// Apply an in-place attribute patch to a resource
    async fn modify(
        &self,
        remote_type: &str,
        identifier: &str,
        patch: &Patch,
    ) -> RemoteResult<()>;

    /// Delete a resource
    async fn delete(&self, remote_type: &str, identifier: &str) -> RemoteResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classes() {
        assert!(RemoteError::Throttled("slow down".to_string()).is_transient());
        assert!(RemoteError::Unavailable("503".to_string()).is_transient());
        assert!(!RemoteError::Validation("bad field".to_string()).is_transient());
        assert!(!RemoteError::Conflict("in progress".to_string()).is_transient());
        assert!(!RemoteError::NotFound("vpc-123".to_string()).is_transient());
        assert!(!RemoteError::Unknown("??".to_string()).is_transient());
    }

    #[test]
    fn not_found_predicate() {
        assert!(RemoteError::NotFound("vpc-123".to_string()).is_not_found());
        assert!(!RemoteError::Throttled("slow down".to_string()).is_not_found());
    }
}
