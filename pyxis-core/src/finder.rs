//! Finder - Describe-by-identifier lookup with a typed not-found

use thiserror::Error;

use crate::remote::{RemoteClient, RemoteError};
use crate::resource::RemoteState;

/// Failure of a find call
///
/// "Not found" is a first-class value so callers can special-case an absent
/// resource (delete confirmation, import refresh) without pattern-matching
/// provider error text. Everything else propagates as a transport failure.
#[derive(Debug, Clone, Error)]
pub enum FindError {
    #[error("resource {identifier} not found")]
    NotFound { identifier: String },

    #[error("describe failed for {identifier}")]
    Transport {
        identifier: String,
        #[source]
        cause: RemoteError,
    },
}

/// Look up a resource by its remote identifier.
///
/// Issues exactly one describe call; retry policy belongs to the poller.
pub async fn find(
    client: &dyn RemoteClient,
    remote_type: &str,
    identifier: &str,
) -> Result<RemoteState, FindError> {
    if identifier.is_empty() {
        return Err(FindError::Transport {
            identifier: identifier.to_string(),
            cause: RemoteError::Validation("empty identifier".to_string()),
        });
    }

    match client.describe(remote_type, identifier).await {
        Ok(state) => Ok(state),
        Err(err) if err.is_not_found() => Err(FindError::NotFound {
            identifier: identifier.to_string(),
        }),
        Err(err) => Err(FindError::Transport {
            identifier: identifier.to_string(),
            cause: err,
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;

    use super::*;
    use crate::differ::Patch;
    use crate::remote::RemoteResult;
    use crate::resource::Value;

    /// Client double returning one canned describe response
    struct OneShotRemote {
        describe: RemoteResult<RemoteState>,
    }

    #[async_trait]
    impl RemoteClient for OneShotRemote {
        async fn create(
            &self,
            _remote_type: &str,
            _attributes: &HashMap<String, Value>,
        ) -> RemoteResult<String> {
            unimplemented!("not used by finder tests")
        }

        async fn describe(
            &self,
            _remote_type: &str,
            _identifier: &str,
        ) -> RemoteResult<RemoteState> {
            self.describe.clone()
        }

        async fn modify(
            &self,
            _remote_type: &str,
            _identifier: &str,
            _patch: &Patch,
        ) -> RemoteResult<()> {
            unimplemented!("not used by finder tests")
        }

        async fn delete(&self, _remote_type: &str, _identifier: &str) -> RemoteResult<()> {
            unimplemented!("not used by finder tests")
        }
    }

    #[tokio::test]
    async fn find_returns_remote_state() {
        let client = OneShotRemote {
            describe: Ok(RemoteState::new("vpc-123", "available")),
        };
        let state = find(&client, "AWS::EC2::VPC", "vpc-123").await.unwrap();
        assert_eq!(state.identifier, "vpc-123");
        assert_eq!(state.status, "available");
    }

    #[tokio::test]
    async fn find_maps_not_found() {
        let client = OneShotRemote {
            describe: Err(RemoteError::NotFound("vpc-123".to_string())),
        };
        let err = find(&client, "AWS::EC2::VPC", "vpc-123").await.unwrap_err();
        assert!(matches!(err, FindError::NotFound { identifier } if identifier == "vpc-123"));
    }

    #[tokio::test]
    async fn find_maps_other_failures_to_transport() {
        let client = OneShotRemote {
            describe: Err(RemoteError::Throttled("slow down".to_string())),
        };
        let err = find(&client, "AWS::EC2::VPC", "vpc-123").await.unwrap_err();
        match err {
            FindError::Transport { cause, .. } => assert!(cause.is_transient()),
            other => panic!("Expected Transport, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn find_rejects_empty_identifier() {
        let client = OneShotRemote {
            describe: Ok(RemoteState::new("vpc-123", "available")),
        };
        let err = find(&client, "AWS::EC2::VPC", "").await.unwrap_err();
        assert!(matches!(err, FindError::Transport { .. }));
    }
}
