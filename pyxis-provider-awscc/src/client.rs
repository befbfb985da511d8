//! AWS Cloud Control implementation of the remote client
//!
//! Cloud Control exposes one CRUD surface for every supported CloudFormation
//! resource type. Mutations are asynchronous on the AWS side: the API returns
//! a request token, and this client follows it just far enough to hand a
//! classified result (and, for creates, the assigned identifier) back to the
//! reconciliation engine. Long-running convergence stays the engine's job.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::Region;
use aws_sdk_cloudcontrol::Client as CloudControlClient;
use aws_sdk_cloudcontrol::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_cloudcontrol::types::OperationStatus;
use serde_json::json;
use tracing::debug;

use pyxis_core::differ::Patch;
use pyxis_core::remote::{RemoteClient, RemoteError, RemoteResult};
use pyxis_core::resource::{RemoteState, Value};

/// Attempts and delay when following a Cloud Control request token
const OPERATION_POLL_ATTEMPTS: u32 = 120;
const OPERATION_POLL_DELAY: Duration = Duration::from_secs(5);

/// Properties Cloud Control resources conventionally report liveness in
const STATUS_PROPERTIES: [&str; 2] = ["State", "Status"];

/// Remote client backed by the AWS Cloud Control API
pub struct CloudControlRemote {
    client: CloudControlClient,
    region: String,
}

impl CloudControlRemote {
    /// Create a client for the specified region using the ambient AWS
    /// credential chain
    pub async fn new(region: &str) -> Self {
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;

        Self {
            client: CloudControlClient::new(&config),
            region: region.to_string(),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Follow a request token until the operation settles, returning the
    /// identifier it produced
    async fn wait_for_operation(&self, request_token: &str) -> RemoteResult<String> {
        for _ in 0..OPERATION_POLL_ATTEMPTS {
            let status = self
                .client
                .get_resource_request_status()
                .request_token(request_token)
                .send()
                .await
                .map_err(classify_sdk_error)?;

            if let Some(progress) = status.progress_event() {
                match progress.operation_status() {
                    Some(OperationStatus::Success) => {
                        return progress
                            .identifier()
                            .map(str::to_string)
                            .ok_or_else(|| {
                                RemoteError::Unknown(
                                    "operation succeeded without an identifier".to_string(),
                                )
                            });
                    }
                    Some(OperationStatus::Failed) => {
                        let code = progress
                            .error_code()
                            .map(|c| c.as_str())
                            .unwrap_or("Unknown");
                        let message = progress.status_message().unwrap_or("no detail");
                        return Err(classify_progress_error(code, message));
                    }
                    Some(OperationStatus::CancelComplete) => {
                        return Err(RemoteError::Unknown(
                            "operation was cancelled remotely".to_string(),
                        ));
                    }
                    _ => {}
                }
            }

            tokio::time::sleep(OPERATION_POLL_DELAY).await;
        }

        Err(RemoteError::Unavailable(format!(
            "operation {} did not settle",
            request_token
        )))
    }
}

#[async_trait]
impl RemoteClient for CloudControlRemote {
    async fn create(
        &self,
        remote_type: &str,
        attributes: &HashMap<String, Value>,
    ) -> RemoteResult<String> {
        let desired_state = attributes_to_document(attributes).to_string();
        debug!("CreateResource {} in {}", remote_type, self.region);

        let output = self
            .client
            .create_resource()
            .type_name(remote_type)
            .desired_state(desired_state)
            .send()
            .await
            .map_err(classify_sdk_error)?;

        let token = output
            .progress_event()
            .and_then(|p| p.request_token())
            .ok_or_else(|| RemoteError::Unknown("create returned no request token".to_string()))?
            .to_string();

        self.wait_for_operation(&token).await
    }

    async fn describe(&self, remote_type: &str, identifier: &str) -> RemoteResult<RemoteState> {
        let output = self
            .client
            .get_resource()
            .type_name(remote_type)
            .identifier(identifier)
            .send()
            .await
            .map_err(classify_sdk_error)?;

        let description = output.resource_description().ok_or_else(|| {
            RemoteError::Unknown(format!("empty describe result for {}", identifier))
        })?;

        let properties: serde_json::Value = match description.properties() {
            Some(props) => serde_json::from_str(props).map_err(|e| {
                RemoteError::Unknown(format!("unparseable resource document: {}", e))
            })?,
            None => serde_json::Value::Object(serde_json::Map::new()),
        };

        Ok(RemoteState {
            identifier: description.identifier().unwrap_or(identifier).to_string(),
            status: extract_status(&properties),
            attributes: document_to_attributes(&properties),
        })
    }

    async fn modify(
        &self,
        remote_type: &str,
        identifier: &str,
        patch: &Patch,
    ) -> RemoteResult<()> {
        if patch.is_empty() {
            return Ok(());
        }
        let patch_document = patch_to_document(patch)?;
        debug!("UpdateResource {} {}", remote_type, identifier);

        let output = self
            .client
            .update_resource()
            .type_name(remote_type)
            .identifier(identifier)
            .patch_document(patch_document)
            .send()
            .await
            .map_err(classify_sdk_error)?;

        if let Some(token) = output.progress_event().and_then(|p| p.request_token()) {
            let token = token.to_string();
            self.wait_for_operation(&token).await?;
        }

        Ok(())
    }

    async fn delete(&self, remote_type: &str, identifier: &str) -> RemoteResult<()> {
        debug!("DeleteResource {} {}", remote_type, identifier);

        // The caller confirms disappearance by polling; no need to follow
        // the request token here.
        self.client
            .delete_resource()
            .type_name(remote_type)
            .identifier(identifier)
            .send()
            .await
            .map_err(classify_sdk_error)?;

        Ok(())
    }
}

/// Extract the status string from a resource property document.
///
/// Falls back to "available": Cloud Control only returns resources it
/// considers live.
fn extract_status(properties: &serde_json::Value) -> String {
    for key in STATUS_PROPERTIES {
        if let Some(status) = properties.get(key).and_then(|v| v.as_str()) {
            return status.to_string();
        }
    }
    "available".to_string()
}

fn attributes_to_document(attributes: &HashMap<String, Value>) -> serde_json::Value {
    Value::Map(attributes.clone()).to_json()
}

fn document_to_attributes(document: &serde_json::Value) -> HashMap<String, Value> {
    match Value::from_json(document) {
        Some(Value::Map(map)) => map,
        _ => HashMap::new(),
    }
}

/// Render a patch as the RFC 6902 document UpdateResource expects
fn patch_to_document(patch: &Patch) -> RemoteResult<String> {
    let ops: Vec<serde_json::Value> = patch
        .ops
        .iter()
        .map(|op| {
            json!({
                "op": "replace",
                "path": format!("/{}", op.attribute),
                "value": op.value.to_json(),
            })
        })
        .collect();
    serde_json::to_string(&ops)
        .map_err(|e| RemoteError::Unknown(format!("failed to build patch document: {}", e)))
}

/// Classify a failed SDK call
fn classify_sdk_error<E, R>(err: SdkError<E, R>) -> RemoteError
where
    SdkError<E, R>: ProvideErrorMetadata,
{
    match &err {
        SdkError::TimeoutError(_) => RemoteError::Unavailable("request timed out".to_string()),
        SdkError::DispatchFailure(_) => {
            RemoteError::Unavailable("failed to reach the remote service".to_string())
        }
        SdkError::ResponseError(_) => {
            RemoteError::Unavailable("malformed response from the remote service".to_string())
        }
        SdkError::ServiceError(_) => {
            let code = err.code().unwrap_or("Unknown");
            let message = err.message().unwrap_or("no detail");
            classify_service_error(code, message)
        }
        _ => RemoteError::Unknown(
            err.message()
                .unwrap_or("request could not be constructed")
                .to_string(),
        ),
    }
}

/// Classify a service exception by its error code
fn classify_service_error(code: &str, message: &str) -> RemoteError {
    let detail = format!("{} ({})", message, code);
    match code {
        "ResourceNotFoundException" => RemoteError::NotFound(detail),
        "ThrottlingException" | "RequestLimitExceeded" | "TooManyRequestsException" => {
            RemoteError::Throttled(detail)
        }
        "ConcurrentOperationException" | "ConcurrentModificationException" => {
            RemoteError::Conflict(detail)
        }
        "ValidationException"
        | "AlreadyExistsException"
        | "InvalidRequestException"
        | "TypeNotFoundException"
        | "UnsupportedActionException" => RemoteError::Validation(detail),
        "ServiceInternalErrorException" | "ServiceUnavailableException" => {
            RemoteError::Unavailable(detail)
        }
        _ => RemoteError::Unknown(detail),
    }
}

/// Classify a failed operation by its progress-event handler error code
fn classify_progress_error(code: &str, message: &str) -> RemoteError {
    let detail = format!("{} ({})", message, code);
    match code {
        "NotFound" => RemoteError::NotFound(detail),
        "Throttling" | "ServiceLimitExceeded" => RemoteError::Throttled(detail),
        "ResourceConflict" => RemoteError::Conflict(detail),
        "NetworkFailure" | "ServiceInternalError" | "InternalFailure" | "ServiceTimeout"
        | "NotStabilized" => RemoteError::Unavailable(detail),
        "InvalidRequest" | "AlreadyExists" | "NotUpdatable" | "InvalidCredentials"
        | "AccessDenied" | "Unsupported" => RemoteError::Validation(detail),
        _ => RemoteError::Unknown(detail),
    }
}
