//! Status classification for remote resource states
//!
//! Remote APIs report resource status as type-specific strings. Each resource
//! descriptor partitions the values it knows about into terminal-success and
//! terminal-failure sets; every other value, including ones the remote API
//! grows later, classifies as transient and stays bounded by the poll
//! deadline.

/// Classification of a single remote status value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// Keep polling
    Transient,
    /// Stop polling, the operation succeeded
    Success,
    /// Stop polling, the resource ended in a failure state
    Failure,
}

/// Partition of a resource type's remote status values
///
/// Matching is case-insensitive; remote APIs disagree on casing.
#[derive(Debug, Clone, Default)]
pub struct StatusClassifier {
    success: Vec<String>,
    failure: Vec<String>,
}

impl StatusClassifier {
    pub fn new(success: &[&str], failure: &[&str]) -> Self {
        Self {
            success: success.iter().map(|s| s.to_ascii_lowercase()).collect(),
            failure: failure.iter().map(|s| s.to_ascii_lowercase()).collect(),
        }
    }

    /// Classify a remote status value.
    ///
    /// Total over all inputs: anything outside the two terminal sets is
    /// transient.
    pub fn classify(&self, status: &str) -> StatusClass {
        let status = status.to_ascii_lowercase();
        if self.failure.iter().any(|s| *s == status) {
            StatusClass::Failure
        } else if self.success.iter().any(|s| *s == status) {
            StatusClass::Success
        } else {
            StatusClass::Transient
        }
    }

    pub fn is_failure(&self, status: &str) -> bool {
        self.classify(status) == StatusClass::Failure
    }

    pub fn is_success(&self, status: &str) -> bool {
        self.classify(status) == StatusClass::Success
    }
}
