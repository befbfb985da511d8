//! Descriptor - Per-resource-type reconciliation parameters
//!
//! Descriptors are plain values handed to the runtime at startup. A provider
//! exposes a constructor returning its descriptor set and the caller builds
//! one explicit registry from it; nothing registers itself through process
//! globals.

use std::collections::HashMap;
use std::time::Duration;

use crate::poller::{PollConfig, PollTarget};
use crate::status::StatusClassifier;

/// Reconciliation parameters for one resource type
#[derive(Debug, Clone)]
pub struct ResourceDescriptor {
    /// Caller-facing type name (e.g., "vpc")
    pub type_name: String,
    /// Type name the remote API expects (e.g., "AWS::EC2::VPC")
    pub remote_type_name: String,
    /// Partition of the type's remote status values
    pub statuses: StatusClassifier,
    /// Attributes the remote API cannot change in place
    pub replacement_attributes: Vec<String>,
    pub poll_interval: Duration,
    pub create_timeout: Duration,
    pub update_timeout: Duration,
    pub delete_timeout: Duration,
}

impl ResourceDescriptor {
    /// Default create/update wait; deletes usually settle faster
    const DEFAULT_CREATE_TIMEOUT: Duration = Duration::from_secs(600);
    const DEFAULT_DELETE_TIMEOUT: Duration = Duration::from_secs(300);
    const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

    pub fn new(
        type_name: impl Into<String>,
        remote_type_name: impl Into<String>,
        statuses: StatusClassifier,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            remote_type_name: remote_type_name.into(),
            statuses,
            replacement_attributes: Vec::new(),
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
            create_timeout: Self::DEFAULT_CREATE_TIMEOUT,
            update_timeout: Self::DEFAULT_CREATE_TIMEOUT,
            delete_timeout: Self::DEFAULT_DELETE_TIMEOUT,
        }
    }

    pub fn with_replacement_attributes(mut self, attributes: &[&str]) -> Self {
        self.replacement_attributes = attributes.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_timeouts(mut self, create: Duration, update: Duration, delete: Duration) -> Self {
        self.create_timeout = create;
        self.update_timeout = update;
        self.delete_timeout = delete;
        self
    }

    /// Poll configuration for waiting out a create
    pub fn create_poll_config(&self) -> PollConfig {
        PollConfig::new(self.create_timeout, self.poll_interval)
    }

    /// Poll configuration for waiting out an update
    pub fn update_poll_config(&self) -> PollConfig {
        PollConfig::new(self.update_timeout, self.poll_interval)
    }

    /// Poll configuration for waiting until the resource is gone
    pub fn delete_poll_config(&self) -> PollConfig {
        PollConfig::for_deletion(self.delete_timeout, self.poll_interval)
    }
}

/// Explicit map of resource type descriptors
#[derive(Debug, Clone, Default)]
pub struct Registry {
    descriptors: HashMap<String, ResourceDescriptor>,
}

impl Registry {
    pub fn new(descriptors: Vec<ResourceDescriptor>) -> Self {
        let mut map = HashMap::new();
        for descriptor in descriptors {
            map.insert(descriptor.type_name.clone(), descriptor);
        }
        Self { descriptors: map }
    }

    pub fn get(&self, type_name: &str) -> Option<&ResourceDescriptor> {
        self.descriptors.get(type_name)
    }

    /// Registered type names, sorted for display
    pub fn type_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.descriptors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
