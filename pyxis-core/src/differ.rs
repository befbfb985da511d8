//! Differ - Compare desired attributes with the latest remote observation
//!
//! The diff decides the minimal set of modify calls an update needs, and
//! flags attributes the remote API can only change by replacing the
//! resource.

use std::collections::HashMap;

use crate::resource::Value;

/// Attributes that differ between desired and observed state
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AttributeDiff {
    /// Attributes that can change in place
    pub changed: Vec<String>,
    /// Attributes that changed but require resource replacement
    pub replacement: Vec<String>,
}

impl AttributeDiff {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.replacement.is_empty()
    }

    pub fn requires_replacement(&self) -> bool {
        !self.replacement.is_empty()
    }
}

/// Compare desired attributes against observed remote attributes.
///
/// Only attributes the caller declared participate; remote-computed
/// attributes with no desired counterpart are not drift.
pub fn diff_attributes(
    desired: &HashMap<String, Value>,
    remote: &HashMap<String, Value>,
    replacement_attributes: &[String],
) -> AttributeDiff {
    let mut diff = AttributeDiff::default();

    let mut keys: Vec<&String> = desired.keys().collect();
    keys.sort();

    for key in keys {
        let desired_value = &desired[key];
        match remote.get(key) {
            Some(remote_value) if remote_value == desired_value => {}
            _ => {
                if replacement_attributes.iter().any(|a| a == key) {
                    diff.replacement.push(key.clone());
                } else {
                    diff.changed.push(key.clone());
                }
            }
        }
    }

    diff
}

/// One in-place attribute change
#[derive(Debug, Clone, PartialEq)]
pub struct PatchOp {
    pub attribute: String,
    pub value: Value,
}

/// Minimal set of in-place changes for one modify call
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Patch {
    pub ops: Vec<PatchOp>,
}

impl Patch {
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Build the modify patch for the in-place-changeable attributes of a diff
pub fn build_patch(desired: &HashMap<String, Value>, changed: &[String]) -> Patch {
    let mut ops = Vec::new();
    for key in changed {
        if let Some(value) = desired.get(key) {
            ops.push(PatchOp {
                attribute: key.clone(),
                value: value.clone(),
            });
        }
    }
    Patch { ops }
}
