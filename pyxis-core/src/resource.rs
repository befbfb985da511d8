//! Resource - Resources, their desired state, and remote observations

use std::collections::HashMap;

/// Unique identifier for a resource
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceId {
    /// Resource type (e.g., "vpc", "nat_gateway")
    pub resource_type: String,
    /// Resource name chosen by the caller
    pub name: String,
}

impl ResourceId {
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
        }
    }
}

/// Attribute value of a resource
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Int(i64),
    Bool(bool),
    List(Vec<Value>),
    Map(HashMap<String, Value>),
}

impl Value {
    /// Convert a JSON value to an attribute value.
    ///
    /// Returns `None` for JSON null, which attribute maps simply omit.
    pub fn from_json(value: &serde_json::Value) -> Option<Value> {
        match value {
            serde_json::Value::String(s) => Some(Value::String(s.clone())),
            serde_json::Value::Bool(b) => Some(Value::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(Value::Int(i))
                } else {
                    n.as_f64().map(|f| Value::Int(f as i64))
                }
            }
            serde_json::Value::Array(arr) => {
                let items: Vec<Value> = arr.iter().filter_map(Value::from_json).collect();
                Some(Value::List(items))
            }
            serde_json::Value::Object(obj) => {
                let mut map = HashMap::new();
                for (key, item) in obj {
                    if let Some(v) = Value::from_json(item) {
                        map.insert(key.clone(), v);
                    }
                }
                Some(Value::Map(map))
            }
            serde_json::Value::Null => None,
        }
    }

    /// Convert an attribute value to a JSON value
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Int(i) => serde_json::Value::Number((*i).into()),
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Map(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                let mut obj = serde_json::Map::new();
                for key in keys {
                    if let Some(v) = map.get(key) {
                        obj.insert(key.clone(), v.to_json());
                    }
                }
                serde_json::Value::Object(obj)
            }
        }
    }
}

/// Desired state declared by the caller
///
/// Immutable input to a reconciliation cycle. Attribute validation is the
/// configuration layer's job and is not repeated here.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub id: ResourceId,
    pub attributes: HashMap<String, Value>,
}

impl Resource {
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: ResourceId::new(resource_type, name),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }
}

/// Latest observation of a remote resource
///
/// Produced by a single describe call and consumed within the same poll tick;
/// never cached across ticks.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteState {
    /// Identifier assigned by the remote system at create time (e.g., vpc-xxx)
    pub identifier: String,
    /// Raw status string reported by the remote API
    pub status: String,
    pub attributes: HashMap<String, Value>,
}

impl RemoteState {
    pub fn new(identifier: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            status: status.into(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }
}
