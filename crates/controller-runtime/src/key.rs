//! Work keys.
//!
//! Work keys are `namespace/name` strings (or plain `name` for cluster-scoped
//! objects). They carry no payload: whoever dequeues a key re-reads the
//! object it names, so a key that went stale while queued is harmless.

use crate::error::RuntimeError;
use std::fmt;

/// A parsed work key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkKey {
    namespace: Option<String>,
    name: String,
}

impl WorkKey {
    /// Creates a key from its parts.
    pub fn new(namespace: Option<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.filter(|ns| !ns.is_empty()),
            name: name.into(),
        }
    }

    /// Parses `namespace/name` or `name`.
    ///
    /// Empty segments and keys with more than one `/` are rejected.
    pub fn parse(key: &str) -> Result<Self, RuntimeError> {
        let mut parts = key.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(name), None, None) if !name.is_empty() => Ok(Self::new(None, name)),
            (Some(namespace), Some(name), None) if !namespace.is_empty() && !name.is_empty() => {
                Ok(Self::new(Some(namespace.to_string()), name))
            }
            _ => Err(RuntimeError::InvalidKey(key.to_string())),
        }
    }

    /// Namespace of the object, `None` for cluster-scoped objects.
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Name of the object.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for WorkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{}/{}", namespace, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Computes the work key for a Kubernetes object.
pub fn key_for<K: kube::Resource>(obj: &K) -> Result<String, RuntimeError> {
    let meta = obj.meta();
    let name = meta
        .name
        .as_deref()
        .filter(|name| !name.is_empty())
        .ok_or_else(|| RuntimeError::InvalidKey("object has no name".to_string()))?;

    Ok(WorkKey::new(meta.namespace.clone(), name).to_string())
}
