//! Controller-specific error types.
//!
//! - [`ControllerError`]: startup failures; returned from `main`
//! - [`ClusterError`]: cluster API outcomes the reconciler distinguishes
//! - [`ReconcileError`]: per-key failures, classified for the work queue

use cloudsql_client::CloudSqlError;
use controller_runtime::{Requeue, RequeuePolicy, RuntimeError};
use crds::{OperationKind, SpecError};
use kube::Error as KubeError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort the controller process.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Cloud SQL client error
    #[error("Cloud SQL error: {0}")]
    CloudSql(#[from] CloudSqlError),

    /// Controller runtime error (e.g. caches never synced)
    #[error("Controller runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration file could not be read
    #[error("Failed to read configuration file {path:?}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration file is not valid YAML for [`crate::config::Config`]
    #[error("Failed to parse configuration file: {0}")]
    ConfigParse(#[source] serde_yaml::Error),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Metrics/probes server failed
    #[error("HTTP server error: {0}")]
    Server(#[source] std::io::Error),
}

/// Cluster API outcomes the reconciler treats differently.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// The object does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// A conditional write lost against a concurrent modification
    #[error("conflict: {0}")]
    Conflict(String),

    /// A create hit an existing object
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Any other Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[source] KubeError),
}

impl From<KubeError> for ClusterError {
    fn from(error: KubeError) -> Self {
        match error {
            KubeError::Api(api_err) if api_err.code == 404 => Self::NotFound(api_err.message),
            KubeError::Api(api_err) if api_err.code == 409 && api_err.reason == "AlreadyExists" => {
                Self::AlreadyExists(api_err.message)
            }
            KubeError::Api(api_err) if api_err.code == 409 => Self::Conflict(api_err.message),
            other => Self::Kube(other),
        }
    }
}

/// Errors from a single reconciliation pass.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Cluster API error
    #[error("cluster API error: {0}")]
    Cluster(#[from] ClusterError),

    /// Cloud SQL API error
    #[error("Cloud SQL error: {0}")]
    CloudSql(#[from] CloudSqlError),

    /// The spec failed validation; retried only after the user edits it
    #[error("invalid spec: {0}")]
    InvalidSpec(#[from] SpecError),

    /// A provider operation is still running
    #[error("{kind} operation {name} is still in progress")]
    OperationInProgress { kind: OperationKind, name: String },

    /// A provider operation finished with an error
    #[error("{kind} operation {name} failed: {message}")]
    OperationFailed {
        kind: OperationKind,
        name: String,
        message: String,
    },

    /// The instance exists but is not serving yet
    #[error("instance is not runnable (state {0})")]
    NotRunnable(String),

    /// The credentials secret exists but cannot be used
    #[error("invalid credentials secret: {0}")]
    InvalidSecret(String),
}

impl RequeuePolicy for ReconcileError {
    fn requeue(&self) -> Requeue {
        match self {
            // Re-read and retry right away; the write lost against a fresher object
            Self::Cluster(ClusterError::Conflict(_)) => Requeue::Immediate,
            Self::InvalidSpec(_) => Requeue::Never,
            Self::Cluster(_)
            | Self::CloudSql(_)
            | Self::OperationInProgress { .. }
            | Self::OperationFailed { .. }
            | Self::NotRunnable(_)
            | Self::InvalidSecret(_) => Requeue::Backoff,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::error::ErrorResponse;

    fn api_error(code: u16, reason: &str) -> KubeError {
        KubeError::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("{reason} error"),
            reason: reason.to_string(),
            code,
        })
    }

    #[test]
    fn test_kube_error_mapping() {
        assert!(matches!(ClusterError::from(api_error(404, "NotFound")), ClusterError::NotFound(_)));
        assert!(matches!(ClusterError::from(api_error(409, "Conflict")), ClusterError::Conflict(_)));
        assert!(matches!(
            ClusterError::from(api_error(409, "AlreadyExists")),
            ClusterError::AlreadyExists(_)
        ));
        assert!(matches!(ClusterError::from(api_error(500, "InternalError")), ClusterError::Kube(_)));
    }

    #[test]
    fn test_requeue_classification() {
        let conflict = ReconcileError::Cluster(ClusterError::Conflict("stale".to_string()));
        assert_eq!(conflict.requeue(), Requeue::Immediate);

        let invalid = ReconcileError::InvalidSpec(SpecError::NoNetworking);
        assert_eq!(invalid.requeue(), Requeue::Never);

        let in_progress = ReconcileError::OperationInProgress {
            kind: OperationKind::Create,
            name: "operation-1".to_string(),
        };
        assert_eq!(in_progress.requeue(), Requeue::Backoff);

        let provider = ReconcileError::CloudSql(CloudSqlError::Api("503".to_string()));
        assert_eq!(provider.requeue(), Requeue::Backoff);

        let not_found = ReconcileError::Cluster(ClusterError::NotFound("gone".to_string()));
        assert_eq!(not_found.requeue(), Requeue::Backoff);
    }
}
