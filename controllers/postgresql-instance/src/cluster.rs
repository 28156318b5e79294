//! Cluster API access.
//!
//! The reconciler talks to the cluster through [`ClusterClient`] so that it
//! can be driven against an in-memory fake in unit tests. [`KubeClusterClient`]
//! is the real implementation on top of `kube::Api`.
//!
//! Every write that depends on what the caller read carries the object's
//! `resourceVersion`; the API server answers 409 when the object moved on in
//! the meantime, which surfaces as [`ClusterError::Conflict`].

use crate::error::ClusterError;
use async_trait::async_trait;
use crds::constants::FINALIZER;
use crds::{PostgresqlInstance, PostgresqlInstanceStatus};
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Patch, PatchParams, PostParams};
use kube::{Api, Client, ResourceExt};
use serde_json::json;
use tracing::debug;

/// Cluster operations needed to reconcile a `PostgresqlInstance`
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Reads a resource straight from the API server, `None` if it does not exist
    async fn get_instance(&self, namespace: &str, name: &str) -> Result<Option<PostgresqlInstance>, ClusterError>;

    /// Replaces the status of `instance`, guarded by its `resourceVersion`
    async fn update_status(
        &self,
        instance: &PostgresqlInstance,
        status: &PostgresqlInstanceStatus,
    ) -> Result<PostgresqlInstance, ClusterError>;

    /// Adds the controller finalizer, guarded by the `resourceVersion`
    async fn add_finalizer(&self, instance: &PostgresqlInstance) -> Result<PostgresqlInstance, ClusterError>;

    /// Removes the controller finalizer, guarded by the `resourceVersion`
    async fn remove_finalizer(&self, instance: &PostgresqlInstance) -> Result<(), ClusterError>;

    /// Reads a secret, `None` if it does not exist
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, ClusterError>;

    /// Creates a secret; fails with [`ClusterError::AlreadyExists`] if the name is taken
    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret, ClusterError>;

    /// Sets a single annotation on a secret
    async fn annotate_secret(&self, namespace: &str, name: &str, key: &str, value: &str) -> Result<Secret, ClusterError>;
}

/// [`ClusterClient`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl std::fmt::Debug for KubeClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClusterClient").finish_non_exhaustive()
    }
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn instances(&self, namespace: &str) -> Api<PostgresqlInstance> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn secrets(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Namespace of a namespaced resource as the API server reported it
fn namespace_of(instance: &PostgresqlInstance) -> String {
    instance.namespace().unwrap_or_else(|| "default".to_string())
}

/// Finalizer list with ours added or removed, preserving everybody else's
fn finalizers_with(instance: &PostgresqlInstance, present: bool) -> Vec<String> {
    let mut finalizers: Vec<String> = instance.finalizers().iter().filter(|f| *f != FINALIZER).cloned().collect();
    if present {
        finalizers.push(FINALIZER.to_string());
    }
    finalizers
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get_instance(&self, namespace: &str, name: &str) -> Result<Option<PostgresqlInstance>, ClusterError> {
        Ok(self.instances(namespace).get_opt(name).await?)
    }

    async fn update_status(
        &self,
        instance: &PostgresqlInstance,
        status: &PostgresqlInstanceStatus,
    ) -> Result<PostgresqlInstance, ClusterError> {
        let name = instance.name_any();
        let patch = json!({
            "metadata": { "resourceVersion": instance.resource_version() },
            "status": status,
        });
        debug!(namespace = %namespace_of(instance), %name, "Patching status");

        Ok(self
            .instances(&namespace_of(instance))
            .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?)
    }

    async fn add_finalizer(&self, instance: &PostgresqlInstance) -> Result<PostgresqlInstance, ClusterError> {
        let patch = json!({
            "metadata": {
                "resourceVersion": instance.resource_version(),
                "finalizers": finalizers_with(instance, true),
            }
        });
        Ok(self
            .instances(&namespace_of(instance))
            .patch(&instance.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
            .await?)
    }

    async fn remove_finalizer(&self, instance: &PostgresqlInstance) -> Result<(), ClusterError> {
        let patch = json!({
            "metadata": {
                "resourceVersion": instance.resource_version(),
                "finalizers": finalizers_with(instance, false),
            }
        });
        match self
            .instances(&namespace_of(instance))
            .patch(&instance.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => Ok(()),
            // The API server may drop the object as soon as the last finalizer goes
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, ClusterError> {
        Ok(self.secrets(namespace).get_opt(name).await?)
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret, ClusterError> {
        Ok(self.secrets(namespace).create(&PostParams::default(), secret).await?)
    }

    async fn annotate_secret(&self, namespace: &str, name: &str, key: &str, value: &str) -> Result<Secret, ClusterError> {
        let patch = json!({
            "metadata": { "annotations": { key: value } }
        });
        Ok(self
            .secrets(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?)
    }
}
