//! Test utilities for unit testing the reconciler
//!
//! This module provides helpers for creating test resources and an in-memory
//! [`ClusterClient`] that mimics the API server semantics the reconciler
//! depends on (resource versions, finalizers, create conflicts).

use crate::cluster::ClusterClient;
use crate::error::ClusterError;
use crate::metrics::Metrics;
use crate::reconciler::Reconciler;
use async_trait::async_trait;
use cloudsql_client::MockCloudSqlClient;
use crds::constants::FINALIZER;
use crds::{PostgresqlInstance, PostgresqlInstanceSpec, PostgresqlInstanceStatus};
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Helper to create a minimal valid spec (region `europe-west1`, public IP only)
pub fn create_test_spec(instance_name: &str) -> PostgresqlInstanceSpec {
    serde_json::from_value(serde_json::json!({
        "name": instance_name,
        "location": {"region": "europe-west1"}
    }))
    .unwrap()
}

/// Helper to create a test PostgresqlInstance CRD
pub fn create_test_instance(name: &str, namespace: &str, instance_name: &str) -> PostgresqlInstance {
    let mut instance = PostgresqlInstance::new(name, create_test_spec(instance_name));
    instance.metadata.namespace = Some(namespace.to_string());
    instance
}

/// Helper to build a reconciler over a mock provider and a fake cluster
pub fn create_test_reconciler(cloudsql: &MockCloudSqlClient, cluster: &FakeClusterClient) -> Reconciler {
    Reconciler::new(
        Arc::new(cloudsql.clone()),
        Arc::new(cluster.clone()),
        Arc::new(Metrics::new().unwrap()),
    )
}

#[derive(Debug, Default)]
struct FakeState {
    instances: HashMap<(String, String), PostgresqlInstance>,
    secrets: HashMap<(String, String), Secret>,
    next_version: u64,
    status_history: Vec<PostgresqlInstanceStatus>,
    status_conflicts: usize,
}

impl FakeState {
    fn bump(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }

    /// Resolves a write against the stored object, enforcing the resource version
    fn stored_for_write(
        &mut self,
        instance: &PostgresqlInstance,
    ) -> Result<&mut PostgresqlInstance, ClusterError> {
        let key = key_of(instance);
        let stored = self
            .instances
            .get_mut(&key)
            .ok_or_else(|| ClusterError::NotFound(format!("{}/{}", key.0, key.1)))?;
        if instance.resource_version().is_some() && stored.resource_version() != instance.resource_version() {
            return Err(ClusterError::Conflict(format!(
                "resource version {:?} is stale",
                instance.resource_version()
            )));
        }
        Ok(stored)
    }
}

fn key_of<K: kube::Resource>(obj: &K) -> (String, String) {
    (obj.namespace().unwrap_or_default(), obj.name_any())
}

/// In-memory cluster
///
/// Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct FakeClusterClient {
    state: Arc<Mutex<FakeState>>,
}

impl FakeClusterClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a resource the way the API server would: fresh uid, generation 1, a resource version
    pub fn insert_instance(&self, mut instance: PostgresqlInstance) {
        let uid = format!("uid-{}", instance.name_any());
        instance.metadata.uid.get_or_insert(uid);
        let mut state = self.state.lock().unwrap();
        instance.metadata.generation = Some(1);
        instance.metadata.resource_version = Some(state.bump());
        state.instances.insert(key_of(&instance), instance);
    }

    pub fn instance(&self, namespace: &str, name: &str) -> Option<PostgresqlInstance> {
        self.state
            .lock()
            .unwrap()
            .instances
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn status(&self, namespace: &str, name: &str) -> PostgresqlInstanceStatus {
        self.instance(namespace, name)
            .and_then(|instance| instance.status)
            .unwrap_or_default()
    }

    /// Edits the spec like a user would; bumps the generation
    pub fn update_spec(&self, namespace: &str, name: &str, edit: impl FnOnce(&mut PostgresqlInstanceSpec)) {
        let mut state = self.state.lock().unwrap();
        let version = state.bump();
        if let Some(instance) = state.instances.get_mut(&(namespace.to_string(), name.to_string())) {
            edit(&mut instance.spec);
            instance.metadata.generation = Some(instance.metadata.generation.unwrap_or(0) + 1);
            instance.metadata.resource_version = Some(version);
        }
    }

    /// Requests deletion; objects without finalizers disappear right away
    pub fn delete_instance(&self, namespace: &str, name: &str) {
        let mut state = self.state.lock().unwrap();
        let key = (namespace.to_string(), name.to_string());
        let version = state.bump();
        let Some(instance) = state.instances.get_mut(&key) else {
            return;
        };
        if instance.finalizers().is_empty() {
            state.instances.remove(&key);
            return;
        }
        instance.metadata.deletion_timestamp = serde_json::from_value(serde_json::json!("2024-01-01T00:00:00Z")).unwrap();
        instance.metadata.resource_version = Some(version);
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.state
            .lock()
            .unwrap()
            .secrets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn insert_secret(&self, secret: Secret) {
        let mut state = self.state.lock().unwrap();
        state.secrets.insert(key_of(&secret), secret);
    }

    /// Every status written so far, oldest first
    pub fn status_history(&self) -> Vec<PostgresqlInstanceStatus> {
        self.state.lock().unwrap().status_history.clone()
    }

    /// Makes the next `count` status writes fail as if somebody else wrote first
    pub fn conflict_on_status_updates(&self, count: usize) {
        self.state.lock().unwrap().status_conflicts = count;
    }
}

#[async_trait]
impl ClusterClient for FakeClusterClient {
    async fn get_instance(&self, namespace: &str, name: &str) -> Result<Option<PostgresqlInstance>, ClusterError> {
        Ok(self.instance(namespace, name))
    }

    async fn update_status(
        &self,
        instance: &PostgresqlInstance,
        status: &PostgresqlInstanceStatus,
    ) -> Result<PostgresqlInstance, ClusterError> {
        let mut state = self.state.lock().unwrap();
        if state.status_conflicts > 0 {
            state.status_conflicts -= 1;
            // The concurrent writer moved the object on
            let version = state.bump();
            if let Some(stored) = state.instances.get_mut(&key_of(instance)) {
                stored.metadata.resource_version = Some(version);
            }
            return Err(ClusterError::Conflict("injected conflict".to_string()));
        }

        let version = state.bump();
        let stored = state.stored_for_write(instance)?;
        stored.status = Some(status.clone());
        stored.metadata.resource_version = Some(version);
        let updated = stored.clone();
        state.status_history.push(status.clone());
        Ok(updated)
    }

    async fn add_finalizer(&self, instance: &PostgresqlInstance) -> Result<PostgresqlInstance, ClusterError> {
        let mut state = self.state.lock().unwrap();
        let version = state.bump();
        let stored = state.stored_for_write(instance)?;
        let finalizers = stored.metadata.finalizers.get_or_insert_with(Vec::new);
        if !finalizers.iter().any(|f| f == FINALIZER) {
            finalizers.push(FINALIZER.to_string());
        }
        stored.metadata.resource_version = Some(version);
        Ok(stored.clone())
    }

    async fn remove_finalizer(&self, instance: &PostgresqlInstance) -> Result<(), ClusterError> {
        let mut state = self.state.lock().unwrap();
        let version = state.bump();
        let stored = state.stored_for_write(instance)?;
        if let Some(finalizers) = stored.metadata.finalizers.as_mut() {
            finalizers.retain(|f| f != FINALIZER);
        }
        stored.metadata.resource_version = Some(version);
        if stored.metadata.deletion_timestamp.is_some() && stored.finalizers().is_empty() {
            state.instances.remove(&key_of(instance));
        }
        Ok(())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, ClusterError> {
        Ok(self.secret(namespace, name))
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret, ClusterError> {
        let mut state = self.state.lock().unwrap();
        let key = (namespace.to_string(), secret.name_any());
        if state.secrets.contains_key(&key) {
            return Err(ClusterError::AlreadyExists(format!("secret {}/{}", key.0, key.1)));
        }
        let mut created = secret.clone();
        created.metadata.namespace = Some(namespace.to_string());
        state.secrets.insert(key, created.clone());
        Ok(created)
    }

    async fn annotate_secret(&self, namespace: &str, name: &str, key: &str, value: &str) -> Result<Secret, ClusterError> {
        let mut state = self.state.lock().unwrap();
        let secret = state
            .secrets
            .get_mut(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| ClusterError::NotFound(format!("secret {namespace}/{name}")))?;
        secret
            .metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert(key.to_string(), value.to_string());
        Ok(secret.clone())
    }
}
