//! Reconciliation of `PostgresqlInstance` resources.
//!
//! Every pass starts from a fresh read of the resource and walks the same
//! state machine:
//!
//! 1. deleted resources are deprovisioned, then released (`deletion`)
//! 2. the finalizer is ensured and the spec validated
//! 3. a provider operation recorded in `status.pendingOperation` is polled
//!    until it finishes; no new mutation is issued meanwhile
//! 4. a missing provider instance is created
//! 5. drifted settings are patched
//! 6. once the instance is `RUNNABLE`, credentials are provisioned and the
//!    resource becomes `Ready`
//!
//! Conditions and addresses are collected in a status copy that is written
//! back once, at the end of the pass, and only when it changed.

pub mod credentials;
pub mod deletion;
pub mod settings;

#[cfg(test)]
mod reconciler_test;

use crate::cluster::ClusterClient;
use crate::error::ReconcileError;
use crate::metrics::Metrics;
use async_trait::async_trait;
use chrono::Utc;
use cloudsql_client::{CloudSqlClientTrait, DatabaseInstance, InstanceState, IpAddressType, Settings};
use controller_runtime::{RequeuePolicy, SyncHandler, WorkKey};
use crds::constants::reasons;
use crds::{
    ConditionStatus, ConditionType, OperationKind, PendingOperation, PostgresqlInstance, PostgresqlInstanceSpec,
    PostgresqlInstanceStatus, is_condition_true, set_condition,
};
use kube::ResourceExt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Reconciles `PostgresqlInstance` resources against Cloud SQL.
pub struct Reconciler {
    pub(crate) cloudsql: Arc<dyn CloudSqlClientTrait>,
    pub(crate) cluster: Arc<dyn ClusterClient>,
    metrics: Arc<Metrics>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("project", &self.cloudsql.project_id())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SyncHandler for Reconciler {
    type Error = ReconcileError;

    async fn sync(&self, key: &WorkKey) -> Result<(), ReconcileError> {
        let started = Instant::now();
        let result = self.reconcile(key).await;
        self.metrics
            .observe_reconciliation(started.elapsed(), result.as_ref().err().map(RequeuePolicy::requeue));
        result
    }
}

impl Reconciler {
    pub fn new(cloudsql: Arc<dyn CloudSqlClientTrait>, cluster: Arc<dyn ClusterClient>, metrics: Arc<Metrics>) -> Self {
        Self {
            cloudsql,
            cluster,
            metrics,
        }
    }

    /// Converges the resource named by `key`.
    pub async fn reconcile(&self, key: &WorkKey) -> Result<(), ReconcileError> {
        let namespace = key.namespace().unwrap_or("default");
        let Some(instance) = self.cluster.get_instance(namespace, key.name()).await? else {
            // Deprovisioning is guaranteed by the finalizer before the resource can disappear
            debug!(%key, "Resource no longer exists");
            return Ok(());
        };

        if instance.is_being_deleted() {
            return self.reconcile_deletion(instance).await;
        }

        let instance = if instance.has_finalizer() {
            instance
        } else {
            debug!(%key, "Adding finalizer");
            self.cluster.add_finalizer(&instance).await?
        };

        let mut status = instance.status.clone().unwrap_or_default();
        let result = self.converge(&instance, &mut status).await;
        status.observed_generation = instance.metadata.generation;

        // A lost status write wins over whatever the pass concluded
        self.persist_status(&instance, &status).await?;
        match &result {
            Ok(()) => debug!(%key, "Reconciled"),
            Err(e) => debug!(%key, error = %e, "Reconciliation incomplete"),
        }
        result
    }

    async fn converge(
        &self,
        instance: &PostgresqlInstance,
        status: &mut PostgresqlInstanceStatus,
    ) -> Result<(), ReconcileError> {
        let spec = &instance.spec;
        if let Err(e) = spec.validate() {
            warn!(resource = %instance.name_any(), error = %e, "Invalid spec");
            mark(status, ConditionType::Ready, ConditionStatus::False, reasons::INVALID_SPEC, &e.to_string());
            return Err(e.into());
        }

        if let Some(pending) = status.pending_operation.clone() {
            self.poll_pending(instance, &pending, status).await?;
        }

        let Some(current) = self.cloudsql.get_instance(&spec.name).await? else {
            return self.create(instance, status).await;
        };
        mirror_ips(spec, &current, status);

        if current.state == Some(InstanceState::PendingCreate) {
            mark_creating(status, "the instance is being created");
            return Err(ReconcileError::NotRunnable(state_name(&current)));
        }
        mark(status, ConditionType::Created, ConditionStatus::True, reasons::INSTANCE_CREATED, "");

        let desired = settings::desired_instance(spec, self.cloudsql.project_id())?;
        let none = Settings::default();
        let current_settings = current.settings.as_ref().unwrap_or(&none);
        let drift = settings::settings_drift(desired.settings.as_ref().unwrap_or(&none), current_settings);
        if !drift.is_empty() {
            let request = settings::update_request(&desired, current_settings);
            return self.update(instance, &request, &drift, status).await;
        }

        if !current.is_runnable() {
            let state = state_name(&current);
            mark(
                status,
                ConditionType::Ready,
                ConditionStatus::False,
                reasons::INSTANCE_NOT_RUNNABLE,
                &format!("the instance is in state {state}"),
            );
            return Err(ReconcileError::NotRunnable(state));
        }

        if let Err(e) = self.ensure_credentials(instance, status).await {
            mark(status, ConditionType::Ready, ConditionStatus::False, reasons::CREDENTIALS_PENDING, &e.to_string());
            return Err(e);
        }

        if !is_condition_true(&status.conditions, ConditionType::Ready) {
            info!(resource = %instance.name_any(), instance = %spec.name, "Instance is ready");
        }
        mark(status, ConditionType::Ready, ConditionStatus::True, reasons::INSTANCE_READY, "");
        Ok(())
    }

    /// Polls the recorded operation; `Ok` once it finished successfully and the marker is cleared.
    pub(crate) async fn poll_pending(
        &self,
        instance: &PostgresqlInstance,
        pending: &PendingOperation,
        status: &mut PostgresqlInstanceStatus,
    ) -> Result<(), ReconcileError> {
        let operation = match self.cloudsql.get_operation(&pending.name).await {
            Ok(operation) => operation,
            Err(e) if e.is_not_found() => {
                warn!(operation = %pending.name, kind = %pending.kind, "Recorded operation is unknown to the provider; forgetting it");
                status.pending_operation = None;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        if !operation.is_done() {
            debug!(operation = %pending.name, kind = %pending.kind, "Operation still running");
            return Err(ReconcileError::OperationInProgress {
                kind: pending.kind,
                name: pending.name.clone(),
            });
        }

        status.pending_operation = None;
        if let Some(message) = operation.error_message() {
            warn!(operation = %pending.name, kind = %pending.kind, %message, "Operation failed");
            mark(status, ConditionType::Ready, ConditionStatus::False, reasons::OPERATION_FAILED, &message);
            return Err(ReconcileError::OperationFailed {
                kind: pending.kind,
                name: pending.name.clone(),
                message,
            });
        }

        info!(operation = %pending.name, kind = %pending.kind, "Operation finished");
        if pending.kind == OperationKind::SetPassword {
            self.mark_password_synced(instance).await?;
        }
        Ok(())
    }

    async fn create(
        &self,
        instance: &PostgresqlInstance,
        status: &mut PostgresqlInstanceStatus,
    ) -> Result<(), ReconcileError> {
        let desired = settings::desired_instance(&instance.spec, self.cloudsql.project_id())?;
        let operation = self.cloudsql.create_instance(&desired).await?;
        info!(
            resource = %instance.name_any(),
            instance = %desired.name,
            operation = %operation.name,
            "Creating Cloud SQL instance"
        );

        status.ips = Default::default();
        mark_creating(status, "the instance is being created");
        record_operation(status, OperationKind::Create, &operation.name);
        Err(ReconcileError::OperationInProgress {
            kind: OperationKind::Create,
            name: operation.name,
        })
    }

    async fn update(
        &self,
        instance: &PostgresqlInstance,
        desired: &DatabaseInstance,
        drift: &[&str],
        status: &mut PostgresqlInstanceStatus,
    ) -> Result<(), ReconcileError> {
        let fields = drift.join(", ");
        let operation = self.cloudsql.update_instance(&desired.name, desired).await?;
        info!(
            resource = %instance.name_any(),
            instance = %desired.name,
            operation = %operation.name,
            %fields,
            "Updating Cloud SQL instance settings"
        );

        mark(
            status,
            ConditionType::Ready,
            ConditionStatus::False,
            reasons::UPDATING,
            &format!("updating {fields}"),
        );
        record_operation(status, OperationKind::Update, &operation.name);
        Err(ReconcileError::OperationInProgress {
            kind: OperationKind::Update,
            name: operation.name,
        })
    }

    /// Writes `status` back if it differs from what was read.
    pub(crate) async fn persist_status(
        &self,
        instance: &PostgresqlInstance,
        status: &PostgresqlInstanceStatus,
    ) -> Result<(), ReconcileError> {
        if instance.status.as_ref() == Some(status) {
            return Ok(());
        }
        self.cluster.update_status(instance, status).await?;
        Ok(())
    }
}

pub(crate) fn namespace_of(instance: &PostgresqlInstance) -> String {
    instance.namespace().unwrap_or_else(|| "default".to_string())
}

pub(crate) fn mark(
    status: &mut PostgresqlInstanceStatus,
    condition_type: ConditionType,
    condition_status: ConditionStatus,
    reason: &str,
    message: &str,
) {
    set_condition(&mut status.conditions, condition_type, condition_status, reason, message, Utc::now());
}

/// `Created` goes to Unknown the first time; a previously created instance that
/// is being created again is reported as `False`.
fn mark_creating(status: &mut PostgresqlInstanceStatus, message: &str) {
    let created = if is_condition_true(&status.conditions, ConditionType::Created) {
        ConditionStatus::False
    } else {
        ConditionStatus::Unknown
    };
    mark(status, ConditionType::Created, created, reasons::INSTANCE_CREATING, message);
    mark(status, ConditionType::Ready, ConditionStatus::False, reasons::INSTANCE_CREATING, message);
}

pub(crate) fn record_operation(status: &mut PostgresqlInstanceStatus, kind: OperationKind, name: &str) {
    status.pending_operation = Some(PendingOperation {
        name: name.to_string(),
        kind,
        start_time: Utc::now(),
    });
}

/// Copies the provider's addresses into the status.
///
/// An address is only shown while its networking mode is enabled in the spec
/// and the provider reports it.
pub(crate) fn mirror_ips(
    spec: &PostgresqlInstanceSpec,
    current: &DatabaseInstance,
    status: &mut PostgresqlInstanceStatus,
) {
    let address = |enabled: bool, ip_type: IpAddressType| {
        if enabled {
            current.ip_address(ip_type).map(str::to_string)
        } else {
            None
        }
    };
    status.ips.public_ip = address(spec.networking.public_ip.enabled, IpAddressType::Primary);
    status.ips.private_ip = address(spec.networking.private_ip.enabled, IpAddressType::Private);
}

fn state_name(instance: &DatabaseInstance) -> String {
    instance
        .state
        .map_or_else(|| "UNKNOWN".to_string(), |state| format!("{state:?}"))
}
