//! Deprovisioning.
//!
//! A resource marked for deletion keeps its finalizer until the provider
//! confirms the instance is gone. Until then every pass either polls the
//! recorded `Delete` operation or issues one.

use super::{Reconciler, mark, record_operation};
use crate::error::ReconcileError;
use crds::constants::reasons;
use crds::{ConditionStatus, ConditionType, OperationKind, PostgresqlInstance, PostgresqlInstanceStatus, SpecError};
use kube::ResourceExt;
use tracing::{debug, info};

impl Reconciler {
    pub(crate) async fn reconcile_deletion(&self, instance: PostgresqlInstance) -> Result<(), ReconcileError> {
        if !instance.has_finalizer() {
            debug!(resource = %instance.name_any(), "Being deleted without our finalizer; nothing to do");
            return Ok(());
        }

        let mut status = instance.status.clone().unwrap_or_default();
        match self.deprovision(&instance, &mut status).await {
            Ok(()) => {
                self.cluster.remove_finalizer(&instance).await?;
                info!(
                    resource = %instance.name_any(),
                    instance = %instance.spec.name,
                    "Cloud SQL instance is gone; released the resource"
                );
                Ok(())
            }
            Err(e) => {
                self.persist_status(&instance, &status).await?;
                Err(e)
            }
        }
    }

    /// `Ok` once the provider instance no longer exists.
    async fn deprovision(
        &self,
        instance: &PostgresqlInstance,
        status: &mut PostgresqlInstanceStatus,
    ) -> Result<(), ReconcileError> {
        // No instance can exist under a name the provider would have rejected
        if matches!(instance.spec.validate(), Err(SpecError::InvalidName(_))) {
            return Ok(());
        }

        if let Some(pending) = status.pending_operation.clone() {
            self.poll_pending(instance, &pending, status).await?;
        }

        let name = &instance.spec.name;
        if self.cloudsql.get_instance(name).await?.is_none() {
            return Ok(());
        }

        mark(
            status,
            ConditionType::Ready,
            ConditionStatus::False,
            reasons::DELETING,
            "the instance is being deleted",
        );
        match self.cloudsql.delete_instance(name).await {
            Ok(operation) => {
                info!(resource = %instance.name_any(), instance = %name, operation = %operation.name, "Deleting Cloud SQL instance");
                record_operation(status, OperationKind::Delete, &operation.name);
                Err(ReconcileError::OperationInProgress {
                    kind: OperationKind::Delete,
                    name: operation.name,
                })
            }
            Err(e) if e.is_not_found() => Ok(()),
            // Another operation (possibly our own earlier delete) is still running
            Err(e) if e.is_conflict() => Err(ReconcileError::OperationInProgress {
                kind: OperationKind::Delete,
                name: name.clone(),
            }),
            Err(e) => Err(e.into()),
        }
    }
}
