//! Credentials for the built-in `postgres` user.
//!
//! The password is generated once and kept in a secret named after the
//! `PostgresqlInstance`. The secret is only marked as synced after the
//! provider accepted the password, so a crash between the two steps simply
//! re-sends the same password.

use super::Reconciler;
use crate::error::{ClusterError, ReconcileError};
use chrono::Utc;
use crds::constants::{
    ANNOTATION_TRUE, INSTANCE_NAME_LABEL, PASSWORD_KEY, PASSWORD_LENGTH, PASSWORD_SYNCED_ANNOTATION, USERNAME_KEY,
    USERNAME_VALUE,
};
use crds::{OperationKind, PendingOperation, PostgresqlInstance, PostgresqlInstanceStatus};
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};
use rand::Rng;
use rand::distr::Alphanumeric;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Random alphanumeric password
pub fn generate_password() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(PASSWORD_LENGTH)
        .map(char::from)
        .collect()
}

/// Secret holding the credentials of `instance`, owned by it
pub fn credentials_secret(instance: &PostgresqlInstance, password: &str) -> Secret {
    let name = instance.name_any();
    Secret {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: instance.namespace(),
            labels: Some(BTreeMap::from([(INSTANCE_NAME_LABEL.to_string(), name)])),
            owner_references: instance.controller_owner_ref(&()).map(|owner| vec![owner]),
            ..Default::default()
        },
        data: Some(BTreeMap::from([
            (USERNAME_KEY.to_string(), ByteString(USERNAME_VALUE.as_bytes().to_vec())),
            (PASSWORD_KEY.to_string(), ByteString(password.as_bytes().to_vec())),
        ])),
        type_: Some("Opaque".to_string()),
        ..Default::default()
    }
}

/// Whether the provider confirmed the password stored in `secret`
pub fn is_password_synced(secret: &Secret) -> bool {
    secret
        .annotations()
        .get(PASSWORD_SYNCED_ANNOTATION)
        .is_some_and(|value| value == ANNOTATION_TRUE)
}

fn read_password(secret: &Secret) -> Result<String, ReconcileError> {
    let bytes = secret
        .data
        .as_ref()
        .and_then(|data| data.get(PASSWORD_KEY))
        .ok_or_else(|| ReconcileError::InvalidSecret(format!("{} has no {PASSWORD_KEY} key", secret.name_any())))?;
    let password = String::from_utf8(bytes.0.clone())
        .map_err(|e| ReconcileError::InvalidSecret(format!("{PASSWORD_KEY} is not valid UTF-8: {e}")))?;
    if password.is_empty() {
        return Err(ReconcileError::InvalidSecret(format!("{} has an empty {PASSWORD_KEY}", secret.name_any())));
    }
    Ok(password)
}

impl Reconciler {
    /// Makes sure the credentials secret exists and the provider knows its password.
    ///
    /// Returns `OperationInProgress` (and records a `SetPassword` marker) while
    /// the provider is still applying the password.
    pub(crate) async fn ensure_credentials(
        &self,
        instance: &PostgresqlInstance,
        status: &mut PostgresqlInstanceStatus,
    ) -> Result<(), ReconcileError> {
        let namespace = super::namespace_of(instance);
        let name = instance.name_any();

        let secret = match self.cluster.get_secret(&namespace, &name).await? {
            Some(secret) => secret,
            None => self.create_credentials(instance, &namespace).await?,
        };
        if is_password_synced(&secret) {
            return Ok(());
        }

        let password = read_password(&secret)?;
        let operation = self
            .cloudsql
            .set_user_password(&instance.spec.name, USERNAME_VALUE, &password)
            .await?;

        if !operation.is_done() {
            debug!(%namespace, %name, operation = %operation.name, "Waiting for the password to be set");
            let marker = PendingOperation {
                name: operation.name.clone(),
                kind: OperationKind::SetPassword,
                start_time: Utc::now(),
            };
            status.pending_operation = Some(marker);
            return Err(ReconcileError::OperationInProgress {
                kind: OperationKind::SetPassword,
                name: operation.name,
            });
        }
        if let Some(message) = operation.error_message() {
            return Err(ReconcileError::OperationFailed {
                kind: OperationKind::SetPassword,
                name: operation.name,
                message,
            });
        }
        self.mark_password_synced(instance).await
    }

    /// Records on the secret that the provider accepted its password.
    pub(crate) async fn mark_password_synced(&self, instance: &PostgresqlInstance) -> Result<(), ReconcileError> {
        let namespace = super::namespace_of(instance);
        let name = instance.name_any();
        self.cluster
            .annotate_secret(&namespace, &name, PASSWORD_SYNCED_ANNOTATION, ANNOTATION_TRUE)
            .await?;
        info!(%namespace, %name, "Password of the {} user is set", USERNAME_VALUE);
        Ok(())
    }

    async fn create_credentials(&self, instance: &PostgresqlInstance, namespace: &str) -> Result<Secret, ReconcileError> {
        let secret = credentials_secret(instance, &generate_password());
        match self.cluster.create_secret(namespace, &secret).await {
            Ok(created) => {
                info!(namespace, name = %instance.name_any(), "Created credentials secret");
                Ok(created)
            }
            // Never overwrite an existing password
            Err(ClusterError::AlreadyExists(_)) => self
                .cluster
                .get_secret(namespace, &instance.name_any())
                .await?
                .ok_or_else(|| ReconcileError::InvalidSecret(format!("{} vanished after a conflicting create", instance.name_any()))),
            Err(e) => Err(e.into()),
        }
    }
}
