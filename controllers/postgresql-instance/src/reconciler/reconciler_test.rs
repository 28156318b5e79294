//! Scenario tests for the PostgresqlInstance reconciler

#[cfg(test)]
mod tests {
    use crate::error::{ClusterError, ReconcileError};
    use crate::reconciler::Reconciler;
    use crate::reconciler::credentials::credentials_secret;
    use crate::test_utils::*;
    use cloudsql_client::{CloudSqlClientTrait, CloudSqlError, InstanceState, MockCloudSqlClient};
    use controller_runtime::{Requeue, RequeuePolicy, SyncHandler, WorkKey};
    use crds::constants::{
        ANNOTATION_TRUE, PASSWORD_KEY, PASSWORD_SYNCED_ANNOTATION, USERNAME_KEY, USERNAME_VALUE, reasons,
    };
    use crds::{ConditionStatus, ConditionType, OperationKind, PostgresqlInstanceStatus, find_condition};

    const NAMESPACE: &str = "shop";
    const NAME: &str = "orders";
    const INSTANCE: &str = "orders-db";
    const MAX_PASSES: usize = 10;

    fn key() -> WorkKey {
        WorkKey::new(Some(NAMESPACE.to_string()), NAME)
    }

    fn setup() -> (MockCloudSqlClient, FakeClusterClient, Reconciler) {
        let cloudsql = MockCloudSqlClient::new("test-project");
        let cluster = FakeClusterClient::new();
        let reconciler = create_test_reconciler(&cloudsql, &cluster);
        (cloudsql, cluster, reconciler)
    }

    fn condition(status: &PostgresqlInstanceStatus, condition_type: ConditionType) -> (ConditionStatus, String) {
        let condition = find_condition(&status.conditions, condition_type)
            .unwrap_or_else(|| panic!("no {condition_type} condition in {status:?}"));
        (condition.status, condition.reason.clone())
    }

    /// Reconciles until a pass succeeds; every intermediate failure must be retryable.
    async fn reconcile_until_ready(reconciler: &Reconciler) -> usize {
        for pass in 1..=MAX_PASSES {
            match reconciler.reconcile(&key()).await {
                Ok(()) => return pass,
                Err(e) => assert_ne!(e.requeue(), Requeue::Never, "permanent failure on pass {pass}: {e}"),
            }
        }
        panic!("not ready after {MAX_PASSES} passes");
    }

    #[tokio::test]
    async fn test_create_to_ready() {
        let (cloudsql, cluster, reconciler) = setup();
        cluster.insert_instance(create_test_instance(NAME, NAMESPACE, INSTANCE));

        // Pass 1: finalizer added, creation issued
        let result = reconciler.reconcile(&key()).await;
        assert!(matches!(
            result,
            Err(ReconcileError::OperationInProgress {
                kind: OperationKind::Create,
                ..
            })
        ));
        let resource = cluster.instance(NAMESPACE, NAME).unwrap();
        assert!(resource.has_finalizer());
        let status = resource.status.unwrap();
        assert_eq!(status.pending_operation.as_ref().map(|op| op.kind), Some(OperationKind::Create));
        assert_eq!(
            condition(&status, ConditionType::Created),
            (ConditionStatus::Unknown, reasons::INSTANCE_CREATING.to_string())
        );
        assert_eq!(condition(&status, ConditionType::Ready).0, ConditionStatus::False);
        assert_eq!(status.observed_generation, Some(1));

        // Pass 2: creation finished, password being set
        let result = reconciler.reconcile(&key()).await;
        assert!(matches!(
            result,
            Err(ReconcileError::OperationInProgress {
                kind: OperationKind::SetPassword,
                ..
            })
        ));
        let status = cluster.status(NAMESPACE, NAME);
        assert_eq!(condition(&status, ConditionType::Created).0, ConditionStatus::True);
        assert_eq!(
            condition(&status, ConditionType::Ready),
            (ConditionStatus::False, reasons::CREDENTIALS_PENDING.to_string())
        );
        assert!(status.ips.public_ip.is_some());

        // Pass 3: ready
        reconciler.reconcile(&key()).await.unwrap();
        let status = cluster.status(NAMESPACE, NAME);
        assert_eq!(
            condition(&status, ConditionType::Ready),
            (ConditionStatus::True, reasons::INSTANCE_READY.to_string())
        );
        assert_eq!(status.pending_operation, None);
        assert_eq!(cloudsql.calls("create_instance"), 1);

        let secret = cluster.secret(NAMESPACE, NAME).unwrap();
        let password = String::from_utf8(secret.data.as_ref().unwrap()[PASSWORD_KEY].0.clone()).unwrap();
        assert_eq!(cloudsql.password(INSTANCE, USERNAME_VALUE), Some(password));
        assert_eq!(
            secret.metadata.annotations.unwrap().get(PASSWORD_SYNCED_ANNOTATION).map(String::as_str),
            Some(ANNOTATION_TRUE)
        );
    }

    #[tokio::test]
    async fn test_steady_state_writes_nothing() {
        let (cloudsql, cluster, reconciler) = setup();
        cluster.insert_instance(create_test_instance(NAME, NAMESPACE, INSTANCE));
        reconcile_until_ready(&reconciler).await;
        let writes = cluster.status_history().len();
        let version = cluster.instance(NAMESPACE, NAME).unwrap().metadata.resource_version;

        reconciler.reconcile(&key()).await.unwrap();
        reconciler.reconcile(&key()).await.unwrap();

        assert_eq!(cluster.status_history().len(), writes);
        assert_eq!(cluster.instance(NAMESPACE, NAME).unwrap().metadata.resource_version, version);
        assert_eq!(cloudsql.calls("update_instance"), 0);
        assert_eq!(cloudsql.calls("set_user_password"), 1);
    }

    /// Private-only instance, then public IP enabled on the live resource.
    #[tokio::test]
    async fn test_lifecycle_enable_public_ip() {
        let (cloudsql, cluster, reconciler) = setup();
        let mut resource = create_test_instance(NAME, NAMESPACE, INSTANCE);
        resource.spec.networking.public_ip.enabled = false;
        resource.spec.networking.private_ip.enabled = true;
        resource.spec.networking.private_ip.network = Some("projects/test-project/global/networks/default".to_string());
        cluster.insert_instance(resource);

        reconcile_until_ready(&reconciler).await;

        let status = cluster.status(NAMESPACE, NAME);
        assert_eq!(condition(&status, ConditionType::Created).0, ConditionStatus::True);
        assert_eq!(condition(&status, ConditionType::Ready).0, ConditionStatus::True);
        assert_eq!(status.ips.public_ip, None);
        let private_ip = status.ips.private_ip.clone().unwrap();
        assert!(!private_ip.is_empty());

        let secret = cluster.secret(NAMESPACE, NAME).unwrap();
        let data = secret.data.unwrap();
        assert!(!data[USERNAME_KEY].0.is_empty());
        assert!(!data[PASSWORD_KEY].0.is_empty());
        let ready_since = find_condition(&status.conditions, ConditionType::Ready)
            .unwrap()
            .last_transition_time;

        cluster.update_spec(NAMESPACE, NAME, |spec| spec.networking.public_ip.enabled = true);

        let result = reconciler.reconcile(&key()).await;
        assert!(matches!(
            result,
            Err(ReconcileError::OperationInProgress {
                kind: OperationKind::Update,
                ..
            })
        ));
        let status = cluster.status(NAMESPACE, NAME);
        assert_eq!(
            condition(&status, ConditionType::Ready),
            (ConditionStatus::False, reasons::UPDATING.to_string())
        );
        assert_eq!(status.observed_generation, Some(2));

        reconcile_until_ready(&reconciler).await;

        let status = cluster.status(NAMESPACE, NAME);
        assert_eq!(condition(&status, ConditionType::Ready).0, ConditionStatus::True);
        assert!(status.ips.public_ip.as_deref().is_some_and(|ip| !ip.is_empty()));
        assert_eq!(status.ips.private_ip.as_deref(), Some(private_ip.as_str()));
        assert!(find_condition(&status.conditions, ConditionType::Ready).unwrap().last_transition_time >= ready_since);
        assert_eq!(
            cloudsql
                .instance(INSTANCE)
                .and_then(|i| i.settings)
                .and_then(|s| s.ip_configuration)
                .and_then(|ip| ip.ipv4_enabled),
            Some(true)
        );

        // Ready went True -> False -> True, with monotonic transition times
        let mut ready_history: Vec<ConditionStatus> = Vec::new();
        let mut last_transition = None;
        for written in cluster.status_history() {
            let ready = find_condition(&written.conditions, ConditionType::Ready).unwrap();
            if let Some(previous) = last_transition {
                assert!(ready.last_transition_time >= previous);
            }
            last_transition = Some(ready.last_transition_time);
            if ready_history.last() != Some(&ready.status) {
                ready_history.push(ready.status);
            }
        }
        assert_eq!(
            ready_history,
            vec![
                ConditionStatus::False,
                ConditionStatus::True,
                ConditionStatus::False,
                ConditionStatus::True
            ]
        );
        // The password was set once, not again after the update
        assert_eq!(cloudsql.calls("set_user_password"), 1);
    }

    /// Ready statuses in the order they were written, consecutive duplicates collapsed
    fn ready_history(cluster: &FakeClusterClient) -> Vec<ConditionStatus> {
        let mut history: Vec<ConditionStatus> = Vec::new();
        for written in cluster.status_history() {
            let ready = find_condition(&written.conditions, ConditionType::Ready).unwrap().status;
            if history.last() != Some(&ready) {
                history.push(ready);
            }
        }
        history
    }

    #[tokio::test]
    async fn test_disable_public_ip_clears_address() {
        let (cloudsql, cluster, reconciler) = setup();
        let mut resource = create_test_instance(NAME, NAMESPACE, INSTANCE);
        resource.spec.networking.private_ip.enabled = true;
        resource.spec.networking.private_ip.network = Some("projects/test-project/global/networks/default".to_string());
        cluster.insert_instance(resource);

        reconcile_until_ready(&reconciler).await;
        let status = cluster.status(NAMESPACE, NAME);
        assert!(status.ips.public_ip.is_some());
        let private_ip = status.ips.private_ip.clone().unwrap();

        cluster.update_spec(NAMESPACE, NAME, |spec| spec.networking.public_ip.enabled = false);

        let result = reconciler.reconcile(&key()).await;
        assert!(matches!(
            result,
            Err(ReconcileError::OperationInProgress {
                kind: OperationKind::Update,
                ..
            })
        ));
        // Hidden as soon as the spec disables it, even while the update runs
        let status = cluster.status(NAMESPACE, NAME);
        assert_eq!(status.ips.public_ip, None);
        assert_eq!(
            condition(&status, ConditionType::Ready),
            (ConditionStatus::False, reasons::UPDATING.to_string())
        );

        reconcile_until_ready(&reconciler).await;

        let status = cluster.status(NAMESPACE, NAME);
        assert_eq!(status.ips.public_ip, None);
        assert_eq!(status.ips.private_ip.as_deref(), Some(private_ip.as_str()));
        assert_eq!(condition(&status, ConditionType::Ready).0, ConditionStatus::True);
        assert!(cloudsql.instance(INSTANCE).unwrap().ip_address(cloudsql_client::IpAddressType::Primary).is_none());
        assert_eq!(
            ready_history(&cluster),
            vec![ConditionStatus::False, ConditionStatus::True, ConditionStatus::False, ConditionStatus::True]
        );
    }

    #[tokio::test]
    async fn test_update_keeps_grown_disk() {
        let (cloudsql, cluster, reconciler) = setup();
        cluster.insert_instance(create_test_instance(NAME, NAMESPACE, INSTANCE));
        reconcile_until_ready(&reconciler).await;

        cloudsql.set_disk_size(INSTANCE, 250);
        reconciler.reconcile(&key()).await.unwrap();
        assert_eq!(cloudsql.calls("update_instance"), 0);

        cluster.update_spec(NAMESPACE, NAME, |spec| {
            spec.labels.insert("team".to_string(), "orders".to_string());
        });
        reconcile_until_ready(&reconciler).await;

        let settings = cloudsql.instance(INSTANCE).unwrap().settings.unwrap();
        assert_eq!(settings.data_disk_size_gb, Some(250));
        assert_eq!(settings.user_labels.unwrap().get("team").map(String::as_str), Some("orders"));
        assert_eq!(cloudsql.calls("update_instance"), 1);
        assert_eq!(
            condition(&cluster.status(NAMESPACE, NAME), ConditionType::Ready).0,
            ConditionStatus::True
        );
    }

    #[tokio::test]
    async fn test_invalid_spec_is_permanent() {
        let (cloudsql, cluster, reconciler) = setup();
        let mut resource = create_test_instance(NAME, NAMESPACE, INSTANCE);
        resource.spec.networking.public_ip.enabled = false;
        cluster.insert_instance(resource);

        let result = reconciler.reconcile(&key()).await;

        let error = result.unwrap_err();
        assert!(matches!(error, ReconcileError::InvalidSpec(_)));
        assert_eq!(error.requeue(), Requeue::Never);
        let status = cluster.status(NAMESPACE, NAME);
        let ready = find_condition(&status.conditions, ConditionType::Ready).unwrap();
        assert_eq!(ready.status, ConditionStatus::False);
        assert_eq!(ready.reason, reasons::INVALID_SPEC);
        assert!(!ready.message.is_empty());
        assert_eq!(cloudsql.calls("get_instance"), 0);
        assert_eq!(cloudsql.calls("create_instance"), 0);

        // Fixing the spec resumes provisioning
        cluster.update_spec(NAMESPACE, NAME, |spec| spec.networking.public_ip.enabled = true);
        reconcile_until_ready(&reconciler).await;
        assert_eq!(cloudsql.calls("create_instance"), 1);
    }

    #[tokio::test]
    async fn test_lost_status_write_does_not_duplicate_creation() {
        let (cloudsql, cluster, reconciler) = setup();
        cluster.insert_instance(create_test_instance(NAME, NAMESPACE, INSTANCE));
        cluster.conflict_on_status_updates(1);

        // The create goes out but the marker recording it is lost
        let error = reconciler.reconcile(&key()).await.unwrap_err();
        assert!(matches!(error, ReconcileError::Cluster(ClusterError::Conflict(_))));
        assert_eq!(error.requeue(), Requeue::Immediate);
        assert_eq!(cluster.status(NAMESPACE, NAME).pending_operation, None);

        // The retry finds the instance being created instead of creating another one
        let error = reconciler.reconcile(&key()).await.unwrap_err();
        assert!(matches!(error, ReconcileError::NotRunnable(_)));
        assert_eq!(
            condition(&cluster.status(NAMESPACE, NAME), ConditionType::Created).0,
            ConditionStatus::Unknown
        );

        // The provider finishes the creation on its own
        cloudsql.get_operation("operation-1").await.unwrap();
        reconcile_until_ready(&reconciler).await;

        assert_eq!(cloudsql.calls("create_instance"), 1);
    }

    #[tokio::test]
    async fn test_failed_operation_is_retried() {
        let (cloudsql, cluster, reconciler) = setup();
        cluster.insert_instance(create_test_instance(NAME, NAMESPACE, INSTANCE));
        cloudsql.fail_next_operation();

        assert!(reconciler.reconcile(&key()).await.is_err());
        let error = reconciler.reconcile(&key()).await.unwrap_err();

        assert!(matches!(
            error,
            ReconcileError::OperationFailed {
                kind: OperationKind::Create,
                ..
            }
        ));
        assert_eq!(error.requeue(), Requeue::Backoff);
        let status = cluster.status(NAMESPACE, NAME);
        assert_eq!(status.pending_operation, None);
        let ready = find_condition(&status.conditions, ConditionType::Ready).unwrap();
        assert_eq!(ready.reason, reasons::OPERATION_FAILED);
        assert!(ready.message.contains("injected operation failure"));

        reconcile_until_ready(&reconciler).await;
        assert_eq!(cloudsql.calls("create_instance"), 2);
    }

    #[tokio::test]
    async fn test_provider_errors_are_retryable() {
        let (cloudsql, cluster, reconciler) = setup();
        cluster.insert_instance(create_test_instance(NAME, NAMESPACE, INSTANCE));
        cloudsql.fail_next("get_instance", CloudSqlError::Api("503 backend unavailable".to_string()));

        let error = reconciler.reconcile(&key()).await.unwrap_err();

        assert!(matches!(error, ReconcileError::CloudSql(_)));
        assert_eq!(error.requeue(), Requeue::Backoff);
        assert_eq!(cloudsql.calls("create_instance"), 0);
        reconcile_until_ready(&reconciler).await;
    }

    #[tokio::test]
    async fn test_instance_not_runnable() {
        let (cloudsql, cluster, reconciler) = setup();
        cluster.insert_instance(create_test_instance(NAME, NAMESPACE, INSTANCE));
        reconcile_until_ready(&reconciler).await;
        cloudsql.set_instance_state(INSTANCE, InstanceState::Maintenance);

        let error = reconciler.reconcile(&key()).await.unwrap_err();

        assert!(matches!(error, ReconcileError::NotRunnable(_)));
        let status = cluster.status(NAMESPACE, NAME);
        assert_eq!(condition(&status, ConditionType::Created).0, ConditionStatus::True);
        assert_eq!(
            condition(&status, ConditionType::Ready),
            (ConditionStatus::False, reasons::INSTANCE_NOT_RUNNABLE.to_string())
        );

        cloudsql.set_instance_state(INSTANCE, InstanceState::Runnable);
        reconciler.reconcile(&key()).await.unwrap();
        assert_eq!(condition(&cluster.status(NAMESPACE, NAME), ConditionType::Ready).0, ConditionStatus::True);
    }

    #[tokio::test]
    async fn test_existing_secret_is_reused() {
        let (cloudsql, cluster, reconciler) = setup();
        let resource = create_test_instance(NAME, NAMESPACE, INSTANCE);
        cluster.insert_secret(credentials_secret(&resource, "preset-password"));
        cluster.insert_instance(resource);

        reconcile_until_ready(&reconciler).await;

        assert_eq!(
            cloudsql.password(INSTANCE, USERNAME_VALUE).as_deref(),
            Some("preset-password")
        );
        let secret = cluster.secret(NAMESPACE, NAME).unwrap();
        assert_eq!(secret.data.unwrap()[PASSWORD_KEY].0, b"preset-password");
    }

    #[tokio::test]
    async fn test_deletion_waits_for_provider() {
        let (cloudsql, cluster, reconciler) = setup();
        cluster.insert_instance(create_test_instance(NAME, NAMESPACE, INSTANCE));
        reconcile_until_ready(&reconciler).await;

        cluster.delete_instance(NAMESPACE, NAME);

        let error = reconciler.reconcile(&key()).await.unwrap_err();
        assert!(matches!(
            error,
            ReconcileError::OperationInProgress {
                kind: OperationKind::Delete,
                ..
            }
        ));
        assert_eq!(error.requeue(), Requeue::Backoff);
        let resource = cluster.instance(NAMESPACE, NAME).unwrap();
        assert!(resource.has_finalizer());
        let status = resource.status.unwrap();
        assert_eq!(status.pending_operation.as_ref().map(|op| op.kind), Some(OperationKind::Delete));
        assert_eq!(
            condition(&status, ConditionType::Ready),
            (ConditionStatus::False, reasons::DELETING.to_string())
        );

        // Delete finished: finalizer removed, resource gone
        reconciler.reconcile(&key()).await.unwrap();
        assert!(cloudsql.instance(INSTANCE).is_none());
        assert!(cluster.instance(NAMESPACE, NAME).is_none());
        assert_eq!(cloudsql.calls("delete_instance"), 1);

        // Later events for the key are no-ops
        reconciler.reconcile(&key()).await.unwrap();
        assert_eq!(cloudsql.calls("delete_instance"), 1);
    }

    #[tokio::test]
    async fn test_deletion_without_provider_instance() {
        let (cloudsql, cluster, reconciler) = setup();
        let mut resource = create_test_instance(NAME, NAMESPACE, INSTANCE);
        resource.spec.networking.public_ip.enabled = false;
        cluster.insert_instance(resource);
        // Invalid spec: the finalizer is set but nothing is ever created
        assert!(reconciler.reconcile(&key()).await.is_err());
        assert!(cluster.instance(NAMESPACE, NAME).unwrap().has_finalizer());

        cluster.delete_instance(NAMESPACE, NAME);
        reconciler.reconcile(&key()).await.unwrap();

        assert!(cluster.instance(NAMESPACE, NAME).is_none());
        assert_eq!(cloudsql.calls("delete_instance"), 0);
    }

    #[tokio::test]
    async fn test_missing_resource_is_a_no_op() {
        let (cloudsql, cluster, reconciler) = setup();

        reconciler.reconcile(&key()).await.unwrap();

        assert!(cluster.status_history().is_empty());
        assert_eq!(cloudsql.calls("get_instance"), 0);
    }

    #[tokio::test]
    async fn test_sync_handler_entry_point() {
        let (_cloudsql, cluster, reconciler) = setup();
        cluster.insert_instance(create_test_instance(NAME, NAMESPACE, INSTANCE));

        let error = reconciler.sync(&key()).await.unwrap_err();

        assert!(matches!(error, ReconcileError::OperationInProgress { .. }));
    }
}
