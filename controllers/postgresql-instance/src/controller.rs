//! Main controller implementation.
//!
//! Wires the pieces together:
//! - a reflector over `PostgresqlInstance` whose events enqueue work keys
//! - a periodic resync that re-enqueues every cached resource
//! - the generic worker pool draining the queue into the [`Reconciler`]
//! - the metrics and probes server
//!
//! Everything stops when the shutdown token is cancelled.

use crate::cluster::KubeClusterClient;
use crate::config::Config;
use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::reconciler::Reconciler;
use crate::server::{ServerState, start_server};
use cloudsql_client::CloudSqlClient;
use controller_runtime::{CacheSynced, GenericController, WorkQueue, key_for};
use crds::PostgresqlInstance;
use futures::{FutureExt, StreamExt};
use kube_runtime::reflector::{self, Store};
use kube_runtime::{WatchStreamExt, watcher};
use kube::{Api, Client};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Name of the controller, used for the queue and in logs
pub const CONTROLLER_NAME: &str = "postgresqlinstance";

/// Main controller for `PostgresqlInstance` resources.
pub struct Controller {
    config: Config,
    client: Client,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller").field("config", &self.config).finish_non_exhaustive()
    }
}

impl Controller {
    /// Creates a new controller instance.
    pub async fn new(config: Config) -> Result<Self, ControllerError> {
        info!("Initializing PostgresqlInstance controller");
        let client = Client::try_default().await?;
        Ok(Self { config, client })
    }

    /// Runs until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ControllerError> {
        let cloudsql = CloudSqlClient::with_token_file(
            self.config.gcp.api_base_url.clone(),
            self.config.gcp.project_id.clone(),
            self.config.gcp.access_token_path.clone(),
        )?;
        let metrics = Arc::new(Metrics::new()?);
        let reconciler = Reconciler::new(
            Arc::new(cloudsql),
            Arc::new(KubeClusterClient::new(self.client.clone())),
            Arc::clone(&metrics),
        );

        let api: Api<PostgresqlInstance> = match &self.config.cluster.namespace {
            Some(namespace) => Api::namespaced(self.client.clone(), namespace),
            None => Api::all(self.client.clone()),
        };
        let queue = WorkQueue::with_default_rate_limiter(CONTROLLER_NAME);
        let (store, writer) = reflector::store();

        let informer = tokio::spawn(watch_instances(api, writer, queue.clone(), shutdown.clone()));
        let resync = tokio::spawn(resync(
            store.clone(),
            queue.clone(),
            self.config.controllers.resync_period(),
            shutdown.clone(),
        ));

        let server_state = Arc::new(ServerState::new(metrics));
        let server = {
            let bind_address = self.config.server.bind_address.clone();
            let state = Arc::clone(&server_state);
            let shutdown = shutdown.clone();
            tokio::spawn(async move { start_server(&bind_address, state, shutdown).await })
        };

        let cache_synced: CacheSynced = {
            let store = store.clone();
            let state = Arc::clone(&server_state);
            async move {
                let synced = store.wait_until_ready().await.is_ok();
                if synced {
                    state.set_ready();
                }
                synced
            }
            .boxed()
        };

        info!(
            namespace = self.config.cluster.namespace.as_deref().unwrap_or("all namespaces"),
            threadiness = self.config.controllers.threadiness,
            "Starting PostgresqlInstance controller"
        );
        let controller = GenericController::new(
            CONTROLLER_NAME,
            self.config.controllers.threadiness,
            queue,
            Arc::new(reconciler),
        );
        let result = controller.run(vec![cache_synced], shutdown.clone()).await;

        // Background tasks follow the same token; make sure they see it on early exits too
        shutdown.cancel();
        for (task, handle) in [("informer", informer), ("resync", resync)] {
            if let Err(e) = handle.await {
                warn!(task, "Background task ended abnormally: {}", e);
            }
        }
        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(ControllerError::Server(e)),
            Err(e) => warn!("HTTP server task ended abnormally: {}", e),
        }

        result?;
        info!("PostgresqlInstance controller stopped");
        Ok(())
    }
}

/// Feeds the reflector and enqueues the key of every object it touches (applied or deleted).
async fn watch_instances(
    api: Api<PostgresqlInstance>,
    writer: reflector::store::Writer<PostgresqlInstance>,
    queue: WorkQueue,
    shutdown: CancellationToken,
) {
    let stream = watcher(api, watcher::Config::default())
        .default_backoff()
        .reflect(writer)
        .touched_objects();
    futures::pin_mut!(stream);

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            event = stream.next() => match event {
                Some(Ok(instance)) => match key_for(&instance) {
                    Ok(key) => {
                        debug!(%key, "Enqueuing after watch event");
                        queue.add(key);
                    }
                    Err(e) => warn!("Ignoring watch event: {}", e),
                },
                Some(Err(e)) => error!("Watch error (retrying with backoff): {}", e),
                None => {
                    warn!("Watch stream ended");
                    break;
                }
            },
        }
    }
}

/// Periodically re-enqueues every cached resource so drift on the provider side gets noticed.
async fn resync(store: Store<PostgresqlInstance>, queue: WorkQueue, period: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    // The first tick completes immediately; the initial list already enqueued everything
    ticker.tick().await;

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let instances = store.state();
                debug!(count = instances.len(), "Resync");
                for instance in instances {
                    if let Ok(key) = key_for(instance.as_ref()) {
                        queue.add(key);
                    }
                }
            }
        }
    }
}
