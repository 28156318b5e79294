//! Process configuration.
//!
//! Read once at startup from a YAML file (`CONFIG_PATH`, default
//! `/config/config.yaml`). Every section is optional; missing values take
//! their defaults. `WATCH_NAMESPACE` and `GCP_PROJECT_ID` override the file.
//!
//! ```yaml
//! cluster:
//!   namespace: databases
//! controllers:
//!   resyncPeriodSeconds: 300
//!   threadiness: 2
//! gcp:
//!   projectId: my-project
//!   accessTokenPath: /secret/access-token
//! logging:
//!   level: info
//! server:
//!   bindAddress: 0.0.0.0:8080
//! ```

use crate::error::ControllerError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/config/config.yaml";

/// Root configuration object
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub cluster: ClusterConfig,
    pub controllers: ControllersConfig,
    pub gcp: GcpConfig,
    pub logging: LoggingConfig,
    pub server: ServerConfig,
}

/// Cluster-related options
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusterConfig {
    /// Namespace to watch; empty means all namespaces
    pub namespace: Option<String>,
    /// Informational only: the kube client infers its configuration (KUBECONFIG or in-cluster)
    pub kubeconfig: Option<PathBuf>,
}

/// Controller-related options
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ControllersConfig {
    /// How often every known resource is re-enqueued
    pub resync_period_seconds: u64,
    /// Number of concurrent workers
    pub threadiness: usize,
}

impl Default for ControllersConfig {
    fn default() -> Self {
        Self {
            resync_period_seconds: 300,
            threadiness: 2,
        }
    }
}

impl ControllersConfig {
    pub fn resync_period(&self) -> Duration {
        Duration::from_secs(self.resync_period_seconds)
    }
}

/// Google Cloud options
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GcpConfig {
    /// Project where the Cloud SQL instances live (required)
    pub project_id: String,
    /// File holding the OAuth2 access token; re-read before every API call
    pub access_token_path: PathBuf,
    /// Cloud SQL Admin API base URL
    pub api_base_url: String,
}

impl Default for GcpConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            access_token_path: PathBuf::from("/secret/access-token"),
            api_base_url: cloudsql_client::DEFAULT_BASE_URL.to_string(),
        }
    }
}

/// Logging options
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is not set (e.g. `info`, `debug`, `postgresql_instance_controller=trace`)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Metrics and probes endpoint
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

impl Config {
    /// Loads the configuration the way `main` does: file, then environment overrides, then validation.
    pub fn load() -> Result<Self, ControllerError> {
        let explicit = std::env::var("CONFIG_PATH").ok();
        let path = explicit.as_deref().unwrap_or(DEFAULT_CONFIG_PATH);

        let mut config = match Self::from_file(Path::new(path)) {
            Ok(config) => config,
            // Running without a mounted config file is fine as long as the env provides the rest
            Err(ControllerError::ConfigRead { source, .. })
                if explicit.is_none() && source.kind() == std::io::ErrorKind::NotFound =>
            {
                Self::default()
            }
            Err(e) => return Err(e),
        };

        config.apply_overrides(
            std::env::var("WATCH_NAMESPACE").ok(),
            std::env::var("GCP_PROJECT_ID").ok(),
        );
        config.validate()?;
        Ok(config)
    }

    /// Parses a configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ControllerError> {
        let content = std::fs::read_to_string(path).map_err(|source| ControllerError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Parses a YAML document. An empty document yields the defaults.
    pub fn from_yaml(content: &str) -> Result<Self, ControllerError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).map_err(ControllerError::ConfigParse)
    }

    fn apply_overrides(&mut self, namespace: Option<String>, project_id: Option<String>) {
        if let Some(namespace) = namespace {
            self.cluster.namespace = Some(namespace);
        }
        if let Some(project_id) = project_id.filter(|p| !p.is_empty()) {
            self.gcp.project_id = project_id;
        }
        // An empty namespace means "all namespaces"
        if self.cluster.namespace.as_deref().is_some_and(str::is_empty) {
            self.cluster.namespace = None;
        }
    }

    /// Rejects configurations the controller cannot start with.
    pub fn validate(&self) -> Result<(), ControllerError> {
        if self.gcp.project_id.is_empty() {
            return Err(ControllerError::InvalidConfig(
                "gcp.projectId (or GCP_PROJECT_ID) is required".to_string(),
            ));
        }
        if self.controllers.threadiness == 0 {
            return Err(ControllerError::InvalidConfig(
                "controllers.threadiness must be at least 1".to_string(),
            ));
        }
        if self.controllers.resync_period_seconds == 0 {
            return Err(ControllerError::InvalidConfig(
                "controllers.resyncPeriodSeconds must be at least 1".to_string(),
            ));
        }
        if self.gcp.api_base_url.is_empty() {
            return Err(ControllerError::InvalidConfig("gcp.apiBaseUrl must not be empty".to_string()));
        }
        Ok(())
    }
}
