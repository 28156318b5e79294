//! Cloud SQL Admin API client
//!
//! Implements the `sql/v1beta4` REST endpoints used by the controller:
//! `/projects/{project}/instances`, `/projects/{project}/operations` and
//! `/projects/{project}/instances/{instance}/users`.

use crate::cloudsql_trait::CloudSqlClientTrait;
use crate::error::CloudSqlError;
use crate::models::{DatabaseInstance, Operation, User};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Default base URL of the Cloud SQL Admin API
pub const DEFAULT_BASE_URL: &str = "https://sqladmin.googleapis.com/sql/v1beta4";

/// Where the bearer token comes from.
#[derive(Debug, Clone)]
enum AccessToken {
    Static(String),
    /// Re-read on every request so a rotated token is picked up
    File(PathBuf),
}

/// Cloud SQL Admin API client
#[derive(Debug, Clone)]
pub struct CloudSqlClient {
    client: Client,
    base_url: String,
    project_id: String,
    token: AccessToken,
}

impl CloudSqlClient {
    /// Create a new Cloud SQL client with a fixed bearer token
    ///
    /// # Arguments
    /// * `base_url` - API base URL (e.g., [`DEFAULT_BASE_URL`])
    /// * `project_id` - Project that owns the instances
    /// * `token` - OAuth2 access token
    pub fn new(base_url: String, project_id: String, token: String) -> Result<Self, CloudSqlError> {
        Self::build(base_url, project_id, AccessToken::Static(token))
    }

    /// Create a new Cloud SQL client that reads its bearer token from `path`
    /// before every request.
    pub fn with_token_file(base_url: String, project_id: String, path: impl Into<PathBuf>) -> Result<Self, CloudSqlError> {
        Self::build(base_url, project_id, AccessToken::File(path.into()))
    }

    fn build(base_url: String, project_id: String, token: AccessToken) -> Result<Self, CloudSqlError> {
        if project_id.is_empty() {
            return Err(CloudSqlError::InvalidRequest("project id must not be empty".to_string()));
        }

        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            project_id,
            token,
        })
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn instances_url(&self) -> String {
        format!("{}/projects/{}/instances", self.base_url, self.project_id)
    }

    fn instance_url(&self, name: &str) -> String {
        format!("{}/{}", self.instances_url(), name)
    }

    async fn bearer_token(&self) -> Result<String, CloudSqlError> {
        match &self.token {
            AccessToken::Static(token) => Ok(token.clone()),
            AccessToken::File(path) => Ok(tokio::fs::read_to_string(path).await?.trim().to_string()),
        }
    }

    /// Send an authenticated request and decode the JSON response.
    ///
    /// `what` names the target in error messages.
    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder, what: &str) -> Result<T, CloudSqlError> {
        let token = self.bearer_token().await?;
        let response = request
            .bearer_auth(token)
            .header("Accept", "application/json")
            .send()
            .await?;

        let response = check_status(response, what).await?;

        // Capture the body for better error messages on decode failures
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| {
            CloudSqlError::Api(format!(
                "error decoding response body for {}: {} - Response (first 500 chars): {}",
                what,
                e,
                body.chars().take(500).collect::<String>()
            ))
        })
    }
}

/// Map non-success statuses onto the error taxonomy.
async fn check_status(response: Response, what: &str) -> Result<Response, CloudSqlError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::NOT_FOUND => CloudSqlError::NotFound(format!("{what} not found")),
        StatusCode::CONFLICT => CloudSqlError::Conflict(format!("{what}: {body}")),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            CloudSqlError::Authentication(format!("{what}: {status} - {body}"))
        }
        StatusCode::BAD_REQUEST => CloudSqlError::InvalidRequest(format!("{what}: {body}")),
        _ => CloudSqlError::Api(format!("{what}: {status} - {body}")),
    })
}

#[async_trait::async_trait]
impl CloudSqlClientTrait for CloudSqlClient {
    fn project_id(&self) -> &str {
        &self.project_id
    }

    async fn get_instance(&self, name: &str) -> Result<Option<DatabaseInstance>, CloudSqlError> {
        debug!(instance = %name, "Fetching Cloud SQL instance");
        let request = self.client.get(self.instance_url(name));
        match self.send(request, &format!("instance {name}")).await {
            Ok(instance) => Ok(Some(instance)),
            Err(CloudSqlError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create_instance(&self, instance: &DatabaseInstance) -> Result<Operation, CloudSqlError> {
        debug!(instance = %instance.name, "Creating Cloud SQL instance");
        let request = self.client.post(self.instances_url()).json(instance);
        self.send(request, &format!("instance {}", instance.name)).await
    }

    async fn update_instance(&self, name: &str, instance: &DatabaseInstance) -> Result<Operation, CloudSqlError> {
        debug!(instance = %name, "Patching Cloud SQL instance");
        let request = self.client.patch(self.instance_url(name)).json(instance);
        self.send(request, &format!("instance {name}")).await
    }

    async fn delete_instance(&self, name: &str) -> Result<Operation, CloudSqlError> {
        debug!(instance = %name, "Deleting Cloud SQL instance");
        let request = self.client.delete(self.instance_url(name));
        self.send(request, &format!("instance {name}")).await
    }

    async fn get_operation(&self, name: &str) -> Result<Operation, CloudSqlError> {
        debug!(operation = %name, "Fetching Cloud SQL operation");
        let url = format!("{}/projects/{}/operations/{}", self.base_url, self.project_id, name);
        self.send(self.client.get(url), &format!("operation {name}")).await
    }

    async fn set_user_password(&self, instance: &str, user: &str, password: &str) -> Result<Operation, CloudSqlError> {
        debug!(instance = %instance, user = %user, "Setting Cloud SQL user password");
        let body = User {
            name: user.to_string(),
            password: Some(password.to_string()),
        };
        let request = self
            .client
            .put(format!("{}/users", self.instance_url(instance)))
            .query(&[("name", user)])
            .json(&body);
        self.send(request, &format!("user {user} of instance {instance}")).await
    }
}
