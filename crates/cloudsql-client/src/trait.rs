//! CloudSqlClient trait for mocking
//!
//! This trait abstracts the Cloud SQL Admin API so the reconciler can be
//! unit tested against an in-memory implementation.

use crate::error::CloudSqlError;
use crate::models::{DatabaseInstance, Operation};

/// Trait for Cloud SQL Admin API operations
///
/// Mutating calls are asynchronous on the provider side: they return an
/// [`Operation`] that has to be polled with [`CloudSqlClientTrait::get_operation`]
/// until it is `DONE`.
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait CloudSqlClientTrait: Send + Sync {
    /// Project the instances live in
    fn project_id(&self) -> &str;

    /// Get an instance by name, `None` if it does not exist
    async fn get_instance(&self, name: &str) -> Result<Option<DatabaseInstance>, CloudSqlError>;

    /// Create an instance
    async fn create_instance(&self, instance: &DatabaseInstance) -> Result<Operation, CloudSqlError>;

    /// Patch an instance (only the fields present in `instance` are changed)
    async fn update_instance(&self, name: &str, instance: &DatabaseInstance) -> Result<Operation, CloudSqlError>;

    /// Delete an instance
    async fn delete_instance(&self, name: &str) -> Result<Operation, CloudSqlError>;

    /// Get the current state of an operation
    async fn get_operation(&self, name: &str) -> Result<Operation, CloudSqlError>;

    /// Set the password of a built-in user. Setting the same password twice is harmless.
    async fn set_user_password(&self, instance: &str, user: &str, password: &str) -> Result<Operation, CloudSqlError>;
}
