//! Cloud SQL Admin API Client
//!
//! A Rust client library for the Cloud SQL Admin REST API (`sql/v1beta4`).
//! Provides typed models and methods for the instance, operation and user
//! endpoints needed to manage PostgreSQL instances.
//!
//! # Example
//!
//! ```no_run
//! use cloudsql_client::{CloudSqlClient, CloudSqlClientTrait, DEFAULT_BASE_URL};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = CloudSqlClient::with_token_file(
//!     DEFAULT_BASE_URL.to_string(),
//!     "my-project".to_string(),
//!     "/secret/access-token",
//! )?;
//!
//! if let Some(instance) = client.get_instance("orders-db").await? {
//!     println!("{} is {:?}", instance.name, instance.state);
//! }
//!
//! let op = client.delete_instance("orders-db").await?;
//! let op = client.get_operation(&op.name).await?;
//! println!("delete finished: {}", op.is_done());
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Instances**: get, create, patch and delete
//! - **Operations**: poll long-running operations
//! - **Users**: set the password of built-in users
//! - **test-util**: an in-memory `MockCloudSqlClient`

pub mod client;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod cloudsql_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::{CloudSqlClient, DEFAULT_BASE_URL};
pub use cloudsql_trait::CloudSqlClientTrait;
pub use error::CloudSqlError;
pub use models::*;
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockCloudSqlClient;
