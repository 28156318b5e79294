//! CloudSQL PostgreSQL Operator CRD Definitions
//!
//! Kubernetes Custom Resource Definitions, status conditions and the
//! well-known names shared with the admission webhook.

pub mod conditions;
pub mod constants;
pub mod postgresql_instance;

pub use conditions::*;
pub use postgresql_instance::*;
