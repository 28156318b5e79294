//! Well-known names shared by the controller and the admission webhook.

/// API group of the CRDs
pub const API_GROUP: &str = "cloudsql.travelaudience.com";

/// Finalizer that holds a `PostgresqlInstance` until its Cloud SQL instance is gone
pub const FINALIZER: &str = "cloudsql.travelaudience.com/finalizer";

/// Credentials secret key holding the username
pub const USERNAME_KEY: &str = "PGUSER";

/// Credentials secret key holding the password
pub const PASSWORD_KEY: &str = "PGPASS";

/// Built-in superuser whose password the controller manages
pub const USERNAME_VALUE: &str = "postgres";

/// Length of generated passwords
pub const PASSWORD_LENGTH: usize = 32;

/// Label naming the `PostgresqlInstance` a secret belongs to, and that pods
/// set to request access to an instance
pub const INSTANCE_NAME_LABEL: &str = "cloudsql.travelaudience.com/postgresqlinstance-name";

/// Annotation set on the credentials secret once the provider accepted the password
pub const PASSWORD_SYNCED_ANNOTATION: &str = "cloudsql.travelaudience.com/password-synced";

/// Annotation the admission webhook sets on pods it injected the proxy into
pub const PROXY_INJECTED_ANNOTATION: &str = "cloudsql.travelaudience.com/proxy-injected";

/// Value of [`PROXY_INJECTED_ANNOTATION`] (and [`PASSWORD_SYNCED_ANNOTATION`])
pub const ANNOTATION_TRUE: &str = "true";

/// Condition reasons
pub mod reasons {
    /// A create operation was issued and has not finished
    pub const INSTANCE_CREATING: &str = "InstanceCreating";
    /// The provider instance exists
    pub const INSTANCE_CREATED: &str = "InstanceCreated";
    /// A settings update was issued and has not finished
    pub const UPDATING: &str = "Updating";
    /// The provider instance is not serving
    pub const INSTANCE_NOT_RUNNABLE: &str = "InstanceNotRunnable";
    /// The credentials are being set up
    pub const CREDENTIALS_PENDING: &str = "CredentialsPending";
    /// Everything converged
    pub const INSTANCE_READY: &str = "InstanceReady";
    /// The spec failed validation
    pub const INVALID_SPEC: &str = "InvalidSpec";
    /// A provider operation finished with an error
    pub const OPERATION_FAILED: &str = "OperationFailed";
    /// Deprovisioning has started
    pub const DELETING: &str = "Deleting";
}
