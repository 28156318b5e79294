//! Cloud SQL Admin API models
//!
//! These models cover the subset of the `sql/v1beta4` resources the
//! controller reads and writes. Every settings field is optional so the same
//! types serve as full create bodies and as sparse `PATCH` bodies.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Database instance (`sql#instance`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseInstance {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_version: Option<String>,
    /// Serving state; only ever set by the API
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<InstanceState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Settings>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ip_addresses: Vec<IpMapping>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_name: Option<String>,
}

impl DatabaseInstance {
    /// Returns the first address of the given type, if any.
    pub fn ip_address(&self, ip_type: IpAddressType) -> Option<&str> {
        self.ip_addresses
            .iter()
            .find(|mapping| mapping.ip_type == ip_type)
            .map(|mapping| mapping.ip_address.as_str())
    }

    /// Whether the instance is serving.
    pub fn is_runnable(&self) -> bool {
        self.state == Some(InstanceState::Runnable)
    }
}

/// Instance serving state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceState {
    Runnable,
    PendingCreate,
    Maintenance,
    Failed,
    Suspended,
    PendingDelete,
    Stopped,
    /// Any state this client does not know about
    #[serde(other)]
    UnknownState,
}

/// Instance settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Machine type, e.g. `db-custom-1-3840`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
    /// `REGIONAL` or `ZONAL`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "int64_string")]
    pub data_disk_size_gb: Option<i64>,
    /// `PD_SSD` or `PD_HDD`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_disk_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_auto_resize: Option<bool>,
    /// 0 means no limit
    #[serde(default, skip_serializing_if = "Option::is_none", with = "int64_string")]
    pub storage_auto_resize_limit: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_flags: Option<Vec<DatabaseFlag>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_configuration: Option<BackupConfiguration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maintenance_window: Option<MaintenanceWindow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_configuration: Option<IpConfiguration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_preference: Option<LocationPreference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_labels: Option<BTreeMap<String, String>>,
    /// Optimistic concurrency token for settings updates
    #[serde(default, skip_serializing_if = "Option::is_none", with = "int64_string")]
    pub settings_version: Option<i64>,
}

/// Database flag (`name=value`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseFlag {
    pub name: String,
    pub value: String,
}

/// Daily backup configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// `HH:MM`, UTC
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
}

/// Maintenance window
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceWindow {
    /// 1 (Monday) to 7 (Sunday), 0 for any day
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day: Option<i32>,
    /// 0 to 23, absent for any hour
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hour: Option<i32>,
}

/// IP connectivity settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpConfiguration {
    /// Whether the instance gets a public IPv4 address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4_enabled: Option<bool>,
    /// VPC resource link for private IP connectivity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_network: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorized_networks: Option<Vec<AclEntry>>,
}

/// Authorized network entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclEntry {
    /// CIDR notation
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Zone preference
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationPreference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
}

/// Address assigned to an instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpMapping {
    #[serde(rename = "type")]
    pub ip_type: IpAddressType,
    pub ip_address: String,
}

/// Kind of an assigned address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IpAddressType {
    /// Public, client-connectable address
    Primary,
    /// Private (VPC) address
    Private,
    /// Source address of outgoing connections
    Outgoing,
    #[serde(other)]
    Unspecified,
}

/// Long-running operation (`sql#operation`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_type: Option<String>,
    pub status: OperationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<OperationErrors>,
}

impl Operation {
    /// Whether the operation has finished (successfully or not).
    pub fn is_done(&self) -> bool {
        self.status == OperationStatus::Done
    }

    /// Joined error messages of a failed operation, `None` if it did not fail.
    pub fn error_message(&self) -> Option<String> {
        let errors = self.error.as_ref()?;
        if errors.errors.is_empty() {
            return None;
        }
        Some(
            errors
                .errors
                .iter()
                .map(|e| match &e.message {
                    Some(message) => format!("{}: {}", e.code, message),
                    None => e.code.clone(),
                })
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

/// Operation status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    Pending,
    Running,
    Done,
    #[serde(other)]
    SqlOperationStatusUnspecified,
}

/// Errors reported by a finished operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationErrors {
    #[serde(default)]
    pub errors: Vec<OperationError>,
}

/// Single operation error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationError {
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Database user (`sql#user`), used to set passwords
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// The API encodes int64 fields as JSON strings; accept numbers as well.
mod int64_string {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrNumber {
        String(String),
        Number(i64),
    }

    #[allow(clippy::ref_option, reason = "signature required by serde(with)")]
    pub fn serialize<S: Serializer>(value: &Option<i64>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => serializer.serialize_str(&v.to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
        match Option::<StringOrNumber>::deserialize(deserializer)? {
            None => Ok(None),
            Some(StringOrNumber::Number(n)) => Ok(Some(n)),
            Some(StringOrNumber::String(s)) => s.parse().map(Some).map_err(serde::de::Error::custom),
        }
    }
}
