//! PostgresqlInstance CRD
//!
//! Declares the desired configuration of a Cloud SQL for PostgreSQL instance.
//! The controller creates the instance, keeps its settings in line with the
//! spec, generates credentials for the `postgres` user and reports the
//! instance's addresses and lifecycle conditions in the status.

use crate::conditions::Condition;
use crate::constants::FINALIZER;
use chrono::{DateTime, Utc};
use kube::CustomResource;
use kube::ResourceExt;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;
use thiserror::Error;

/// Maximum length of a Cloud SQL instance name
pub const MAX_INSTANCE_NAME_LENGTH: usize = 84;

/// Smallest disk Cloud SQL accepts, in GB
pub const MIN_DISK_SIZE_GB: i64 = 10;

/// Default machine type
pub const DEFAULT_INSTANCE_TYPE: &str = "db-custom-1-3840";

/// Zone value meaning "no preference"
pub const ANY: &str = "Any";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "cloudsql.travelaudience.com",
    version = "v1alpha1",
    kind = "PostgresqlInstance",
    namespaced,
    status = "PostgresqlInstanceStatus",
    shortname = "csqlp",
    printcolumn = r#"{"name":"Instance","type":"string","jsonPath":".spec.name"}"#,
    printcolumn = r#"{"name":"Public IP","type":"string","jsonPath":".status.ips.publicIp"}"#,
    printcolumn = r#"{"name":"Private IP","type":"string","jsonPath":".status.ips.privateIp"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PostgresqlInstanceSpec {
    /// Name of the Cloud SQL instance
    pub name: String,

    /// High availability setup
    #[serde(default)]
    pub availability: Availability,

    /// Backup schedule
    #[serde(default)]
    pub backups: Backups,

    /// Database flags, as `name=value`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,

    /// User labels set on the Cloud SQL instance
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Where the instance runs
    pub location: Location,

    /// Maintenance window
    #[serde(default)]
    pub maintenance: Maintenance,

    /// Public and private connectivity
    #[serde(default)]
    pub networking: Networking,

    /// Machine type and storage
    #[serde(default)]
    pub resources: Resources,

    /// PostgreSQL major version
    #[serde(default)]
    pub version: PostgresVersion,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct Availability {
    #[serde(rename = "type", default)]
    pub availability_type: AvailabilityType,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum AvailabilityType {
    /// Failover replica in a second zone
    Regional,
    #[default]
    Zonal,
}

impl AvailabilityType {
    pub fn api_value(self) -> &'static str {
        match self {
            Self::Regional => "REGIONAL",
            Self::Zonal => "ZONAL",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct Backups {
    #[serde(default)]
    pub daily: DailyBackups,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DailyBackups {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Start of the backup window, `HH:MM` (UTC)
    #[serde(default = "default_backup_start_time")]
    pub start_time: String,
}

impl Default for DailyBackups {
    fn default() -> Self {
        Self {
            enabled: true,
            start_time: default_backup_start_time(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct Location {
    pub region: String,

    /// Zone, or `Any` to let the provider pick one in the region
    #[serde(default = "default_any")]
    pub zone: String,
}

impl Location {
    /// The preferred zone, `None` when any zone will do.
    pub fn zone_preference(&self) -> Option<&str> {
        Some(self.zone.as_str()).filter(|zone| *zone != ANY && !zone.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct Maintenance {
    #[serde(default)]
    pub day: MaintenanceDay,

    /// Start of the maintenance window, `HH:00` (UTC), or `Any`
    #[serde(default = "default_any")]
    pub hour: String,
}

impl Default for Maintenance {
    fn default() -> Self {
        Self {
            day: MaintenanceDay::Any,
            hour: default_any(),
        }
    }
}

impl Maintenance {
    /// Provider hour (0 to 23), `None` for `Any` or malformed values.
    pub fn hour_api_value(&self) -> Option<i32> {
        parse_maintenance_hour(&self.hour).ok().flatten()
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum MaintenanceDay {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
    #[default]
    Any,
}

impl MaintenanceDay {
    /// Provider day: 1 (Monday) to 7 (Sunday), 0 for any day.
    pub fn api_value(self) -> i32 {
        match self {
            Self::Any => 0,
            Self::Monday => 1,
            Self::Tuesday => 2,
            Self::Wednesday => 3,
            Self::Thursday => 4,
            Self::Friday => 5,
            Self::Saturday => 6,
            Self::Sunday => 7,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Networking {
    #[serde(default)]
    pub private_ip: PrivateIp,
    #[serde(default)]
    pub public_ip: PublicIp,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct PrivateIp {
    #[serde(default)]
    pub enabled: bool,

    /// VPC resource link, e.g. `projects/my-project/global/networks/default`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PublicIp {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authorized_networks: Vec<AuthorizedNetwork>,
}

impl Default for PublicIp {
    fn default() -> Self {
        Self {
            enabled: true,
            authorized_networks: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct AuthorizedNetwork {
    pub cidr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Resources {
    #[serde(default)]
    pub disk: Disk,

    /// Cloud SQL machine type
    #[serde(default = "default_instance_type")]
    pub instance_type: String,
}

impl Default for Resources {
    fn default() -> Self {
        Self {
            disk: Disk::default(),
            instance_type: default_instance_type(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Disk {
    /// Initial (and minimum) disk size
    #[serde(default = "default_disk_size")]
    pub size_minimum_gb: i64,

    /// Upper bound for automatic storage increases; 0 means unlimited
    #[serde(default)]
    pub size_maximum_gb: i64,

    #[serde(rename = "type", default)]
    pub disk_type: DiskType,
}

impl Default for Disk {
    fn default() -> Self {
        Self {
            size_minimum_gb: MIN_DISK_SIZE_GB,
            size_maximum_gb: 0,
            disk_type: DiskType::Ssd,
        }
    }
}

impl Disk {
    /// Storage grows automatically only when no maximum is set.
    pub fn storage_auto_resize(&self) -> bool {
        self.size_maximum_gb == 0
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum DiskType {
    #[default]
    #[serde(rename = "SSD")]
    Ssd,
    #[serde(rename = "HDD")]
    Hdd,
}

impl DiskType {
    pub fn api_value(self) -> &'static str {
        match self {
            Self::Ssd => "PD_SSD",
            Self::Hdd => "PD_HDD",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum PostgresVersion {
    #[default]
    #[serde(rename = "9.6")]
    V9_6,
    #[serde(rename = "11")]
    V11,
}

impl PostgresVersion {
    pub fn api_value(self) -> &'static str {
        match self {
            Self::V9_6 => "POSTGRES_9_6",
            Self::V11 => "POSTGRES_11",
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_any() -> String {
    ANY.to_string()
}

fn default_backup_start_time() -> String {
    "00:00".to_string()
}

fn default_instance_type() -> String {
    DEFAULT_INSTANCE_TYPE.to_string()
}

fn default_disk_size() -> i64 {
    MIN_DISK_SIZE_GB
}

/// Reasons a spec is rejected before any provider call
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SpecError {
    #[error("invalid instance name {0:?}: must be 1-84 lowercase letters, digits or hyphens, start with a letter and not end with a hyphen")]
    InvalidName(String),

    #[error("location.region must not be empty")]
    MissingRegion,

    #[error("location.zone {zone:?} is not in region {region:?}")]
    ZoneOutsideRegion { zone: String, region: String },

    #[error("invalid backup start time {0:?}: expected HH:MM")]
    InvalidBackupStartTime(String),

    #[error("invalid maintenance hour {0:?}: expected HH:00 or Any")]
    InvalidMaintenanceHour(String),

    #[error("invalid flag {0:?}: expected name=value")]
    InvalidFlag(String),

    #[error("at least one of public or private networking must be enabled")]
    NoNetworking,

    #[error("networking.privateIp.network is required when private networking is enabled")]
    MissingPrivateNetwork,

    #[error("invalid authorized network {0:?}: expected a CIDR block")]
    InvalidAuthorizedNetwork(String),

    #[error("resources.disk.sizeMinimumGb must be at least {MIN_DISK_SIZE_GB} (got {0})")]
    DiskTooSmall(i64),

    #[error("resources.disk.sizeMaximumGb ({maximum}) must be 0 or at least sizeMinimumGb ({minimum})")]
    DiskMaximumBelowMinimum { minimum: i64, maximum: i64 },

    #[error("resources.instanceType must not be empty")]
    MissingInstanceType,
}

impl PostgresqlInstanceSpec {
    /// Checks everything that can be checked without calling the provider.
    pub fn validate(&self) -> Result<(), SpecError> {
        if !is_valid_instance_name(&self.name) {
            return Err(SpecError::InvalidName(self.name.clone()));
        }

        if self.location.region.is_empty() {
            return Err(SpecError::MissingRegion);
        }
        if let Some(zone) = self.location.zone_preference()
            && !zone.starts_with(&format!("{}-", self.location.region))
        {
            return Err(SpecError::ZoneOutsideRegion {
                zone: zone.to_string(),
                region: self.location.region.clone(),
            });
        }

        if !is_valid_time_of_day(&self.backups.daily.start_time) {
            return Err(SpecError::InvalidBackupStartTime(self.backups.daily.start_time.clone()));
        }
        parse_maintenance_hour(&self.maintenance.hour)?;

        self.database_flags()?;

        let networking = &self.networking;
        if !networking.public_ip.enabled && !networking.private_ip.enabled {
            return Err(SpecError::NoNetworking);
        }
        if networking.private_ip.enabled && networking.private_ip.network.as_deref().is_none_or(str::is_empty) {
            return Err(SpecError::MissingPrivateNetwork);
        }
        if let Some(invalid) = networking
            .public_ip
            .authorized_networks
            .iter()
            .find(|network| !is_valid_cidr(&network.cidr))
        {
            return Err(SpecError::InvalidAuthorizedNetwork(invalid.cidr.clone()));
        }

        let disk = &self.resources.disk;
        if disk.size_minimum_gb < MIN_DISK_SIZE_GB {
            return Err(SpecError::DiskTooSmall(disk.size_minimum_gb));
        }
        if disk.size_maximum_gb != 0 && disk.size_maximum_gb < disk.size_minimum_gb {
            return Err(SpecError::DiskMaximumBelowMinimum {
                minimum: disk.size_minimum_gb,
                maximum: disk.size_maximum_gb,
            });
        }
        if self.resources.instance_type.is_empty() {
            return Err(SpecError::MissingInstanceType);
        }

        Ok(())
    }

    /// Flags split into `(name, value)` pairs, in declaration order.
    pub fn database_flags(&self) -> Result<Vec<(String, String)>, SpecError> {
        self.flags
            .iter()
            .map(|flag| match flag.split_once('=') {
                Some((name, value)) if !name.is_empty() && !value.contains('=') => {
                    Ok((name.to_string(), value.to_string()))
                }
                _ => Err(SpecError::InvalidFlag(flag.clone())),
            })
            .collect()
    }
}

fn is_valid_instance_name(name: &str) -> bool {
    name.len() <= MAX_INSTANCE_NAME_LENGTH
        && name.starts_with(|c: char| c.is_ascii_lowercase())
        && !name.ends_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// `HH:MM`, 24h clock
fn is_valid_time_of_day(value: &str) -> bool {
    let Some((hours, minutes)) = value.split_once(':') else {
        return false;
    };
    hours.len() == 2
        && minutes.len() == 2
        && hours.parse::<u8>().is_ok_and(|h| h < 24)
        && minutes.parse::<u8>().is_ok_and(|m| m < 60)
}

/// `Any` → `None`, `HH:00` → `Some(HH)`
fn parse_maintenance_hour(value: &str) -> Result<Option<i32>, SpecError> {
    if value == ANY {
        return Ok(None);
    }
    match value.split_once(':') {
        Some((hours, "00")) if hours.len() == 2 => match hours.parse::<i32>() {
            Ok(hour) if (0..24).contains(&hour) => Ok(Some(hour)),
            _ => Err(SpecError::InvalidMaintenanceHour(value.to_string())),
        },
        _ => Err(SpecError::InvalidMaintenanceHour(value.to_string())),
    }
}

fn is_valid_cidr(cidr: &str) -> bool {
    let Some((address, prefix)) = cidr.split_once('/') else {
        return false;
    };
    let Ok(address) = address.parse::<IpAddr>() else {
        return false;
    };
    let max_prefix = if address.is_ipv4() { 32 } else { 128 };
    prefix.parse::<u8>().is_ok_and(|p| p <= max_prefix)
}

/// Observed state, owned by the controller
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PostgresqlInstanceStatus {
    /// Addresses reported by the provider
    #[serde(default)]
    pub ips: InstanceIps,

    /// Lifecycle conditions (at most one per type)
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Provider operation the controller is waiting for.
    /// Serialized as `null` when unset so a merge patch clears it.
    #[serde(default)]
    pub pending_operation: Option<PendingOperation>,

    /// Generation of the spec the status reflects
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// Addresses are serialized as `null` when absent so a merge patch clears them.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceIps {
    #[serde(default)]
    pub public_ip: Option<String>,
    #[serde(default)]
    pub private_ip: Option<String>,
}

/// Marker for an asynchronous provider operation in flight
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PendingOperation {
    /// Provider operation name, used to poll it
    pub name: String,
    pub kind: OperationKind,
    pub start_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum OperationKind {
    Create,
    Update,
    Delete,
    /// Setting the `postgres` password
    SetPassword,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create => write!(f, "Create"),
            Self::Update => write!(f, "Update"),
            Self::Delete => write!(f, "Delete"),
            Self::SetPassword => write!(f, "SetPassword"),
        }
    }
}

impl PostgresqlInstance {
    /// Whether the controller's finalizer is set.
    pub fn has_finalizer(&self) -> bool {
        self.finalizers().iter().any(|f| f == FINALIZER)
    }

    /// Whether deletion was requested.
    pub fn is_being_deleted(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }
}
