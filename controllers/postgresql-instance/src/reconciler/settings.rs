//! Desired provider state and drift detection.
//!
//! [`desired_instance`] renders a validated spec into the Cloud SQL
//! representation. [`settings_drift`] compares it with what the provider
//! reports and names the settings that need an update.

use cloudsql_client::{
    AclEntry, BackupConfiguration, DatabaseFlag, DatabaseInstance, IpConfiguration, LocationPreference,
    MaintenanceWindow, Settings,
};
use crds::{PostgresqlInstanceSpec, SpecError};

/// Full instance body for `create_instance` / `update_instance`.
pub fn desired_instance(spec: &PostgresqlInstanceSpec, project: &str) -> Result<DatabaseInstance, SpecError> {
    let flags = spec
        .database_flags()?
        .into_iter()
        .map(|(name, value)| DatabaseFlag { name, value })
        .collect();

    let networking = &spec.networking;
    let private_network = if networking.private_ip.enabled {
        networking.private_ip.network.clone()
    } else {
        None
    };
    let authorized_networks = networking
        .public_ip
        .authorized_networks
        .iter()
        .map(|network| AclEntry {
            value: network.cidr.clone(),
            name: network.name.clone(),
        })
        .collect();

    let disk = &spec.resources.disk;
    let settings = Settings {
        tier: Some(spec.resources.instance_type.clone()),
        availability_type: Some(spec.availability.availability_type.api_value().to_string()),
        data_disk_size_gb: Some(disk.size_minimum_gb),
        data_disk_type: Some(disk.disk_type.api_value().to_string()),
        storage_auto_resize: Some(disk.storage_auto_resize()),
        storage_auto_resize_limit: Some(disk.size_maximum_gb),
        database_flags: Some(flags),
        backup_configuration: Some(BackupConfiguration {
            enabled: Some(spec.backups.daily.enabled),
            start_time: Some(spec.backups.daily.start_time.clone()),
        }),
        maintenance_window: Some(MaintenanceWindow {
            day: Some(spec.maintenance.day.api_value()),
            hour: spec.maintenance.hour_api_value(),
        }),
        ip_configuration: Some(IpConfiguration {
            ipv4_enabled: Some(networking.public_ip.enabled),
            private_network,
            authorized_networks: Some(authorized_networks),
        }),
        location_preference: spec.location.zone_preference().map(|zone| LocationPreference {
            zone: Some(zone.to_string()),
        }),
        user_labels: Some(spec.labels.clone()),
        settings_version: None,
    };

    Ok(DatabaseInstance {
        name: spec.name.clone(),
        project: Some(project.to_string()),
        region: Some(spec.location.region.clone()),
        database_version: Some(spec.version.api_value().to_string()),
        settings: Some(settings),
        ..Default::default()
    })
}

/// Body for `update_instance`: the desired instance, except that a disk the
/// provider already grew past the minimum keeps its current size.
///
/// Disks can only grow, so asking for the minimum again would be rejected.
pub fn update_request(desired: &DatabaseInstance, current: &Settings) -> DatabaseInstance {
    let mut request = desired.clone();
    if let Some(settings) = request.settings.as_mut()
        && let Some(current_size) = current.data_disk_size_gb
    {
        let size = settings.data_disk_size_gb.map_or(current_size, |size| size.max(current_size));
        settings.data_disk_size_gb = Some(size);
    }
    request
}

/// Names of the settings where `current` diverges from `desired`.
///
/// The comparison is lenient where the provider legitimately differs from
/// what was asked for:
/// - the disk only counts as drifted while it is smaller than the minimum,
///   since auto-resize grows it past that
/// - without a zone preference any zone the provider picked is fine
/// - flags, labels and authorized networks compare as sets; an absent list
///   equals an empty one
/// - a private network cannot be detached once attached, so only a missing
///   or different network counts
pub fn settings_drift(desired: &Settings, current: &Settings) -> Vec<&'static str> {
    let mut drift = Vec::new();

    if desired.tier != current.tier {
        drift.push("tier");
    }
    if desired.availability_type != current.availability_type {
        drift.push("availabilityType");
    }
    if let Some(minimum) = desired.data_disk_size_gb
        && current.data_disk_size_gb.unwrap_or(0) < minimum
    {
        drift.push("dataDiskSizeGb");
    }
    if desired.data_disk_type != current.data_disk_type {
        drift.push("dataDiskType");
    }
    if desired.storage_auto_resize != current.storage_auto_resize {
        drift.push("storageAutoResize");
    }
    if desired.storage_auto_resize_limit.unwrap_or(0) != current.storage_auto_resize_limit.unwrap_or(0) {
        drift.push("storageAutoResizeLimit");
    }
    if !same_flags(desired.database_flags.as_deref(), current.database_flags.as_deref()) {
        drift.push("databaseFlags");
    }
    if desired.backup_configuration.clone().unwrap_or_default() != current.backup_configuration.clone().unwrap_or_default() {
        drift.push("backupConfiguration");
    }
    if !same_maintenance_window(desired.maintenance_window.as_ref(), current.maintenance_window.as_ref()) {
        drift.push("maintenanceWindow");
    }

    let desired_ip = desired.ip_configuration.clone().unwrap_or_default();
    let current_ip = current.ip_configuration.clone().unwrap_or_default();
    // The provider enables public IP unless told otherwise
    if desired_ip.ipv4_enabled.unwrap_or(true) != current_ip.ipv4_enabled.unwrap_or(true) {
        drift.push("ipv4Enabled");
    }
    if desired_ip.private_network.is_some() && desired_ip.private_network != current_ip.private_network {
        drift.push("privateNetwork");
    }
    if !same_authorized_networks(
        desired_ip.authorized_networks.as_deref(),
        current_ip.authorized_networks.as_deref(),
    ) {
        drift.push("authorizedNetworks");
    }

    if let Some(zone) = desired.location_preference.as_ref().and_then(|l| l.zone.as_deref())
        && current.location_preference.as_ref().and_then(|l| l.zone.as_deref()) != Some(zone)
    {
        drift.push("locationPreference");
    }
    if desired.user_labels.clone().unwrap_or_default() != current.user_labels.clone().unwrap_or_default() {
        drift.push("userLabels");
    }

    drift
}

fn same_flags(desired: Option<&[DatabaseFlag]>, current: Option<&[DatabaseFlag]>) -> bool {
    fn sorted(flags: Option<&[DatabaseFlag]>) -> Vec<(&str, &str)> {
        let mut pairs: Vec<(&str, &str)> = flags
            .unwrap_or_default()
            .iter()
            .map(|flag| (flag.name.as_str(), flag.value.as_str()))
            .collect();
        pairs.sort_unstable();
        pairs
    }
    sorted(desired) == sorted(current)
}

fn same_authorized_networks(desired: Option<&[AclEntry]>, current: Option<&[AclEntry]>) -> bool {
    fn sorted(entries: Option<&[AclEntry]>) -> Vec<(&str, Option<&str>)> {
        let mut pairs: Vec<(&str, Option<&str>)> = entries
            .unwrap_or_default()
            .iter()
            .map(|entry| (entry.value.as_str(), entry.name.as_deref()))
            .collect();
        pairs.sort_unstable();
        pairs
    }
    sorted(desired) == sorted(current)
}

/// Day 0 and an absent day both mean "any day"
fn same_maintenance_window(desired: Option<&MaintenanceWindow>, current: Option<&MaintenanceWindow>) -> bool {
    let normalize = |window: Option<&MaintenanceWindow>| {
        let window = window.cloned().unwrap_or_default();
        (window.day.unwrap_or(0), window.hour)
    };
    normalize(desired) == normalize(current)
}
