//! Helper functions for the mock's provider-side behaviour

use crate::models::{DatabaseInstance, IpAddressType, IpMapping, LocationPreference, Settings};

/// Adds or removes the public and private address to match the networking settings.
///
/// Existing addresses are kept as long as their network stays enabled.
pub(super) fn assign_ip_addresses(instance: &mut DatabaseInstance, id: u64) {
    let ip_configuration = instance
        .settings
        .as_ref()
        .and_then(|settings| settings.ip_configuration.clone())
        .unwrap_or_default();
    // The API enables public IP unless told otherwise
    let public = ip_configuration.ipv4_enabled.unwrap_or(true);
    let private = ip_configuration
        .private_network
        .as_deref()
        .is_some_and(|network| !network.is_empty());

    let octets = format!("{}.{}", (id / 256) % 256, id % 256);
    toggle(instance, IpAddressType::Primary, public, || format!("34.76.{octets}"));
    toggle(instance, IpAddressType::Private, private, || format!("10.20.{octets}"));
}

fn toggle(instance: &mut DatabaseInstance, ip_type: IpAddressType, enabled: bool, address: impl FnOnce() -> String) {
    let present = instance.ip_addresses.iter().any(|mapping| mapping.ip_type == ip_type);
    if enabled && !present {
        instance.ip_addresses.push(IpMapping {
            ip_type,
            ip_address: address(),
        });
    } else if !enabled {
        instance.ip_addresses.retain(|mapping| mapping.ip_type != ip_type);
    }
}

/// Without a zone preference the provider picks one in the region.
pub(super) fn pick_zone(instance: &mut DatabaseInstance) {
    let region = instance.region.clone().unwrap_or_else(|| "us-central1".to_string());
    let settings = instance.settings.get_or_insert_with(Settings::default);
    let location = settings.location_preference.get_or_insert_with(LocationPreference::default);
    if location.zone.is_none() {
        location.zone = Some(format!("{region}-b"));
    }
}

/// Applies a sparse `PATCH` body: fields present in `patch` replace the current ones.
pub(super) fn merge_instance(instance: &mut DatabaseInstance, patch: DatabaseInstance) {
    let Some(patch) = patch.settings else {
        return;
    };
    let settings = instance.settings.get_or_insert_with(Settings::default);

    macro_rules! replace {
        ($($field:ident),* $(,)?) => {
            $(
                if patch.$field.is_some() {
                    settings.$field = patch.$field;
                }
            )*
        };
    }
    replace!(
        tier,
        availability_type,
        data_disk_size_gb,
        data_disk_type,
        storage_auto_resize,
        storage_auto_resize_limit,
        database_flags,
        backup_configuration,
        maintenance_window,
        user_labels,
    );

    // Nested objects are patched field by field too
    if let Some(ip_patch) = patch.ip_configuration {
        let ip_configuration = settings.ip_configuration.get_or_insert_with(Default::default);
        if ip_patch.ipv4_enabled.is_some() {
            ip_configuration.ipv4_enabled = ip_patch.ipv4_enabled;
        }
        if ip_patch.private_network.is_some() {
            ip_configuration.private_network = ip_patch.private_network;
        }
        if ip_patch.authorized_networks.is_some() {
            ip_configuration.authorized_networks = ip_patch.authorized_networks;
        }
    }
    if let Some(location_patch) = patch.location_preference
        && location_patch.zone.is_some()
    {
        settings.location_preference = Some(location_patch);
    }

    settings.settings_version = Some(settings.settings_version.unwrap_or(0) + 1);
}
