use crate::locator::Locator;

use std::collections::BTreeMap;

/// Opaque string labels attached to a package envelope.
pub type Labels = BTreeMap<String, String>;

pub const LABEL_PURPOSE: &str = "purpose";
pub const LABEL_ADVERTISE_IP: &str = "advertise-ip";
pub const LABEL_OPERATION_ID: &str = "operation-id";
/// Zero-version locator of the package family a config belongs to.
pub const LABEL_CONFIG_FOR: &str = "config-for";

pub const PURPOSE_CA: &str = "ca";
pub const PURPOSE_PLANET_SECRETS: &str = "planet-secrets";
pub const PURPOSE_PLANET_CONFIG: &str = "planet-config";
pub const PURPOSE_TELEPORT_MASTER_CONFIG: &str = "teleport-master-config";
pub const PURPOSE_TELEPORT_NODE_CONFIG: &str = "teleport-node-config";
pub const PURPOSE_EXPORT: &str = "export";
pub const PURPOSE_LICENSE: &str = "license";
pub const PURPOSE_RESOURCES: &str = "resources";
pub const PURPOSE_RUNTIME_UPGRADE: &str = "runtime-upgrade";

/// Labels carried by every per-node configuration package. Later stages
/// query on these, so the key set is a stable contract.
pub fn config_labels(
    purpose: &str,
    advertise_ip: &str,
    operation_id: &str,
    config_for: &Locator,
) -> Labels {
    Labels::from([
        (LABEL_PURPOSE.to_string(), purpose.to_string()),
        (LABEL_ADVERTISE_IP.to_string(), advertise_ip.to_string()),
        (LABEL_OPERATION_ID.to_string(), operation_id.to_string()),
        (
            LABEL_CONFIG_FOR.to_string(),
            config_for.zero_version().to_string(),
        ),
    ])
}

pub fn purpose_labels(purpose: &str) -> Labels {
    Labels::from([(LABEL_PURPOSE.to_string(), purpose.to_string())])
}
