use crate::error::{Error, Result};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceRole {
    Master,
    Node,
}

/// Host path mounted into the runtime container.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Mount {
    pub source: String,
    pub destination: String,
    #[serde(default)]
    pub skip_if_missing: bool,
    #[serde(default)]
    pub recursive: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Taint {
    pub key: String,
    pub value: String,
    pub effect: String,
}

/// Node profile declared by the application manifest.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Profile {
    pub service_role: ServiceRole,
    #[serde(default)]
    pub taints: Vec<Taint>,
    #[serde(default)]
    pub node_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub mounts: Vec<Mount>,
    /// Raw device specifications passed through to the runtime.
    #[serde(default)]
    pub devices: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DockerConfig {
    #[serde(default = "default_storage_driver")]
    pub storage_driver: String,
    #[serde(default)]
    pub args: Vec<String>,
}

fn default_storage_driver() -> String {
    "overlay2".to_string()
}

impl Default for DockerConfig {
    fn default() -> Self {
        DockerConfig {
            storage_driver: default_storage_driver(),
            args: Vec::new(),
        }
    }
}

/// Lifecycle hooks the application ships. Only the network-install hook
/// influences configuration: its presence turns the built-in overlay off.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Hooks {
    #[serde(default)]
    pub network_install: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SystemUser {
    #[serde(default = "default_service_id")]
    pub uid: u32,
    #[serde(default = "default_service_id")]
    pub gid: u32,
}

fn default_service_id() -> u32 {
    1000
}

impl Default for SystemUser {
    fn default() -> Self {
        SystemUser {
            uid: default_service_id(),
            gid: default_service_id(),
        }
    }
}

/// Declarative application manifest, the install-time source of truth for
/// profiles and runtime defaults.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
    #[serde(default)]
    pub docker: DockerConfig,
    #[serde(default)]
    pub hooks: Hooks,
    #[serde(default)]
    pub system_user: SystemUser,
}

impl Manifest {
    pub fn profile(&self, name: &str) -> Result<&Profile> {
        self.profiles
            .get(name)
            .ok_or_else(|| Error::ProfileNotFound(name.to_string()))
    }

    #[inline]
    pub fn has_network_install_hook(&self) -> bool {
        self.hooks.network_install.is_some()
    }

    /// A server is a master iff its profile's service role says so.
    pub fn is_master_profile(&self, name: &str) -> Result<bool> {
        Ok(self.profile(name)?.service_role == ServiceRole::Master)
    }
}
