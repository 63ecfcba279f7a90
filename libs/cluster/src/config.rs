use crate::error::{Error, Result};

use std::collections::BTreeMap;

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};

/// Service and overlay (pod) networks for the cluster.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Subnets {
    pub service: String,
    pub overlay: String,
}

impl Default for Subnets {
    fn default() -> Self {
        Subnets {
            service: "10.100.0.0/16".to_string(),
            overlay: "10.244.0.0/16".to_string(),
        }
    }
}

impl Subnets {
    pub fn validate(&self) -> Result<()> {
        first_subnet_ip(&self.service)?;
        first_subnet_ip(&self.overlay)?;
        Ok(())
    }
}

/// First usable host of a CIDR block. The kubernetes API service claims
/// this address inside the service subnet, so the apiserver certificate
/// must cover it.
pub fn first_subnet_ip(cidr: &str) -> Result<String> {
    let net: Ipv4Net = cidr
        .parse()
        .map_err(|e| Error::InvalidSubnet(cidr.to_string(), e))?;
    net.hosts()
        .next()
        .map(|ip| ip.to_string())
        .ok_or_else(|| Error::EmptySubnet(cidr.to_string()))
}

/// Cloud-specific settings. The source of these dispatched on a provider
/// interface by dynamic type; here callers pattern-match instead.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum CloudProvider {
    Aws {
        access_key: String,
        secret_key: String,
        #[serde(default)]
        session_token: Option<String>,
        region: String,
    },
    Gce {
        #[serde(default)]
        node_tags: Vec<String>,
    },
    #[default]
    None,
}

impl CloudProvider {
    pub fn name(&self) -> &'static str {
        match self {
            CloudProvider::Aws { .. } => "aws",
            CloudProvider::Gce { .. } => "gce",
            CloudProvider::None => "",
        }
    }

    #[inline]
    pub fn is_none(&self) -> bool {
        matches!(self, CloudProvider::None)
    }
}

/// Cluster-level configuration resource. Every field is an override: unset
/// means the operation (and manifest) defaults stand.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ClusterConfiguration {
    #[serde(default)]
    pub service_cidr: Option<String>,
    #[serde(default)]
    pub pod_cidr: Option<String>,
    /// Raw cloud-config content, base64-encoded on the runtime command line.
    #[serde(default)]
    pub cloud_config: Option<String>,
    /// Raw kubelet configuration, base64-encoded on the runtime command line.
    #[serde(default)]
    pub kubelet_config: Option<String>,
    #[serde(default)]
    pub service_node_portrange: Option<String>,
    #[serde(default)]
    pub proxy_portrange: Option<String>,
    #[serde(default)]
    pub feature_gates: BTreeMap<String, bool>,
    #[serde(default)]
    pub allow_privileged: bool,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// External hostnames the apiserver certificate must be valid for.
    #[serde(default)]
    pub sni_hosts: Vec<String>,
}

impl ClusterConfiguration {
    pub fn feature_gates_csv(&self) -> Option<String> {
        if self.feature_gates.is_empty() {
            return None;
        }
        Some(
            self.feature_gates
                .iter()
                .map(|(gate, enabled)| format!("{gate}={enabled}"))
                .collect::<Vec<_>>()
                .join(","),
        )
    }
}

/// Addresses the in-cluster DNS answers on.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DnsConfig {
    pub listen_addrs: Vec<String>,
    pub port: u16,
}

impl Default for DnsConfig {
    fn default() -> Self {
        DnsConfig {
            listen_addrs: vec!["127.0.0.2".to_string()],
            port: 53,
        }
    }
}
