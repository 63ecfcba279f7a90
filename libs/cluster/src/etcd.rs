use crate::error::{Error, Result};
use crate::server::ProvisionedServer;
use crate::topology::Topology;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyMode {
    On,
    Off,
}

impl fmt::Display for ProxyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyMode::On => write!(f, "on"),
            ProxyMode::Off => write!(f, "off"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InitialClusterState {
    New,
    Existing,
}

impl fmt::Display for InitialClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitialClusterState::New => write!(f, "new"),
            InitialClusterState::Existing => write!(f, "existing"),
        }
    }
}

/// Per-server etcd bootstrap decision.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EtcdConfig {
    pub initial_cluster: String,
    pub initial_cluster_state: InitialClusterState,
    pub proxy_mode: ProxyMode,
}

/// A member reported by the live etcd cluster during expand.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EtcdMember {
    pub name: String,
    pub peer_urls: Vec<String>,
}

impl EtcdMember {
    /// Host of the first peer URL; the address the member answers on.
    pub fn advertise_ip(&self) -> Result<String> {
        let raw = self
            .peer_urls
            .first()
            .ok_or_else(|| Error::PeerUrlWithoutHost(self.name.clone()))?;
        let url =
            Url::parse(raw).map_err(|e| Error::InvalidPeerUrl(raw.to_string(), e))?;
        url.host_str()
            .map(str::to_string)
            .ok_or_else(|| Error::PeerUrlWithoutHost(raw.to_string()))
    }
}

/// Install-time plan: every master is a full member with a `new` cluster,
/// every other server proxies against an `existing` one. All servers share
/// the same initial-cluster string.
pub fn plan_install(topology: &Topology, domain: &str) -> BTreeMap<String, EtcdConfig> {
    let initial_cluster = topology.initial_cluster(domain);
    debug!(msg = "computed install etcd plan", initial_cluster);
    topology
        .servers()
        .iter()
        .map(|server| {
            let config = if server.is_master() {
                EtcdConfig {
                    initial_cluster: initial_cluster.clone(),
                    initial_cluster_state: InitialClusterState::New,
                    proxy_mode: ProxyMode::Off,
                }
            } else {
                EtcdConfig {
                    initial_cluster: initial_cluster.clone(),
                    initial_cluster_state: InitialClusterState::Existing,
                    proxy_mode: ProxyMode::On,
                }
            };
            (server.advertise_ip.clone(), config)
        })
        .collect()
}

/// Expand-time plan for the joining server: current membership plus the
/// joiner, always `existing`, full member only when the joiner is a master.
pub fn plan_expand(
    members: &[EtcdMember],
    joining: &ProvisionedServer,
    domain: &str,
) -> Result<EtcdConfig> {
    let mut entries = Vec::with_capacity(members.len() + 1);
    entries.push(format!(
        "{}:{}",
        joining.etcd_member_name(domain),
        joining.advertise_ip
    ));
    for member in members {
        entries.push(format!("{}:{}", member.name, member.advertise_ip()?));
    }
    let config = EtcdConfig {
        initial_cluster: entries.join(","),
        initial_cluster_state: InitialClusterState::Existing,
        proxy_mode: if joining.is_master() {
            ProxyMode::Off
        } else {
            ProxyMode::On
        },
    };
    debug!(
        msg = "computed expand etcd plan",
        server = joining.advertise_ip,
        initial_cluster = config.initial_cluster,
        proxy = %config.proxy_mode,
    );
    Ok(config)
}
