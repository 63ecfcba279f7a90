use crate::error::{Error, Result};
use crate::server::ProvisionedServer;

/// Ordered view over the servers assigned to an operation.
///
/// Input order is preserved everywhere: the initial-cluster string must be
/// byte-identical on every server that receives it.
#[derive(Clone, Debug, Default)]
pub struct Topology {
    servers: Vec<ProvisionedServer>,
}

impl Topology {
    pub fn new(servers: Vec<ProvisionedServer>) -> Self {
        Topology { servers }
    }

    #[inline]
    pub fn servers(&self) -> &[ProvisionedServer] {
        &self.servers
    }

    pub fn masters(&self) -> impl Iterator<Item = &ProvisionedServer> {
        self.servers.iter().filter(|s| s.is_master())
    }

    pub fn nodes(&self) -> impl Iterator<Item = &ProvisionedServer> {
        self.servers.iter().filter(|s| !s.is_master())
    }

    pub fn master_ips(&self) -> Vec<String> {
        self.masters().map(|s| s.advertise_ip.clone()).collect()
    }

    pub fn first_master(&self) -> Result<&ProvisionedServer> {
        self.masters().next().ok_or(Error::NoMaster)
    }

    pub fn contains(&self, advertise_ip: &str) -> bool {
        self.servers.iter().any(|s| s.advertise_ip == advertise_ip)
    }

    pub fn get(&self, advertise_ip: &str) -> Result<&ProvisionedServer> {
        self.servers
            .iter()
            .find(|s| s.advertise_ip == advertise_ip)
            .ok_or_else(|| Error::ServerNotFound(advertise_ip.to_string()))
    }

    /// `<member-name>:<ip>` for every master, in input order, joined by
    /// comma.
    pub fn initial_cluster(&self, domain: &str) -> String {
        self.masters()
            .map(|s| format!("{}:{}", s.etcd_member_name(domain), s.advertise_ip))
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

/// Leader-election setting handed to a master's runtime.
///
/// During initial bring-up only the first master runs with election
/// enabled; the others are pinned to it until the suspension is lifted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MasterConfig {
    pub election_enabled: bool,
    pub addr: String,
}

impl MasterConfig {
    pub fn leading(addr: &str) -> Self {
        MasterConfig {
            election_enabled: true,
            addr: addr.to_string(),
        }
    }

    pub fn suspended(addr: &str) -> Self {
        MasterConfig {
            election_enabled: false,
            addr: addr.to_string(),
        }
    }
}
