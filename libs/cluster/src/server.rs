use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterRole {
    Master,
    Node,
}

/// Block-device configuration for the docker storage driver.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerDocker {
    /// Device backing the devicemapper thin pool; absent means loop-lvm.
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default)]
    pub lvm_system_dir: Option<String>,
}

/// A physical or virtual server assigned to the operation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProvisionedServer {
    pub advertise_ip: String,
    pub hostname: String,
    /// Kubernetes node name override.
    #[serde(default)]
    pub nodename: Option<String>,
    /// Profile name from the application manifest.
    pub role: String,
    pub cluster_role: ClusterRole,
    pub state_dir: String,
    #[serde(default)]
    pub docker: ServerDocker,
    #[serde(default)]
    pub instance_type: Option<String>,
}

impl ProvisionedServer {
    #[inline]
    pub fn is_master(&self) -> bool {
        self.cluster_role == ClusterRole::Master
    }

    /// Cluster-internal name of the server.
    ///
    /// A hostname that already sits under the cluster domain is reused
    /// verbatim; anything else gets a name derived from the advertise IP.
    pub fn fqdn(&self, domain: &str) -> String {
        if self.hostname.ends_with(&format!(".{domain}")) {
            self.hostname.clone()
        } else {
            format!("{}.{}", self.advertise_ip.replace('.', "_"), domain)
        }
    }

    /// Deterministic etcd member identifier.
    #[inline]
    pub fn etcd_member_name(&self, domain: &str) -> String {
        self.fqdn(domain)
    }

    /// Per-node package name disambiguator: `<ip>.<domain>` with `.` and
    /// `:` stripped.
    pub fn package_suffix(&self, domain: &str) -> String {
        format!("{}.{}", self.advertise_ip, domain).replace(['.', ':'], "")
    }

    /// Identity the kubelet registers under.
    #[inline]
    pub fn kube_node_id(&self) -> &str {
        self.nodename.as_deref().unwrap_or(&self.advertise_ip)
    }
}
