use std::path::Path;

use orbit_cluster::config::{CloudProvider, ClusterConfiguration, DnsConfig, Subnets};
use orbit_cluster::manifest::Manifest;
use orbit_cluster::server::ProvisionedServer;
use orbit_ops::configure::{ClusterInfo, ConfigureRequest};
use orbit_ops::operation::{InstallExpand, Operation};
use serde::Deserialize;

/// Everything the CLI needs to drive a configuration run, in one YAML file.
#[derive(Debug, Deserialize)]
pub struct ClusterSpec {
    pub name: String,
    pub domain: String,
    pub planet_version: String,
    pub teleport_version: String,
    pub manifest: Manifest,
    pub servers: Vec<ProvisionedServer>,
    #[serde(default)]
    pub subnets: Option<Subnets>,
    #[serde(default)]
    pub cluster_config: Option<ClusterConfiguration>,
    #[serde(default)]
    pub cloud_provider: CloudProvider,
    #[serde(default)]
    pub dns: Option<DnsConfig>,
    #[serde(default)]
    pub vxlan_port: Option<u16>,
    #[serde(default)]
    pub license: Option<String>,
}

impl ClusterSpec {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let spec: ClusterSpec = serde_yaml::from_str(&raw)?;
        if spec.servers.is_empty() {
            anyhow::bail!("cluster spec lists no servers");
        }
        Ok(spec)
    }

    pub fn install_request(&self) -> anyhow::Result<ConfigureRequest> {
        let mut operation = Operation::install(self.servers.clone(), "orbit-cli");
        operation.install_expand = Some(InstallExpand {
            subnets: self.subnets.clone(),
            ..InstallExpand::default()
        });
        Ok(self.request(operation))
    }

    pub fn expand_request(&self, joining: &str) -> anyhow::Result<ConfigureRequest> {
        let server = self
            .servers
            .iter()
            .find(|s| s.advertise_ip == joining)
            .ok_or_else(|| anyhow::anyhow!("no server with advertise IP {joining} in spec"))?;
        let mut operation = Operation::expand(server.clone(), "orbit-cli");
        operation.install_expand = Some(InstallExpand {
            subnets: self.subnets.clone(),
            ..InstallExpand::default()
        });
        Ok(self.request(operation))
    }

    fn request(&self, operation: Operation) -> ConfigureRequest {
        let mut request = ConfigureRequest::new(operation, self.manifest.clone(), self.cluster_info());
        request.cluster_config = self.cluster_config.clone();
        request.cloud_provider = self.cloud_provider.clone();
        request.dns = self.dns.clone().unwrap_or_default();
        request.vxlan_port = self.vxlan_port;
        request
    }

    fn cluster_info(&self) -> ClusterInfo {
        ClusterInfo {
            name: self.name.clone(),
            domain: self.domain.clone(),
            planet_version: self.planet_version.clone(),
            teleport_version: self.teleport_version.clone(),
            license: self.license.clone(),
            resources: None,
        }
    }
}
