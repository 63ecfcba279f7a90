use crate::error::{Error, Result};

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use orbit_cluster::config::CloudProvider;
use orbit_cluster::server::ProvisionedServer;
use serde::{Deserialize, Serialize};
use tracing::debug;

const DATA_DIR: &str = "/var/lib/teleport";
const AUTH_PORT: u16 = 3025;
const ETCD_CLIENT_PORT: u16 = 2379;
const SECRETS_DIR: &str = "/var/state";
const ETCD_PREFIX: &str = "/teleport";
/// Cached cluster state stays valid for a year of disconnect.
const CACHE_TTL: &str = "8760h";
const DYNAMIC_LABEL_PERIOD: &str = "1m0s";

const CIPHERS: [&str; 4] = [
    "aes128-ctr",
    "aes192-ctr",
    "aes256-ctr",
    "aes128-gcm@openssh.com",
];
const KEX_ALGOS: [&str; 4] = [
    "curve25519-sha256@libssh.org",
    "ecdh-sha2-nistp256",
    "ecdh-sha2-nistp384",
    "ecdh-sha2-nistp521",
];
const MAC_ALGOS: [&str; 2] = ["hmac-sha2-256-etm@openssh.com", "hmac-sha2-256"];

/// Inputs for one server's gateway configuration.
pub struct TeleportRequest<'a> {
    pub server: &'a ProvisionedServer,
    pub domain: &'a str,
    pub cluster_name: &'a str,
    pub master_ips: &'a [String],
    pub labels: BTreeMap<String, String>,
    pub cloud_provider: &'a CloudProvider,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TeleportConfig {
    pub teleport: TeleportService,
    pub auth_service: AuthService,
    pub proxy_service: ProxyService,
    pub ssh_service: SshService,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TeleportService {
    pub nodename: String,
    pub data_dir: String,
    pub advertise_ip: String,
    pub auth_servers: Vec<String>,
    pub ciphers: Vec<String>,
    pub kex_algos: Vec<String>,
    pub mac_algos: Vec<String>,
    pub cache: CachePolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<EtcdStorage>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CachePolicy {
    pub enabled: bool,
    pub ttl: String,
}

/// Auth-state backend; only masters carry one, pointed at the local etcd
/// with the node's own secret material.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EtcdStorage {
    #[serde(rename = "type")]
    pub kind: String,
    pub peers: Vec<String>,
    pub tls_ca_file: String,
    pub tls_cert_file: String,
    pub tls_key_file: String,
    pub prefix: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthService {
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_name: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProxyService {
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes: Option<KubeProxy>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KubeProxy {
    pub enabled: bool,
    pub public_addr: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SshService {
    pub enabled: bool,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commands: Vec<DynamicLabelCommand>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DynamicLabelCommand {
    pub name: String,
    pub command: Vec<String>,
    pub period: String,
}

impl TeleportConfig {
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| Error::Serialization("failed to encode teleport config".to_string(), e))
    }

    pub fn parse(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| Error::Serialization("failed to decode teleport config".to_string(), e))
    }

    /// The whole configuration travels as one base64 argument.
    pub fn config_string_arg(&self) -> Result<String> {
        Ok(format!("--config-string={}", BASE64.encode(self.to_yaml()?)))
    }
}

fn service_base(request: &TeleportRequest<'_>, auth_servers: Vec<String>) -> TeleportService {
    TeleportService {
        nodename: request.server.fqdn(request.domain),
        data_dir: DATA_DIR.to_string(),
        advertise_ip: request.server.advertise_ip.clone(),
        auth_servers,
        ciphers: CIPHERS.iter().map(|c| c.to_string()).collect(),
        kex_algos: KEX_ALGOS.iter().map(|k| k.to_string()).collect(),
        mac_algos: MAC_ALGOS.iter().map(|m| m.to_string()).collect(),
        cache: CachePolicy {
            enabled: true,
            ttl: CACHE_TTL.to_string(),
        },
        storage: None,
    }
}

fn dynamic_label_commands(provider: &CloudProvider) -> Vec<DynamicLabelCommand> {
    let metadata_url = match provider {
        CloudProvider::Aws { .. } => "http://169.254.169.254/latest/meta-data/instance-type",
        CloudProvider::Gce { .. } => {
            "http://metadata.google.internal/computeMetadata/v1/instance/machine-type"
        }
        CloudProvider::None => return Vec::new(),
    };
    vec![DynamicLabelCommand {
        name: "instance-type".to_string(),
        command: vec!["curl".to_string(), "-s".to_string(), metadata_url.to_string()],
        period: DYNAMIC_LABEL_PERIOD.to_string(),
    }]
}

/// Auth/proxy member configuration: auth and proxy on, SSH off, state in
/// the local etcd.
pub fn master_config(request: &TeleportRequest<'_>) -> TeleportConfig {
    let server = request.server;
    debug!(msg = "build teleport master config", server = server.advertise_ip);
    let mut teleport = service_base(
        request,
        vec![format!("127.0.0.1:{AUTH_PORT}")],
    );
    teleport.storage = Some(EtcdStorage {
        kind: "etcd".to_string(),
        peers: vec![format!("https://{}:{ETCD_CLIENT_PORT}", server.advertise_ip)],
        tls_ca_file: format!("{SECRETS_DIR}/ca.cert"),
        tls_cert_file: format!("{SECRETS_DIR}/etcd.cert"),
        tls_key_file: format!("{SECRETS_DIR}/etcd.key"),
        prefix: ETCD_PREFIX.to_string(),
    });
    TeleportConfig {
        teleport,
        auth_service: AuthService {
            enabled: true,
            cluster_name: Some(request.cluster_name.to_string()),
        },
        proxy_service: ProxyService {
            enabled: true,
            kubernetes: Some(KubeProxy {
                enabled: true,
                public_addr: vec![
                    server.fqdn(request.domain),
                    server.advertise_ip.clone(),
                ],
            }),
        },
        ssh_service: SshService {
            enabled: false,
            labels: request.labels.clone(),
            commands: dynamic_label_commands(request.cloud_provider),
        },
    }
}

/// Plain node configuration: SSH on, auth and proxy off. A master running
/// this config prefers its co-located auth server, so localhost goes first.
pub fn node_config(request: &TeleportRequest<'_>) -> TeleportConfig {
    let server = request.server;
    debug!(msg = "build teleport node config", server = server.advertise_ip);
    let mut auth_servers = Vec::with_capacity(request.master_ips.len() + 1);
    if server.is_master() {
        auth_servers.push(format!("localhost:{AUTH_PORT}"));
    }
    auth_servers.extend(
        request
            .master_ips
            .iter()
            .map(|ip| format!("{ip}:{AUTH_PORT}")),
    );
    TeleportConfig {
        teleport: service_base(request, auth_servers),
        auth_service: AuthService {
            enabled: false,
            cluster_name: None,
        },
        proxy_service: ProxyService {
            enabled: false,
            kubernetes: None,
        },
        ssh_service: SshService {
            enabled: true,
            labels: request.labels.clone(),
            commands: dynamic_label_commands(request.cloud_provider),
        },
    }
}

/// Package name for the auth/proxy member configuration.
pub fn master_package_name(package_suffix: &str) -> String {
    format!("teleport-master-config-{package_suffix}")
}

/// Package name for the plain node configuration.
pub fn node_package_name(package_suffix: &str) -> String {
    format!("teleport-node-config-{package_suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    use orbit_cluster::server::{ClusterRole, ServerDocker};

    fn server(ip: &str, cluster_role: ClusterRole) -> ProvisionedServer {
        ProvisionedServer {
            advertise_ip: ip.to_string(),
            hostname: format!("host-{ip}"),
            nodename: None,
            role: "worker".to_string(),
            cluster_role,
            state_dir: "/var/lib/orbit".to_string(),
            docker: ServerDocker::default(),
            instance_type: None,
        }
    }

    fn request<'a>(
        server: &'a ProvisionedServer,
        master_ips: &'a [String],
        cloud_provider: &'a CloudProvider,
    ) -> TeleportRequest<'a> {
        TeleportRequest {
            server,
            domain: "c.example.com",
            cluster_name: "c.example.com",
            master_ips,
            labels: BTreeMap::from([("role".to_string(), "worker".to_string())]),
            cloud_provider,
        }
    }

    #[test]
    fn test_master_config_shape() {
        let master = server("10.0.0.1", ClusterRole::Master);
        let config = master_config(&request(&master, &[], &CloudProvider::None));

        assert!(config.auth_service.enabled);
        assert!(config.proxy_service.enabled);
        assert!(!config.ssh_service.enabled);
        assert_eq!(
            config.auth_service.cluster_name.as_deref(),
            Some("c.example.com")
        );

        let storage = config.teleport.storage.as_ref().unwrap();
        assert_eq!(storage.kind, "etcd");
        assert_eq!(storage.peers, vec!["https://10.0.0.1:2379"]);
        assert_eq!(storage.tls_key_file, "/var/state/etcd.key");

        let kube = config.proxy_service.kubernetes.as_ref().unwrap();
        assert!(kube
            .public_addr
            .contains(&"10_0_0_1.c.example.com".to_string()));
        assert!(kube.public_addr.contains(&"10.0.0.1".to_string()));
    }

    #[test]
    fn test_node_config_points_at_masters() {
        let node = server("10.0.0.4", ClusterRole::Node);
        let masters = vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()];
        let config = node_config(&request(&node, &masters, &CloudProvider::None));

        assert!(!config.auth_service.enabled);
        assert!(!config.proxy_service.enabled);
        assert!(config.ssh_service.enabled);
        assert!(config.teleport.storage.is_none());
        assert_eq!(
            config.teleport.auth_servers,
            vec!["10.0.0.1:3025", "10.0.0.2:3025"]
        );
        assert_eq!(config.teleport.nodename, "10_0_0_4.c.example.com");
    }

    #[test]
    fn test_master_node_config_prefers_local_auth() {
        let master = server("10.0.0.1", ClusterRole::Master);
        let masters = vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()];
        let config = node_config(&request(&master, &masters, &CloudProvider::None));
        assert_eq!(config.teleport.auth_servers[0], "localhost:3025");
        assert_eq!(config.teleport.auth_servers.len(), 3);
    }

    #[test]
    fn test_cache_policy() {
        let node = server("10.0.0.4", ClusterRole::Node);
        let config = node_config(&request(&node, &[], &CloudProvider::None));
        assert_eq!(
            config.teleport.cache,
            CachePolicy {
                enabled: true,
                ttl: "8760h".to_string()
            }
        );
    }

    #[test]
    fn test_cloud_dynamic_labels() {
        let node = server("10.0.0.4", ClusterRole::Node);
        let gce = CloudProvider::Gce { node_tags: vec![] };
        let config = node_config(&request(&node, &[], &gce));
        assert_eq!(config.ssh_service.commands.len(), 1);
        assert_eq!(config.ssh_service.commands[0].name, "instance-type");

        let config = node_config(&request(&node, &[], &CloudProvider::None));
        assert!(config.ssh_service.commands.is_empty());
    }

    #[test]
    fn test_yaml_round_trip_and_config_string() {
        let master = server("10.0.0.1", ClusterRole::Master);
        let config = master_config(&request(&master, &[], &CloudProvider::None));

        let yaml = config.to_yaml().unwrap();
        let parsed = TeleportConfig::parse(&yaml).unwrap();
        assert_eq!(parsed.teleport.nodename, config.teleport.nodename);
        assert_eq!(parsed.teleport.storage, config.teleport.storage);

        let arg = config.config_string_arg().unwrap();
        let encoded = arg.strip_prefix("--config-string=").unwrap();
        let decoded = BASE64.decode(encoded).unwrap();
        assert_eq!(String::from_utf8(decoded).unwrap(), yaml);
    }

    #[test]
    fn test_package_names() {
        assert_eq!(
            master_package_name("10001cexamplecom"),
            "teleport-master-config-10001cexamplecom"
        );
        assert_eq!(
            node_package_name("10001cexamplecom"),
            "teleport-node-config-10001cexamplecom"
        );
    }
}
