use crate::constants::{
    ALTERNATIVE_LOOPBACK, API_SERVER_DNS, APISERVER_ENTRY, CA_ENTRY, KUBERNETES_SERVICE_DNS,
    LEGACY_API_SERVER_DNS, LOGRANGE_AGGREGATOR_SERVICE, LOGRANGE_NAMESPACES, REGISTRY_DNS,
    WIZARD_SNI_HOSTS,
};
use crate::error::{Error, Result};

use orbit_cluster::config::first_subnet_ip;
use orbit_cluster::server::ProvisionedServer;
use orbit_tls::{
    generate_certificate, generate_private_key, generate_self_signed_ca, CertificateRequest,
    TlsArchive,
};
use time::Duration;
use tracing::debug;

/// Inputs for one server's secret bundle.
pub struct SecretsRequest<'a> {
    pub server: &'a ProvisionedServer,
    pub domain: &'a str,
    pub service_subnet: &'a str,
    pub sni_hosts: &'a [String],
    /// Standalone-wizard install: the apiserver also answers under the
    /// wizard names.
    pub wizard: bool,
    /// Cluster CA archive: the `ca` pair plus the shared `apiserver` key.
    pub ca: &'a TlsArchive,
    pub validity: Duration,
}

/// One RBAC identity inside a bundle.
struct Identity {
    name: &'static str,
    user: Option<String>,
    groups: &'static [&'static str],
}

impl Identity {
    const fn plain(name: &'static str) -> Self {
        Identity {
            name,
            user: None,
            groups: &[],
        }
    }

    const fn grouped(name: &'static str, groups: &'static [&'static str]) -> Self {
        Identity {
            name,
            user: None,
            groups,
        }
    }
}

const GROUP_NODE: &[&str] = &["node"];

/// Create the cluster CA archive: the root pair and the shared apiserver
/// private key. Generated exactly once per cluster; every apiserver
/// certificate in every bundle is issued against that one key.
pub fn configure_ca(cluster_name: &str, validity: Duration) -> Result<TlsArchive> {
    debug!(msg = "generate cluster CA", cluster = cluster_name);
    let ca = generate_self_signed_ca(cluster_name, validity)
        .map_err(|e| Error::Certificate("failed to generate CA".to_string(), e))?;
    let apiserver_key = generate_private_key()
        .map_err(|e| Error::Certificate("failed to generate apiserver key".to_string(), e))?;

    let mut archive = TlsArchive::new();
    archive.add_key_pair(CA_ENTRY, ca);
    archive.add_key_pair(
        APISERVER_ENTRY,
        orbit_tls::TlsKeyPair::new(String::new(), apiserver_key),
    );
    Ok(archive)
}

/// Secret bundle for a master: every RBAC identity, full CA pair included.
pub fn master_secrets(request: &SecretsRequest<'_>) -> Result<TlsArchive> {
    const IDENTITIES: &[Identity] = &[
        Identity::plain("apiserver"),
        Identity::plain("etcd"),
        Identity::plain("scheduler"),
        Identity::plain("kubectl"),
        Identity::plain("proxy"),
        Identity::plain("kubelet"),
        Identity::plain("apiserver-kubelet-client"),
        Identity::plain("planet-rpc"),
        Identity::plain("coredns"),
        Identity::plain("front-proxy-client"),
        Identity::plain("logrange-adaptor"),
        Identity::plain("logrange-aggregator"),
        Identity::plain("logrange-collector"),
        Identity::plain("logrange-forwarder"),
    ];

    let mut archive = TlsArchive::new();
    archive.add_key_pair(CA_ENTRY, request.ca_pair()?.clone());
    for identity in IDENTITIES {
        issue(request, identity, &mut archive)?;
    }
    Ok(archive)
}

/// Secret bundle for a regular node. The shared CA and the apiserver entry
/// carry no private key here.
pub fn node_secrets(request: &SecretsRequest<'_>) -> Result<TlsArchive> {
    let identities = [
        Identity::plain("apiserver"),
        Identity::plain("etcd"),
        Identity::grouped("kubectl", GROUP_NODE),
        Identity {
            name: "proxy",
            user: Some("kube-proxy".to_string()),
            groups: GROUP_NODE,
        },
        Identity {
            name: "kubelet",
            user: Some(format!("system:node:{}", request.server.kube_node_id())),
            groups: GROUP_NODE,
        },
        Identity::plain("planet-rpc"),
        Identity::plain("coredns"),
        Identity::plain("logrange-collector"),
    ];

    let mut archive = TlsArchive::new();
    archive.add_key_pair(CA_ENTRY, request.ca_pair()?.public_only());
    for identity in &identities {
        issue(request, identity, &mut archive)?;
    }
    // the shared apiserver key never leaves the masters
    let apiserver = archive
        .get_key_pair(APISERVER_ENTRY)
        .map_err(|_| Error::MissingCaEntry(APISERVER_ENTRY.to_string()))?
        .public_only();
    archive.add_key_pair(APISERVER_ENTRY, apiserver);
    Ok(archive)
}

impl SecretsRequest<'_> {
    fn ca_pair(&self) -> Result<&orbit_tls::TlsKeyPair> {
        self.ca
            .get_key_pair(CA_ENTRY)
            .map_err(|_| Error::MissingCaEntry(CA_ENTRY.to_string()))
    }

    fn apiserver_key(&self) -> Result<&str> {
        self.ca
            .get_key_pair(APISERVER_ENTRY)
            .map(|pair| pair.key_pem.as_str())
            .map_err(|_| Error::MissingCaEntry(APISERVER_ENTRY.to_string()))
    }
}

fn issue(
    request: &SecretsRequest<'_>,
    identity: &Identity,
    archive: &mut TlsArchive,
) -> Result<()> {
    let server = request.server;
    let mut dns_names = vec![server.hostname.clone()];
    let mut ip_addresses = vec!["127.0.0.1".to_string(), server.advertise_ip.clone()];
    if server.is_master() {
        ip_addresses.push(ALTERNATIVE_LOOPBACK.to_string());
    }

    match identity.name {
        "apiserver" => {
            dns_names.extend(api_server_dns_names());
            dns_names.extend(KUBERNETES_SERVICE_DNS.iter().map(|n| n.to_string()));
            if let Some(nodename) = &server.nodename {
                dns_names.push(nodename.clone());
            }
            for host in request.sni_hosts {
                dns_names.push(format!("{host}.{}", request.domain));
            }
            if request.wizard {
                dns_names.extend(WIZARD_SNI_HOSTS.iter().map(|h| h.to_string()));
            }
            ip_addresses.push(first_subnet_ip(request.service_subnet)?);
        }
        "proxy" => {
            dns_names.extend(api_server_dns_names());
        }
        "logrange-aggregator" => {
            dns_names.push(LOGRANGE_AGGREGATOR_SERVICE.to_string());
            for namespace in LOGRANGE_NAMESPACES {
                dns_names.push(format!("{LOGRANGE_AGGREGATOR_SERVICE}.{namespace}"));
                dns_names.push(format!("{LOGRANGE_AGGREGATOR_SERVICE}.{namespace}.svc"));
                dns_names.push(format!(
                    "{LOGRANGE_AGGREGATOR_SERVICE}.{namespace}.svc.cluster.local"
                ));
            }
        }
        _ => {}
    }

    let certificate_request = CertificateRequest {
        common_name: identity
            .user
            .clone()
            .unwrap_or_else(|| identity.name.to_string()),
        organizations: identity.groups.iter().map(|g| g.to_string()).collect(),
        dns_names,
        ip_addresses,
    };

    let reuse_key = if identity.name == APISERVER_ENTRY {
        Some(request.apiserver_key()?)
    } else {
        None
    };

    let pair = generate_certificate(
        &certificate_request,
        request.ca_pair()?,
        reuse_key,
        request.validity,
    )
    .map_err(|e| {
        Error::Certificate(
            format!("failed to issue {} certificate", identity.name),
            e,
        )
    })?;
    archive.add_key_pair(identity.name, pair);
    Ok(())
}

fn api_server_dns_names() -> Vec<String> {
    vec![
        API_SERVER_DNS.to_string(),
        LEGACY_API_SERVER_DNS.to_string(),
        REGISTRY_DNS.to_string(),
    ]
}
