use crate::backend::{ClusterBackend, Site, SiteState};
use crate::error::{Error, Result};
use crate::group::OperationGroups;
use crate::log::OperationLog;
use crate::operation::{Operation, OperationKind};
use crate::upgrade::{check_runtime_upgrade, UpgradePath};

use std::collections::BTreeMap;

use futures::future::try_join_all;
use orbit_cluster::config::{CloudProvider, ClusterConfiguration, DnsConfig, Subnets};
use orbit_cluster::etcd::{plan_expand, plan_install, EtcdConfig, EtcdMember};
use orbit_cluster::manifest::Manifest;
use orbit_cluster::server::ProvisionedServer;
use orbit_cluster::topology::{MasterConfig, Topology};
use orbit_pack::labels::{
    config_labels, purpose_labels, LABEL_OPERATION_ID, PURPOSE_CA, PURPOSE_EXPORT,
    PURPOSE_LICENSE, PURPOSE_PLANET_CONFIG, PURPOSE_PLANET_SECRETS, PURPOSE_RESOURCES,
    PURPOSE_TELEPORT_MASTER_CONFIG, PURPOSE_TELEPORT_NODE_CONFIG,
};
use orbit_pack::{Labels, Locator, PackageOptions, PackageStore};
use orbit_planet::args::PlanetConfig;
use orbit_planet::constants::{config_package_name, secrets_package_name};
use orbit_planet::secrets::{configure_ca, master_secrets, node_secrets, SecretsRequest};
use orbit_teleport::config::{
    master_config as teleport_master_config, master_package_name,
    node_config as teleport_node_config, node_package_name, TeleportRequest,
};
use orbit_tls::TlsArchive;
use semver::Version;
use time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const CA_PACKAGE_NAME: &str = "planet-ca";
const CA_PACKAGE_VERSION: &str = "0.0.1";
const SITE_EXPORT_PACKAGE_NAME: &str = "site-export";
const SITE_EXPORT_PACKAGE_VERSION: &str = "0.0.1";
const LICENSE_PACKAGE_NAME: &str = "license";
const RESOURCES_PACKAGE_NAME: &str = "resources";
/// Issued certificates outlive any sane cluster refresh cadence.
const CERT_VALIDITY: Duration = Duration::days(365 * 10);

/// Live etcd membership, queried when a server joins an existing cluster.
#[allow(async_fn_in_trait)]
pub trait EtcdMembership {
    async fn list(&self) -> Result<Vec<EtcdMember>>;
}

/// Fixed membership for tests and offline planning.
pub struct StaticMembership(pub Vec<EtcdMember>);

impl EtcdMembership for StaticMembership {
    async fn list(&self) -> Result<Vec<EtcdMember>> {
        Ok(self.0.clone())
    }
}

/// Identity and versions of the cluster being configured.
#[derive(Clone, Debug)]
pub struct ClusterInfo {
    /// Cluster name; doubles as the package repository.
    pub name: String,
    /// DNS domain node names are derived under.
    pub domain: String,
    pub planet_version: String,
    pub teleport_version: String,
    pub license: Option<String>,
    pub resources: Option<Vec<u8>>,
}

/// One configuration run: a validated operation plus everything it needs.
pub struct ConfigureRequest {
    pub operation: Operation,
    pub manifest: Manifest,
    pub cluster: ClusterInfo,
    pub cluster_config: Option<ClusterConfiguration>,
    pub cloud_provider: CloudProvider,
    pub dns: DnsConfig,
    pub dns_hosts: Vec<String>,
    pub dns_zones: Vec<String>,
    pub vxlan_port: Option<u16>,
    pub etcd_options: Vec<String>,
    pub kubelet_options: Vec<String>,
    /// Standalone-wizard install; the apiserver certificates also cover the
    /// wizard names.
    pub wizard: bool,
    pub upgrade_paths: UpgradePath,
    pub cancel: CancellationToken,
}

impl ConfigureRequest {
    pub fn new(operation: Operation, manifest: Manifest, cluster: ClusterInfo) -> Self {
        ConfigureRequest {
            operation,
            manifest,
            cluster,
            cluster_config: None,
            cloud_provider: CloudProvider::None,
            dns: DnsConfig::default(),
            dns_hosts: Vec::new(),
            dns_zones: Vec::new(),
            vxlan_port: None,
            etcd_options: Vec::new(),
            kubelet_options: Vec::new(),
            wizard: false,
            upgrade_paths: UpgradePath::default(),
            cancel: CancellationToken::new(),
        }
    }

    fn subnets(&self) -> Subnets {
        self.operation.subnets()
    }

    /// Service subnet the certificates must cover: cluster configuration
    /// wins over the operation default.
    fn effective_service_subnet(&self) -> String {
        self.cluster_config
            .as_ref()
            .and_then(|c| c.service_cidr.clone())
            .unwrap_or_else(|| self.subnets().service)
    }

    fn sni_hosts(&self) -> Vec<String> {
        self.cluster_config
            .as_ref()
            .map(|c| c.sni_hosts.clone())
            .unwrap_or_default()
    }
}

/// Per-server inputs resolved by the operation-specific planning step.
struct ServerPlan {
    server: ProvisionedServer,
    etcd: EtcdConfig,
    master: Option<MasterConfig>,
    /// Master this server talks to during bring-up.
    master_addr: String,
    master_ips: Vec<String>,
    planet_version: String,
    rotation: Option<i64>,
}

/// Drives the install, expand and update configuration flows.
///
/// State transitions for one cluster are serialized through its operation
/// group; the group lock is held until the operation is terminal.
pub struct Configurator<S, M, B> {
    store: S,
    etcd: M,
    backend: B,
    groups: OperationGroups,
}

impl<S, M, B> Configurator<S, M, B>
where
    S: PackageStore,
    M: EtcdMembership,
    B: ClusterBackend,
{
    pub fn new(store: S, etcd: M, backend: B) -> Self {
        Configurator {
            store,
            etcd,
            backend,
            groups: OperationGroups::new(),
        }
    }

    #[inline]
    pub fn store(&self) -> &S {
        &self.store
    }

    #[inline]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub async fn configure(
        &self,
        mut request: ConfigureRequest,
        log: &OperationLog,
    ) -> Result<()> {
        let group = self.groups.group(&request.cluster.name);
        let _guard = group.lock().await;

        info!(
            msg = "configure operation",
            cluster = request.cluster.name,
            operation = %request.operation.id,
            kind = %request.operation.kind,
        );
        request.operation.start()?;
        self.backend
            .upsert_site_operation(&request.cluster.name, request.operation.clone())
            .await?;

        let result = match request.operation.kind {
            OperationKind::Install => self.configure_install(&request, log).await,
            OperationKind::Expand => self.configure_expand(&request, log).await,
            OperationKind::Update => self.configure_update(&request, log).await,
            kind => Err(Error::BadParameter(format!(
                "operation {kind} is not driven by the configuration engine"
            ))),
        };

        match result {
            Ok(()) => {
                request.operation.complete()?;
                self.backend
                    .upsert_site_operation(&request.cluster.name, request.operation.clone())
                    .await?;
                if request.operation.kind == OperationKind::Install {
                    self.finish_install_site(&request).await?;
                }
                Ok(())
            }
            Err(error) => {
                warn!(
                    msg = "configuration failed",
                    operation = %request.operation.id,
                    %error,
                );
                self.unwind(&mut request, log, &error).await;
                Err(error)
            }
        }
    }

    /// Mark the operation failed and, for install, drop the cluster-state
    /// server list so a retry starts clean. Partial packages stay: they are
    /// content-addressed and idempotent on the next attempt.
    async fn unwind(&self, request: &mut ConfigureRequest, log: &OperationLog, error: &Error) {
        log.error(None, format!("operation failed: {error}"));
        if request.operation.fail().is_ok() {
            let _ = self
                .backend
                .upsert_site_operation(&request.cluster.name, request.operation.clone())
                .await;
        }
        if request.operation.kind == OperationKind::Install {
            if let Ok(mut site) = self.backend.get_site(&request.cluster.name).await {
                site.servers.clear();
                site.state = SiteState::Active;
                let _ = self.backend.update_site(site).await;
            }
        }
    }

    async fn configure_install(
        &self,
        request: &ConfigureRequest,
        log: &OperationLog,
    ) -> Result<()> {
        let cluster = &request.cluster;
        self.store.upsert_repository(&cluster.name).await?;
        self.register_site(request).await?;

        let ca = self.ensure_ca(request).await?;
        let topology = Topology::new(request.operation.servers.clone());
        let first_master_ip = topology.first_master()?.advertise_ip.clone();
        let master_ips = topology.master_ips();
        let mut etcd_plan = plan_install(&topology, &cluster.domain);

        log.progress(5, "configuring cluster packages");

        let server_plan = |server: &ProvisionedServer,
                           etcd: EtcdConfig,
                           master: Option<MasterConfig>| ServerPlan {
            server: server.clone(),
            etcd,
            master,
            master_addr: first_master_ip.clone(),
            master_ips: master_ips.clone(),
            planet_version: cluster.planet_version.clone(),
            rotation: None,
        };

        // first master goes first: the other masters are pinned to it
        let first = topology.first_master()?.clone();
        let etcd_config = take_etcd_config(&mut etcd_plan, &first.advertise_ip)?;
        self.configure_server(
            request,
            log,
            &ca,
            server_plan(
                &first,
                etcd_config,
                Some(MasterConfig::leading(&first_master_ip)),
            ),
        )
        .await?;

        let rest: Vec<ServerPlan> = topology
            .servers()
            .iter()
            .filter(|server| server.advertise_ip != first_master_ip)
            .map(|server| {
                let etcd_config = take_etcd_config(&mut etcd_plan, &server.advertise_ip)?;
                let master = server
                    .is_master()
                    .then(|| MasterConfig::suspended(&first_master_ip));
                Ok(server_plan(server, etcd_config, master))
            })
            .collect::<Result<_>>()?;
        try_join_all(
            rest.into_iter()
                .map(|plan| self.configure_server(request, log, &ca, plan)),
        )
        .await?;

        log.progress(50, "cluster packages configured");

        self.create_site_export(request).await?;
        if let Some(license) = &cluster.license {
            self.create_idempotent(
                &Locator::new(&cluster.name, LICENSE_PACKAGE_NAME, CA_PACKAGE_VERSION)?,
                license.as_bytes(),
                self.purpose_only(request, PURPOSE_LICENSE),
            )
            .await?;
        }
        if let Some(resources) = &cluster.resources {
            self.create_idempotent(
                &Locator::new(&cluster.name, RESOURCES_PACKAGE_NAME, CA_PACKAGE_VERSION)?,
                resources,
                self.purpose_only(request, PURPOSE_RESOURCES),
            )
            .await?;
        }
        Ok(())
    }

    async fn configure_expand(
        &self,
        request: &ConfigureRequest,
        log: &OperationLog,
    ) -> Result<()> {
        let cluster = &request.cluster;
        let [joining] = request.operation.servers.as_slice() else {
            return Err(Error::BadParameter(
                "expand operation requires exactly one joining server".to_string(),
            ));
        };

        let site = self.backend.get_site(&cluster.name).await?;
        let site_topology = Topology::new(site.servers);
        // the first master stands in for the elected leader
        let leader_ip = site_topology.first_master()?.advertise_ip.clone();
        let master_ips = site_topology.master_ips();

        let members = self.etcd.list().await?;
        let etcd_config = plan_expand(&members, joining, &cluster.domain)?;
        let ca = self.read_ca(request).await?;

        // a joining master stays suspended until the leader lifts it
        let master = joining
            .is_master()
            .then(|| MasterConfig::suspended(&leader_ip));
        self.configure_server(
            request,
            log,
            &ca,
            ServerPlan {
                server: joining.clone(),
                etcd: etcd_config,
                master,
                master_addr: leader_ip,
                master_ips,
                planet_version: cluster.planet_version.clone(),
                rotation: None,
            },
        )
        .await
    }

    async fn configure_update(
        &self,
        request: &ConfigureRequest,
        log: &OperationLog,
    ) -> Result<()> {
        let cluster = &request.cluster;
        let update = request.operation.update.as_ref().ok_or_else(|| {
            Error::BadParameter("update operation requires a runtime package".to_string())
        })?;

        let from = Version::parse(&cluster.planet_version).map_err(|e| {
            Error::BadParameter(format!(
                "invalid runtime version {:?}: {e}",
                cluster.planet_version
            ))
        })?;
        check_runtime_upgrade(
            &self.store,
            &cluster.name,
            &from,
            &update.package.version,
            &request.upgrade_paths,
        )
        .await?;

        let site = self.backend.get_site(&cluster.name).await?;
        let topology = Topology::new(site.servers);
        let first_master_ip = topology.first_master()?.advertise_ip.clone();
        let master_ips = topology.master_ips();
        let mut etcd_plan = plan_install(&topology, &cluster.domain);
        let ca = self.read_ca(request).await?;
        // the operation timestamp doubles as the rotation counter, so a
        // retried operation produces the same package versions
        let rotation = request.operation.created.as_second();

        let plans: Vec<ServerPlan> = topology
            .servers()
            .iter()
            .map(|server| {
                let etcd_config = take_etcd_config(&mut etcd_plan, &server.advertise_ip)?;
                let master = server
                    .is_master()
                    .then(|| MasterConfig::leading(&first_master_ip));
                Ok(ServerPlan {
                    server: server.clone(),
                    etcd: etcd_config,
                    master,
                    master_addr: first_master_ip.clone(),
                    master_ips: master_ips.clone(),
                    planet_version: update.package.version.to_string(),
                    rotation: Some(rotation),
                })
            })
            .collect::<Result<_>>()?;
        try_join_all(
            plans
                .into_iter()
                .map(|plan| self.configure_server(request, log, &ca, plan)),
        )
        .await?;
        Ok(())
    }

    /// Secrets, runtime config and gateway configs for one server.
    async fn configure_server(
        &self,
        request: &ConfigureRequest,
        log: &OperationLog,
        ca: &TlsArchive,
        plan: ServerPlan,
    ) -> Result<()> {
        if request.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.configure_secrets(request, ca, &plan).await?;
        self.configure_planet(request, &plan).await?;
        self.configure_teleport(request, &plan).await?;
        log.info(
            Some(&plan.server.advertise_ip),
            "configuration packages created",
        );
        Ok(())
    }

    async fn configure_secrets(
        &self,
        request: &ConfigureRequest,
        ca: &TlsArchive,
        plan: &ServerPlan,
    ) -> Result<()> {
        let cluster = &request.cluster;
        let server = &plan.server;
        let service_subnet = request.effective_service_subnet();
        let sni_hosts = request.sni_hosts();
        let secrets_request = SecretsRequest {
            server,
            domain: &cluster.domain,
            service_subnet: &service_subnet,
            sni_hosts: &sni_hosts,
            wizard: request.wizard,
            ca,
            validity: CERT_VALIDITY,
        };
        let archive = if server.is_master() {
            master_secrets(&secrets_request)?
        } else {
            node_secrets(&secrets_request)?
        };

        let locator = self.versioned_locator(
            request,
            &secrets_package_name(&server.advertise_ip),
            &plan.planet_version,
            plan.rotation,
        )?;
        self.create_idempotent(
            &locator,
            &archive.serialize().map_err(Error::Tls)?,
            config_labels(
                PURPOSE_PLANET_SECRETS,
                &server.advertise_ip,
                &request.operation.id.to_string(),
                &locator,
            ),
        )
        .await
    }

    async fn configure_planet(
        &self,
        request: &ConfigureRequest,
        plan: &ServerPlan,
    ) -> Result<()> {
        let cluster = &request.cluster;
        let server = &plan.server;
        let profile = request.manifest.profile(&server.role)?;
        let mut node_labels = profile.node_labels.clone();
        node_labels.extend(server_labels(server));

        let planet = PlanetConfig {
            manifest: &request.manifest,
            profile,
            server,
            domain: &cluster.domain,
            cluster_name: &cluster.name,
            master_addr: &plan.master_addr,
            master: plan.master.clone(),
            etcd: &plan.etcd,
            docker: &request.manifest.docker,
            cluster_config: request.cluster_config.as_ref(),
            subnets: request.subnets(),
            dns: request.dns.clone(),
            dns_hosts: request.dns_hosts.clone(),
            dns_zones: request.dns_zones.clone(),
            vxlan_port: request.vxlan_port,
            cloud_provider: &request.cloud_provider,
            node_labels,
            env: request
                .operation
                .install_expand
                .as_ref()
                .map(|ie| ie.vars.clone())
                .unwrap_or_default(),
            etcd_options: request.etcd_options.clone(),
            kubelet_options: request.kubelet_options.clone(),
        };
        let args = planet.build()?;
        let data = serde_json::to_vec_pretty(&args).map_err(|e| {
            Error::BadParameter(format!("failed to encode planet arguments: {e}"))
        })?;

        let locator = self.versioned_locator(
            request,
            &config_package_name(&server.package_suffix(&cluster.domain)),
            &plan.planet_version,
            plan.rotation,
        )?;
        self.create_idempotent(
            &locator,
            &data,
            config_labels(
                PURPOSE_PLANET_CONFIG,
                &server.advertise_ip,
                &request.operation.id.to_string(),
                &locator,
            ),
        )
        .await
    }

    /// Every server gets a node gateway config; masters additionally get
    /// the auth/proxy member config.
    async fn configure_teleport(
        &self,
        request: &ConfigureRequest,
        plan: &ServerPlan,
    ) -> Result<()> {
        let cluster = &request.cluster;
        let server = &plan.server;
        let suffix = server.package_suffix(&cluster.domain);
        let teleport_request = TeleportRequest {
            server,
            domain: &cluster.domain,
            cluster_name: &cluster.name,
            master_ips: &plan.master_ips,
            labels: server_labels(server),
            cloud_provider: &request.cloud_provider,
        };

        let node = teleport_node_config(&teleport_request);
        let locator = Locator::new(
            &cluster.name,
            &node_package_name(&suffix),
            &cluster.teleport_version,
        )?;
        self.create_idempotent(
            &locator,
            node.to_yaml()?.as_bytes(),
            config_labels(
                PURPOSE_TELEPORT_NODE_CONFIG,
                &server.advertise_ip,
                &request.operation.id.to_string(),
                &locator,
            ),
        )
        .await?;

        if server.is_master() {
            let master = teleport_master_config(&teleport_request);
            let locator = Locator::new(
                &cluster.name,
                &master_package_name(&suffix),
                &cluster.teleport_version,
            )?;
            self.create_idempotent(
                &locator,
                master.to_yaml()?.as_bytes(),
                config_labels(
                    PURPOSE_TELEPORT_MASTER_CONFIG,
                    &server.advertise_ip,
                    &request.operation.id.to_string(),
                    &locator,
                ),
            )
            .await?;
        }
        Ok(())
    }

    /// Read the cluster CA package, creating it on first install. The
    /// shared apiserver key inside it is why this must happen before any
    /// secret issuance.
    async fn ensure_ca(&self, request: &ConfigureRequest) -> Result<TlsArchive> {
        let cluster = &request.cluster;
        let locator = Locator::new(&cluster.name, CA_PACKAGE_NAME, CA_PACKAGE_VERSION)?;
        match self.store.read_package(&locator).await {
            Ok((_, data)) => {
                debug!(msg = "cluster CA already configured", package = %locator);
                Ok(TlsArchive::parse(&data).map_err(Error::Tls)?)
            }
            Err(orbit_pack::Error::NotFound(_)) => {
                let archive = configure_ca(&cluster.name, CERT_VALIDITY)?;
                let data = archive.serialize().map_err(Error::Tls)?;
                match self
                    .store
                    .create_package(
                        &locator,
                        &data,
                        PackageOptions::with_labels(self.purpose_only(request, PURPOSE_CA)),
                    )
                    .await
                {
                    Ok(_) => Ok(archive),
                    // lost the race: another writer owns the CA now
                    Err(e) if e.is_already_exists() => {
                        debug!(msg = "cluster CA created concurrently", package = %locator);
                        let (_, data) = self.store.read_package(&locator).await?;
                        Ok(TlsArchive::parse(&data).map_err(Error::Tls)?)
                    }
                    Err(e) => Err(e.into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn read_ca(&self, request: &ConfigureRequest) -> Result<TlsArchive> {
        let locator = Locator::new(
            &request.cluster.name,
            CA_PACKAGE_NAME,
            CA_PACKAGE_VERSION,
        )?;
        let (_, data) = self.store.read_package(&locator).await?;
        Ok(TlsArchive::parse(&data).map_err(Error::Tls)?)
    }

    async fn register_site(&self, request: &ConfigureRequest) -> Result<()> {
        let cluster = &request.cluster;
        let site = Site {
            domain: cluster.name.clone(),
            state: SiteState::Installing,
            servers: request.operation.servers.clone(),
        };
        match self.backend.get_site(&cluster.name).await {
            Ok(_) => self.backend.update_site(site).await,
            Err(Error::NotFound(_)) => self.backend.create_site(site).await,
            Err(e) => Err(e),
        }
    }

    async fn finish_install_site(&self, request: &ConfigureRequest) -> Result<()> {
        let mut site = self.backend.get_site(&request.cluster.name).await?;
        site.state = SiteState::Active;
        site.servers = request.operation.servers.clone();
        self.backend.update_site(site).await
    }

    async fn create_site_export(&self, request: &ConfigureRequest) -> Result<()> {
        let cluster = &request.cluster;
        let export = serde_json::json!({
            "cluster": cluster.name,
            "domain": cluster.domain,
            "servers": request.operation.servers,
        });
        let data = serde_json::to_vec_pretty(&export)
            .map_err(|e| Error::BadParameter(format!("failed to encode site export: {e}")))?;
        let locator = Locator::new(
            &cluster.name,
            SITE_EXPORT_PACKAGE_NAME,
            SITE_EXPORT_PACKAGE_VERSION,
        )?;
        self.create_idempotent(&locator, &data, self.purpose_only(request, PURPOSE_EXPORT))
            .await
    }

    fn purpose_only(&self, request: &ConfigureRequest, purpose: &str) -> Labels {
        let mut labels = purpose_labels(purpose);
        labels.insert(
            LABEL_OPERATION_ID.to_string(),
            request.operation.id.to_string(),
        );
        labels
    }

    fn versioned_locator(
        &self,
        request: &ConfigureRequest,
        name: &str,
        version: &str,
        rotation: Option<i64>,
    ) -> Result<Locator> {
        let locator = Locator::new(&request.cluster.name, name, version)?;
        Ok(match rotation {
            Some(unix_seconds) => locator.with_rotation(unix_seconds),
            None => locator,
        })
    }

    /// An artifact that already exists is a success: packages are immutable
    /// and keyed by content-stable locators.
    async fn create_idempotent(
        &self,
        locator: &Locator,
        data: &[u8],
        labels: Labels,
    ) -> Result<()> {
        match self
            .store
            .create_package(locator, data, PackageOptions::with_labels(labels))
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_already_exists() => {
                debug!(msg = "package already exists", package = %locator);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn take_etcd_config(
    plan: &mut BTreeMap<String, EtcdConfig>,
    advertise_ip: &str,
) -> Result<EtcdConfig> {
    plan.remove(advertise_ip)
        .ok_or_else(|| Error::NotFound(format!("etcd config for {advertise_ip}")))
}

/// Labels every per-server artifact carries: SSH node labels and kubelet
/// node labels alike.
fn server_labels(server: &ProvisionedServer) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::from([
        ("role".to_string(), server.role.clone()),
        (
            "advertise-ip".to_string(),
            server.advertise_ip.clone(),
        ),
    ]);
    if let Some(instance_type) = &server.instance_type {
        labels.insert("instance-type".to_string(), instance_type.clone());
    }
    labels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::log::Severity;

    use orbit_cluster::manifest::{Profile, ServiceRole};
    use orbit_cluster::server::{ClusterRole, ServerDocker};
    use orbit_pack::labels::LABEL_PURPOSE;
    use orbit_pack::{MemoryStore, PackageQuery};
    use orbit_teleport::TeleportConfig;
    use x509_parser::pem::parse_x509_pem;

    const CLUSTER: &str = "c.example.com";

    fn manifest() -> Manifest {
        let plain = |service_role| Profile {
            service_role,
            taints: vec![],
            node_labels: BTreeMap::new(),
            mounts: vec![],
            devices: vec![],
        };
        Manifest {
            profiles: BTreeMap::from([
                ("master".to_string(), plain(ServiceRole::Master)),
                ("worker".to_string(), plain(ServiceRole::Node)),
            ]),
            ..Manifest::default()
        }
    }

    fn server(ip: &str, master: bool) -> ProvisionedServer {
        ProvisionedServer {
            advertise_ip: ip.to_string(),
            hostname: format!("host-{ip}"),
            nodename: None,
            role: if master { "master" } else { "worker" }.to_string(),
            cluster_role: if master {
                ClusterRole::Master
            } else {
                ClusterRole::Node
            },
            state_dir: "/var/lib/orbit".to_string(),
            docker: ServerDocker::default(),
            instance_type: None,
        }
    }

    fn cluster_info() -> ClusterInfo {
        ClusterInfo {
            name: CLUSTER.to_string(),
            domain: CLUSTER.to_string(),
            planet_version: "7.0.0".to_string(),
            teleport_version: "4.4.0".to_string(),
            license: None,
            resources: None,
        }
    }

    fn configurator(
        members: Vec<EtcdMember>,
    ) -> Configurator<MemoryStore, StaticMembership, MemoryBackend> {
        Configurator::new(
            MemoryStore::new(),
            StaticMembership(members),
            MemoryBackend::new(),
        )
    }

    fn install_request(servers: Vec<ProvisionedServer>) -> ConfigureRequest {
        ConfigureRequest::new(
            Operation::install(servers, "agent"),
            manifest(),
            cluster_info(),
        )
    }

    async fn find_by_purpose<S: PackageStore>(
        store: &S,
        purpose: &str,
    ) -> Vec<orbit_pack::Envelope> {
        store
            .find_packages(
                &PackageQuery::in_repository(CLUSTER).with_label(LABEL_PURPOSE, purpose),
            )
            .await
            .unwrap()
    }

    async fn read_planet_args<S: PackageStore>(
        store: &S,
        server: &ProvisionedServer,
        version: &str,
    ) -> Vec<String> {
        let locator = Locator::new(
            CLUSTER,
            &config_package_name(&server.package_suffix(CLUSTER)),
            version,
        )
        .unwrap();
        let (_, data) = store.read_package(&locator).await.unwrap();
        serde_json::from_slice(&data).unwrap()
    }

    fn apiserver_public_key(archive: &TlsArchive) -> Vec<u8> {
        let pair = archive.get_key_pair("apiserver").unwrap();
        let (_, pem) = parse_x509_pem(pair.cert_pem.as_bytes()).unwrap();
        let cert = pem.parse_x509().unwrap();
        cert.public_key().subject_public_key.data.to_vec()
    }

    fn five_servers() -> Vec<ProvisionedServer> {
        vec![
            server("10.0.0.1", true),
            server("10.0.0.2", true),
            server("10.0.0.3", true),
            server("10.0.0.4", false),
            server("10.0.0.5", false),
        ]
    }

    #[tokio::test]
    async fn test_install_three_masters_two_nodes() {
        let configurator = configurator(vec![]);
        let log = OperationLog::new();
        configurator
            .configure(install_request(five_servers()), &log)
            .await
            .unwrap();
        let store = configurator.store();

        assert_eq!(find_by_purpose(store, PURPOSE_CA).await.len(), 1);
        assert_eq!(find_by_purpose(store, PURPOSE_PLANET_SECRETS).await.len(), 5);
        assert_eq!(find_by_purpose(store, PURPOSE_PLANET_CONFIG).await.len(), 5);
        assert_eq!(
            find_by_purpose(store, PURPOSE_TELEPORT_MASTER_CONFIG).await.len(),
            3
        );
        assert_eq!(
            find_by_purpose(store, PURPOSE_TELEPORT_NODE_CONFIG).await.len(),
            5
        );
        assert_eq!(find_by_purpose(store, PURPOSE_EXPORT).await.len(), 1);

        let expected_initial_cluster = "--initial-cluster=\
             10_0_0_1.c.example.com:10.0.0.1,\
             10_0_0_2.c.example.com:10.0.0.2,\
             10_0_0_3.c.example.com:10.0.0.3"
            .to_string();
        for s in five_servers() {
            let args = read_planet_args(store, &s, "7.0.0").await;
            assert!(
                args.contains(&expected_initial_cluster),
                "initial cluster differs on {}: {args:?}",
                s.advertise_ip
            );
        }

        let first = read_planet_args(store, &server("10.0.0.1", true), "7.0.0").await;
        assert!(first.contains(&"--election-enabled".to_string()));
        assert!(first.contains(&"--etcd-initial-cluster-state=new".to_string()));
        assert!(first.contains(&"--etcd-proxy=off".to_string()));

        for ip in ["10.0.0.2", "10.0.0.3"] {
            let args = read_planet_args(store, &server(ip, true), "7.0.0").await;
            assert!(args.contains(&"--no-election-enabled".to_string()), "{ip}");
            assert!(args.contains(&"--master-ip=10.0.0.1".to_string()));
        }
        for ip in ["10.0.0.4", "10.0.0.5"] {
            let args = read_planet_args(store, &server(ip, false), "7.0.0").await;
            assert!(args.contains(&"--etcd-proxy=on".to_string()), "{ip}");
            assert!(args.contains(&"--etcd-initial-cluster-state=existing".to_string()));
            assert!(args.contains(&"--role=node".to_string()));
        }

        let site = configurator.backend().get_site(CLUSTER).await.unwrap();
        assert_eq!(site.state, SiteState::Active);
        assert_eq!(site.servers.len(), 5);

        let percents: Vec<u8> = log.progress_entries().iter().map(|p| p.percent).collect();
        assert_eq!(percents, vec![5, 50]);
    }

    #[tokio::test]
    async fn test_install_is_idempotent() {
        let configurator = configurator(vec![]);
        let log = OperationLog::new();
        configurator
            .configure(install_request(five_servers()), &log)
            .await
            .unwrap();
        let packages = configurator.store().len();

        configurator
            .configure(install_request(five_servers()), &log)
            .await
            .unwrap();
        assert_eq!(configurator.store().len(), packages);
    }

    #[tokio::test]
    async fn test_install_failure_resets_cluster_state() {
        let configurator = configurator(vec![]);
        let log = OperationLog::new();
        let mut request = install_request(five_servers());
        // drop the worker profile: node configuration must fail
        request.manifest.profiles.remove("worker");
        let operation_id = request.operation.id;

        let err = configurator.configure(request, &log).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Cluster(orbit_cluster::Error::ProfileNotFound(_))
        ));

        let site = configurator.backend().get_site(CLUSTER).await.unwrap();
        assert!(site.servers.is_empty());
        assert_eq!(site.state, SiteState::Active);

        let operation = configurator
            .backend()
            .get_site_operation(CLUSTER, operation_id)
            .await
            .unwrap();
        assert_eq!(operation.state, crate::operation::OperationState::Failed);
        assert!(log
            .entries()
            .iter()
            .any(|e| e.severity == Severity::Error));
    }

    #[tokio::test]
    async fn test_expand_joining_master() {
        let members = vec![
            EtcdMember {
                name: "A".to_string(),
                peer_urls: vec!["https://10.0.0.1:2380".to_string()],
            },
            EtcdMember {
                name: "B".to_string(),
                peer_urls: vec!["https://10.0.0.2:2380".to_string()],
            },
        ];
        let configurator = configurator(members);
        let log = OperationLog::new();
        configurator
            .configure(
                install_request(vec![server("10.0.0.1", true), server("10.0.0.2", true)]),
                &log,
            )
            .await
            .unwrap();

        let joiner = server("10.0.0.3", true);
        let request = ConfigureRequest::new(
            Operation::expand(joiner.clone(), "agent"),
            manifest(),
            cluster_info(),
        );
        configurator.configure(request, &log).await.unwrap();

        let args = read_planet_args(configurator.store(), &joiner, "7.0.0").await;
        assert!(args.contains(
            &"--initial-cluster=10_0_0_3.c.example.com:10.0.0.3,A:10.0.0.1,B:10.0.0.2"
                .to_string()
        ));
        assert!(args.contains(&"--etcd-initial-cluster-state=existing".to_string()));
        assert!(args.contains(&"--etcd-proxy=off".to_string()));
        // election stays suspended until the leader lifts it
        assert!(args.contains(&"--no-election-enabled".to_string()));
        assert!(args.contains(&"--master-ip=10.0.0.1".to_string()));

        // a joining master gets both gateway configs
        let suffix = joiner.package_suffix(CLUSTER);
        let master_locator =
            Locator::new(CLUSTER, &master_package_name(&suffix), "4.4.0").unwrap();
        let (_, data) = configurator
            .store()
            .read_package(&master_locator)
            .await
            .unwrap();
        let config = TeleportConfig::parse(std::str::from_utf8(&data).unwrap()).unwrap();
        assert!(config.auth_service.enabled);

        let node_locator = Locator::new(CLUSTER, &node_package_name(&suffix), "4.4.0").unwrap();
        let (_, data) = configurator
            .store()
            .read_package(&node_locator)
            .await
            .unwrap();
        let config = TeleportConfig::parse(std::str::from_utf8(&data).unwrap()).unwrap();
        assert_eq!(config.teleport.auth_servers[0], "localhost:3025");
    }

    #[tokio::test]
    async fn test_expand_requires_single_server() {
        let configurator = configurator(vec![]);
        let log = OperationLog::new();
        configurator
            .configure(install_request(vec![server("10.0.0.1", true)]), &log)
            .await
            .unwrap();

        let mut operation = Operation::expand(server("10.0.0.2", true), "agent");
        operation.servers.push(server("10.0.0.3", true));
        let request = ConfigureRequest::new(operation, manifest(), cluster_info());
        let err = configurator.configure(request, &log).await.unwrap_err();
        assert!(matches!(err, Error::BadParameter(_)));
    }

    #[tokio::test]
    async fn test_update_rotates_preserving_apiserver_key() {
        let configurator = configurator(vec![]);
        let log = OperationLog::new();
        let master = server("10.0.0.1", true);
        configurator
            .configure(install_request(vec![master.clone()]), &log)
            .await
            .unwrap();

        let original_locator =
            Locator::new(CLUSTER, &secrets_package_name("10.0.0.1"), "7.0.0").unwrap();
        let (_, data) = configurator
            .store()
            .read_package(&original_locator)
            .await
            .unwrap();
        let original = TlsArchive::parse(&data).unwrap();

        let runtime = Locator::new(CLUSTER, "planet", "7.0.1").unwrap();
        let mut request = ConfigureRequest::new(
            Operation::update(vec![], runtime, "agent"),
            manifest(),
            cluster_info(),
        );
        request.upgrade_paths = UpgradePath {
            direct_minimums: vec![Version::new(7, 0, 0)],
            via: BTreeMap::new(),
        };
        let rotation = request.operation.created.as_second();
        configurator.configure(request, &log).await.unwrap();

        let rotated_locator = Locator::new(CLUSTER, &secrets_package_name("10.0.0.1"), "7.0.1")
            .unwrap()
            .with_rotation(rotation);
        let (envelope, data) = configurator
            .store()
            .read_package(&rotated_locator)
            .await
            .unwrap();
        assert!(envelope.locator.is_rotation());
        let rotated = TlsArchive::parse(&data).unwrap();

        assert_eq!(
            apiserver_public_key(&original),
            apiserver_public_key(&rotated)
        );

        // rotated planet config exists under the new runtime version
        let config_locator = Locator::new(
            CLUSTER,
            &config_package_name(&master.package_suffix(CLUSTER)),
            "7.0.1",
        )
        .unwrap()
        .with_rotation(rotation);
        configurator
            .store()
            .read_package_envelope(&config_locator)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_update_is_gated() {
        let configurator = configurator(vec![]);
        let log = OperationLog::new();
        configurator
            .configure(install_request(vec![server("10.0.0.1", true)]), &log)
            .await
            .unwrap();

        let runtime = Locator::new(CLUSTER, "planet", "9.0.0").unwrap();
        let request = ConfigureRequest::new(
            Operation::update(vec![], runtime, "agent"),
            manifest(),
            cluster_info(),
        );
        // empty allow-lists: nothing is supported
        let err = configurator.configure(request, &log).await.unwrap_err();
        assert!(matches!(err, Error::UnsupportedUpgrade { .. }));
    }

    #[tokio::test]
    async fn test_update_retry_is_idempotent() {
        let configurator = configurator(vec![]);
        let log = OperationLog::new();
        configurator
            .configure(install_request(vec![server("10.0.0.1", true)]), &log)
            .await
            .unwrap();

        let runtime = Locator::new(CLUSTER, "planet", "7.0.1").unwrap();
        let paths = UpgradePath {
            direct_minimums: vec![Version::new(7, 0, 0)],
            via: BTreeMap::new(),
        };
        let first_operation = Operation::update(vec![], runtime.clone(), "agent");
        let created = first_operation.created;

        let mut request =
            ConfigureRequest::new(first_operation, manifest(), cluster_info());
        request.upgrade_paths = paths.clone();
        configurator.configure(request, &log).await.unwrap();
        let packages = configurator.store().len();

        // a retried operation carries the same creation timestamp, so every
        // package write lands on AlreadyExists
        let mut retried = Operation::update(vec![], runtime, "agent");
        retried.created = created;
        let mut request = ConfigureRequest::new(retried, manifest(), cluster_info());
        request.upgrade_paths = paths;
        configurator.configure(request, &log).await.unwrap();
        assert_eq!(configurator.store().len(), packages);
    }

    #[tokio::test]
    async fn test_cancelled_operation_fails_cleanly() {
        let configurator = configurator(vec![]);
        let log = OperationLog::new();
        let mut request = install_request(five_servers());
        request.cancel.cancel();

        let err = configurator.configure(request, &log).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test]
    async fn test_unsupported_operation_kind_rejected() {
        let configurator = configurator(vec![]);
        let log = OperationLog::new();
        let mut operation = Operation::install(vec![server("10.0.0.1", true)], "agent");
        operation.kind = OperationKind::Shrink;
        let request = ConfigureRequest::new(operation, manifest(), cluster_info());
        let err = configurator.configure(request, &log).await.unwrap_err();
        assert!(matches!(err, Error::BadParameter(_)));
    }

    #[tokio::test]
    async fn test_install_with_license_and_resources() {
        let configurator = configurator(vec![]);
        let log = OperationLog::new();
        let mut request = install_request(vec![server("10.0.0.1", true)]);
        request.cluster.license = Some("license payload".to_string());
        request.cluster.resources = Some(b"kind: ConfigMap".to_vec());
        configurator.configure(request, &log).await.unwrap();

        assert_eq!(
            find_by_purpose(configurator.store(), PURPOSE_LICENSE).await.len(),
            1
        );
        assert_eq!(
            find_by_purpose(configurator.store(), PURPOSE_RESOURCES).await.len(),
            1
        );
    }

    #[tokio::test]
    async fn test_update_preserves_san_coverage() {
        let configurator = configurator(vec![]);
        let log = OperationLog::new();
        configurator
            .configure(install_request(vec![server("10.0.0.1", true)]), &log)
            .await
            .unwrap();

        let runtime = Locator::new(CLUSTER, "planet", "7.0.1").unwrap();
        let mut request = ConfigureRequest::new(
            Operation::update(vec![], runtime, "agent"),
            manifest(),
            cluster_info(),
        );
        request.upgrade_paths = UpgradePath {
            direct_minimums: vec![Version::new(7, 0, 0)],
            via: BTreeMap::new(),
        };
        let rotation = request.operation.created.as_second();
        configurator.configure(request, &log).await.unwrap();

        let locator = Locator::new(CLUSTER, &secrets_package_name("10.0.0.1"), "7.0.1")
            .unwrap()
            .with_rotation(rotation);
        let (_, data) = configurator.store().read_package(&locator).await.unwrap();
        let archive = TlsArchive::parse(&data).unwrap();
        let pair = archive.get_key_pair("apiserver").unwrap();
        let (_, pem) = parse_x509_pem(pair.cert_pem.as_bytes()).unwrap();
        let cert = pem.parse_x509().unwrap();
        let san = cert.subject_alternative_name().unwrap().unwrap();
        let dns: Vec<String> = san
            .value
            .general_names
            .iter()
            .filter_map(|n| match n {
                x509_parser::extensions::GeneralName::DNSName(d) => Some(d.to_string()),
                _ => None,
            })
            .collect();
        assert!(dns.contains(&"kubernetes".to_string()));
        assert!(dns.contains(&"host-10.0.0.1".to_string()));
    }
}
