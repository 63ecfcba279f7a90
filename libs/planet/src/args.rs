use crate::constants::{DOCKER_THINPOOL, SECRETS_DIR, STATE_MOUNT_DIR};
use crate::error::Result;

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use orbit_cluster::config::{CloudProvider, ClusterConfiguration, DnsConfig, Subnets};
use orbit_cluster::etcd::EtcdConfig;
use orbit_cluster::manifest::{DockerConfig, Manifest, Profile};
use orbit_cluster::server::ProvisionedServer;
use orbit_cluster::topology::MasterConfig;
use tracing::debug;

/// Everything the planet invocation depends on.
///
/// Precedence for the subnets is operation defaults first, cluster
/// configuration last; the builder emits the subnet flags at the end so the
/// override always wins.
pub struct PlanetConfig<'a> {
    pub manifest: &'a Manifest,
    pub profile: &'a Profile,
    pub server: &'a ProvisionedServer,
    pub domain: &'a str,
    pub cluster_name: &'a str,
    pub master_addr: &'a str,
    pub master: Option<MasterConfig>,
    pub etcd: &'a EtcdConfig,
    pub docker: &'a DockerConfig,
    pub cluster_config: Option<&'a ClusterConfiguration>,
    pub subnets: Subnets,
    pub dns: DnsConfig,
    pub dns_hosts: Vec<String>,
    pub dns_zones: Vec<String>,
    pub vxlan_port: Option<u16>,
    pub cloud_provider: &'a CloudProvider,
    pub node_labels: BTreeMap<String, String>,
    pub env: BTreeMap<String, String>,
    pub etcd_options: Vec<String>,
    pub kubelet_options: Vec<String>,
}

impl PlanetConfig<'_> {
    /// Compose the runtime argv. Every required flag appears exactly once.
    pub fn build(&self) -> Result<Vec<String>> {
        let server = self.server;
        let mut args = vec![
            format!("--node-name={}", server.kube_node_id()),
            format!("--hostname={}", server.hostname),
            format!("--master-ip={}", self.master_addr),
            format!("--public-ip={}", server.advertise_ip),
            format!("--cluster-id={}", self.cluster_name),
            format!("--secrets-dir={SECRETS_DIR}"),
            format!("--service-uid={}", self.manifest.system_user.uid),
            format!("--service-gid={}", self.manifest.system_user.gid),
            format!("--etcd-proxy={}", self.etcd.proxy_mode),
            format!("--etcd-member-name={}", server.etcd_member_name(self.domain)),
            format!("--initial-cluster={}", self.etcd.initial_cluster),
            format!(
                "--etcd-initial-cluster-state={}",
                self.etcd.initial_cluster_state
            ),
        ];

        match &self.master {
            Some(master) if master.election_enabled => {
                args.push("--election-enabled".to_string())
            }
            _ => args.push("--no-election-enabled".to_string()),
        }
        args.push(format!(
            "--role={}",
            if server.is_master() { "master" } else { "node" }
        ));

        for dir in ["etcd", "registry", "docker", "share", "state"] {
            args.push(format!(
                "--volume={}/planet/{dir}:/ext/{dir}",
                server.state_dir
            ));
        }
        args.push(format!("--volume={}:{STATE_MOUNT_DIR}", server.state_dir));

        if let Some(port) = self.vxlan_port {
            args.push(format!("--vxlan-port={port}"));
        }
        for addr in &self.dns.listen_addrs {
            args.push(format!("--dns-listen-addr={addr}"));
        }
        args.push(format!("--dns-port={}", self.dns.port));

        self.docker_args(&mut args);

        if !self.etcd_options.is_empty() {
            args.push(format!("--etcd-options={}", self.etcd_options.join(" ")));
        }
        if !self.kubelet_options.is_empty() {
            args.push(format!(
                "--kubelet-options={}",
                self.kubelet_options.join(" ")
            ));
        }

        for mount in &self.profile.mounts {
            let mut volume = format!("--volume={}:{}", mount.source, mount.destination);
            if mount.skip_if_missing {
                volume.push_str(":skip");
            }
            if mount.recursive {
                volume.push_str(":rec");
            }
            args.push(volume);
        }
        for device in &self.profile.devices {
            args.push(format!("--device={device}"));
        }
        for taint in &self.profile.taints {
            args.push(format!(
                "--taint={}={}:{}",
                taint.key, taint.value, taint.effect
            ));
        }
        for (key, value) in &self.node_labels {
            args.push(format!("--node-label={key}={value}"));
        }

        let config = self.cluster_config;
        let mut env = self.env.clone();
        if let Some(config) = config {
            env.extend(config.env.clone());
        }
        for (key, value) in &env {
            args.push(format!("--env={key}={value:?}"));
        }

        if !self.cloud_provider.is_none() {
            args.push(format!("--cloud-provider={}", self.cloud_provider.name()));
        }
        if let Some(cloud_config) = config.and_then(|c| c.cloud_config.as_deref()) {
            args.push(format!("--cloud-config={}", BASE64.encode(cloud_config)));
        }
        if let CloudProvider::Gce { node_tags } = self.cloud_provider {
            if !node_tags.is_empty() {
                args.push(format!("--gce-node-tags={}", node_tags.join(",")));
            }
        }
        if let Some(kubelet_config) = config.and_then(|c| c.kubelet_config.as_deref()) {
            args.push(format!(
                "--kubelet-config={}",
                BASE64.encode(kubelet_config)
            ));
        }
        if let Some(range) = config.and_then(|c| c.service_node_portrange.as_deref()) {
            args.push(format!("--service-node-portrange={range}"));
        }
        if let Some(range) = config.and_then(|c| c.proxy_portrange.as_deref()) {
            args.push(format!("--proxy-portrange={range}"));
        }
        if let Some(gates) = config.and_then(|c| c.feature_gates_csv()) {
            args.push(format!("--feature-gates={gates}"));
        }
        if self.manifest.has_network_install_hook() {
            args.push("--disable-flannel".to_string());
        }
        if config.is_some_and(|c| c.allow_privileged) {
            args.push("--allow-privileged".to_string());
        }
        if !self.dns_hosts.is_empty() {
            args.push(format!("--dns-hosts={}", self.dns_hosts.join(",")));
        }
        if !self.dns_zones.is_empty() {
            args.push(format!("--dns-zones={}", self.dns_zones.join(",")));
        }

        // last on purpose: the cluster configuration must win over the
        // operation and manifest defaults
        let service_subnet = config
            .and_then(|c| c.service_cidr.as_deref())
            .unwrap_or(&self.subnets.service);
        let pod_subnet = config
            .and_then(|c| c.pod_cidr.as_deref())
            .unwrap_or(&self.subnets.overlay);
        args.push(format!("--service-subnet={service_subnet}"));
        args.push(format!("--pod-subnet={pod_subnet}"));

        debug!(
            msg = "composed planet arguments",
            server = server.advertise_ip,
            count = args.len(),
        );
        Ok(args)
    }

    /// Docker flags depend on the storage driver; devicemapper additionally
    /// mounts the device-control paths when a block device is configured.
    fn docker_args(&self, args: &mut Vec<String>) {
        args.push(format!("--docker-backend={}", self.docker.storage_driver));
        let options = match self.docker.storage_driver.as_str() {
            "devicemapper" => {
                let mut options = vec!["dm.override_udev_sync_check=1".to_string()];
                if self.server.docker.device.is_some() {
                    options.push("dm.fs=xfs".to_string());
                    options.push(format!("dm.thinpooldev=/dev/mapper/{DOCKER_THINPOOL}"));
                    args.push("--volume=/dev/mapper:/dev/mapper".to_string());
                    args.push("--volume=/dev/docker:/dev/docker".to_string());
                    if let Some(lvm_dir) = &self.server.docker.lvm_system_dir {
                        args.push(format!("--volume={lvm_dir}:{lvm_dir}"));
                    }
                }
                options
            }
            "overlay2" => vec!["overlay2.override_kernel_check=1".to_string()],
            _ => self.docker.args.clone(),
        };
        args.push(format!("--docker-options={}", options.join(" ")));
    }
}
