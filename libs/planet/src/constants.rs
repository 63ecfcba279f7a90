/// Directory inside the runtime where per-node secrets are unpacked.
pub const SECRETS_DIR: &str = "/var/state";

/// Mount point of the node state directory inside the runtime.
pub const STATE_MOUNT_DIR: &str = "/var/lib/orbit";

/// Loopback the in-cluster DNS and co-located services answer on.
pub const ALTERNATIVE_LOOPBACK: &str = "127.0.0.2";

/// Internal DNS name of the active API server.
pub const API_SERVER_DNS: &str = "leader.orbit.local";
/// Pre-rename alias kept valid so old kubeconfigs keep working.
pub const LEGACY_API_SERVER_DNS: &str = "apiserver.orbit.local";
/// In-cluster docker registry.
pub const REGISTRY_DNS: &str = "registry.orbit.local";

/// DNS forms the kubernetes service answers on inside the cluster.
pub const KUBERNETES_SERVICE_DNS: [&str; 4] = [
    "kubernetes",
    "kubernetes.default",
    "kubernetes.default.svc",
    "kubernetes.default.svc.cluster.local",
];

/// Namespaces the log aggregator service is reachable in.
pub const LOGRANGE_AGGREGATOR_SERVICE: &str = "logrange-aggregator";
pub const LOGRANGE_NAMESPACES: [&str; 2] = ["kube-system", "monitoring"];

/// Names the standalone install wizard serves the API under before the
/// cluster has a real domain.
pub const WIZARD_SNI_HOSTS: [&str; 2] = ["wizard.orbit.local", "installer.orbit.local"];

/// Archive entry names in the cluster CA package.
pub const CA_ENTRY: &str = "ca";
pub const APISERVER_ENTRY: &str = "apiserver";

/// Thin pool the devicemapper storage driver is pointed at.
pub const DOCKER_THINPOOL: &str = "docker-thinpool";

/// Per-node secrets package: `planet-<ip>-secrets`.
pub fn secrets_package_name(advertise_ip: &str) -> String {
    format!("planet-{advertise_ip}-secrets")
}

/// Per-node runtime config package: `planet-config-<suffix>`.
pub fn config_package_name(package_suffix: &str) -> String {
    format!("planet-config-{package_suffix}")
}
