pub mod config;
pub mod error;
pub mod etcd;
pub mod manifest;
pub mod server;
pub mod topology;

pub use config::{CloudProvider, ClusterConfiguration, DnsConfig, Subnets};
pub use error::{Error, Result};
pub use etcd::{EtcdConfig, EtcdMember, InitialClusterState, ProxyMode};
pub use manifest::{Manifest, Profile, ServiceRole};
pub use server::{ClusterRole, ProvisionedServer, ServerDocker};
pub use topology::{MasterConfig, Topology};
