use crate::error::{Error, Result};

use std::collections::BTreeMap;
use std::fmt;

use jiff::Timestamp;
use orbit_cluster::config::Subnets;
use orbit_cluster::server::ProvisionedServer;
use orbit_pack::Locator;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Install,
    Expand,
    Update,
    Shrink,
    Reconfigure,
    Gc,
    Uninstall,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            OperationKind::Install => "install",
            OperationKind::Expand => "expand",
            OperationKind::Update => "update",
            OperationKind::Shrink => "shrink",
            OperationKind::Reconfigure => "reconfigure",
            OperationKind::Gc => "gc",
            OperationKind::Uninstall => "uninstall",
        };
        write!(f, "{kind}")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationState {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// Parameters shared by install and expand.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct InstallExpand {
    #[serde(default)]
    pub subnets: Option<Subnets>,
    /// Free-form variables forwarded to the runtime environment.
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
    /// Requested instance count per manifest profile.
    #[serde(default)]
    pub profiles: BTreeMap<String, u32>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Update {
    /// Runtime package the cluster is updating to.
    pub package: Locator,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Reconfigure {
    pub advertise_addr: String,
}

/// A state-changing request against one cluster. Transitions for the same
/// cluster are serialized through its operation group.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Operation {
    pub id: Uuid,
    pub kind: OperationKind,
    pub state: OperationState,
    pub servers: Vec<ProvisionedServer>,
    #[serde(default)]
    pub install_expand: Option<InstallExpand>,
    #[serde(default)]
    pub update: Option<Update>,
    #[serde(default)]
    pub reconfigure: Option<Reconfigure>,
    pub created: Timestamp,
    pub updated_by: String,
}

impl Operation {
    fn new(kind: OperationKind, servers: Vec<ProvisionedServer>, updated_by: &str) -> Self {
        Operation {
            id: Uuid::new_v4(),
            kind,
            state: OperationState::Pending,
            servers,
            install_expand: None,
            update: None,
            reconfigure: None,
            created: Timestamp::now(),
            updated_by: updated_by.to_string(),
        }
    }

    pub fn install(servers: Vec<ProvisionedServer>, updated_by: &str) -> Self {
        Operation {
            install_expand: Some(InstallExpand::default()),
            ..Operation::new(OperationKind::Install, servers, updated_by)
        }
    }

    pub fn expand(joining: ProvisionedServer, updated_by: &str) -> Self {
        Operation {
            install_expand: Some(InstallExpand::default()),
            ..Operation::new(OperationKind::Expand, vec![joining], updated_by)
        }
    }

    pub fn update(
        servers: Vec<ProvisionedServer>,
        package: Locator,
        updated_by: &str,
    ) -> Self {
        Operation {
            update: Some(Update { package }),
            ..Operation::new(OperationKind::Update, servers, updated_by)
        }
    }

    /// Subnets for install/expand, falling back to the defaults.
    pub fn subnets(&self) -> Subnets {
        self.install_expand
            .as_ref()
            .and_then(|ie| ie.subnets.clone())
            .unwrap_or_default()
    }

    pub fn start(&mut self) -> Result<()> {
        self.transition(OperationState::Pending, OperationState::InProgress)
    }

    pub fn complete(&mut self) -> Result<()> {
        self.transition(OperationState::InProgress, OperationState::Completed)
    }

    pub fn fail(&mut self) -> Result<()> {
        self.transition(OperationState::InProgress, OperationState::Failed)
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.state,
            OperationState::Completed | OperationState::Failed
        )
    }

    fn transition(&mut self, from: OperationState, to: OperationState) -> Result<()> {
        if self.state != from {
            return Err(Error::BadParameter(format!(
                "operation {} cannot move {:?} -> {:?}",
                self.id, self.state, to
            )));
        }
        self.state = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_transitions() {
        let mut operation = Operation::install(vec![], "agent");
        assert_eq!(operation.state, OperationState::Pending);
        operation.start().unwrap();
        assert_eq!(operation.state, OperationState::InProgress);
        operation.complete().unwrap();
        assert!(operation.is_terminal());
    }

    #[test]
    fn test_invalid_transitions_are_rejected() {
        let mut operation = Operation::install(vec![], "agent");
        assert!(operation.complete().is_err());
        operation.start().unwrap();
        operation.fail().unwrap();
        assert!(operation.start().is_err());
        assert!(operation.complete().is_err());
    }

    #[test]
    fn test_subnets_fall_back_to_defaults() {
        let operation = Operation::install(vec![], "agent");
        assert_eq!(operation.subnets(), Subnets::default());

        let mut operation = Operation::install(vec![], "agent");
        operation.install_expand = Some(InstallExpand {
            subnets: Some(Subnets {
                service: "10.200.0.0/16".to_string(),
                overlay: "10.210.0.0/16".to_string(),
            }),
            ..InstallExpand::default()
        });
        assert_eq!(operation.subnets().service, "10.200.0.0/16");
    }

    #[test]
    fn test_expand_carries_single_server() {
        let server = ProvisionedServer {
            advertise_ip: "10.0.0.3".to_string(),
            hostname: "host-3".to_string(),
            nodename: None,
            role: "worker".to_string(),
            cluster_role: orbit_cluster::server::ClusterRole::Node,
            state_dir: "/var/lib/orbit".to_string(),
            docker: Default::default(),
            instance_type: None,
        };
        let operation = Operation::expand(server, "agent");
        assert_eq!(operation.kind, OperationKind::Expand);
        assert_eq!(operation.servers.len(), 1);
    }
}
