pub mod backend;
pub mod configure;
pub mod error;
pub mod group;
pub mod join;
pub mod log;
pub mod operation;
pub mod runner;
pub mod telemetry;
pub mod upgrade;

pub use configure::{ClusterInfo, ConfigureRequest, Configurator, EtcdMembership};
pub use error::{Error, Result};
pub use operation::{Operation, OperationKind, OperationState};
