pub mod config;
pub mod error;

pub use config::{master_config, node_config, TeleportConfig, TeleportRequest};
pub use error::{Error, Result};
