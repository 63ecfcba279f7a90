pub mod args;
pub mod constants;
pub mod error;
pub mod secrets;

pub use args::PlanetConfig;
pub use error::{Error, Result};
pub use secrets::{configure_ca, master_secrets, node_secrets, SecretsRequest};
