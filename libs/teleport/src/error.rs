use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}: {1}")]
    Serialization(String, #[source] serde_yaml::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
