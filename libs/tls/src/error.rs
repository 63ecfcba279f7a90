use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}: {1}")]
    Generation(String, #[source] rcgen::Error),

    #[error("{0}: {1}")]
    Serialization(String, #[source] serde_json::Error),

    #[error("key pair {0:?} not found in archive")]
    KeyPairNotFound(String),

    #[error("key pair {0:?} has no private key")]
    MissingPrivateKey(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
