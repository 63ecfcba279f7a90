use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("package already exists: {0}")]
    AlreadyExists(String),

    #[error("package not found: {0}")]
    NotFound(String),

    #[error("repository not found: {0}")]
    RepositoryNotFound(String),

    #[error("invalid locator {0:?}: {1}")]
    InvalidLocator(String, String),

    #[error("invalid version {0:?}: {1}")]
    InvalidVersion(String, #[source] semver::Error),

    #[error("{0}: {1}")]
    Io(String, #[source] std::io::Error),

    #[error("{0}: {1}")]
    Serialization(String, #[source] serde_json::Error),
}

impl Error {
    /// Writers synchronize on locator uniqueness; callers that treat a taken
    /// locator as success branch on this.
    #[inline]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::AlreadyExists(_))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
