use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    BadParameter(String),

    #[error("{0} not found")]
    NotFound(String),

    /// Transient failure talking to a remote component; the only kind the
    /// command runner retries.
    #[error("connection problem: {0}")]
    ConnectionProblem(String),

    #[error("command failed on {addr}: {message}")]
    CommandFailed {
        addr: String,
        message: String,
        stdout: String,
    },

    #[error("service {0} reported failed")]
    ServiceFailed(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("downgrade from {from} to {to} is not allowed")]
    DowngradeRejected {
        from: semver::Version,
        to: semver::Version,
    },

    #[error("upgrade from {from} to {to} is not supported")]
    UnsupportedUpgrade {
        from: semver::Version,
        to: semver::Version,
    },

    #[error("cluster image must include intermediate runtimes: {}", missing.join(", "))]
    NeedsIntermediates { missing: Vec<String> },

    #[error("{0}: {1}")]
    Template(String, #[source] tera::Error),

    #[error(transparent)]
    Pack(#[from] orbit_pack::Error),

    #[error(transparent)]
    Cluster(#[from] orbit_cluster::Error),

    #[error(transparent)]
    Planet(#[from] orbit_planet::Error),

    #[error(transparent)]
    Teleport(#[from] orbit_teleport::Error),

    #[error(transparent)]
    Tls(#[from] orbit_tls::Error),
}

impl Error {
    /// Only transient connection failures are worth another attempt.
    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::ConnectionProblem(_))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
