use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}: {1}")]
    Certificate(String, #[source] orbit_tls::Error),

    #[error(transparent)]
    Cluster(#[from] orbit_cluster::Error),

    #[error("cluster CA archive is missing the {0:?} entry")]
    MissingCaEntry(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
