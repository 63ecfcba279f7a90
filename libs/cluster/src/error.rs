use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("cluster has no master servers")]
    NoMaster,

    #[error("no server with advertise IP {0}")]
    ServerNotFound(String),

    #[error("profile {0:?} not found in manifest")]
    ProfileNotFound(String),

    #[error("invalid subnet {0:?}: {1}")]
    InvalidSubnet(String, #[source] ipnet::AddrParseError),

    #[error("subnet {0:?} has no usable addresses")]
    EmptySubnet(String),

    #[error("invalid peer URL {0:?}: {1}")]
    InvalidPeerUrl(String, #[source] url::ParseError),

    #[error("peer URL {0:?} has no host")]
    PeerUrlWithoutHost(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
