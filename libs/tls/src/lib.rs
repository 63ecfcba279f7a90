pub mod archive;
pub mod ca;
pub mod error;
pub mod keypair;

pub use archive::TlsArchive;
pub use ca::{
    generate_certificate, generate_private_key, generate_self_signed_ca, CertificateRequest,
};
pub use error::{Error, Result};
pub use keypair::TlsKeyPair;
