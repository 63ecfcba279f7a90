use serde::{Deserialize, Serialize};

/// A PEM certificate with its (optional) PEM private key.
///
/// The key is empty on "public" copies, e.g. the shared CA entry placed
/// into node archives.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsKeyPair {
    pub cert_pem: String,
    #[serde(default)]
    pub key_pem: String,
}

impl TlsKeyPair {
    pub fn new(cert_pem: String, key_pem: String) -> Self {
        TlsKeyPair { cert_pem, key_pem }
    }

    /// Copy with the private key cleared.
    pub fn public_only(&self) -> TlsKeyPair {
        TlsKeyPair {
            cert_pem: self.cert_pem.clone(),
            key_pem: String::new(),
        }
    }

    #[inline]
    pub fn has_private_key(&self) -> bool {
        !self.key_pem.is_empty()
    }
}
