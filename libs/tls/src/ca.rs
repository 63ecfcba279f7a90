use crate::error::{Error, Result};
use crate::keypair::TlsKeyPair;

use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, IsCa, KeyPair,
};
use time::{Duration, OffsetDateTime};
use tracing::debug;

/// Subject and SAN material for a leaf certificate.
#[derive(Clone, Debug, Default)]
pub struct CertificateRequest {
    pub common_name: String,
    pub organizations: Vec<String>,
    pub dns_names: Vec<String>,
    pub ip_addresses: Vec<String>,
}

impl CertificateRequest {
    fn subject_alt_names(&self) -> Vec<String> {
        self.dns_names
            .iter()
            .chain(self.ip_addresses.iter())
            .cloned()
            .collect()
    }

    fn distinguished_name(&self) -> DistinguishedName {
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, self.common_name.as_str());
        for organization in &self.organizations {
            dn.push(DnType::OrganizationName, organization.as_str());
        }
        dn
    }
}

/// Generate the cluster root: a self-signed ECDSA P-256 CA.
pub fn generate_self_signed_ca(common_name: &str, validity: Duration) -> Result<TlsKeyPair> {
    debug!(msg = "generate self-signed CA", common_name);
    let key = KeyPair::generate()
        .map_err(|e| Error::Generation("failed to generate CA key".to_string(), e))?;

    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    params.distinguished_name = dn;
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.not_before = OffsetDateTime::now_utc() - Duration::days(1);
    params.not_after = OffsetDateTime::now_utc() + validity;

    let cert = params
        .self_signed(&key)
        .map_err(|e| Error::Generation("failed to self-sign CA".to_string(), e))?;
    Ok(TlsKeyPair::new(cert.pem(), key.serialize_pem()))
}

/// Generate a standalone ECDSA P-256 private key in PEM form.
///
/// Used for the cluster-wide apiserver key that every issued apiserver
/// certificate is bound to.
pub fn generate_private_key() -> Result<String> {
    KeyPair::generate()
        .map(|key| key.serialize_pem())
        .map_err(|e| Error::Generation("failed to generate key".to_string(), e))
}

/// Issue a leaf certificate signed by `ca`.
///
/// When `reuse_private_key` carries a PEM key the leaf is issued against it,
/// keeping the public key stable across rotations. The apiserver identity
/// depends on this: Kubernetes signs service-account tokens with that key,
/// so a fresh key would invalidate every outstanding token.
pub fn generate_certificate(
    request: &CertificateRequest,
    ca: &TlsKeyPair,
    reuse_private_key: Option<&str>,
    validity: Duration,
) -> Result<TlsKeyPair> {
    if !ca.has_private_key() {
        return Err(Error::MissingPrivateKey("ca".to_string()));
    }
    debug!(
        msg = "generate certificate",
        common_name = request.common_name,
        reuse_key = reuse_private_key.is_some(),
    );

    let key = match reuse_private_key {
        Some(pem) => KeyPair::from_pem(pem)
            .map_err(|e| Error::Generation("failed to load reused key".to_string(), e))?,
        None => KeyPair::generate()
            .map_err(|e| Error::Generation("failed to generate leaf key".to_string(), e))?,
    };

    let mut params = CertificateParams::new(request.subject_alt_names())
        .map_err(|e| Error::Generation("invalid subject alternative names".to_string(), e))?;
    params.distinguished_name = request.distinguished_name();
    params.extended_key_usages = vec![
        ExtendedKeyUsagePurpose::ServerAuth,
        ExtendedKeyUsagePurpose::ClientAuth,
    ];
    params.not_before = OffsetDateTime::now_utc() - Duration::days(1);
    params.not_after = OffsetDateTime::now_utc() + validity;

    let (issuer, issuer_key) = load_issuer(ca)?;
    let cert = params
        .signed_by(&key, &issuer, &issuer_key)
        .map_err(|e| Error::Generation("failed to sign certificate".to_string(), e))?;
    Ok(TlsKeyPair::new(cert.pem(), key.serialize_pem()))
}

fn load_issuer(ca: &TlsKeyPair) -> Result<(Certificate, KeyPair)> {
    let key = KeyPair::from_pem(&ca.key_pem)
        .map_err(|e| Error::Generation("failed to load CA key".to_string(), e))?;
    let params = CertificateParams::from_ca_cert_pem(&ca.cert_pem)
        .map_err(|e| Error::Generation("failed to parse CA certificate".to_string(), e))?;
    let cert = params
        .self_signed(&key)
        .map_err(|e| Error::Generation("failed to rebuild CA certificate".to_string(), e))?;
    Ok((cert, key))
}
