//! Certificate generation and fingerprints.
//!
//! Helpers to create a self-signed identity, or a small local CA that
//! issues leaf certificates, for setups without an existing PKI. Also
//! SHA-256 fingerprints for pinning a peer certificate out of band.

use std::fmt::{self, Write as _};

use der::pem::{self, LineEnding};
use rcgen::{
    BasicConstraints, Certificate as RcgenCertificate, CertificateParams, DistinguishedName,
    DnType, IsCa, KeyPair, PKCS_ECDSA_P256_SHA256,
};
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::Zeroizing;

/// Certificate utility errors
#[derive(Debug, Error)]
pub enum CertificateError {
    /// Certificate generation failed
    #[error("Certificate generation failed: {0}")]
    GenerationFailed(String),

    /// PEM encoding failed
    #[error("PEM encoding failed: {0}")]
    Encoding(String),
}

impl From<rcgen::RcgenError> for CertificateError {
    fn from(value: rcgen::RcgenError) -> Self {
        CertificateError::GenerationFailed(value.to_string())
    }
}

/// Certificate and private key pair, in DER and PEM.
#[derive(Clone)]
pub struct CertifiedKey {
    /// Certificate in DER format
    pub certificate: Vec<u8>,
    /// PKCS#8 private key in DER format
    pub private_key: Zeroizing<Vec<u8>>,
    pub certificate_pem: String,
    pub private_key_pem: Zeroizing<String>,
}

impl CertifiedKey {
    fn new(certificate: Vec<u8>, private_key: Vec<u8>) -> Result<Self, CertificateError> {
        let private_key = Zeroizing::new(private_key);
        let certificate_pem = to_pem("CERTIFICATE", &certificate)?;
        let private_key_pem = Zeroizing::new(to_pem("PRIVATE KEY", &private_key)?);
        Ok(CertifiedKey {
            certificate,
            private_key,
            certificate_pem,
            private_key_pem,
        })
    }

    /// SHA-256 of the DER certificate, 32 bytes.
    pub fn fingerprint(&self) -> Vec<u8> {
        sha256_fingerprint(&self.certificate)
    }

    /// The fingerprint as "AF:12:F6:...".
    pub fn fingerprint_str(&self) -> String {
        fingerprint_hex(&self.fingerprint())
    }
}

impl fmt::Debug for CertifiedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertifiedKey")
            .field("certificate", &self.certificate.len())
            .field("private_key", &self.private_key.len())
            .finish()
    }
}

fn to_pem(label: &str, der: &[u8]) -> Result<String, CertificateError> {
    pem::encode_string(label, LineEnding::LF, der)
        .map_err(|e| CertificateError::Encoding(e.to_string()))
}

fn params(
    common_name: &str,
    names: &[&str],
    is_ca: IsCa,
) -> Result<CertificateParams, CertificateError> {
    let key_pair = KeyPair::generate(&PKCS_ECDSA_P256_SHA256)?;

    let mut params =
        CertificateParams::new(names.iter().map(|n| n.to_string()).collect::<Vec<_>>());

    let mut distinguished_name = DistinguishedName::new();
    distinguished_name.push(DnType::OrganizationName, "tlswrap".to_string());
    distinguished_name.push(DnType::CommonName, common_name.to_string());
    params.distinguished_name = distinguished_name;

    params.is_ca = is_ca;
    params.alg = &PKCS_ECDSA_P256_SHA256;
    params.key_pair = Some(key_pair);

    // One year.
    let not_before = time::OffsetDateTime::now_utc() - time::Duration::minutes(5);
    params.not_before = not_before;
    params.not_after = not_before + time::Duration::days(365);

    Ok(params)
}

/// Generate a self-signed P-256 certificate valid for `names`.
///
/// The first name doubles as the common name.
pub fn generate_self_signed(names: &[&str]) -> Result<CertifiedKey, CertificateError> {
    let cn = names.first().copied().unwrap_or("tlswrap peer");
    let cert = RcgenCertificate::from_params(params(cn, names, IsCa::NoCa)?)?;
    CertifiedKey::new(cert.serialize_der()?, cert.serialize_private_key_der())
}

/// A local certificate authority.
pub struct CertificateAuthority {
    cert: RcgenCertificate,
    identity: CertifiedKey,
}

impl CertificateAuthority {
    pub fn generate(common_name: &str) -> Result<Self, CertificateError> {
        let cert = RcgenCertificate::from_params(params(
            common_name,
            &[],
            IsCa::Ca(BasicConstraints::Unconstrained),
        )?)?;
        let identity = CertifiedKey::new(cert.serialize_der()?, cert.serialize_private_key_der())?;
        Ok(CertificateAuthority { cert, identity })
    }

    /// The CA certificate, to be used as trust anchor.
    pub fn certificate(&self) -> &CertifiedKey {
        &self.identity
    }

    /// Issue a leaf certificate for `names`, signed by this CA.
    pub fn issue(&self, names: &[&str]) -> Result<CertifiedKey, CertificateError> {
        let cn = names.first().copied().unwrap_or("tlswrap peer");
        let leaf = RcgenCertificate::from_params(params(cn, names, IsCa::NoCa)?)?;
        let der = leaf.serialize_der_with_signer(&self.cert)?;
        CertifiedKey::new(der, leaf.serialize_private_key_der())
    }
}

impl fmt::Debug for CertificateAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateAuthority")
            .field("certificate", &self.identity.certificate.len())
            .finish_non_exhaustive()
    }
}

/// SHA-256 over the DER bytes of a certificate.
pub fn sha256_fingerprint(cert_der: &[u8]) -> Vec<u8> {
    Sha256::digest(cert_der).to_vec()
}

/// Uppercase hex pairs joined by `:`, the way browsers and `openssl x509`
/// print fingerprints.
pub fn fingerprint_hex(fingerprint: &[u8]) -> String {
    let mut out = String::with_capacity(fingerprint.len() * 3);
    for (i, byte) in fingerprint.iter().enumerate() {
        if i > 0 {
            out.push(':');
        }
        let _ = write!(out, "{byte:02X}");
    }
    out
}
