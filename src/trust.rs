//! Certificates and keys handed to a session.
//!
//! Input may be PEM or DER. Everything is normalized to DER here so the
//! engine only ever sees one encoding. Certificates are checked to be
//! well-formed X.509. Key bytes live in a [`SecretDocument`] and are
//! wiped on drop.

use std::fmt;

use der::{Decode, Document, SecretDocument};
use x509_cert::Certificate;

use crate::SetupError;

const PEM_PREFIX: &[u8] = b"-----BEGIN";

/// CA, own certificate and own private key, all optional.
///
/// A certificate without its key, or the reverse, is rejected.
#[derive(Default)]
pub struct TrustMaterial {
    ca: Option<Document>,
    cert: Option<Document>,
    key: Option<SecretDocument>,
}

impl TrustMaterial {
    /// Decode and validate whatever material is given.
    pub fn decode(
        ca: Option<&[u8]>,
        cert: Option<&[u8]>,
        key: Option<&[u8]>,
    ) -> Result<Self, SetupError> {
        let ca = ca.map(decode_certificate).transpose()?;
        let (cert, key) = match (cert, key) {
            (Some(c), Some(k)) => (Some(decode_certificate(c)?), Some(decode_key(k)?)),
            (None, None) => (None, None),
            (Some(_), None) => {
                return Err(SetupError::Config("certificate given without key".into()))
            }
            (None, Some(_)) => {
                return Err(SetupError::Config("key given without certificate".into()))
            }
        };
        Ok(TrustMaterial { ca, cert, key })
    }

    /// Own identity only.
    pub fn identity(cert: &[u8], key: &[u8]) -> Result<Self, SetupError> {
        Self::decode(None, Some(cert), Some(key))
    }

    /// Add a trust anchor.
    pub fn with_ca(mut self, ca: &[u8]) -> Result<Self, SetupError> {
        self.ca = Some(decode_certificate(ca)?);
        Ok(self)
    }

    pub fn is_empty(&self) -> bool {
        self.ca.is_none() && self.cert.is_none()
    }

    pub fn has_identity(&self) -> bool {
        self.cert.is_some()
    }

    /// CA certificate, DER.
    pub fn ca_der(&self) -> Option<&[u8]> {
        self.ca.as_ref().map(|d| d.as_bytes())
    }

    /// Own certificate, DER.
    pub fn cert_der(&self) -> Option<&[u8]> {
        self.cert.as_ref().map(|d| d.as_bytes())
    }

    /// Own private key, DER. PKCS#8, SEC1 or PKCS#1, as given.
    pub fn key_der(&self) -> Option<&[u8]> {
        self.key.as_ref().map(|d| d.as_bytes())
    }
}

impl fmt::Debug for TrustMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustMaterial")
            .field("ca", &self.ca.is_some())
            .field("cert", &self.cert.is_some())
            .field("key", &self.key.is_some())
            .finish()
    }
}

fn is_pem(input: &[u8]) -> bool {
    input.trim_ascii_start().starts_with(PEM_PREFIX)
}

fn decode_certificate(input: &[u8]) -> Result<Document, SetupError> {
    let doc = if is_pem(input) {
        let text = std::str::from_utf8(input)
            .map_err(|_| SetupError::Certificate("PEM is not UTF-8".into()))?;
        let (label, doc) =
            Document::from_pem(text).map_err(|e| SetupError::Certificate(e.to_string()))?;
        if label != "CERTIFICATE" {
            return Err(SetupError::Certificate(format!(
                "unexpected PEM label: {}",
                label
            )));
        }
        doc
    } else {
        Document::try_from(input).map_err(|e| SetupError::Certificate(e.to_string()))?
    };

    Certificate::from_der(doc.as_bytes()).map_err(|e| SetupError::Certificate(e.to_string()))?;
    Ok(doc)
}

fn decode_key(input: &[u8]) -> Result<SecretDocument, SetupError> {
    if is_pem(input) {
        let text =
            std::str::from_utf8(input).map_err(|_| SetupError::Key("PEM is not UTF-8".into()))?;
        let (label, doc) =
            SecretDocument::from_pem(text).map_err(|e| SetupError::Key(e.to_string()))?;
        if !label.ends_with("PRIVATE KEY") || label.contains("ENCRYPTED") {
            return Err(SetupError::Key(format!("unsupported PEM label: {}", label)));
        }
        Ok(doc)
    } else {
        Document::try_from(input)
            .map(SecretDocument::from)
            .map_err(|e| SetupError::Key(e.to_string()))
    }
}
