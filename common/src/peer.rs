use sha2::{Digest, Sha256};
use x509_parser::parse_x509_certificate;

use crate::error::{Error, Result};

/// What we record about the certificate a peer authenticated with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerCertificate {
    /// Subject distinguished name, e.g. `CN=localhost, O=Example`
    pub subject:     String,
    /// Hex SHA-256 over the DER encoding
    pub fingerprint: String,
}

impl PeerCertificate {
    /// Parses a DER leaf certificate. An empty subject counts as no
    /// certificate at all.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (_, cert) = parse_x509_certificate(der)
            .map_err(|e| Error::Handshake(format!("unparsable peer certificate: {e}")))?;

        let subject = cert.subject().to_string();
        if subject.trim().is_empty() {
            return Err(Error::Handshake("peer certificate has an empty subject".into()));
        }

        Ok(Self {
            subject,
            fingerprint: hex::encode(Sha256::digest(der)),
        })
    }
}
