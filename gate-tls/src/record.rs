//! Issued certificate records
//!
//! 📜 A record keeps the PEM material exactly as the issuer returned it; the
//! parsed forms are derived on demand.

use rustls::pki_types::CertificateDer;
use rustls::sign::CertifiedKey;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use x509_parser::certificate::X509Certificate;
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::FromDer;

/// Certificate parsing errors
#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("🔍 No certificate found in PEM bundle")]
    Empty,

    #[error("⚠️ Invalid PEM data: {0}")]
    Pem(#[from] std::io::Error),

    #[error("⚠️ Invalid X.509 certificate: {0}")]
    X509(String),

    #[error("🔑 No private key found in PEM data")]
    NoKey,

    #[error("🔑 Unsupported private key type")]
    UnsupportedKey,
}

/// 📜 Certificate chain and key for one configured domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRecord {
    /// Certificate chain (PEM), leaf first
    pub certificate: String,
    /// Private key (PEM)
    pub private_key: String,
    /// Name of the owning domain configuration
    pub domain: String,
}

impl CertificateRecord {
    pub fn new(certificate: impl Into<String>, private_key: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            certificate: certificate.into(),
            private_key: private_key.into(),
            domain: domain.into(),
        }
    }

    /// DER encoded chain, leaf first
    pub fn chain(&self) -> Result<Vec<CertificateDer<'static>>, CertificateError> {
        let chain = rustls_pemfile::certs(&mut self.certificate.as_bytes())
            .collect::<Result<Vec<_>, _>>()?;

        if chain.is_empty() {
            return Err(CertificateError::Empty);
        }
        Ok(chain)
    }

    /// ⏰ Expiry of the leaf certificate (Unix seconds)
    pub fn not_after(&self) -> Result<i64, CertificateError> {
        let chain = self.chain()?;
        let leaf = parse_certificate(&chain[0])?;
        Ok(leaf.validity().not_after.timestamp())
    }

    /// DNS names covered by the leaf certificate
    pub fn dns_names(&self) -> Result<Vec<String>, CertificateError> {
        let chain = self.chain()?;
        let leaf = parse_certificate(&chain[0])?;

        let names = match leaf.subject_alternative_name() {
            Ok(Some(san)) => san
                .value
                .general_names
                .iter()
                .filter_map(|name| match name {
                    GeneralName::DNSName(dns) => Some(dns.to_string()),
                    _ => None,
                })
                .collect(),
            Ok(None) => Vec::new(),
            Err(e) => return Err(CertificateError::X509(e.to_string())),
        };

        Ok(names)
    }

    /// 🔐 Convert to a rustls signing identity
    pub fn certified_key(&self) -> Result<CertifiedKey, CertificateError> {
        let certs = self.chain()?;

        let key = rustls_pemfile::private_key(&mut self.private_key.as_bytes())?
            .ok_or(CertificateError::NoKey)?;

        let signing_key = rustls::crypto::ring::sign::any_supported_type(&key)
            .map_err(|_| CertificateError::UnsupportedKey)?;

        Ok(CertifiedKey::new(certs, signing_key))
    }
}

/// Parse one DER certificate
pub(crate) fn parse_certificate<'a>(der: &'a CertificateDer<'_>) -> Result<X509Certificate<'a>, CertificateError> {
    let (_, cert) = X509Certificate::from_der(der.as_ref())
        .map_err(|e| CertificateError::X509(e.to_string()))?;
    Ok(cert)
}

/// Current Unix time in seconds
pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local_ca::LocalCaIssuer;
    use std::time::Duration;

    #[test]
    fn test_derived_fields() {
        let ca = LocalCaIssuer::new().unwrap();
        let record = ca.issue_record("test.com", &["test.com".into(), "*.test.com".into()]).unwrap();

        assert_eq!(record.chain().unwrap().len(), 2);
        assert_eq!(record.dns_names().unwrap(), vec!["test.com", "*.test.com"]);

        let remaining = record.not_after().unwrap() - unix_now();
        let validity = Duration::from_secs(90 * 24 * 60 * 60).as_secs() as i64;
        assert!((validity - 120..=validity + 120).contains(&remaining));

        assert!(record.certified_key().is_ok());
    }

    #[test]
    fn test_invalid_material() {
        let record = CertificateRecord::new("garbage", "garbage", "test.com");
        assert!(matches!(record.chain(), Err(CertificateError::Empty)));

        let ca = LocalCaIssuer::new().unwrap();
        let mut record = ca.issue_record("test.com", &["test.com".into()]).unwrap();
        record.private_key = String::new();
        assert!(matches!(record.certified_key(), Err(CertificateError::NoKey)));
    }
}
