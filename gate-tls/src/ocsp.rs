//! OCSP revocation checks
//!
//! 🩺 Asks a certificate's OCSP responder whether the leaf is still good.
//! Requests identify the leaf by a SHA-1 CertID, which every public responder
//! accepts.
//!
//! The responder's signature is not verified: a forged "good" answer can only
//! postpone a renewal until the certificate nears expiry.

use crate::der::{self, DerError, Reader};
use crate::record::{CertificateError, CertificateRecord, parse_certificate};
use async_trait::async_trait;
use sha1::{Digest, Sha1};
use std::time::Duration;
use thiserror::Error;
use x509_parser::certificate::X509Certificate;
use x509_parser::extensions::{GeneralName, ParsedExtension};

/// Revocation status reported by a responder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertStatus {
    Good,
    Revoked,
    Unknown,
}

impl std::fmt::Display for CertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CertStatus::Good => write!(f, "good"),
            CertStatus::Revoked => write!(f, "revoked"),
            CertStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// OCSP error types
#[derive(Debug, Error)]
pub enum OcspError {
    #[error("📜 {0}")]
    Certificate(#[from] CertificateError),

    #[error("🔍 Certificate chain has no issuer certificate")]
    NoIssuer,

    #[error("🔍 Certificate does not name an OCSP responder")]
    NoResponder,

    #[error("🌐 OCSP request failed: {0}")]
    Http(String),

    #[error("❌ OCSP responder refused the request (status {0})")]
    Refused(u8),

    #[error("⚠️ Unsupported OCSP response type")]
    UnsupportedResponse,

    #[error("⚠️ Invalid OCSP response: {0}")]
    Malformed(#[from] DerError),

    #[error("🔍 OCSP response does not cover the certificate")]
    NoMatchingResponse,

    #[error("🚫 Certificate status is {0}")]
    NotGood(CertStatus),
}

/// Checks whether a stored certificate is still trustworthy
#[async_trait]
pub trait StatusChecker: Send + Sync {
    /// `Ok` only when the certificate is positively known to be good
    async fn verify(&self, record: &CertificateRecord) -> Result<(), OcspError>;
}

/// 🩺 OCSP status checker over HTTP
#[derive(Debug, Clone)]
pub struct OcspChecker {
    client: reqwest::Client,
    timeout: Duration,
}

impl OcspChecker {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(10),
        }
    }

    /// Set the per-request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Query the responder for the leaf of `record`
    pub async fn status(&self, record: &CertificateRecord) -> Result<CertStatus, OcspError> {
        let chain = record.chain()?;
        let (url, request, serial) = {
            let leaf = chain.first().ok_or(CertificateError::Empty)?;
            let issuer = chain.get(1).ok_or(OcspError::NoIssuer)?;
            let leaf = parse_certificate(leaf)?;
            let issuer = parse_certificate(issuer)?;

            let url = responder_url(&leaf).ok_or(OcspError::NoResponder)?;
            (url, build_request(&leaf, &issuer), leaf.raw_serial().to_vec())
        };

        tracing::debug!("🩺 Checking OCSP status of {} at {}", record.domain, url);
        let body = self.post(&url, request).await?;
        parse_response(&body, &serial)
    }

    async fn post(&self, url: &str, request: Vec<u8>) -> Result<Vec<u8>, OcspError> {
        let response = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/ocsp-request")
            .timeout(self.timeout)
            .body(request)
            .send()
            .await
            .map_err(|e| OcspError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(OcspError::Http(format!(
                "OCSP responder returned status: {}",
                response.status()
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| OcspError::Http(format!("Failed to read OCSP response: {}", e)))?;
        Ok(body.to_vec())
    }
}

impl Default for OcspChecker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StatusChecker for OcspChecker {
    async fn verify(&self, record: &CertificateRecord) -> Result<(), OcspError> {
        match self.status(record).await? {
            CertStatus::Good => Ok(()),
            status => Err(OcspError::NotGood(status)),
        }
    }
}

/// OCSP responder URL from the Authority Information Access extension
pub fn responder_url(cert: &X509Certificate<'_>) -> Option<String> {
    let aia = cert
        .extensions()
        .iter()
        .find(|ext| ext.oid == oid_registry::OID_PKIX_AUTHORITY_INFO_ACCESS)?;

    let ParsedExtension::AuthorityInfoAccess(aia) = aia.parsed_extension() else {
        return None;
    };

    aia.accessdescs
        .iter()
        .filter(|access| access.access_method == oid_registry::OID_PKIX_ACCESS_DESCRIPTOR_OCSP)
        .find_map(|access| match &access.access_location {
            GeneralName::URI(url) => Some(url.to_string()),
            _ => None,
        })
}

/// DER encoded OCSPRequest for a single certificate
pub fn build_request(leaf: &X509Certificate<'_>, issuer: &X509Certificate<'_>) -> Vec<u8> {
    let name_hash = Sha1::digest(issuer.subject().as_raw());
    let key_hash = Sha1::digest(issuer.public_key().subject_public_key.data.as_ref());

    let hash_algorithm = der::sequence(&[&der::oid(der::OID_SHA1), &der::null()]);
    let cert_id = der::sequence(&[
        &hash_algorithm,
        &der::octet_string(&name_hash),
        &der::octet_string(&key_hash),
        &der::integer(leaf.raw_serial()),
    ]);

    let request = der::sequence(&[&cert_id]);
    let request_list = der::sequence(&[&request]);
    let tbs_request = der::sequence(&[&request_list]);
    der::sequence(&[&tbs_request])
}

/// Status of the certificate with `serial` in a DER encoded OCSPResponse
pub fn parse_response(body: &[u8], serial: &[u8]) -> Result<CertStatus, OcspError> {
    let mut response = Reader::new(Reader::new(body).expect(der::TAG_SEQUENCE)?);

    match response.expect(der::TAG_ENUMERATED)? {
        [0] => {}
        [code] => return Err(OcspError::Refused(*code)),
        _ => return Err(DerError("response status").into()),
    }

    let response_bytes = response.expect(der::context(0))?;
    let mut response_bytes = Reader::new(Reader::new(response_bytes).expect(der::TAG_SEQUENCE)?);
    if response_bytes.expect(der::TAG_OID)? != der::OID_OCSP_BASIC {
        return Err(OcspError::UnsupportedResponse);
    }

    let basic = response_bytes.expect(der::TAG_OCTET_STRING)?;
    let mut basic = Reader::new(Reader::new(basic).expect(der::TAG_SEQUENCE)?);
    let mut tbs = Reader::new(basic.expect(der::TAG_SEQUENCE)?);

    tbs.skip_if(der::context(0))?;
    let responder_id = tbs.next()?;
    if responder_id.tag != der::context(1) && responder_id.tag != der::context(2) {
        return Err(DerError("responder id").into());
    }
    tbs.expect(der::TAG_GENERALIZED_TIME)?;

    let wanted = der::integer_magnitude(serial);
    let mut responses = Reader::new(tbs.expect(der::TAG_SEQUENCE)?);
    while !responses.is_empty() {
        let mut single = Reader::new(responses.expect(der::TAG_SEQUENCE)?);

        let mut cert_id = Reader::new(single.expect(der::TAG_SEQUENCE)?);
        cert_id.expect(der::TAG_SEQUENCE)?;
        cert_id.expect(der::TAG_OCTET_STRING)?;
        cert_id.expect(der::TAG_OCTET_STRING)?;
        if der::integer_magnitude(cert_id.expect(der::TAG_INTEGER)?) != wanted {
            continue;
        }

        let status = single.next()?;
        return match status.tag {
            tag if tag == der::context_primitive(0) => Ok(CertStatus::Good),
            tag if tag == der::context(1) => Ok(CertStatus::Revoked),
            tag if tag == der::context_primitive(2) => Ok(CertStatus::Unknown),
            _ => Err(DerError("certificate status").into()),
        };
    }

    Err(OcspError::NoMatchingResponse)
}
