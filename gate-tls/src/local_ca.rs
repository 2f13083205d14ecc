//! In-process certificate authority
//!
//! 🧪 Issues certificates without any network round trip. Used for local
//! development and tests; clients must trust [`LocalCaIssuer::ca_der`].

use crate::acme::{AcmeError, IssuedCertificate, Issuer};
use crate::der;
use crate::record::CertificateRecord;
use async_trait::async_trait;
use gate_core::DomainConfig;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, CustomExtension, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose, SerialNumber,
};
use rustls::pki_types::CertificateDer;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};
use time::OffsetDateTime;

/// id-pe-authorityInfoAccess
const OID_AUTHORITY_INFO_ACCESS: &[u64] = &[1, 3, 6, 1, 5, 5, 7, 1, 1];

const DEFAULT_VALIDITY: Duration = Duration::from_secs(90 * 24 * 60 * 60);

impl From<rcgen::Error> for AcmeError {
    fn from(e: rcgen::Error) -> Self {
        AcmeError::CertGeneration(e.to_string())
    }
}

/// 🏛️ Self-signed CA issuing leaf certificates on demand
pub struct LocalCaIssuer {
    ca_cert: Certificate,
    ca_key: KeyPair,
    /// Leaf lifetime
    validity: Duration,
    /// Responder URL written into each leaf's AIA extension
    ocsp_responder: Option<String>,
    /// Certificates issued so far, also the serial number source
    issued: AtomicU64,
}

impl LocalCaIssuer {
    /// Create a CA with a fresh key
    pub fn new() -> Result<Self, AcmeError> {
        let ca_key = KeyPair::generate()?;

        let mut params = CertificateParams::default();
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
        ];

        let mut name = DistinguishedName::new();
        name.push(DnType::CommonName, "Gate Local CA");
        name.push(DnType::OrganizationName, "Gate");
        params.distinguished_name = name;

        let now = OffsetDateTime::now_utc();
        params.not_before = now - time::Duration::days(1);
        params.not_after = now + time::Duration::days(3650);

        let ca_cert = params.self_signed(&ca_key)?;
        tracing::info!("🏛️ Local CA created");

        Ok(Self {
            ca_cert,
            ca_key,
            validity: DEFAULT_VALIDITY,
            ocsp_responder: None,
            issued: AtomicU64::new(0),
        })
    }

    /// Set the leaf certificate lifetime
    pub fn with_validity(mut self, validity: Duration) -> Self {
        self.validity = validity;
        self
    }

    /// Advertise an OCSP responder in every leaf issued from now on
    pub fn with_ocsp_responder(mut self, url: impl Into<String>) -> Self {
        self.ocsp_responder = Some(url.into());
        self
    }

    /// CA certificate (DER)
    pub fn ca_der(&self) -> CertificateDer<'static> {
        self.ca_cert.der().clone()
    }

    /// Number of certificates issued so far
    pub fn issued(&self) -> u64 {
        self.issued.load(Ordering::SeqCst)
    }

    /// Issue a record valid from now for the configured lifetime
    pub fn issue_record(&self, domain: &str, names: &[String]) -> Result<CertificateRecord, AcmeError> {
        self.issue_record_until(domain, names, SystemTime::now() + self.validity)
    }

    /// Issue a record whose leaf expires at `not_after`, which may lie in the past
    pub fn issue_record_until(
        &self,
        domain: &str,
        names: &[String],
        not_after: SystemTime,
    ) -> Result<CertificateRecord, AcmeError> {
        let issued = self.sign(domain, names, OffsetDateTime::from(not_after))?;
        Ok(CertificateRecord::new(issued.cert_pem, issued.key_pem, domain))
    }

    fn sign(&self, domain: &str, names: &[String], not_after: OffsetDateTime) -> Result<IssuedCertificate, AcmeError> {
        let serial = self.issued.fetch_add(1, Ordering::SeqCst) + 1;

        let mut params = CertificateParams::new(names.to_vec())?;
        params.is_ca = IsCa::NoCa;
        params.use_authority_key_identifier_extension = true;
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature, KeyUsagePurpose::KeyEncipherment];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

        let mut name = DistinguishedName::new();
        name.push(DnType::CommonName, domain);
        params.distinguished_name = name;

        // Non-zero leading byte keeps the DER INTEGER minimal and positive.
        let mut serial_bytes = vec![0x47];
        serial_bytes.extend_from_slice(&serial.to_be_bytes());
        params.serial_number = Some(SerialNumber::from_slice(&serial_bytes));

        params.not_before = not_after.min(OffsetDateTime::now_utc()) - time::Duration::hours(1);
        params.not_after = not_after;

        if let Some(url) = &self.ocsp_responder {
            params.custom_extensions.push(CustomExtension::from_oid_content(
                OID_AUTHORITY_INFO_ACCESS,
                authority_info_access(url),
            ));
        }

        let key = KeyPair::generate()?;
        let cert = params.signed_by(&key, &self.ca_cert, &self.ca_key)?;
        tracing::debug!("📜 Local CA issued certificate #{} for {:?}", serial, names);

        Ok(IssuedCertificate {
            cert_pem: format!("{}{}", cert.pem(), self.ca_cert.pem()),
            key_pem: key.serialize_pem(),
        })
    }
}

#[async_trait]
impl Issuer for LocalCaIssuer {
    async fn issue(&self, domain: &DomainConfig, names: &[String]) -> Result<IssuedCertificate, AcmeError> {
        let not_after = OffsetDateTime::from(SystemTime::now() + self.validity);
        self.sign(&domain.domain, names, not_after)
    }
}

/// AuthorityInfoAccessSyntax with a single OCSP access description
fn authority_info_access(url: &str) -> Vec<u8> {
    let location = der::tlv(der::context_primitive(6), url.as_bytes());
    let description = der::sequence(&[&der::oid(der::OID_OCSP), &location]);
    der::sequence(&[&description])
}
