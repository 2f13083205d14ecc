//! Gate TLS Module
//!
//! Certificate lifecycle for the gateway:
//! - Certificate storage
//! - ACME issuance over DNS-01
//! - Revocation checks (OCSP)
//! - Automatic renewal

pub mod acme;
pub mod cert_store;
mod der;
pub mod dns;
pub mod local_ca;
pub mod manager;
pub mod ocsp;
pub mod record;

pub use acme::{AcmeError, AcmeIssuer, IssuedCertificate, Issuer};
pub use cert_store::{CertStore, CertStoreError, Transaction};
pub use dns::{DnsError, DnsProvider, ExecProvider, ProviderRegistry};
pub use local_ca::LocalCaIssuer;
pub use manager::{CertManager, ManagerError};
pub use ocsp::{CertStatus, OcspChecker, OcspError, StatusChecker};
pub use record::{CertificateError, CertificateRecord};
