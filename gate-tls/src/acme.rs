//! ACME certificate issuance using instant-acme
//!
//! 🔐 Certificates are obtained with the DNS-01 challenge, so a single order
//! can cover a domain together with its wildcard.

use crate::dns::{DnsError, DnsProvider, ProviderRegistry};
use async_trait::async_trait;
use gate_core::DomainConfig;
use instant_acme::{
    Account, AuthorizationStatus, ChallengeType, Identifier, NewAccount, NewOrder, OrderStatus,
    RetryPolicy,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// ACME directory URLs
pub mod directory {
    /// 🏭 Let's Encrypt Production - for real certificates
    pub const LETS_ENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";
}

/// Issuance error types
#[derive(Debug, Error)]
pub enum AcmeError {
    #[error("🔴 ACME protocol error: {0}")]
    Protocol(#[from] instant_acme::Error),

    #[error("📡 DNS challenge error: {0}")]
    Dns(#[from] DnsError),

    #[error("⚠️ Challenge failed: {0}")]
    ChallengeFailed(String),

    #[error("❌ Order failed: {0}")]
    OrderFailed(String),

    #[error("🔧 Certificate generation error: {0}")]
    CertGeneration(String),

    #[error("👤 Account error: {0}")]
    Account(String),
}

/// 📜 Certificate material as returned by an issuer
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    /// Certificate chain (PEM), leaf first
    pub cert_pem: String,
    /// Private key (PEM)
    pub key_pem: String,
}

/// Something that can produce a certificate for a configured domain
#[async_trait]
pub trait Issuer: Send + Sync {
    /// Obtain a certificate covering `names` for `domain`
    async fn issue(&self, domain: &DomainConfig, names: &[String]) -> Result<IssuedCertificate, AcmeError>;

    /// Reject domain settings this issuer can never serve
    fn check(&self, _domain: &DomainConfig) -> Result<(), AcmeError> {
        Ok(())
    }
}

/// Record name that carries the DNS-01 answer for `name`
pub fn challenge_record_name(name: &str) -> String {
    format!("_acme-challenge.{}", name.trim_start_matches("*."))
}

/// 🔐 ACME issuer answering DNS-01 challenges through DNS providers
pub struct AcmeIssuer {
    /// DNS providers by name
    providers: Arc<ProviderRegistry>,
    /// Wait between publishing TXT records and answering the challenge
    propagation_delay: Duration,
    /// Polling policy for order state changes
    retry_policy: RetryPolicy,
}

impl AcmeIssuer {
    /// 🏭 Create a new ACME issuer
    pub fn new(providers: Arc<ProviderRegistry>) -> Self {
        Self {
            providers,
            propagation_delay: Duration::from_secs(30),
            retry_policy: RetryPolicy::default(),
        }
    }

    /// ⏳ Set the DNS propagation delay
    pub fn with_propagation_delay(mut self, delay: Duration) -> Self {
        self.propagation_delay = delay;
        self
    }

    fn directory_url(domain: &DomainConfig) -> &str {
        match domain.ca_dir_url.as_deref() {
            Some(url) if !url.is_empty() => url,
            _ => directory::LETS_ENCRYPT_PRODUCTION,
        }
    }

    async fn create_account(&self, domain: &DomainConfig) -> Result<Account, AcmeError> {
        let directory_url = Self::directory_url(domain);
        tracing::info!("👤 Creating ACME account for {} at {}", domain.domain, directory_url);

        let builder = Account::builder()
            .map_err(|e| AcmeError::Account(format!("Failed to create account builder: {}", e)))?;

        let contact: Vec<String> = match domain.mail.trim() {
            "" => Vec::new(),
            mail => vec![format!("mailto:{}", mail)],
        };
        let contact_refs: Vec<&str> = contact.iter().map(|s| s.as_str()).collect();

        let new_account = NewAccount {
            contact: &contact_refs,
            terms_of_service_agreed: true,
            only_return_existing: false,
        };

        let (account, _credentials) = builder
            .create(&new_account, directory_url.to_string(), None)
            .await
            .map_err(|e| AcmeError::Account(format!("Failed to create account: {}", e)))?;

        Ok(account)
    }
}

#[async_trait]
impl Issuer for AcmeIssuer {
    async fn issue(&self, domain: &DomainConfig, names: &[String]) -> Result<IssuedCertificate, AcmeError> {
        tracing::info!("🔐 Obtain certificate for domains: {:?}", names);

        let dns = self.providers.create(&domain.provider, &domain.token)?;
        let account = self.create_account(domain).await?;

        let identifiers: Vec<Identifier> = names.iter().map(|d| Identifier::Dns(d.clone())).collect();

        tracing::info!("📝 Creating certificate order...");
        let mut order = account
            .new_order(&NewOrder::new(&identifiers))
            .await
            .map_err(|e| AcmeError::OrderFailed(format!("Failed to create order: {}", e)))?;

        // Published records, removed again whatever the outcome.
        let mut published: Vec<(String, String)> = Vec::new();
        let result: Result<OrderStatus, AcmeError> = async {
            let mut records = Vec::new();
            {
                let mut authorizations = order.authorizations();
                while let Some(auth) = authorizations.next().await {
                    let mut auth = auth
                        .map_err(|e| AcmeError::OrderFailed(format!("Failed to get authorization: {}", e)))?;

                    if auth.status == AuthorizationStatus::Valid {
                        tracing::info!("✅ Authorization already valid");
                        continue;
                    }

                    let name = auth.identifier().to_string();
                    let challenge = auth.challenge(ChallengeType::Dns01).ok_or_else(|| {
                        AcmeError::ChallengeFailed(format!("No DNS-01 challenge available for {}", name))
                    })?;
                    records.push((challenge_record_name(&name), challenge.key_authorization().dns_value()));
                }
            }

            publish_records(dns.as_ref(), &records, self.propagation_delay, &mut published).await?;

            // Challenges are answered only once every record had time to propagate.
            {
                let mut authorizations = order.authorizations();
                while let Some(auth) = authorizations.next().await {
                    let mut auth = auth
                        .map_err(|e| AcmeError::OrderFailed(format!("Failed to get authorization: {}", e)))?;
                    if auth.status == AuthorizationStatus::Valid {
                        continue;
                    }

                    let name = auth.identifier().to_string();
                    let mut challenge = auth.challenge(ChallengeType::Dns01).ok_or_else(|| {
                        AcmeError::ChallengeFailed(format!("No DNS-01 challenge available for {}", name))
                    })?;
                    challenge
                        .set_ready()
                        .await
                        .map_err(|e| AcmeError::ChallengeFailed(format!("Failed to set challenge ready: {}", e)))?;
                }
            }

            tracing::info!("⏳ Waiting for order to become ready...");
            order
                .poll_ready(&self.retry_policy)
                .await
                .map_err(|e| AcmeError::ChallengeFailed(format!("Order validation failed: {}", e)))
        }
        .await;

        cleanup_records(dns.as_ref(), &published).await;
        let status = result?;

        if status != OrderStatus::Ready && status != OrderStatus::Valid {
            return Err(AcmeError::OrderFailed(format!(
                "Order status is {:?} (not Ready or Valid)",
                status
            )));
        }

        tracing::info!("🔧 Finalizing order and generating certificate...");
        let key_pem = order
            .finalize()
            .await
            .map_err(|e| AcmeError::OrderFailed(format!("Failed to finalize order: {}", e)))?;

        let cert_pem = order
            .poll_certificate(&self.retry_policy)
            .await
            .map_err(|e| AcmeError::OrderFailed(format!("Failed to get certificate: {}", e)))?;

        tracing::info!("🎉 Certificate obtained successfully for {:?}!", names);
        Ok(IssuedCertificate { cert_pem, key_pem })
    }

    fn check(&self, domain: &DomainConfig) -> Result<(), AcmeError> {
        if !self.providers.contains(&domain.provider) {
            return Err(DnsError::UnknownProvider(domain.provider.clone()).into());
        }
        Ok(())
    }
}

/// Publish every challenge record, then wait once for propagation.
///
/// Each record is appended to `published` as soon as it exists, so a
/// failure halfway still leaves the caller able to clean up.
async fn publish_records(
    dns: &dyn DnsProvider,
    records: &[(String, String)],
    propagation_delay: Duration,
    published: &mut Vec<(String, String)>,
) -> Result<(), AcmeError> {
    for (fqdn, value) in records {
        dns.present(fqdn, value).await?;
        published.push((fqdn.clone(), value.clone()));
        tracing::info!("🚀 Challenge record published at {}", fqdn);
    }

    if !records.is_empty() {
        tracing::info!("⏳ Waiting {:?} for DNS propagation", propagation_delay);
        tokio::time::sleep(propagation_delay).await;
    }
    Ok(())
}

async fn cleanup_records(dns: &dyn DnsProvider, published: &[(String, String)]) {
    for (fqdn, value) in published {
        if let Err(e) = dns.cleanup(fqdn, value).await {
            tracing::warn!("⚠️ Failed to remove challenge record at {}: {}", fqdn, e);
        }
    }
}
