//! Certificate Manager
//!
//! 🛡️ Owns the certificate lifecycle of every configured domain: on-demand
//! issuance behind the store, periodic renewal, and revocation checks.
//!
//! All issuance goes through one lock, so at most one order is in flight per
//! process. Lock order is always issuance lock, then store writer lock.

use crate::acme::{AcmeError, Issuer};
use crate::cert_store::{CertStore, CertStoreError};
use crate::ocsp::{OcspError, StatusChecker};
use crate::record::{CertificateError, CertificateRecord, unix_now};
use gate_core::DomainConfig;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Certificates closer than this to their not-after are renewed
pub const RENEW_BEFORE: Duration = Duration::from_secs(10 * 24 * 60 * 60);

/// Default time between two renewal passes
pub const DEFAULT_RENEWAL_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Certificate manager errors
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("🔐 Issuance error: {0}")]
    Acme(#[from] AcmeError),

    #[error("💾 Certificate store error: {0}")]
    CertStore(#[from] CertStoreError),

    #[error("📜 Certificate error: {0}")]
    Certificate(#[from] CertificateError),

    #[error("🩺 Verification failed: {0}")]
    Verify(#[from] OcspError),

    #[error("🔍 Domain not configured: {0}")]
    UnknownDomain(String),

    #[error("⚙️ Configuration error: {0}")]
    Config(String),
}

/// 🛡️ Certificate manager
pub struct CertManager {
    /// Configured domains by name
    domains: HashMap<String, DomainConfig>,
    /// Configuration order, used by preheat
    order: Vec<String>,
    store: Arc<CertStore>,
    issuer: Arc<dyn Issuer>,
    checker: Arc<dyn StatusChecker>,
    /// Serializes every issuance
    issuance: tokio::sync::Mutex<()>,
    renewal_interval: Duration,
    /// Cancels the running renewal task
    renewal: Mutex<Option<CancellationToken>>,
}

impl CertManager {
    /// 🚀 Create a new manager.
    ///
    /// Fails when the issuer cannot serve one of the domains, for example
    /// because its DNS provider is unknown.
    pub fn new(
        domains: &[DomainConfig],
        store: Arc<CertStore>,
        issuer: Arc<dyn Issuer>,
        checker: Arc<dyn StatusChecker>,
    ) -> Result<Self, ManagerError> {
        let mut by_name = HashMap::new();
        let mut order = Vec::new();

        for domain in domains {
            issuer
                .check(domain)
                .map_err(|e| ManagerError::Config(format!("domain {}: {}", domain.domain, e)))?;
            order.push(domain.domain.clone());
            by_name.insert(domain.domain.clone(), domain.clone());
        }

        tracing::info!("🛡️ Certificate manager ready for {} domain(s)", order.len());

        Ok(Self {
            domains: by_name,
            order,
            store,
            issuer,
            checker,
            issuance: tokio::sync::Mutex::new(()),
            renewal_interval: DEFAULT_RENEWAL_INTERVAL,
            renewal: Mutex::new(None),
        })
    }

    /// Set the time between renewal passes
    pub fn with_renewal_interval(mut self, interval: Duration) -> Self {
        self.renewal_interval = interval;
        self
    }

    fn domain(&self, domain: &str) -> Result<&DomainConfig, ManagerError> {
        self.domains
            .get(domain)
            .ok_or_else(|| ManagerError::UnknownDomain(domain.to_string()))
    }

    /// 📜 Certificate for `domain`, issuing it on a store miss
    pub async fn get(&self, domain: &str) -> Result<CertificateRecord, ManagerError> {
        let config = self.domain(domain)?;

        match self.store.get(domain).await {
            Ok(record) => return Ok(record),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        let _guard = self.issuance.lock().await;

        // Another task may have issued while we waited for the lock.
        match self.store.get(domain).await {
            Ok(record) => {
                tracing::debug!("✅ Certificate for {} issued concurrently", domain);
                return Ok(record);
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        let record = self.issue(config).await?;
        self.store.put(domain, record.clone()).await?;

        tracing::info!("🎉 Certificate ready for {}", domain);
        Ok(record)
    }

    /// 🔐 Issue a fresh certificate for `domain` without touching the store
    pub async fn obtain(&self, domain: &str) -> Result<CertificateRecord, ManagerError> {
        let config = self.domain(domain)?;
        let _guard = self.issuance.lock().await;
        self.issue(config).await
    }

    /// Caller holds the issuance lock
    async fn issue(&self, config: &DomainConfig) -> Result<CertificateRecord, ManagerError> {
        tracing::info!("🔐 Obtaining certificate for {}", config.domain);

        let issued = self.issuer.issue(config, &config.certificate_names()).await?;
        let record = CertificateRecord::new(issued.cert_pem, issued.key_pem, config.domain.clone());
        // Reject unusable material before it reaches the store.
        record.certified_key()?;

        Ok(record)
    }

    /// ⏰ Whether `record` should be replaced, with the reason when a check failed
    pub async fn need_renew(&self, record: &CertificateRecord) -> (bool, Option<ManagerError>) {
        let not_after = match record.not_after() {
            Ok(not_after) => not_after,
            Err(e) => return (true, Some(e.into())),
        };

        if not_after - unix_now() < RENEW_BEFORE.as_secs() as i64 {
            return (true, None);
        }

        match self.verify(record).await {
            Ok(()) => (false, None),
            Err(e) => (true, Some(e)),
        }
    }

    /// 🩺 Revocation check of `record`
    pub async fn verify(&self, record: &CertificateRecord) -> Result<(), ManagerError> {
        self.checker.verify(record).await?;
        Ok(())
    }

    /// 🔄 Renew every stored certificate that needs it.
    ///
    /// Replacements are committed together; if any renewal fails nothing is
    /// written. Returns the number of renewed certificates.
    pub async fn auto_renew_all(&self) -> Result<usize, ManagerError> {
        let _guard = self.issuance.lock().await;
        let mut txn = self.store.transaction().await;

        for key in txn.keys().await? {
            let record = match txn.get(&key).await {
                Ok(record) => record,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e.into()),
            };

            let Some(config) = self.domains.get(&key) else {
                tracing::info!("⏭️ Skipping certificate of unconfigured domain {}", key);
                continue;
            };

            match self.need_renew(&record).await {
                (false, _) => continue,
                (true, Some(reason)) => tracing::info!("🔄 Renewing certificate for {}: {}", key, reason),
                (true, None) => tracing::info!("⏰ Certificate for {} expires soon, renewing", key),
            }

            let fresh = self.issue(config).await?;
            txn.put(&key, fresh)?;
        }

        let renewed = match txn.pending() {
            0 => 0,
            _ => txn.commit().await?,
        };

        if renewed == 0 {
            tracing::info!("✅ All certificates up to date");
        } else {
            tracing::info!("🎉 Renewed {} certificate(s)", renewed);
        }
        Ok(renewed)
    }

    /// 🔥 Make sure every configured domain has a certificate, then run one
    /// renewal pass. Only the first part can fail.
    pub async fn preheat(&self) -> Result<(), ManagerError> {
        for domain in &self.order {
            self.get(domain).await?;
        }

        if let Err(e) = self.auto_renew_all().await {
            tracing::error!("❌ Renewal pass after preheat failed: {}", e);
        }
        Ok(())
    }

    /// 🔄 Start the periodic renewal task, replacing a running one
    pub fn start_renewal(self: &Arc<Self>) -> JoinHandle<()> {
        let token = CancellationToken::new();
        if let Some(previous) = self.renewal.lock().replace(token.clone()) {
            previous.cancel();
        }

        let manager = Arc::clone(self);
        let interval = self.renewal_interval;
        tracing::info!("🔄 Starting certificate renewal task (interval: {:?})", interval);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }

                tracing::info!("🔍 Running certificate renewal check...");
                if let Err(e) = manager.auto_renew_all().await {
                    tracing::error!("❌ Certificate renewal failed: {}", e);
                }
            }
            tracing::info!("🛑 Certificate renewal task stopped");
        })
    }

    /// 🛑 Stop the renewal task
    pub fn stop_renewal(&self) {
        if let Some(token) = self.renewal.lock().take() {
            token.cancel();
        }
    }
}
