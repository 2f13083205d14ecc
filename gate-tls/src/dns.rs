//! DNS-01 challenge providers
//!
//! 📡 A provider publishes and removes the `_acme-challenge` TXT records that
//! prove control of a domain. Providers are looked up by the name configured
//! on each domain and built from that domain's token.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// DNS provider errors
#[derive(Debug, Error)]
pub enum DnsError {
    #[error("🔍 Unknown DNS provider: {0}")]
    UnknownProvider(String),

    #[error("⚙️ Invalid DNS provider configuration: {0}")]
    Config(String),

    #[error("💥 DNS provider command failed: {0}")]
    Command(String),

    #[error("💥 IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Publishes DNS-01 challenge records
#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// 🚀 Publish a TXT record `value` at `fqdn`
    async fn present(&self, fqdn: &str, value: &str) -> Result<(), DnsError>;

    /// 🧹 Remove a TXT record previously published by `present`
    async fn cleanup(&self, fqdn: &str, value: &str) -> Result<(), DnsError>;
}

/// Builds a provider from a domain's token
pub type ProviderFactory = Arc<dyn Fn(&str) -> Result<Arc<dyn DnsProvider>, DnsError> + Send + Sync>;

/// 📒 Provider name to factory mapping
#[derive(Clone)]
pub struct ProviderRegistry {
    factories: HashMap<String, ProviderFactory>,
}

impl ProviderRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// A registry with the built-in providers
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(ExecProvider::NAME, |token| {
            Ok(Arc::new(ExecProvider::new(token)?) as Arc<dyn DnsProvider>)
        });
        registry
    }

    /// Register a provider, replacing any previous one with the same name
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&str) -> Result<Arc<dyn DnsProvider>, DnsError> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered provider names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Build the provider `name` with `token`
    pub fn create(&self, name: &str, token: &str) -> Result<Arc<dyn DnsProvider>, DnsError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| DnsError::UnknownProvider(name.to_string()))?;
        factory(token)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .finish()
    }
}

/// 🔧 Delegates record changes to an external program.
///
/// The domain's token is the program path. It is run as
/// `<program> present <fqdn> <value>` and `<program> cleanup <fqdn> <value>`
/// and must exit with status zero.
#[derive(Debug, Clone)]
pub struct ExecProvider {
    program: PathBuf,
}

impl ExecProvider {
    pub const NAME: &'static str = "exec";

    pub fn new(token: &str) -> Result<Self, DnsError> {
        let program = token.trim();
        if program.is_empty() {
            return Err(DnsError::Config(
                "exec provider needs the hook program path as its token".to_string(),
            ));
        }

        Ok(Self {
            program: PathBuf::from(program),
        })
    }

    async fn run(&self, action: &str, fqdn: &str, value: &str) -> Result<(), DnsError> {
        tracing::debug!("📡 Running {:?} {} {}", self.program, action, fqdn);

        let output = tokio::process::Command::new(&self.program)
            .arg(action)
            .arg(fqdn)
            .arg(value)
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DnsError::Command(format!(
                "{:?} {} {} exited with {}: {}",
                self.program,
                action,
                fqdn,
                output.status,
                stderr.trim()
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl DnsProvider for ExecProvider {
    async fn present(&self, fqdn: &str, value: &str) -> Result<(), DnsError> {
        self.run("present", fqdn, value).await
    }

    async fn cleanup(&self, fqdn: &str, value: &str) -> Result<(), DnsError> {
        self.run("cleanup", fqdn, value).await
    }
}
