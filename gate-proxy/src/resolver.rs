//! Hostname resolution
//!
//! 🔍 Turns the server name of a ClientHello into the backend destination and
//! the TLS identity to present: cache first, otherwise domain lookup, route
//! match and certificate fetch.

use crate::routing_cache::RoutingCache;
use async_trait::async_trait;
use gate_core::GatewayConfig;
use gate_core::router::normalize_host;
use gate_tls::{CertManager, CertificateError, CertificateRecord, ManagerError};
use rustls::ServerConfig;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use std::sync::Arc;
use thiserror::Error;

/// Resolution errors, each rejecting one handshake
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("🔍 ClientHello carries no server name")]
    MissingServerName,

    #[error("🔍 No domain configured for {0}")]
    UnknownHost(String),

    #[error("🧭 No route matches {0}")]
    NoRoute(String),

    #[error("🔐 Certificate unavailable for {domain}: {source}")]
    Certificate {
        domain: String,
        #[source]
        source: ManagerError,
    },

    #[error("📜 Unusable certificate: {0}")]
    Key(#[from] CertificateError),

    #[error("🔒 TLS configuration error: {0}")]
    Tls(#[from] rustls::Error),
}

/// Where certificates come from
#[async_trait]
pub trait CertificateSource: Send + Sync {
    async fn certificate(&self, domain: &str) -> Result<CertificateRecord, ManagerError>;
}

#[async_trait]
impl CertificateSource for CertManager {
    async fn certificate(&self, domain: &str) -> Result<CertificateRecord, ManagerError> {
        self.get(domain).await
    }
}

/// ✅ Outcome of resolving one hostname
#[derive(Debug)]
pub struct Resolution {
    /// Owning configured domain
    pub domain: String,
    /// Backend address
    pub destination: String,
    pub certified_key: Arc<CertifiedKey>,
    /// Server configuration presenting `certified_key`
    pub server_config: Arc<ServerConfig>,
}

/// 🔍 Resolves server names through the routing cache
pub struct Resolver {
    config: Arc<GatewayConfig>,
    certificates: Arc<dyn CertificateSource>,
    cache: RoutingCache,
}

impl Resolver {
    pub fn new(config: Arc<GatewayConfig>, certificates: Arc<dyn CertificateSource>) -> Self {
        let cache = RoutingCache::new(config.routing_cache_ttl());
        Self {
            config,
            certificates,
            cache,
        }
    }

    pub fn cache(&self) -> &RoutingCache {
        &self.cache
    }

    /// Resolve `server_name`, consulting the cache first
    pub async fn resolve(&self, server_name: &str) -> Result<Arc<Resolution>, ResolveError> {
        let host = normalize_host(server_name);
        if let Some(resolution) = self.cache.get(&host) {
            tracing::debug!("🚀 Routing cache hit for {}", host);
            return Ok(resolution);
        }

        let domain = self
            .config
            .domain_for(&host)
            .ok_or_else(|| ResolveError::UnknownHost(host.clone()))?;
        let subdomain = domain
            .subdomain_of(&host)
            .ok_or_else(|| ResolveError::UnknownHost(host.clone()))?;
        let route = domain
            .route_for(subdomain)
            .ok_or_else(|| ResolveError::NoRoute(host.clone()))?;

        let record = self
            .certificates
            .certificate(&domain.domain)
            .await
            .map_err(|source| ResolveError::Certificate {
                domain: domain.domain.clone(),
                source,
            })?;

        let certified_key = Arc::new(record.certified_key()?);
        let server_config = server_config(Arc::new(FixedCert(certified_key.clone())))?;

        let resolution = Arc::new(Resolution {
            domain: domain.domain.clone(),
            destination: route.destination.clone(),
            certified_key,
            server_config,
        });

        tracing::debug!("🔍 Resolved {} -> {}", host, resolution.destination);
        self.cache.insert(host, resolution.clone());
        Ok(resolution)
    }
}

/// Server configuration on the ring provider with `resolver` picking the identity
pub(crate) fn server_config(resolver: Arc<dyn ResolvesServerCert>) -> Result<Arc<ServerConfig>, rustls::Error> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_cert_resolver(resolver);
    Ok(Arc::new(config))
}

/// Presents one fixed identity
#[derive(Debug)]
struct FixedCert(Arc<CertifiedKey>);

impl ResolvesServerCert for FixedCert {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        Some(self.0.clone())
    }
}

/// Presents nothing, failing the handshake
#[derive(Debug)]
pub(crate) struct NoCertificate;

impl ResolvesServerCert for NoCertificate {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        None
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use gate_core::{DomainConfig, Route, Selector};
    use gate_tls::LocalCaIssuer;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Resolution with a throwaway certificate
    pub(crate) fn resolution(destination: &str) -> Arc<Resolution> {
        let ca = LocalCaIssuer::new().unwrap();
        let record = ca.issue_record("test.com", &["test.com".into()]).unwrap();
        let certified_key = Arc::new(record.certified_key().unwrap());
        Arc::new(Resolution {
            domain: "test.com".to_string(),
            destination: destination.to_string(),
            certified_key: certified_key.clone(),
            server_config: server_config(Arc::new(FixedCert(certified_key))).unwrap(),
        })
    }

    /// Local CA backed source counting fetches
    struct CountingSource {
        ca: LocalCaIssuer,
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl CertificateSource for CountingSource {
        async fn certificate(&self, domain: &str) -> Result<CertificateRecord, ManagerError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let names = vec![domain.to_string(), format!("*.{}", domain)];
            Ok(self.ca.issue_record(domain, &names)?)
        }
    }

    fn config() -> Arc<GatewayConfig> {
        Arc::new(GatewayConfig {
            domains: vec![DomainConfig {
                domain: "test.com".to_string(),
                mail: String::new(),
                provider: "exec".to_string(),
                token: String::new(),
                ca_dir_url: None,
                routes: vec![
                    Route {
                        priority: 0,
                        selector: Selector::exact("svc"),
                        destination: "127.0.0.1:9000".to_string(),
                    },
                    Route {
                        priority: 0,
                        selector: Selector::pattern("api-[0-9]+").unwrap(),
                        destination: "127.0.0.1:9001".to_string(),
                    },
                ],
            }],
            routing_cache_ttl_secs: 300,
            ..Default::default()
        })
    }

    fn resolver() -> (Resolver, Arc<CountingSource>) {
        let source = Arc::new(CountingSource {
            ca: LocalCaIssuer::new().unwrap(),
            fetches: AtomicUsize::new(0),
        });
        (Resolver::new(config(), source.clone()), source)
    }

    #[tokio::test]
    async fn test_resolve_routes() {
        let (resolver, _) = resolver();

        let svc = resolver.resolve("SVC.test.com.").await.unwrap();
        assert_eq!(svc.domain, "test.com");
        assert_eq!(svc.destination, "127.0.0.1:9000");

        let api = resolver.resolve("api-42.test.com").await.unwrap();
        assert_eq!(api.destination, "127.0.0.1:9001");
    }

    #[tokio::test]
    async fn test_resolve_failures_skip_certificates() {
        let (resolver, source) = resolver();

        assert!(matches!(
            resolver.resolve("other.org").await,
            Err(ResolveError::UnknownHost(_))
        ));
        assert!(matches!(
            resolver.resolve("other.test.com").await,
            Err(ResolveError::NoRoute(_))
        ));
        assert_eq!(source.fetches.load(Ordering::SeqCst), 0);
        assert!(resolver.cache().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_ttl_bounds_certificate_fetches() {
        let (resolver, source) = resolver();

        resolver.resolve("svc.test.com").await.unwrap();
        tokio::time::advance(Duration::from_secs(299)).await;
        resolver.resolve("svc.test.com").await.unwrap();
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        resolver.resolve("svc.test.com").await.unwrap();
        assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
    }
}
