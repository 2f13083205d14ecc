//! Configuration type definitions
//!
//! These types represent the runtime configuration for Gate. They are loaded
//! once at startup and never mutated afterwards.

use crate::selector::Selector;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for Gate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Public base domains served by this gateway
    #[serde(default)]
    pub domains: Vec<DomainConfig>,

    /// TLS listen address, default is ":443"
    #[serde(default = "default_tls_addr", rename = "tlsAddr", alias = "tls_addr")]
    pub tls_addr: String,

    /// Plain HTTP listen address, default is ":80".
    /// Empty or ":0" disables the HTTP to HTTPS redirect listener.
    #[serde(default = "default_http_addr", rename = "httpAddr", alias = "http_addr")]
    pub http_addr: String,

    /// Directory of the certificate store
    #[serde(default)]
    pub store_path: Option<PathBuf>,

    /// Seconds between two certificate renewal passes
    #[serde(default = "default_renewal_interval")]
    pub renewal_interval_secs: u64,

    /// Seconds a resolved hostname stays in the routing cache
    #[serde(default = "default_routing_cache_ttl")]
    pub routing_cache_ttl_secs: u64,

    /// Connection timeouts
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// ACME client tuning
    #[serde(default)]
    pub acme: AcmeConfig,

    /// Global logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            domains: Vec::new(),
            tls_addr: default_tls_addr(),
            http_addr: default_http_addr(),
            store_path: None,
            renewal_interval_secs: default_renewal_interval(),
            routing_cache_ttl_secs: default_routing_cache_ttl(),
            timeouts: TimeoutConfig::default(),
            acme: AcmeConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_tls_addr() -> String {
    ":443".to_string()
}

fn default_http_addr() -> String {
    ":80".to_string()
}

fn default_renewal_interval() -> u64 {
    24 * 60 * 60
}

fn default_routing_cache_ttl() -> u64 {
    5 * 60
}

impl GatewayConfig {
    /// Socket address for the TLS listener
    pub fn tls_listen_addr(&self) -> String {
        normalize_listen_addr(&self.tls_addr)
    }

    /// Socket address for the redirect listener, `None` when disabled
    pub fn http_listen_addr(&self) -> Option<String> {
        match self.http_addr.trim() {
            "" | ":0" => None,
            addr => Some(normalize_listen_addr(addr)),
        }
    }

    /// Port announced in HTTP to HTTPS redirects
    pub fn tls_port(&self) -> Option<u16> {
        self.tls_addr.rsplit(':').next()?.parse().ok()
    }

    /// Interval between renewal passes
    pub fn renewal_interval(&self) -> Duration {
        Duration::from_secs(self.renewal_interval_secs)
    }

    /// Routing cache entry lifetime
    pub fn routing_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.routing_cache_ttl_secs)
    }
}

/// `:443` style addresses bind on every interface
fn normalize_listen_addr(addr: &str) -> String {
    if addr.starts_with(':') {
        format!("0.0.0.0{}", addr)
    } else {
        addr.to_string()
    }
}

/// One public base domain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainConfig {
    /// Base domain such as `test.com`, not `abc.test.com`
    pub domain: String,

    /// Contact address for the ACME account
    #[serde(default)]
    pub mail: String,

    /// DNS provider name used for the DNS-01 challenge
    pub provider: String,

    /// Credential handed to the DNS provider
    #[serde(default)]
    pub token: String,

    /// ACME directory of the certificate issuer, Let's Encrypt when unset
    #[serde(default, rename = "caDirURL", alias = "ca_dir_url")]
    pub ca_dir_url: Option<String>,

    /// Routes in declaration order
    #[serde(default)]
    pub routes: Vec<Route>,
}

impl DomainConfig {
    /// Names requested for this domain's certificate
    pub fn certificate_names(&self) -> Vec<String> {
        vec![self.domain.clone(), format!("*.{}", self.domain)]
    }
}

/// A sub-domain route
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    /// Declared priority. Advisory only: routes match in declaration order.
    #[serde(default)]
    pub priority: i32,

    /// Sub-domain selector
    pub selector: Selector,

    /// Backend address (`host:port`)
    pub destination: String,
}

/// Connection timeouts in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// TLS handshake, including certificate resolution
    #[serde(default = "default_handshake_timeout")]
    pub handshake_secs: u64,

    /// Backend dial
    #[serde(default = "default_dial_timeout")]
    pub dial_secs: u64,

    /// Relay inactivity across both directions
    #[serde(default = "default_idle_timeout")]
    pub idle_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            handshake_secs: default_handshake_timeout(),
            dial_secs: default_dial_timeout(),
            idle_secs: default_idle_timeout(),
        }
    }
}

impl TimeoutConfig {
    pub fn handshake(&self) -> Duration {
        Duration::from_secs(self.handshake_secs)
    }

    pub fn dial(&self) -> Duration {
        Duration::from_secs(self.dial_secs)
    }

    pub fn idle(&self) -> Duration {
        Duration::from_secs(self.idle_secs)
    }
}

fn default_handshake_timeout() -> u64 {
    // Covers an on-demand issuance on a cold start.
    120
}

fn default_dial_timeout() -> u64 {
    10
}

fn default_idle_timeout() -> u64 {
    300
}

/// ACME client tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcmeConfig {
    /// Seconds to wait for TXT records to propagate before answering a challenge
    #[serde(default = "default_propagation_delay")]
    pub propagation_delay_secs: u64,
}

impl Default for AcmeConfig {
    fn default() -> Self {
        Self {
            propagation_delay_secs: default_propagation_delay(),
        }
    }
}

impl AcmeConfig {
    pub fn propagation_delay(&self) -> Duration {
        Duration::from_secs(self.propagation_delay_secs)
    }
}

fn default_propagation_delay() -> u64 {
    30
}

/// Global logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Log format
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GatewayConfig::default();
        assert!(config.domains.is_empty());
        assert_eq!(config.tls_listen_addr(), "0.0.0.0:443");
        assert_eq!(config.http_listen_addr().as_deref(), Some("0.0.0.0:80"));
        assert_eq!(config.tls_port(), Some(443));
        assert_eq!(config.renewal_interval(), Duration::from_secs(86400));
    }

    #[test]
    fn test_http_listener_disabled() {
        let config = GatewayConfig {
            http_addr: ":0".to_string(),
            ..Default::default()
        };
        assert!(config.http_listen_addr().is_none());
    }

    #[test]
    fn test_json_deserialize() {
        let json = r#"{
            "tlsAddr": "127.0.0.1:8443",
            "domains": [{
                "domain": "test.com",
                "provider": "exec",
                "token": "/usr/local/bin/dns-hook",
                "caDirURL": "https://localhost:14000/dir",
                "routes": [
                    {"selector": {"exp": "svc"}, "destination": "127.0.0.1:9000"},
                    {"priority": 2, "selector": {"type": "pattern", "exp": "w+"}, "destination": "127.0.0.1:9001"}
                ]
            }]
        }"#;
        let config: GatewayConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.tls_port(), Some(8443));

        let domain = &config.domains[0];
        assert_eq!(domain.ca_dir_url.as_deref(), Some("https://localhost:14000/dir"));
        assert_eq!(domain.routes.len(), 2);
        assert_eq!(domain.routes[1].priority, 2);
        assert_eq!(domain.certificate_names(), vec!["test.com", "*.test.com"]);
    }
}
