//! Configuration loader

use crate::config::GatewayConfig;
use crate::error::{Error, Result};
use std::collections::HashSet;
use std::path::Path;

/// Configuration loader for JSON and TOML files
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load and validate configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<GatewayConfig> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file {:?}: {}", path, e)))?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let config = match ext {
            "json" => Self::from_json(&content),
            "toml" => Self::from_toml(&content),
            _ => Err(Error::Config(format!("Unknown config format: {:?}", ext))),
        }?;

        tracing::debug!("Loaded {} domain(s) from {:?}", config.domains.len(), path);
        Ok(config)
    }

    /// Parse JSON configuration
    pub fn from_json(content: &str) -> Result<GatewayConfig> {
        let config = serde_json::from_str(content)
            .map_err(|e| Error::Config(format!("Invalid JSON: {}", e)))?;
        Self::finish(config)
    }

    /// Parse TOML configuration
    pub fn from_toml(content: &str) -> Result<GatewayConfig> {
        let config = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))?;
        Self::finish(config)
    }

    /// Normalize domain names and reject configurations the gateway cannot serve
    fn finish(mut config: GatewayConfig) -> Result<GatewayConfig> {
        let mut seen = HashSet::new();

        for domain in &mut config.domains {
            domain.domain = domain.domain.trim().trim_end_matches('.').to_ascii_lowercase();

            if domain.domain.is_empty() {
                return Err(Error::Config("Domain name must not be empty".to_string()));
            }
            if domain.domain.starts_with("*.") {
                return Err(Error::Config(format!(
                    "Domain {} must be a base domain, the wildcard is implied",
                    domain.domain
                )));
            }
            if !seen.insert(domain.domain.clone()) {
                return Err(Error::Config(format!("Duplicate domain: {}", domain.domain)));
            }
            if domain.provider.trim().is_empty() {
                return Err(Error::Config(format!("Domain {} has no DNS provider", domain.domain)));
            }
            for route in &domain.routes {
                if route.destination.trim().is_empty() {
                    return Err(Error::Config(format!(
                        "Route {:?} of {} has no destination",
                        route.selector.expression(),
                        domain.domain
                    )));
                }
            }
        }

        if config.tls_port().is_none() {
            return Err(Error::Config(format!("Invalid TLS listen address: {}", config.tls_addr)));
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_loading() {
        let json = r#"{"domains": []}"#;
        let config = ConfigLoader::from_json(json).unwrap();
        assert!(config.domains.is_empty());
    }

    #[test]
    fn test_toml_loading() {
        let toml = r#"
            tlsAddr = ":8443"

            [[domains]]
            domain = "Test.COM."
            provider = "exec"
            token = "/bin/true"

            [[domains.routes]]
            destination = "127.0.0.1:8080"
            selector = { type = "exact", exp = "svc" }
        "#;
        let config = ConfigLoader::from_toml(toml).unwrap();
        assert_eq!(config.domains[0].domain, "test.com");
        assert_eq!(config.tls_listen_addr(), "0.0.0.0:8443");
    }

    #[test]
    fn test_duplicate_domains_rejected() {
        let json = r#"{"domains": [
            {"domain": "test.com", "provider": "exec"},
            {"domain": "TEST.com", "provider": "exec"}
        ]}"#;
        let err = ConfigLoader::from_json(json).unwrap_err();
        assert!(err.to_string().contains("Duplicate domain"));
    }

    #[test]
    fn test_bad_pattern_is_config_error() {
        let json = r#"{"domains": [{
            "domain": "test.com",
            "provider": "exec",
            "routes": [{"selector": {"type": "pattern", "exp": "(("}, "destination": "127.0.0.1:1"}]
        }]}"#;
        assert!(matches!(ConfigLoader::from_json(json), Err(Error::Config(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"domains": [{"domain": "test.com", "provider": "exec"}]}"#).unwrap();

        let config = ConfigLoader::load(&path).unwrap();
        assert_eq!(config.domains.len(), 1);

        let missing = ConfigLoader::load(dir.path().join("missing.json"));
        assert!(matches!(missing, Err(Error::Config(_))));

        let unknown = dir.path().join("config.yaml");
        std::fs::write(&unknown, "domains: []").unwrap();
        assert!(ConfigLoader::load(&unknown).is_err());
    }
}
