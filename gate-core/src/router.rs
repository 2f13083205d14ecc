//! Hostname routing
//!
//! Resolves which configured domain owns a requested hostname and which of
//! its routes serves the remaining sub-domain.

use crate::config::{DomainConfig, GatewayConfig, Route};

impl GatewayConfig {
    /// Find the domain owning `host`.
    ///
    /// A domain owns a host when the host equals it or ends with `.` followed
    /// by it. When several configured domains qualify (`test.com` and
    /// `a.test.com` for `x.a.test.com`), the longest one wins.
    pub fn domain_for(&self, host: &str) -> Option<&DomainConfig> {
        let host = normalize_host(host);

        self.domains
            .iter()
            .filter(|d| d.subdomain_of(&host).is_some())
            .max_by_key(|d| d.domain.len())
    }
}

impl DomainConfig {
    /// Sub-domain part of `host` relative to this domain.
    ///
    /// `svc.test.com` yields `svc`, the bare `test.com` yields an empty string,
    /// and `xtest.com` yields `None`.
    pub fn subdomain_of<'a>(&self, host: &'a str) -> Option<&'a str> {
        if host.len() < self.domain.len() {
            return None;
        }

        let split = host.len() - self.domain.len();
        let (head, tail) = host.split_at_checked(split)?;
        if !tail.eq_ignore_ascii_case(&self.domain) {
            return None;
        }

        match head {
            "" => Some(""),
            _ => head.strip_suffix('.').filter(|s| !s.is_empty()),
        }
    }

    /// First route, in declaration order, whose selector matches `subdomain`
    pub fn route_for(&self, subdomain: &str) -> Option<&Route> {
        self.routes.iter().find(|r| r.selector.matches(subdomain))
    }
}

/// Lowercase and strip a trailing root dot
pub fn normalize_host(host: &str) -> String {
    host.trim_end_matches('.').to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::Selector;

    fn domain(name: &str, routes: Vec<Route>) -> DomainConfig {
        DomainConfig {
            domain: name.to_string(),
            mail: String::new(),
            provider: "exec".to_string(),
            token: String::new(),
            ca_dir_url: None,
            routes,
        }
    }

    fn route(priority: i32, selector: Selector, destination: &str) -> Route {
        Route {
            priority,
            selector,
            destination: destination.to_string(),
        }
    }

    #[test]
    fn test_subdomain_of() {
        let d = domain("test.com", vec![]);
        assert_eq!(d.subdomain_of("svc.test.com"), Some("svc"));
        assert_eq!(d.subdomain_of("a.b.test.com"), Some("a.b"));
        assert_eq!(d.subdomain_of("test.com"), Some(""));
        assert_eq!(d.subdomain_of("xtest.com"), None);
        assert_eq!(d.subdomain_of(".test.com"), None);
        assert_eq!(d.subdomain_of("test.org"), None);
        assert_eq!(d.subdomain_of("com"), None);
    }

    #[test]
    fn test_longest_suffix_wins() {
        let config = GatewayConfig {
            domains: vec![domain("test.com", vec![]), domain("a.test.com", vec![])],
            ..Default::default()
        };

        assert_eq!(config.domain_for("x.a.test.com").unwrap().domain, "a.test.com");
        assert_eq!(config.domain_for("a.test.com").unwrap().domain, "a.test.com");
        assert_eq!(config.domain_for("b.test.com").unwrap().domain, "test.com");
        assert_eq!(config.domain_for("SVC.Test.Com.").unwrap().domain, "test.com");
        assert!(config.domain_for("other.org").is_none());
    }

    #[test]
    fn test_routes_match_in_declaration_order() {
        // The higher declared priority of the second route does not reorder matching.
        let d = domain(
            "test.com",
            vec![
                route(10, Selector::pattern("api.*").unwrap(), "127.0.0.1:1"),
                route(1, Selector::exact("api"), "127.0.0.1:2"),
            ],
        );

        assert_eq!(d.route_for("api").unwrap().destination, "127.0.0.1:1");
        assert_eq!(d.route_for("api2").unwrap().destination, "127.0.0.1:1");
        assert!(d.route_for("web").is_none());
    }

    #[test]
    fn test_bare_domain_route() {
        let d = domain("test.com", vec![route(0, Selector::exact(""), "127.0.0.1:3")]);
        let sub = d.subdomain_of("test.com").unwrap();
        assert_eq!(d.route_for(sub).unwrap().destination, "127.0.0.1:3");
    }
}
