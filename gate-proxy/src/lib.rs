//! Gate Proxy Module
//!
//! The connection path of the gateway:
//! - SNI resolution with a routing cache
//! - TLS termination and backend relay
//! - HTTP to HTTPS redirects

pub mod gateway;
pub mod redirect;
pub mod relay;
pub mod resolver;
pub mod routing_cache;

pub use gateway::{Gateway, GatewayError, Timeouts};
pub use redirect::RedirectServer;
pub use resolver::{CertificateSource, Resolution, ResolveError, Resolver};
pub use routing_cache::RoutingCache;
