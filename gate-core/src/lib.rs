//! Gate Core Library
//!
//! This crate provides the configuration model shared by every part of the
//! gateway, and the sub-domain selector engine that maps a requested hostname
//! to a backend destination.

pub mod config;
pub mod error;
pub mod router;
pub mod selector;

pub use config::{DomainConfig, GatewayConfig, Route};
pub use error::{Error, Result};
pub use selector::{Selector, SelectorKind};

/// Gate version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
