//! TLS gateway
//!
//! 🚪 Accepts TCP connections, terminates TLS with the certificate chosen by
//! the ClientHello's server name, and relays the plaintext to the routed
//! backend.
//!
//! The ClientHello is read before any configuration is picked, which lets
//! certificate resolution (and on-demand issuance) run asynchronously.

use crate::relay::relay;
use crate::resolver::{NoCertificate, ResolveError, Resolver, server_config};
use gate_core::config::TimeoutConfig;
use rustls::ServerConfig;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_rustls::LazyConfigAcceptor;
use tokio_rustls::server::TlsStream;
use tokio_util::sync::CancellationToken;

/// Gateway errors, each ending one connection
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("🤝 TLS handshake failed: {0}")]
    Handshake(#[source] io::Error),

    #[error("🔍 {0}")]
    Resolve(#[from] ResolveError),

    #[error("🔌 Failed to connect to {addr}: {source}")]
    Dial {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("⏰ {0} timed out")]
    Timeout(&'static str),

    #[error("🔁 Relay error: {0}")]
    Relay(#[source] io::Error),

    #[error("🔒 TLS configuration error: {0}")]
    Tls(#[from] rustls::Error),
}

/// Per-connection time limits
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    /// ClientHello to finished handshake, certificate resolution included
    pub handshake: Duration,
    /// Backend connect
    pub dial: Duration,
    /// Relay inactivity, counted across both directions
    pub idle: Duration,
}

impl From<&TimeoutConfig> for Timeouts {
    fn from(config: &TimeoutConfig) -> Self {
        Self {
            handshake: config.handshake(),
            dial: config.dial(),
            idle: config.idle(),
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self::from(&TimeoutConfig::default())
    }
}

/// 🚪 SNI routing TLS gateway
pub struct Gateway {
    resolver: Arc<Resolver>,
    timeouts: Timeouts,
    /// Finishes handshakes that cannot be served, so the client sees an alert
    reject: Arc<ServerConfig>,
}

impl Gateway {
    pub fn new(resolver: Arc<Resolver>, timeouts: Timeouts) -> Result<Self, GatewayError> {
        Ok(Self {
            resolver,
            timeouts,
            reject: server_config(Arc::new(NoCertificate))?,
        })
    }

    /// 🚀 Accept connections until `shutdown` is cancelled
    pub async fn serve(self: Arc<Self>, listener: TcpListener, shutdown: CancellationToken) {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!("🔐 TLS gateway listening on {}", addr);
        }

        let purge_every = self.resolver.cache().ttl().max(Duration::from_secs(1));
        let mut purge = tokio::time::interval(purge_every);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("🛑 TLS gateway shutting down");
                    break;
                }
                _ = purge.tick() => {
                    self.resolver.cache().purge_expired();
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let gateway = self.clone();
                        tokio::spawn(async move {
                            if let Err(e) = gateway.handle(stream, peer).await {
                                tracing::debug!("🔌 Connection from {} ended: {}", peer, e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::warn!("Failed to accept TLS connection: {}", e);
                    }
                },
            }
        }
    }

    /// Serve one accepted connection to completion
    pub async fn handle(&self, stream: TcpStream, peer: SocketAddr) -> Result<(), GatewayError> {
        let (tls, destination) = timeout(self.timeouts.handshake, self.handshake(stream))
            .await
            .map_err(|_| GatewayError::Timeout("handshake"))??;

        let backend = timeout(self.timeouts.dial, TcpStream::connect(&destination))
            .await
            .map_err(|_| GatewayError::Timeout("backend dial"))?
            .map_err(|source| GatewayError::Dial {
                addr: destination.clone(),
                source,
            })?;

        tracing::debug!("🔁 Relaying {} -> {}", peer, destination);
        let stats = relay(tls, backend, self.timeouts.idle)
            .await
            .map_err(GatewayError::Relay)?;

        tracing::debug!(
            "✅ Connection {} -> {} closed ({} bytes up, {} bytes down)",
            peer,
            destination,
            stats.upstream,
            stats.downstream
        );
        Ok(())
    }

    async fn handshake(&self, stream: TcpStream) -> Result<(TlsStream<TcpStream>, String), GatewayError> {
        let start = LazyConfigAcceptor::new(rustls::server::Acceptor::default(), stream)
            .await
            .map_err(GatewayError::Handshake)?;

        let server_name = start.client_hello().server_name().map(str::to_string);
        let resolved = match server_name {
            Some(name) => self.resolver.resolve(&name).await,
            None => Err(ResolveError::MissingServerName),
        };

        match resolved {
            Ok(resolution) => {
                let tls = start
                    .into_stream(resolution.server_config.clone())
                    .await
                    .map_err(GatewayError::Handshake)?;
                Ok((tls, resolution.destination.clone()))
            }
            Err(e) => {
                match &e {
                    ResolveError::Certificate { .. } => tracing::warn!("❌ Rejecting handshake: {}", e),
                    _ => tracing::debug!("🚫 Rejecting handshake: {}", e),
                }
                // Completing with an empty resolver sends the handshake failure alert.
                let _ = start.into_stream(self.reject.clone()).await;
                Err(e.into())
            }
        }
    }
}
