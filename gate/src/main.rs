//! Gate - SNI routing TLS gateway
//!
//! This is the main entry point for the Gate CLI.

use anyhow::Context;
use clap::{Parser, Subcommand};
use gate_core::config::{ConfigLoader, LogFormat, LoggingConfig};
use gate_core::GatewayConfig;
use gate_proxy::{Gateway, RedirectServer, Resolver, Timeouts};
use gate_tls::{AcmeIssuer, CertManager, CertStore, Issuer, OcspChecker, ProviderRegistry};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable overriding the default certificate store directory
const STORE_ENV: &str = "GATE_CERT_STORE";

/// Gate - TLS gateway routing sub-domains to backends, with wildcard
/// certificates issued over ACME DNS-01
#[derive(Parser)]
#[command(name = "gate")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway with a configuration file
    Run {
        /// Path to the JSON or TOML configuration
        #[arg(default_value = "config.json")]
        config: String,
    },

    /// Validate a configuration file
    Validate {
        /// Path to the JSON or TOML configuration
        #[arg(default_value = "config.json")]
        config: String,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config: config_path } => {
            let config = match ConfigLoader::load(&config_path) {
                Ok(c) => c,
                Err(e) => {
                    eprintln!("❌ Failed to load config: {}", e);
                    std::process::exit(1);
                }
            };

            init_tracing(&config.logging, cli.verbose);
            tracing::info!("📄 Loaded configuration from: {}", config_path);

            if let Err(e) = run_gateway(config).await {
                tracing::error!("❌ {:#}", e);
                std::process::exit(1);
            }
        }

        Commands::Validate { config } => {
            init_tracing(&LoggingConfig::default(), cli.verbose);

            match validate(&config) {
                Ok(parsed) => {
                    println!(
                        "✅ Configuration '{}' is valid! ({} domain(s))",
                        config,
                        parsed.domains.len()
                    );
                }
                Err(e) => {
                    eprintln!("❌ Configuration Error: {:#}", e);
                    std::process::exit(1);
                }
            }
        }

        Commands::Version => {
            println!("Gate v{}", gate_core::VERSION);
        }
    }

    Ok(())
}

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
fn init_tracing(logging: &LoggingConfig, verbose: bool) {
    let level = if verbose { "debug" } else { logging.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);

    match logging.format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
    }
}

/// Parse the file and check every domain can be served by the ACME issuer
fn validate(path: &str) -> anyhow::Result<GatewayConfig> {
    let config = ConfigLoader::load(path)?;

    let issuer = AcmeIssuer::new(Arc::new(ProviderRegistry::default()));
    for domain in &config.domains {
        issuer
            .check(domain)
            .with_context(|| format!("domain {}", domain.domain))?;
    }

    Ok(config)
}

/// Certificate store directory: config, then environment, then platform default
fn store_path(config: &GatewayConfig) -> PathBuf {
    config
        .store_path
        .clone()
        .or_else(|| std::env::var_os(STORE_ENV).map(PathBuf::from))
        .unwrap_or_else(CertStore::default_path)
}

async fn run_gateway(config: GatewayConfig) -> anyhow::Result<()> {
    let config = Arc::new(config);

    tracing::info!("🚀 Starting Gate v{}", gate_core::VERSION);
    tracing::info!("🔧 Configured {} domain(s)", config.domains.len());
    if config.domains.is_empty() {
        tracing::warn!("⚠️ No domains configured, every handshake will be rejected");
    }

    let store = Arc::new(CertStore::new(store_path(&config)));
    store
        .init()
        .await
        .with_context(|| format!("Failed to open certificate store {:?}", store.path()))?;
    tracing::info!("📂 Certificate store: {:?}", store.path());

    let issuer = AcmeIssuer::new(Arc::new(ProviderRegistry::default()))
        .with_propagation_delay(config.acme.propagation_delay());
    let manager = Arc::new(
        CertManager::new(
            &config.domains,
            store,
            Arc::new(issuer),
            Arc::new(OcspChecker::new()),
        )?
        .with_renewal_interval(config.renewal_interval()),
    );

    manager
        .preheat()
        .await
        .context("Failed to obtain certificates for the configured domains")?;
    let renewal = manager.start_renewal();

    let shutdown = CancellationToken::new();
    let mut tasks = Vec::new();

    let tls_addr = config.tls_listen_addr();
    let tls_listener = TcpListener::bind(&tls_addr)
        .await
        .with_context(|| format!("Failed to bind TLS listener on {}", tls_addr))?;

    if let Some(http_addr) = config.http_listen_addr() {
        let listener = TcpListener::bind(&http_addr)
            .await
            .with_context(|| format!("Failed to bind HTTP listener on {}", http_addr))?;
        let tls_port = config.tls_port().unwrap_or(443);
        tasks.push(tokio::spawn(
            RedirectServer::new(tls_port).serve(listener, shutdown.clone()),
        ));
    }

    let resolver = Arc::new(Resolver::new(config.clone(), manager.clone()));
    let gateway = Arc::new(Gateway::new(resolver, Timeouts::from(&config.timeouts))?);
    tasks.push(tokio::spawn(gateway.serve(tls_listener, shutdown.clone())));

    wait_for_shutdown().await?;
    tracing::info!("🛑 Shutting down...");

    shutdown.cancel();
    manager.stop_renewal();
    for task in tasks {
        let _ = task.await;
    }
    let _ = renewal.await;

    tracing::info!("👋 Gate stopped");
    Ok(())
}

async fn wait_for_shutdown() -> std::io::Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            result = ctrl_c => result?,
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    ctrl_c.await?;

    Ok(())
}
