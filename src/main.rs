use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter};

mod server;

use server::settings::{Settings, SettingsOverrides};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Listen on this port
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Upstream registry host (e.g., 123456789012.dkr.ecr.us-east-1.amazonaws.com)
    #[arg(long, alias = "ecr_registry", global = true)]
    ecr_registry: Option<String>,

    /// Hostname clients use to reach this proxy (used when rewriting redirects)
    #[arg(long, alias = "proxy_hostname", global = true)]
    proxy_hostname: Option<String>,

    /// Path to a configuration file (.toml, .yaml or .yml)
    #[arg(long, global = true)]
    config: Option<String>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Commands {
    /// Run the proxy (default)
    Serve,
    /// Check proxy configuration for errors and unused options
    CheckConfig,
}

impl Cli {
    fn overrides(&self) -> SettingsOverrides {
        SettingsOverrides {
            config_file: self.config.clone(),
            port: self.port,
            debug: self.debug.then_some(true),
            registry_host: self.ecr_registry.clone(),
            public_hostname: self.proxy_hostname.clone(),
        }
    }
}

/// Handle for switching the log filter once configuration has been loaded
type FilterHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;

fn init_tracing() -> FilterHandle {
    let filter = EnvFilter::new(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()));
    let (filter, handle) = reload::Layer::new(filter);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stdout))
        .init();

    handle
}

/// Filter to switch to for debug logging, unless `RUST_LOG` already chose one
fn debug_filter(rust_log: Option<&str>) -> Option<&'static str> {
    match rust_log {
        Some(_) => None,
        None => Some("info,ecr_registry_proxy=debug,tower_http=debug"),
    }
}

fn enable_debug_logging(handle: &FilterHandle) {
    let rust_log = std::env::var("RUST_LOG").ok();
    let Some(directives) = debug_filter(rust_log.as_deref()) else {
        info!("RUST_LOG is set and takes precedence over --debug / logging.debug");
        return;
    };

    if let Err(e) = handle.modify(|filter| *filter = EnvFilter::new(directives)) {
        tracing::warn!("Failed to enable debug logging: {}", e);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter_handle = init_tracing();

    let cli = Cli::parse();
    let overrides = cli.overrides();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            let settings = match Settings::new(&overrides) {
                Ok(settings) => settings,
                Err(e) => {
                    eprintln!("Configuration error: {}", e);
                    std::process::exit(1);
                }
            };

            if settings.logging.debug {
                enable_debug_logging(&filter_handle);
            }

            info!(
                registry = %settings.registry.host,
                port = settings.server.port,
                "Starting registry proxy"
            );
            server::run_server(settings).await
        }
        Commands::CheckConfig => {
            println!("Checking proxy configuration...");
            match Settings::new(&overrides) {
                Ok(_) => {
                    println!("✓ Configuration is valid");
                    Ok(())
                }
                Err(e) => {
                    eprintln!("✗ Configuration error: {}", e);
                    std::process::exit(1);
                }
            }
        }
    }
}
