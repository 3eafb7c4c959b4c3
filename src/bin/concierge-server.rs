//! concierge-server binary
//!
//! OpenAI-compatible gateway that relays chat requests to one upstream API

use anyhow::Result;
use clap::Parser;
use concierge::gate::start_server;
use concierge::{ConfigOverrides, GatewayConfig};
use std::path::PathBuf;
use tracing_subscriber::{fmt, EnvFilter};

/// concierge-server: chat completion gateway
#[derive(Parser, Debug)]
#[command(name = "concierge-server")]
#[command(about = "OpenAI-compatible chat completion gateway", long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Upstream API base URL
    #[arg(long)]
    api_base: Option<String>,

    /// Upstream API key
    #[arg(long)]
    api_key: Option<String>,

    /// Host to listen on
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(long)]
    port: Option<u16>,

    /// Upstream request timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Maximum number of concurrent sessions
    #[arg(long)]
    max_sessions: Option<usize>,

    /// Model used when a request does not name one
    #[arg(long)]
    model: Option<String>,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            api_base: self.api_base.clone(),
            api_key: self.api_key.clone(),
            host: self.host.clone(),
            port: self.port,
            timeout_secs: self.timeout,
            max_sessions: self.max_sessions,
            default_model: self.model.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();
    let config = GatewayConfig::load(args.config.as_deref(), args.overrides())?;

    if args.validate {
        return validate_config(&config);
    }

    config.validate()?;
    start_server(config).await
}

/// Print the effective configuration and check it
fn validate_config(config: &GatewayConfig) -> Result<()> {
    println!("Configuration validation:");
    println!("  Listen: {}", config.listen_addr());
    println!("  API base: {}", config.upstream.api_base);
    println!("  API key: {}", config.upstream.api_key);
    println!("  Timeout: {}s", config.upstream.timeout_secs);
    println!("  Max sessions: {}", config.limits.max_sessions);
    if let Some(model) = &config.upstream.default_model {
        println!("  Default model: {}", model);
    }

    config.validate()?;

    println!("\n✓ Configuration is valid");
    Ok(())
}
