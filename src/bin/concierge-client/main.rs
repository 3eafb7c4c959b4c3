//! concierge-client binary entry point
//!
//! Interactive chat against any OpenAI-compatible endpoint, including a
//! running concierge-server.

use anyhow::Result;
use clap::Parser;
use concierge::{ChatSession, OpenAIUpstream, UpstreamConfig};
use std::sync::Arc;

mod repl;

#[derive(Parser, Debug)]
#[command(name = "concierge-client")]
#[command(about = "Interactive chat client for OpenAI-compatible APIs", long_about = None)]
struct Cli {
    /// API base URL, e.g. http://127.0.0.1:8848/v1
    api_base: String,

    /// API key sent as a bearer credential
    api_key: String,

    /// Model to chat with
    #[arg(short, long, default_value = "gpt-4")]
    model: String,

    /// System prompt that opens the conversation
    #[arg(long)]
    system: Option<String>,

    /// Wait for whole replies instead of streaming them
    #[arg(long)]
    no_stream: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing; stay quiet unless RUST_LOG asks otherwise
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let upstream = OpenAIUpstream::new(&UpstreamConfig::new(cli.api_base, cli.api_key))?;
    let mut chat = ChatSession::new(Arc::new(upstream), cli.model);
    if let Some(system) = cli.system {
        chat = chat.with_system_prompt(system);
    }

    repl::run(chat, !cli.no_stream).await
}
