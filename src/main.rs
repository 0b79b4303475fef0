//! CLI entry point for the MTConnect agent core.
//!
//! Wires configuration → catalog → agent → adapter connections and runs
//! until Ctrl-C. Transports (HTTP/MQTT document rendering) attach through
//! the library's query engine; this binary only hosts the ingest side.

use anyhow::Result;
use clap::Parser;
use mtc_agent::adapter::AdapterConnection;
use mtc_agent::agent::{Agent, AgentSink};
use mtc_agent::catalog::StaticCatalog;
use mtc_agent::config::Settings;
use mtc_agent::trace::{self, OutputFormat, TracingConfig};
use std::sync::Arc;
use tracing::{info, warn};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "mtc-agent")]
#[command(about = "MTConnect agent core: SHDR ingestion and sequenced observation serving", long_about = None)]
struct Cli {
    /// Configuration name, resolved as config/<name>.toml
    #[arg(long)]
    config: Option<String>,

    /// Override the configured log level
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON logs (for log aggregation)
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = Settings::new(cli.config.as_deref())?;
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| settings.log_level.clone());
    let format = if cli.json_logs {
        OutputFormat::Json
    } else {
        OutputFormat::Pretty
    };
    trace::init(&TracingConfig::new(level).with_format(format))?;

    let catalog = StaticCatalog::from_settings(&settings)?.into_shared();
    let agent = Arc::new(Agent::new(settings.buffer.size, catalog.clone())?);
    let header = agent.header();
    info!(
        instance_id = header.instance_id,
        buffer_size = header.buffer_size,
        devices = settings.devices.len(),
        adapters = settings.adapters.len(),
        "agent started"
    );

    let mut handles = Vec::new();
    for (name, adapter) in &settings.adapters {
        let sink = Arc::new(AgentSink::new(
            agent.clone(),
            adapter.filter_duplicates,
            adapter.mark_items_unavailable_on_disconnect,
        ));
        handles.push(AdapterConnection::spawn(
            name.clone(),
            adapter.clone(),
            catalog.clone(),
            sink,
        ));
    }

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    for handle in handles {
        let name = handle.name.clone();
        if let Err(error) = handle.stop().await {
            warn!(adapter = %name, %error, "adapter stop failed");
        }
    }
    info!("agent stopped");
    Ok(())
}
