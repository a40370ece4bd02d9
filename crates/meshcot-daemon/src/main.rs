//! meshcot daemon - Main entry point
//!
//! One-way gateway from a Meshtastic MQTT feed to Cursor-on-Target
//! consumers. Runs the MQTT ingest loop and the periodic CoT dispatch
//! loop until interrupted.

mod config;
mod ingest;
mod state;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "meshcot")]
#[command(about = "Meshtastic MQTT to Cursor-on-Target gateway")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "meshcot.toml")]
    config: PathBuf,

    /// MQTT broker hostname
    #[arg(long)]
    mqtt_broker: Option<String>,

    /// MQTT topic filter to subscribe to
    #[arg(long)]
    mqtt_topic: Option<String>,

    /// Channel pre-shared key, base64 encoded
    #[arg(long)]
    psk: Option<String>,

    /// Output protocol (udp, tcp, broadcast)
    #[arg(long)]
    proto: Option<String>,

    /// Output address
    #[arg(long)]
    addr: Option<String>,

    /// Output port
    #[arg(long)]
    port: Option<u16>,

    /// Seconds between dispatch ticks
    #[arg(long)]
    interval: Option<u64>,

    /// CoT event type emitted for every node
    #[arg(long)]
    cot_type: Option<String>,

    /// Echo encoded CoT XML to the log before sending
    #[arg(long)]
    debug: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("meshcot v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration and apply CLI overrides
    let mut config = config::load_config(&args.config)?;
    if let Some(broker) = args.mqtt_broker {
        config.mqtt.broker = broker;
    }
    if let Some(topic) = args.mqtt_topic {
        config.mqtt.topic = topic;
    }
    if let Some(psk) = args.psk {
        config.channel.psk = psk;
    }
    if let Some(proto) = args.proto {
        config.output.protocol = proto;
    }
    if let Some(addr) = args.addr {
        config.output.address = Some(addr);
    }
    if let Some(port) = args.port {
        config.output.port = Some(port);
    }
    if let Some(interval) = args.interval {
        config.output.interval_secs = interval;
    }
    if let Some(cot_type) = args.cot_type {
        config.output.cot_type = cot_type;
    }
    if args.debug {
        config.output.echo_cot = true;
    }

    let state = state::GatewayState::new(config)?;
    let sender = state.sender()?;

    info!(
        broker = %state.config.mqtt.broker,
        proto = %sender.protocol(),
        target = %sender.target(),
        "Configuration loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let ingest = tokio::spawn(ingest::run_ingest(state.clone(), shutdown_rx.clone()));
    let dispatch = tokio::spawn(meshcot_output::run_dispatch(
        state.cache.clone(),
        sender,
        state.dispatch_config(),
        shutdown_rx,
    ));

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    let _ = shutdown_tx.send(true);

    ingest.await??;
    dispatch.await?;

    Ok(())
}
