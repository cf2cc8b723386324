//! HL7 bridge service binary.
//!
//! Loads channel configs from the conf tree, starts every enabled
//! channel of each kind and runs until a shutdown signal arrives; all
//! managers then stop and the stats store is flushed before exit.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use bridge_service::{
    InboundRuntime, OutboundRuntime, RuntimeDeps, StatsStore, TransformerRegistry,
    TranslateRuntime,
};
use clap::Parser;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "bridge")]
#[command(about = "HL7 v2 channel bridge: MLLP in, transform, MLLP out")]
#[command(version)]
struct Args {
    /// Configuration root directory.
    #[arg(short, long, default_value = "conf")]
    conf: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    info!("starting HL7 bridge, conf root {}", args.conf.display());

    let stats = Arc::new(StatsStore::open(args.conf.join("channel-stats.json")));
    let registry = Arc::new(TransformerRegistry::with_builtins());

    let deps = |stats: &Arc<StatsStore>| RuntimeDeps {
        stats: Arc::clone(stats),
        registry: Arc::clone(&registry),
    };
    let translate = TranslateRuntime::new(deps(&stats));
    let inbound = InboundRuntime::new(deps(&stats));
    let outbound = OutboundRuntime::new(deps(&stats));

    let channels_root = args.conf.join("channels");
    translate.load_and_start(&channels_root).await;
    inbound.load_and_start(&channels_root).await;
    outbound.load_and_start(&channels_root).await;

    info!(
        translate = translate.running_names().await.len(),
        inbound = inbound.running_names().await.len(),
        outbound = outbound.running_names().await.len(),
        "bridge running, press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    translate.stop_all().await;
    inbound.stop_all().await;
    outbound.stop_all().await;
    stats.flush();

    info!("all channels stopped");
    Ok(())
}

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };
    tracing_subscriber::fmt().with_max_level(level).init();
}
