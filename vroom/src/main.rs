mod gateway;
mod server;

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::info;

use vroom_cluster::SignalRouter;
use vroom_core::{config::load_config, logging};
use vroom_sfu::{ClientHub, PeerConnectionManager, RoomActivityLog, RoomObserver};

use server::{Services, VroomServer};

#[derive(Parser, Debug)]
#[command(name = "vroom")]
#[command(about = "Vroom media-cluster signaling server", long_about = None)]
struct Args {
    /// Config file (YAML or TOML); environment variables override it
    #[arg(long, short, env = "VROOM_CONFIG_PATH")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Load configuration
    let config = load_config(args.config.as_deref())?;

    // 1.5. Validate configuration (fail fast on misconfigurations)
    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("Config validation error: {e}");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s)",
            errors.len()
        ));
    }

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("Vroom signaling server starting...");
    info!("Client gateway address: {}", config.ws_address());
    info!("Media-server listener address: {}", config.router_address());

    // 3. Signal router (media-server side)
    let primary_region = config.router.primary_region();
    let router = Arc::new(SignalRouter::new(primary_region));
    info!(primary_region = %primary_region, "Signal router initialized");

    // 4. Client hub and peer connection manager
    let hub = Arc::new(ClientHub::new(config.signaling.outbound_buffer));
    let activity: Arc<dyn RoomObserver> = Arc::new(RoomActivityLog::new());
    let manager =
        PeerConnectionManager::new(router.clone(), hub.clone(), &config.signaling, Some(activity));

    let services = Services { router, hub, manager };
    let server = VroomServer::new(config, services);

    // 5. Start listeners and wait for shutdown
    server.start().await?;

    Ok(())
}
