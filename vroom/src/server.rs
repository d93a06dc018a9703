//! Server lifecycle management
//!
//! Manages the startup and shutdown of both listeners:
//! - Media-server TCP listener (signal router)
//! - Client WebSocket gateway (axum)

use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use vroom_cluster::SignalRouter;
use vroom_core::Config;
use vroom_sfu::{ClientHub, PeerConnectionManager};

use crate::gateway::{self, GatewayState};

/// Container for shared services
#[derive(Clone)]
pub struct Services {
    pub router: Arc<SignalRouter>,
    pub hub: Arc<ClientHub>,
    pub manager: Arc<PeerConnectionManager>,
}

/// Vroom server - owns both listeners and their shutdown
pub struct VroomServer {
    config: Config,
    services: Services,
    shutdown: CancellationToken,
}

impl VroomServer {
    #[must_use]
    pub fn new(config: Config, services: Services) -> Self {
        Self {
            config,
            services,
            shutdown: CancellationToken::new(),
        }
    }

    /// Start all listeners and wait for a shutdown signal
    pub async fn start(self) -> anyhow::Result<()> {
        info!("Starting Vroom server...");

        let router_handle = self.start_router_listener().await?;
        let gateway_handle = self.start_gateway().await?;

        info!("All listeners started successfully");

        tokio::select! {
            _ = router_handle => {
                error!("Media-server listener stopped unexpectedly");
            }
            _ = gateway_handle => {
                error!("Client gateway stopped unexpectedly");
            }
            () = shutdown_signal() => {
                info!("Shutdown signal received, starting graceful shutdown...");
            }
        }

        self.shutdown.cancel();
        self.shutdown().await;

        Ok(())
    }

    /// Close client sockets so their sessions unwind through the disconnect path
    async fn shutdown(&self) {
        info!(
            peers = self.services.manager.peer_count(),
            rooms = self.services.manager.room_count(),
            "Shutting down Vroom server..."
        );

        let drain_timeout = Duration::from_secs(10);
        let drain_poll_interval = Duration::from_millis(200);
        let deadline = tokio::time::Instant::now() + drain_timeout;
        loop {
            let remaining = self.services.hub.len();
            if remaining == 0 {
                info!("All client connections drained");
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    remaining,
                    "Drain timeout reached with client connections still active"
                );
                break;
            }
            tokio::time::sleep(drain_poll_interval).await;
        }

        info!("Vroom server shut down complete");
    }

    async fn start_router_listener(&self) -> anyhow::Result<JoinHandle<()>> {
        let address = self.config.router_address();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind media-server listener {address}: {e}"))?;
        info!("Media-server listener bound on {}", address);

        let router = self.services.router.clone();
        let max_frame_bytes = self.config.router.max_frame_bytes;
        let shutdown = self.shutdown.clone();

        Ok(tokio::spawn(async move {
            let served = vroom_cluster::serve(router, listener, max_frame_bytes, shutdown).await;
            if let Err(e) = served {
                error!("Media-server listener error: {}", e);
            }
        }))
    }

    /// Start the client gateway with graceful shutdown support
    async fn start_gateway(&self) -> anyhow::Result<JoinHandle<()>> {
        let address = self.config.ws_address();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind client gateway {address}: {e}"))?;
        info!("Client gateway listening on {}", address);

        let app = gateway::create_router(GatewayState {
            manager: self.services.manager.clone(),
            hub: self.services.hub.clone(),
            signaling: Arc::new(self.config.signaling.clone()),
            shutdown: self.shutdown.clone(),
        });
        let graceful = self.shutdown.clone().cancelled_owned();

        Ok(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(graceful).await {
                error!("Client gateway error: {}", e);
            }
            info!("Client gateway shut down gracefully");
        }))
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C signal");
            }
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {}", e);
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
                info!("Received SIGTERM signal");
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
