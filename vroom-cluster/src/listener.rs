//! TCP accept loop for media-server connections

use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::router::SignalRouter;
use crate::wire::frame_codec;

/// Accept media-server sockets until `shutdown` fires.
///
/// Each socket gets a writer task draining its outbound queue and a reader
/// loop feeding frames to the router in arrival order.
pub async fn serve(
    router: Arc<SignalRouter>,
    listener: TcpListener,
    max_frame_bytes: usize,
    shutdown: CancellationToken,
) -> crate::Result<()> {
    let address = listener.local_addr()?;
    info!(address = %address, "Media-server listener started");

    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                info!("Media-server listener stopping");
                return Ok(());
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer_addr)) => {
                    let router = router.clone();
                    let shutdown = shutdown.child_token();
                    tokio::spawn(handle_connection(
                        router,
                        stream,
                        peer_addr,
                        max_frame_bytes,
                        shutdown,
                    ));
                }
                Err(e) => warn!(error = %e, "Failed to accept media-server connection"),
            }
        }
    }
}

async fn handle_connection(
    router: Arc<SignalRouter>,
    stream: TcpStream,
    peer_addr: SocketAddr,
    max_frame_bytes: usize,
    shutdown: CancellationToken,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "Failed to set TCP_NODELAY");
    }

    let (read_half, write_half) = stream.into_split();
    let mut reader = FramedRead::new(read_half, frame_codec(max_frame_bytes));
    let mut writer = FramedWrite::new(write_half, frame_codec(max_frame_bytes));
    let (connection_id, mut outbound) = router.open_connection();
    info!(connection_id = %connection_id, peer = %peer_addr, "Media server connected");

    let writer_id = connection_id.clone();
    let writer_task = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if let Err(e) = writer.send(frame).await {
                warn!(connection_id = %writer_id, error = %e, "Media-server write failed");
                break;
            }
        }
    });

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            frame = reader.next() => match frame {
                Some(Ok(frame)) => router.handle_frame(&connection_id, frame.freeze()),
                Some(Err(e)) => {
                    warn!(connection_id = %connection_id, error = %e, "Media-server stream error");
                    break;
                }
                None => break,
            }
        }
    }

    router.close_connection(&connection_id);
    writer_task.abort();
    info!(connection_id = %connection_id, peer = %peer_addr, "Media server disconnected");
}
