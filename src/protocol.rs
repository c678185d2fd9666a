use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, trace, warn};

use crate::server::ServerStats;

/// Largest datagram the listener accepts.
pub const MAX_DATAGRAM_SIZE: usize = 4096;

/// One received datagram, queued for a worker. Jobs live only on the queue
/// and in the worker that consumes them.
#[derive(Debug)]
pub struct Job {
    pub client_addr: SocketAddr,
    pub packet: Vec<u8>,
    pub received_at: Instant,
}

/// Read datagrams until shutdown, enqueueing one job per packet.
///
/// The queue is bounded: when it is full the datagram is dropped and counted
/// instead of buffered without limit.
pub async fn receive_loop(
    socket: Arc<UdpSocket>,
    queue: mpsc::Sender<Job>,
    stats: Arc<ServerStats>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                info!("receive loop stopping");
                break;
            }
            result = socket.recv_from(&mut buf) => {
                let (len, client_addr) = match result {
                    Ok(received) => received,
                    Err(e) => {
                        warn!(error = %e, "udp receive error");
                        continue;
                    }
                };
                trace!(%client_addr, len, "datagram received");
                stats.record_query();

                let job = Job {
                    client_addr,
                    packet: buf[..len].to_vec(),
                    received_at: Instant::now(),
                };
                match queue.try_send(job) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        stats.record_queue_full_drop();
                        debug!(%client_addr, "queue full, datagram dropped");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                }
            }
        }
    }
}

/// Best-effort datagram send; UDP gives no delivery guarantee anyway, so
/// errors are logged and swallowed.
pub async fn send_response(socket: &UdpSocket, client_addr: SocketAddr, packet: &[u8]) {
    if let Err(e) = socket.send_to(packet, client_addr).await {
        debug!(%client_addr, error = %e, "failed to send response");
    }
}
