//! Network transport built on tokio TCP.
//!
//! [`TcpTransport`] keeps one lazily-established outbound connection per peer
//! and writes one frame per message. Inbound connections are served by
//! [`TcpTransport::serve`], which forwards every decoded frame to an [`Inbox`].

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use coterie_types::{Message, ProcessId};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::NetError;
use crate::frame::{read_frame, write_frame};
use crate::{Inbox, Transport};

/// Outbound link to one peer.
///
/// The per-peer `Mutex` serializes writers so frames never interleave, and
/// guarantees only one connection attempt is in flight for a peer at a time.
struct Link {
    addr: SocketAddr,
    stream: Mutex<Option<TcpStream>>,
}

/// TCP transport addressed by process id.
pub struct TcpTransport {
    local: ProcessId,
    links: HashMap<ProcessId, Arc<Link>>,
}

impl TcpTransport {
    /// Create a transport for process `local` with the given peer address book.
    ///
    /// The address book may include `local` itself; messages to self are
    /// normally looped back before reaching the transport.
    pub fn new(local: ProcessId, peers: HashMap<ProcessId, SocketAddr>) -> Self {
        let links = peers
            .into_iter()
            .map(|(id, addr)| {
                (
                    id,
                    Arc::new(Link {
                        addr,
                        stream: Mutex::new(None),
                    }),
                )
            })
            .collect();
        Self { local, links }
    }

    /// The process this transport sends on behalf of.
    pub fn local(&self) -> ProcessId {
        self.local
    }

    /// Configured address of a peer.
    pub fn peer_addr(&self, id: ProcessId) -> Option<SocketAddr> {
        self.links.get(&id).map(|link| link.addr)
    }

    /// Accept inbound connections on `listener` and feed decoded messages to `inbox`.
    ///
    /// Each connection gets its own reader task. The returned handle owns the
    /// accept loop; abort it to stop accepting.
    pub fn serve(listener: TcpListener, inbox: Arc<dyn Inbox>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, remote)) => {
                        debug!(%remote, "accepted peer connection");
                        tokio::spawn(read_loop(stream, remote, Arc::clone(&inbox)));
                    }
                    Err(e) => {
                        warn!(%e, "accept failed");
                    }
                }
            }
        })
    }
}

/// Read frames from one inbound connection until it closes.
async fn read_loop(mut stream: TcpStream, remote: SocketAddr, inbox: Arc<dyn Inbox>) {
    loop {
        match read_frame(&mut stream).await {
            Ok(Some(msg)) => inbox.deliver(msg),
            Ok(None) => {
                debug!(%remote, "peer connection closed");
                break;
            }
            Err(e) => {
                warn!(%remote, %e, "dropping peer connection after read error");
                break;
            }
        }
    }
}

#[async_trait::async_trait]
impl Transport for TcpTransport {
    async fn send_to(&self, target: ProcessId, msg: &Message) -> Result<(), NetError> {
        let link = self
            .links
            .get(&target)
            .ok_or(NetError::UnknownPeer(target))?;

        let mut guard = link.stream.lock().await;
        if guard.is_none() {
            debug!(peer = %target, addr = %link.addr, "connecting to peer");
            let stream = TcpStream::connect(link.addr)
                .await
                .map_err(|source| NetError::Connect {
                    peer: target,
                    source,
                })?;
            stream.set_nodelay(true)?;
            *guard = Some(stream);
        }

        let Some(stream) = guard.as_mut() else {
            return Err(NetError::Unreachable(target));
        };

        if let Err(e) = write_frame(stream, msg).await {
            // Drop the broken connection; the next send reconnects.
            *guard = None;
            return Err(e);
        }
        Ok(())
    }
}
