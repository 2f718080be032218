//! Console monitor: control-protocol socket, client registry, status push.
//!
//! Any control packet registers its sender and is folded into the session
//! status. Every [`SEND_INTERVAL`], or right after a packet arrives, the
//! status snapshot goes to every registered console; each send decays the
//! console's counter, and silent consoles are purged.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use autoft_core::clients::ClientRegistry;
use autoft_core::control::{self, ControlMessage};
use autoft_core::status::SessionStatus;

pub const POLL: Duration = Duration::from_millis(250);
pub const SEND_INTERVAL: Duration = Duration::from_secs(5);

const MAX_CONTROL: usize = 1024;

pub struct Monitor {
    status: Arc<SessionStatus>,
    clients: ClientRegistry,
}

impl Monitor {
    pub fn new(status: Arc<SessionStatus>) -> Self {
        Monitor {
            status,
            clients: ClientRegistry::default(),
        }
    }

    pub fn clients(&self) -> &ClientRegistry {
        &self.clients
    }

    /// Handle one control datagram. Returns `true` if it was accepted.
    pub fn receive(&mut self, data: &[u8], from: SocketAddr) -> bool {
        let msg = match control::decode(data) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(%from, len = data.len(), error = %e, "dropped control packet");
                return false;
            }
        };

        self.clients.register(from);
        self.status.set_console_addr(from);
        match self.status.apply(&msg) {
            Ok(true) => info!(%from, status = %self.status, "status changed by console"),
            Ok(false) => debug!(%from, kind = msg.message_type(), "control packet"),
            Err(e) => warn!(%from, error = %e, "rejected console update"),
        }
        if self.status.is_shutdown() && matches!(msg, ControlMessage::Data(_)) {
            info!(%from, "shutdown requested by console");
        }
        true
    }

    /// Send the status to every console, decay each, then purge.
    pub async fn broadcast(&mut self, socket: &UdpSocket) {
        let bytes = ControlMessage::Data(self.status.snapshot()).encode();
        for addr in self.clients.addresses() {
            if let Err(e) = socket.send_to(&bytes, addr).await {
                error!(%addr, error = %e, "status send failed");
            }
            self.clients.decay(&addr);
        }
        let purged = self.clients.purge();
        if purged > 0 {
            info!(purged, remaining = self.clients.len(), "silent consoles dropped");
        }
    }
}

/// Monitor loop. Returns once shutdown is requested, after telling the
/// consoles.
pub async fn run(socket: UdpSocket, mut monitor: Monitor) {
    let mut buf = vec![0u8; MAX_CONTROL];
    let mut next_send = Instant::now();

    loop {
        let mut force = false;
        if let Ok(received) = tokio::time::timeout(POLL, socket.recv_from(&mut buf)).await {
            match received {
                Ok((n, from)) => force = monitor.receive(&buf[..n], from),
                Err(e) => error!(error = %e, "control receive failed"),
            }
        }

        if monitor.status.is_shutdown() {
            monitor.broadcast(&socket).await;
            break;
        }

        let now = Instant::now();
        if force || now >= next_send {
            next_send = now + SEND_INTERVAL;
            monitor.broadcast(&socket).await;
        }
    }
    info!(consoles = monitor.clients().len(), "monitor stopped");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
