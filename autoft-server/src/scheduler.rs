//! Transmit scheduler: wakes at period boundaries and drives the sequencer.
//!
//! Polls the wall clock every 250 ms. When the current second is one of the
//! configured offsets, runs one [`Sequencer::step`] and sends the resulting
//! packet to WSJT-X from its own socket. A new contact is committed only
//! after its reply was sent.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use tokio::net::UdpSocket;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use autoft_core::sequencer::{Action, Sequencer};
use autoft_core::status::SessionStatus;

pub const POLL: Duration = Duration::from_millis(250);

pub struct Scheduler {
    status: Arc<SessionStatus>,
    sequencer: Sequencer,
    offsets: Vec<u32>,
}

impl Scheduler {
    pub fn new(status: Arc<SessionStatus>, sequencer: Sequencer, offsets: Vec<u32>) -> Self {
        Scheduler {
            status,
            sequencer,
            offsets,
        }
    }

    /// True when `now` starts a period that hasn't fired yet.
    pub fn due(&self, now: DateTime<Utc>, last_fired: Option<i64>) -> bool {
        self.offsets.contains(&now.second()) && last_fired != Some(now.timestamp())
    }

    /// Run one period. The packet is fully encoded before the single send.
    /// Returns `None` when the period was skipped or abandoned.
    pub async fn cycle(&self, socket: &UdpSocket, now: i64) -> Option<Action> {
        let Some(addr) = self.status.wsjtx_addr() else {
            debug!("WSJT-X not heard from yet, period skipped");
            return None;
        };

        let action = match self.sequencer.step(&self.status, now) {
            Ok(action) => action,
            Err(e) => {
                error!(error = %e, "sequencer step failed");
                return None;
            }
        };
        debug!(status = %self.status, ?action, "cycle");

        let Some(packet) = action.to_packet() else {
            return Some(action);
        };

        let bytes = packet.encode();
        if let Err(e) = socket.send_to(&bytes, addr).await {
            error!(%addr, error = %e, "send failed, period abandoned");
            return None;
        }
        debug!(%addr, kind = %packet.packet_type(), len = bytes.len(), "sent");

        if let Err(e) = self.sequencer.commit(&self.status, &action, now) {
            error!(error = %e, "contact not recorded");
        }
        Some(action)
    }
}

/// Scheduler loop. Returns once shutdown is requested.
pub async fn run(socket: UdpSocket, scheduler: Scheduler) {
    info!(
        selector = scheduler.sequencer.selector_name(),
        offsets = ?scheduler.offsets,
        "scheduler started"
    );
    let mut ticker = tokio::time::interval(POLL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_fired: Option<i64> = None;

    loop {
        ticker.tick().await;
        if scheduler.status.is_shutdown() {
            break;
        }
        let now = Utc::now();
        if !scheduler.due(now, last_fired) {
            continue;
        }
        last_fired = Some(now.timestamp());
        scheduler.cycle(&socket, now.timestamp()).await;
    }
    info!("scheduler stopped");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
