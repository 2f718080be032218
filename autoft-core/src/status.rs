//! Shared session state for the decoder, scheduler and monitor.
//!
//! One `SessionStatus` is built at startup and handed to each task as an
//! `Arc`. Every field lives behind a single mutex that is held only for the
//! read or write itself, never across socket I/O. The WSJT-X endpoint is set
//! once, from the first heartbeat it sends.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use crate::control::{ControlMessage, StatusData};
use crate::repo::Repository;
use crate::types::{normalize_call, Result};

/// Default number of transmit periods spent on one station.
pub const DEFAULT_MAX_TRIES: u16 = 5;

#[derive(Debug, Clone, Default)]
struct Inner {
    max_tries: u16,
    xmit: u16,
    pause: bool,
    shutdown: bool,
    call: String,
    console: Option<SocketAddr>,
}

pub struct SessionStatus {
    inner: Mutex<Inner>,
    wsjtx: OnceLock<SocketAddr>,
    repo: Arc<dyn Repository>,
}

impl SessionStatus {
    pub fn new(repo: Arc<dyn Repository>, max_tries: u16) -> Self {
        SessionStatus {
            inner: Mutex::new(Inner {
                max_tries,
                ..Inner::default()
            }),
            wsjtx: OnceLock::new(),
            repo,
        }
    }

    /// A poisoned lock still holds valid fields; keep serving them.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn repo(&self) -> &Arc<dyn Repository> {
        &self.repo
    }

    // -- countdown --

    pub fn xmit(&self) -> u16 {
        self.lock().xmit
    }

    /// Set the countdown, clamped to `0..=u16::MAX`.
    pub fn set_xmit(&self, value: i64) {
        self.lock().xmit = value.clamp(0, u16::MAX as i64) as u16;
    }

    /// Add `n` to the countdown (used when a contact is acknowledged).
    pub fn add_xmit(&self, n: u16) {
        let mut inner = self.lock();
        inner.xmit = inner.xmit.saturating_add(n);
    }

    /// Decrement the countdown if it is running. Returns the value before.
    pub fn decrement(&self) -> u16 {
        let mut inner = self.lock();
        let before = inner.xmit;
        inner.xmit = before.saturating_sub(1);
        before
    }

    pub fn max_tries(&self) -> u16 {
        self.lock().max_tries
    }

    pub fn set_max_tries(&self, n: u16) {
        self.lock().max_tries = n;
    }

    /// Restart the countdown from `max_tries`.
    pub fn reset_xmit(&self) {
        let mut inner = self.lock();
        inner.xmit = inner.max_tries;
    }

    // -- current call --

    pub fn call(&self) -> String {
        self.lock().call.clone()
    }

    /// Set the station we are working. Longer than 10 characters fails.
    pub fn set_call(&self, call: &str) -> Result<()> {
        let call = normalize_call(call)?;
        self.lock().call = call;
        Ok(())
    }

    pub fn clear_call(&self) {
        self.lock().call.clear();
    }

    /// Drop the current contact: no call, countdown at zero.
    pub fn idle(&self) {
        let mut inner = self.lock();
        inner.call.clear();
        inner.xmit = 0;
    }

    // -- flags --

    pub fn is_pause(&self) -> bool {
        self.lock().pause
    }

    pub fn set_pause(&self, pause: bool) {
        self.lock().pause = pause;
    }

    pub fn is_shutdown(&self) -> bool {
        self.lock().shutdown
    }

    /// Ask every task to stop. Cannot be undone.
    pub fn request_shutdown(&self) {
        self.lock().shutdown = true;
    }

    // -- peers --

    pub fn wsjtx_addr(&self) -> Option<SocketAddr> {
        self.wsjtx.get().copied()
    }

    /// Record the WSJT-X endpoint. Returns `false` if it was already known.
    pub fn set_wsjtx_addr(&self, addr: SocketAddr) -> bool {
        self.wsjtx.set(addr).is_ok()
    }

    pub fn console_addr(&self) -> Option<SocketAddr> {
        self.lock().console
    }

    pub fn set_console_addr(&self, addr: SocketAddr) {
        self.lock().console = Some(addr);
    }

    // -- control protocol --

    /// Consistent copy of the state for a control `Data` message.
    pub fn snapshot(&self) -> StatusData {
        let inner = self.lock();
        StatusData {
            max_tries: inner.max_tries,
            xmit: inner.xmit,
            pause: inner.pause,
            shutdown: inner.shutdown,
            call: inner.call.clone(),
        }
    }

    /// Fold a console message into the state. Returns `true` if anything
    /// changed. A heartbeat changes nothing.
    pub fn apply(&self, msg: &ControlMessage) -> Result<bool> {
        match msg {
            ControlMessage::Heartbeat => Ok(false),
            ControlMessage::Pause(flag) => {
                let mut inner = self.lock();
                let changed = inner.pause != *flag;
                inner.pause = *flag;
                Ok(changed)
            }
            ControlMessage::Data(data) => {
                let call = normalize_call(&data.call)?;
                let mut inner = self.lock();
                let before = (
                    inner.max_tries,
                    inner.xmit,
                    inner.pause,
                    inner.shutdown,
                    inner.call.clone(),
                );
                inner.max_tries = data.max_tries;
                inner.xmit = data.xmit;
                inner.pause = data.pause;
                inner.shutdown |= data.shutdown;
                inner.call = call;
                let after = (
                    inner.max_tries,
                    inner.xmit,
                    inner.pause,
                    inner.shutdown,
                    inner.call.clone(),
                );
                Ok(before != after)
            }
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.snapshot();
        write!(
            f,
            "call={} xmit={}/{} pause={} shutdown={}",
            if s.call.is_empty() { "-" } else { s.call.as_str() },
            s.xmit,
            s.max_tries,
            s.pause,
            s.shutdown
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
