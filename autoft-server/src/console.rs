//! `autoft ctl`: terminal console for a running daemon.
//!
//! Speaks the control protocol to the daemon's console port. Status pushes
//! from the daemon are printed as they arrive; a heartbeat goes out every
//! [`HEARTBEAT_EVERY`] so the daemon keeps us registered.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::DateTime;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::UdpSocket;
use tracing::{info, warn};

use autoft_core::control::{self, ControlMessage, StatusData};
use autoft_core::repo::Repository;
use autoft_core::types::{normalize_call, timestamp, AttemptRecord, AutoftError, Result};

pub const HEARTBEAT_EVERY: Duration = Duration::from_secs(30);
pub const PURGE_EVERY: Duration = Duration::from_secs(300);

/// How long a status pull waits for the daemon.
const PULL_TIMEOUT: Duration = Duration::from_secs(2);

const HELP: &str = "** Command list
 pause        stop calling, halt the transmitter
 run          resume calling
 status       ask the daemon for its status
 skip         give up on the current station
 max <n>      transmit periods per station
 purge        forget stale unlogged attempts
 <CALL>       show the attempt record for a call
 quit         leave the console";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Empty line, pulls status like `status`.
    Nothing,
    Pause,
    Run,
    Status,
    Skip,
    Max(u16),
    Purge,
    Lookup(String),
    Help,
    Quit,
}

pub fn parse_command(line: &str) -> Result<Command> {
    let line = line.trim().to_uppercase();
    let mut words = line.split_whitespace();
    let Some(first) = words.next() else {
        return Ok(Command::Nothing);
    };

    let cmd = match first {
        "PAUSE" => Command::Pause,
        "RUN" => Command::Run,
        "STATUS" => Command::Status,
        "SKIP" => Command::Skip,
        "PURGE" => Command::Purge,
        "HELP" | "?" => Command::Help,
        "QUIT" | "EXIT" => Command::Quit,
        "MAX" => {
            let arg = words.next().unwrap_or_default();
            let n = arg.parse::<u16>().map_err(|_| AutoftError::InvalidField {
                field: "max",
                value: arg.to_string(),
            })?;
            Command::Max(n)
        }
        call => Command::Lookup(normalize_call(call)?),
    };

    if let Some(extra) = words.next() {
        return Err(AutoftError::InvalidField {
            field: "command",
            value: extra.to_string(),
        });
    }
    Ok(cmd)
}

pub fn format_attempt(call: &str, attempt: Option<&AttemptRecord>) -> String {
    let Some(a) = attempt else {
        return format!("** {call}: not found");
    };
    let when = DateTime::from_timestamp(a.time, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| a.time.to_string());
    format!("** {}: last called {when}, logged: {}", a.call, a.logged)
}

pub fn format_status(s: &StatusData) -> String {
    format!(
        "call: {:<10} xmit: {}/{}  pause: {}  shutdown: {}",
        if s.call.is_empty() { "-" } else { s.call.as_str() },
        s.xmit,
        s.max_tries,
        s.pause,
        s.shutdown
    )
}

pub struct Console {
    socket: UdpSocket,
    server: SocketAddr,
    repo: Arc<dyn Repository>,
    cooldown: i64,
}

impl Console {
    pub fn new(
        socket: UdpSocket,
        server: SocketAddr,
        repo: Arc<dyn Repository>,
        cooldown: i64,
    ) -> Self {
        Console {
            socket,
            server,
            repo,
            cooldown,
        }
    }

    async fn send(&self, msg: &ControlMessage) -> Result<()> {
        self.socket.send_to(&msg.encode(), self.server).await?;
        Ok(())
    }

    /// Heartbeat, then wait for the daemon's status push.
    pub async fn pull(&self) -> Result<StatusData> {
        self.send(&ControlMessage::Heartbeat).await?;
        let mut buf = [0u8; 256];
        let deadline = tokio::time::Instant::now() + PULL_TIMEOUT;
        loop {
            let received =
                tokio::time::timeout_at(deadline, self.socket.recv_from(&mut buf)).await;
            let (n, _) = received.map_err(|_| {
                AutoftError::Transport(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("no status from {}", self.server),
                ))
            })??;
            if let Ok(ControlMessage::Data(data)) = control::decode(&buf[..n]) {
                return Ok(data);
            }
        }
    }

    /// Read-modify-write of the daemon's status.
    async fn update(&self, edit: impl FnOnce(&mut StatusData)) -> Result<StatusData> {
        let mut data = self.pull().await?;
        edit(&mut data);
        self.send(&ControlMessage::Data(data.clone())).await?;
        Ok(data)
    }

    pub fn purge(&self) -> Result<usize> {
        let n = self.repo.purge_attempts(timestamp() - self.cooldown)?;
        info!(purged = n, "stale attempts removed");
        Ok(n)
    }

    /// Run one command. Returns `Ok(false)` when the console should exit.
    pub async fn execute(&self, cmd: Command) -> Result<bool> {
        match cmd {
            Command::Nothing | Command::Status => {
                self.send(&ControlMessage::Heartbeat).await?;
            }
            Command::Pause => self.send(&ControlMessage::Pause(true)).await?,
            Command::Run => self.send(&ControlMessage::Pause(false)).await?,
            Command::Skip => {
                let data = self.update(|d| d.xmit = 0).await?;
                let call = if data.call.is_empty() { "-" } else { data.call.as_str() };
                println!("** skipped {call}");
            }
            Command::Max(n) => {
                self.update(|d| d.max_tries = n).await?;
            }
            Command::Purge => {
                let n = self.purge()?;
                println!("** {n} attempts purged");
            }
            Command::Lookup(call) => {
                let attempt = self.repo.get_attempt(&call)?;
                println!("{}", format_attempt(&call, attempt.as_ref()));
            }
            Command::Help => println!("{HELP}"),
            Command::Quit => return Ok(false),
        }
        Ok(true)
    }
}

/// Console loop over stdin and the control socket. Both timers fire once
/// on entry.
pub async fn run(console: Console) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut heartbeat = tokio::time::interval(HEARTBEAT_EVERY);
    let mut purge = tokio::time::interval(PURGE_EVERY);
    let mut buf = [0u8; 256];

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let cmd = match parse_command(&line) {
                    Ok(cmd) => cmd,
                    Err(e) => {
                        println!("***** {e}");
                        continue;
                    }
                };
                match console.execute(cmd).await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => println!("***** {e}"),
                }
            }
            received = console.socket.recv_from(&mut buf) => {
                let (n, from) = received?;
                match control::decode(&buf[..n]) {
                    Ok(ControlMessage::Data(data)) => println!("{}", format_status(&data)),
                    Ok(_) => {}
                    Err(e) => warn!(%from, error = %e, "dropped control packet"),
                }
            }
            _ = heartbeat.tick() => console.send(&ControlMessage::Heartbeat).await?,
            _ = purge.tick() => {
                if let Err(e) = console.purge() {
                    warn!(error = %e, "purge failed");
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
