//! Shared types, error enum, and repository record types for autoft-core.

use chrono::NaiveTime;
use serde::Serialize;
use thiserror::Error;

/// All errors produced by autoft-core.
#[derive(Debug, Error)]
pub enum AutoftError {
    #[error("protocol mismatch: bad magic 0x{0:08X}")]
    ProtocolMismatch(u32),
    #[error("unsupported version {version}, minimum is {minimum}")]
    Version { version: u32, minimum: u32 },
    #[error("unsupported packet kind: {0}")]
    UnsupportedPacketKind(u32),
    #[error("unknown control message type: {0}")]
    UnknownMessageType(u16),
    #[error("truncated packet: need {needed} bytes at offset {offset}, have {available}")]
    Truncation {
        needed: usize,
        offset: usize,
        available: usize,
    },
    #[error("invalid {field}: {value}")]
    InvalidField { field: &'static str, value: String },
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
    #[error("config error: {0}")]
    Config(String),
    #[error("repository error: {0}")]
    Repository(String),
}

impl AutoftError {
    /// True for errors that mean "drop this datagram and keep going".
    pub fn is_packet_error(&self) -> bool {
        matches!(
            self,
            AutoftError::ProtocolMismatch(_)
                | AutoftError::Version { .. }
                | AutoftError::UnsupportedPacketKind(_)
                | AutoftError::UnknownMessageType(_)
                | AutoftError::Truncation { .. }
                | AutoftError::InvalidField { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, AutoftError>;

// ---------------------------------------------------------------------------
// Call signs
// ---------------------------------------------------------------------------

/// Longest call sign carried by the control protocol.
pub const MAX_CALL_LEN: usize = 10;

/// General call addressed to any station.
pub const CQ: &str = "CQ";

/// Upper-case and length-check a call sign.
pub fn normalize_call(call: &str) -> Result<String> {
    let call = call.trim();
    if call.len() > MAX_CALL_LEN {
        return Err(AutoftError::Config(format!(
            "call sign '{call}' longer than {MAX_CALL_LEN} characters"
        )));
    }
    Ok(call.to_uppercase())
}

/// Current Unix time in whole seconds.
pub fn timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

// ---------------------------------------------------------------------------
// Repository records
// ---------------------------------------------------------------------------

/// What a decoded message was doing in the contact sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExchangeKind {
    Cq,
    Reply,
    Report,
    RogerReport,
    Ack,
}

impl ExchangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeKind::Cq => "cq",
            ExchangeKind::Reply => "reply",
            ExchangeKind::Report => "report",
            ExchangeKind::RogerReport => "roger",
            ExchangeKind::Ack => "ack",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cq" => Some(ExchangeKind::Cq),
            "reply" => Some(ExchangeKind::Reply),
            "report" => Some(ExchangeKind::Report),
            "roger" => Some(ExchangeKind::RogerReport),
            "ack" => Some(ExchangeKind::Ack),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Latest decoded message heard from one station, keyed by call sign.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallRecord {
    pub call: String,
    pub to: String,
    pub kind: ExchangeKind,
    /// CQ directive (`DX`, `NA`, ...) when the CQ was directed.
    pub extra: Option<String>,
    pub grid: Option<String>,
    /// Kilometres from the operator's grid.
    pub distance: Option<f64>,
    /// Bearing in degrees from the operator's grid.
    pub direction: Option<f64>,
    pub snr: i32,
    #[serde(serialize_with = "serialize_time")]
    pub time: NaiveTime,
    pub delta_time: f64,
    pub delta_frequency: u32,
    pub mode: String,
    pub message: String,
    pub low_confidence: bool,
    /// Unix seconds when the decode was received.
    pub timestamp: i64,
}

fn serialize_time<S: serde::Serializer>(
    time: &NaiveTime,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&time.format("%H:%M:%S%.3f").to_string())
}

impl CallRecord {
    /// Selection score: rewards distance and signal strength jointly.
    pub fn coefficient(&self) -> f64 {
        coefficient(self.distance.unwrap_or(0.0), self.snr)
    }

    pub fn is_cq(&self) -> bool {
        self.to == CQ
    }

    /// Heard within the last `window` seconds of `now`.
    pub fn is_recent(&self, now: i64, window: i64) -> bool {
        self.timestamp > now - window
    }
}

/// `distance × 10^(snr/10)`.
///
/// Monotonic non-decreasing in both arguments for non-negative distances.
pub fn coefficient(distance: f64, snr: i32) -> f64 {
    distance * 10f64.powf(snr as f64 / 10.0)
}

/// A station we have called, so we don't keep calling it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptRecord {
    pub call: String,
    /// Unix seconds of the last attempt (or of the logged contact).
    pub time: i64,
    pub logged: bool,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
