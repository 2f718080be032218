//! Parse decoded FT8/FT4 message text into a structured exchange.
//!
//! The standard contact runs:
//!
//! ```text
//! CQ W6BSD CM87          call
//! W6BSD K1ABC FN42       reply with grid
//! K1ABC W6BSD -10        signal report
//! W6BSD K1ABC R-12       roger + report
//! K1ABC W6BSD RR73       acknowledgement
//! ```
//!
//! The first word is the addressee and the second is the sender, except for
//! CQ where the directive (if any) sits between `CQ` and the sender.

use crate::geo;
use crate::types::{CallRecord, ExchangeKind, CQ};
use crate::wsjtx::Decode;

/// Acknowledgement tokens. Checked before grids since `RR73` is also a
/// syntactically valid locator.
const ACKS: [&str; 4] = ["RRR", "RR73", "73", "R73"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub kind: ExchangeKind,
    pub to: String,
    pub call: String,
    /// CQ directive such as `DX`, `NA` or `POTA`.
    pub extra: Option<String>,
    pub grid: Option<String>,
    /// Report in dB for report and roger-report exchanges.
    pub report: Option<i32>,
    /// Raw acknowledgement token for ack exchanges.
    pub ack: Option<String>,
}

impl Exchange {
    fn new(kind: ExchangeKind, to: &str, call: &str) -> Self {
        Exchange {
            kind,
            to: to.to_string(),
            call: call.to_string(),
            extra: None,
            grid: None,
            report: None,
            ack: None,
        }
    }

    pub fn is_cq(&self) -> bool {
        self.kind == ExchangeKind::Cq
    }

    pub fn is_for(&self, call: &str) -> bool {
        self.to == call
    }

    /// Directed CQs are only worth answering when their directive is in
    /// `directives`. Undirected CQs always pass.
    pub fn cq_wanted(&self, directives: &[String]) -> bool {
        match &self.extra {
            None => true,
            Some(d) => directives.iter().any(|w| w == d),
        }
    }

    /// Build the repository record for this exchange.
    ///
    /// `home` is the operator's position; distance and bearing are only
    /// filled for exchanges that carry a grid.
    pub fn to_record(&self, decode: &Decode, home: Option<(f64, f64)>, now: i64) -> CallRecord {
        let position = self
            .grid
            .as_deref()
            .and_then(|g| geo::grid_to_latlon(g).ok());
        let (distance, direction) = match (home, position) {
            (Some(h), Some(p)) => (Some(geo::distance_km(h, p)), Some(geo::azimuth(h, p))),
            _ => (None, None),
        };

        CallRecord {
            call: self.call.clone(),
            to: self.to.clone(),
            kind: self.kind,
            extra: self.extra.clone(),
            grid: self.grid.clone(),
            distance,
            direction,
            snr: decode.snr,
            time: decode.time,
            delta_time: decode.delta_time,
            delta_frequency: decode.delta_frequency,
            mode: decode.mode.clone().unwrap_or_default(),
            message: decode.message.clone().unwrap_or_default(),
            low_confidence: decode.low_confidence,
            timestamp: now,
        }
    }
}

/// Strip a portable suffix (`/P`, `/MM`, ...) and hash brackets.
fn base_call(word: &str) -> &str {
    let word = word.trim_start_matches('<').trim_end_matches('>');
    match word.split_once('/') {
        Some((call, _)) if !call.is_empty() => call,
        _ => word,
    }
}

fn is_call(word: &str) -> bool {
    !word.is_empty()
        && word.chars().any(|c| c.is_ascii_digit())
        && word.chars().all(|c| c.is_ascii_alphanumeric())
}

/// `-10`, `+05` or a bare `0`.
fn parse_report(word: &str) -> Option<i32> {
    if word == "0" {
        return Some(0);
    }
    let digits = word.strip_prefix('-').or_else(|| word.strip_prefix('+'))?;
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    word.parse().ok()
}

fn is_square(word: &str) -> bool {
    word.len() == 4 && geo::is_grid(word)
}

/// Parse one decoded message. Returns `None` for free text, contest
/// exchanges and anything else that isn't a standard sequence step.
pub fn parse(message: &str) -> Option<Exchange> {
    let words: Vec<&str> = message.split_whitespace().collect();
    if words.len() < 3 {
        return None;
    }

    if words[0] == CQ {
        let (extra, call, grid) = match words.len() {
            3 => (None, words[1], words[2]),
            4 => (Some(words[1]), words[2], words[3]),
            _ => return None,
        };
        let call = base_call(call);
        if !is_call(call) || !is_square(grid) {
            return None;
        }
        let mut ex = Exchange::new(ExchangeKind::Cq, CQ, call);
        ex.extra = extra.map(str::to_string);
        ex.grid = Some(grid.to_string());
        return Some(ex);
    }

    if words.len() != 3 {
        return None;
    }
    let to = base_call(words[0]);
    let call = base_call(words[1]);
    if !is_call(call) {
        return None;
    }
    let last = words[2];

    if ACKS.contains(&last) {
        let mut ex = Exchange::new(ExchangeKind::Ack, to, call);
        ex.ack = Some(last.to_string());
        return Some(ex);
    }
    if let Some(report) = last.strip_prefix('R').and_then(parse_report) {
        let mut ex = Exchange::new(ExchangeKind::RogerReport, to, call);
        ex.report = Some(report);
        return Some(ex);
    }
    if let Some(report) = parse_report(last) {
        let mut ex = Exchange::new(ExchangeKind::Report, to, call);
        ex.report = Some(report);
        return Some(ex);
    }
    if is_square(last) {
        let mut ex = Exchange::new(ExchangeKind::Reply, to, call);
        ex.grid = Some(last.to_string());
        return Some(ex);
    }
    None
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
