//! WSJT-X UDP network protocol: packet types, decoding, and encoding.
//!
//! Every datagram starts with a 12-byte header (magic, schema, type) followed
//! by the sender's client id. All integers are big-endian. Strings carry a
//! signed 32-bit length prefix where `-1` means null and `0` means empty.
//!
//! Field layouts follow `NetworkMessage.hpp` from the WSJT-X source tree,
//! restricted to the fields of schema 2.

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

use crate::types::{AutoftError, CallRecord, Result};

pub const MAGIC: u32 = 0xADBC_CBDA;
pub const SCHEMA: u32 = 2;
/// Oldest schema we accept on decode.
pub const MIN_SCHEMA: u32 = 1;
pub const VERSION: &str = "1.1";
pub const REVISION: &str = "1a";
/// Client id stamped on every packet we send.
pub const CLIENT_ID: &str = "AUTOFT";

const HEADER_LEN: usize = 12;

/// Largest datagram WSJT-X emits in practice.
pub const MAX_DATAGRAM: usize = 4096;

/// Keyboard modifiers carried by a Reply packet.
pub mod modifiers {
    pub const NONE: u8 = 0x00;
    pub const SHIFT: u8 = 0x02;
    pub const CTRL: u8 = 0x04;
    pub const ALT: u8 = 0x08;
    pub const META: u8 = 0x10;
    pub const KEYPAD: u8 = 0x20;
    pub const GROUP_SWITCH: u8 = 0x40;
}

// ---------------------------------------------------------------------------
// Packet type tags
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum PacketType {
    Heartbeat = 0,
    Status = 1,
    Decode = 2,
    Clear = 3,
    Reply = 4,
    QsoLogged = 5,
    Close = 6,
    Replay = 7,
    HaltTx = 8,
    FreeText = 9,
    WsprDecode = 10,
    Location = 11,
    LoggedAdif = 12,
    HighlightCallsign = 13,
    SwitchConfiguration = 14,
    Configure = 15,
}

/// Wire tag table, indexed by tag value.
const PACKET_TYPES: [PacketType; 16] = [
    PacketType::Heartbeat,
    PacketType::Status,
    PacketType::Decode,
    PacketType::Clear,
    PacketType::Reply,
    PacketType::QsoLogged,
    PacketType::Close,
    PacketType::Replay,
    PacketType::HaltTx,
    PacketType::FreeText,
    PacketType::WsprDecode,
    PacketType::Location,
    PacketType::LoggedAdif,
    PacketType::HighlightCallsign,
    PacketType::SwitchConfiguration,
    PacketType::Configure,
];

impl PacketType {
    pub fn name(&self) -> &'static str {
        match self {
            PacketType::Heartbeat => "Heartbeat",
            PacketType::Status => "Status",
            PacketType::Decode => "Decode",
            PacketType::Clear => "Clear",
            PacketType::Reply => "Reply",
            PacketType::QsoLogged => "QSOLogged",
            PacketType::Close => "Close",
            PacketType::Replay => "Replay",
            PacketType::HaltTx => "HaltTx",
            PacketType::FreeText => "FreeText",
            PacketType::WsprDecode => "WSPRDecode",
            PacketType::Location => "Location",
            PacketType::LoggedAdif => "LoggedADIF",
            PacketType::HighlightCallsign => "HighlightCallsign",
            PacketType::SwitchConfiguration => "SwitchConfiguration",
            PacketType::Configure => "Configure",
        }
    }
}

impl TryFrom<u32> for PacketType {
    type Error = AutoftError;

    fn try_from(value: u32) -> Result<Self> {
        PACKET_TYPES
            .get(value as usize)
            .copied()
            .ok_or(AutoftError::UnsupportedPacketKind(value))
    }
}

impl std::fmt::Display for PacketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Time helpers
// ---------------------------------------------------------------------------

/// Milliseconds since midnight, as carried by the `Time` fields.
pub fn time_to_ms(time: NaiveTime) -> u32 {
    // Leap-second nanos (>= 1e9) fold into the last millisecond.
    let millis = (time.nanosecond() / 1_000_000).min(999);
    time.num_seconds_from_midnight() * 1000 + millis
}

/// Inverse of [`time_to_ms`]. Fails for values past the end of the day.
pub fn time_from_ms(ms: u32) -> Result<NaiveTime> {
    NaiveTime::from_num_seconds_from_midnight_opt(ms / 1000, (ms % 1000) * 1_000_000).ok_or(
        AutoftError::InvalidField {
            field: "time",
            value: ms.to_string(),
        },
    )
}

/// Place a wire time on a calendar day.
pub fn datetime_from_ms(date: NaiveDate, ms: u32) -> Result<NaiveDateTime> {
    Ok(date.and_time(time_from_ms(ms)?))
}

/// Julian day number of 0001-01-01 minus one (chrono counts CE days from 1).
const JULIAN_CE_OFFSET: i64 = 1_721_425;

/// Qt `QDateTime` as streamed by WSJT-X.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QDateTime {
    pub julian_day: i64,
    pub ms: u32,
    pub time_spec: TimeSpec,
}

/// Qt time spec byte. Only an offset from UTC carries extra data on the
/// wire: seconds east of UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeSpec {
    Local,
    Utc,
    OffsetFromUtc(i32),
    TimeZone,
}

impl TimeSpec {
    pub fn code(&self) -> u8 {
        match self {
            TimeSpec::Local => 0,
            TimeSpec::Utc => 1,
            TimeSpec::OffsetFromUtc(_) => 2,
            TimeSpec::TimeZone => 3,
        }
    }
}

impl QDateTime {
    pub fn utc(dt: NaiveDateTime) -> Self {
        QDateTime {
            julian_day: dt.date().num_days_from_ce() as i64 + JULIAN_CE_OFFSET,
            ms: time_to_ms(dt.time()),
            time_spec: TimeSpec::Utc,
        }
    }

    pub fn to_naive(&self) -> Option<NaiveDateTime> {
        let days = i32::try_from(self.julian_day - JULIAN_CE_OFFSET).ok()?;
        let date = NaiveDate::from_num_days_from_ce_opt(days)?;
        datetime_from_ms(date, self.ms).ok()
    }
}

/// 8-bit RGB colour; on the wire Qt scales each channel to 16 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

// ---------------------------------------------------------------------------
// Packet bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Heartbeat {
    pub max_schema: u32,
    pub version: Option<String>,
    pub revision: Option<String>,
}

impl Default for Heartbeat {
    fn default() -> Self {
        Heartbeat {
            max_schema: SCHEMA,
            version: Some(VERSION.into()),
            revision: Some(REVISION.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Status {
    pub frequency: u64,
    pub mode: Option<String>,
    pub dx_call: Option<String>,
    pub report: Option<String>,
    pub tx_mode: Option<String>,
    pub tx_enabled: bool,
    pub transmitting: bool,
    pub decoding: bool,
    pub rx_df: u32,
    pub tx_df: u32,
    pub de_call: Option<String>,
    pub de_grid: Option<String>,
    pub dx_grid: Option<String>,
    pub tx_watchdog: bool,
    pub sub_mode: Option<String>,
    pub fast_mode: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decode {
    pub new: bool,
    pub time: NaiveTime,
    pub snr: i32,
    /// Seconds, kept to 3 decimal places.
    pub delta_time: f64,
    pub delta_frequency: u32,
    pub mode: Option<String>,
    pub message: Option<String>,
    pub low_confidence: bool,
    pub off_air: bool,
}

impl std::fmt::Display for Decode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:<18} Δt {:+1.2} SNR {:+3} Mode {}",
            self.message.as_deref().unwrap_or(""),
            self.delta_time,
            self.snr,
            self.mode.as_deref().unwrap_or("-")
        )
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Clear {
    /// 0 = band activity, 1 = rx frequency, 2 = both. Absent in old versions.
    pub window: Option<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub time: NaiveTime,
    pub snr: i32,
    pub delta_time: f64,
    pub delta_frequency: u32,
    pub mode: Option<String>,
    pub message: Option<String>,
    pub low_confidence: bool,
    pub modifiers: u8,
}

impl From<&CallRecord> for Reply {
    /// Reply that makes WSJT-X answer the decode stored in `record`.
    fn from(record: &CallRecord) -> Self {
        Reply {
            time: record.time,
            snr: record.snr,
            delta_time: record.delta_time,
            delta_frequency: record.delta_frequency,
            mode: Some(record.mode.clone()),
            message: Some(record.message.clone()),
            low_confidence: record.low_confidence,
            modifiers: modifiers::NONE,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QsoLogged {
    pub date_time_off: QDateTime,
    pub dx_call: Option<String>,
    pub dx_grid: Option<String>,
    pub dial_frequency: u64,
    pub mode: Option<String>,
    pub report_sent: Option<String>,
    pub report_received: Option<String>,
    pub tx_power: Option<String>,
    pub comments: Option<String>,
    pub name: Option<String>,
    pub date_time_on: QDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HaltTx {
    /// `true` only disables auto-TX (stop at end of sequence);
    /// `false` halts the transmission immediately.
    pub auto_tx_only: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FreeText {
    pub text: Option<String>,
    pub send: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WsprDecode {
    pub new: bool,
    pub time: NaiveTime,
    pub snr: i32,
    pub delta_time: f64,
    pub frequency: u64,
    pub drift: i32,
    pub callsign: Option<String>,
    pub grid: Option<String>,
    pub power: i32,
    pub off_air: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoggedAdif {
    pub adif: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HighlightCallsign {
    pub call: Option<String>,
    /// `None` is Qt's invalid colour, which clears the highlight.
    pub background: Option<Rgb>,
    pub foreground: Option<Rgb>,
    pub highlight_last: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchConfiguration {
    pub configuration_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Configure {
    pub mode: Option<String>,
    pub frequency_tolerance: u32,
    pub sub_mode: Option<String>,
    pub fast_mode: bool,
    pub tr_period: u32,
    pub rx_df: u32,
    pub dx_call: Option<String>,
    pub dx_grid: Option<String>,
    pub generate_messages: bool,
}

/// Kind-specific payload of a packet.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Heartbeat(Heartbeat),
    Status(Status),
    Decode(Decode),
    Clear(Clear),
    Reply(Reply),
    QsoLogged(QsoLogged),
    Close,
    Replay,
    HaltTx(HaltTx),
    FreeText(FreeText),
    WsprDecode(WsprDecode),
    Location(Location),
    LoggedAdif(LoggedAdif),
    HighlightCallsign(HighlightCallsign),
    SwitchConfiguration(SwitchConfiguration),
    Configure(Configure),
}

impl Body {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Body::Heartbeat(_) => PacketType::Heartbeat,
            Body::Status(_) => PacketType::Status,
            Body::Decode(_) => PacketType::Decode,
            Body::Clear(_) => PacketType::Clear,
            Body::Reply(_) => PacketType::Reply,
            Body::QsoLogged(_) => PacketType::QsoLogged,
            Body::Close => PacketType::Close,
            Body::Replay => PacketType::Replay,
            Body::HaltTx(_) => PacketType::HaltTx,
            Body::FreeText(_) => PacketType::FreeText,
            Body::WsprDecode(_) => PacketType::WsprDecode,
            Body::Location(_) => PacketType::Location,
            Body::LoggedAdif(_) => PacketType::LoggedAdif,
            Body::HighlightCallsign(_) => PacketType::HighlightCallsign,
            Body::SwitchConfiguration(_) => PacketType::SwitchConfiguration,
            Body::Configure(_) => PacketType::Configure,
        }
    }
}

/// Header fields that vary between peers.
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub schema: u32,
    pub client_id: Option<String>,
}

impl Default for Header {
    fn default() -> Self {
        Header {
            schema: SCHEMA,
            client_id: Some(CLIENT_ID.into()),
        }
    }
}

/// One WSJT-X datagram.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub header: Header,
    pub body: Body,
}

impl Packet {
    /// Outgoing packet stamped with our schema and client id.
    pub fn new(body: Body) -> Self {
        Packet {
            header: Header::default(),
            body,
        }
    }

    pub fn halt_tx(auto_tx_only: bool) -> Self {
        Packet::new(Body::HaltTx(HaltTx { auto_tx_only }))
    }

    pub fn reply(record: &CallRecord) -> Self {
        Packet::new(Body::Reply(Reply::from(record)))
    }

    pub fn packet_type(&self) -> PacketType {
        self.body.packet_type()
    }

    /// Serialize to a complete datagram.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(128);
        w.u32(MAGIC);
        w.u32(self.header.schema);
        w.u32(self.packet_type() as u32);
        w.string(self.header.client_id.as_deref());

        match &self.body {
            Body::Heartbeat(p) => {
                w.u32(p.max_schema);
                w.string(p.version.as_deref());
                w.string(p.revision.as_deref());
            }
            Body::Status(p) => {
                w.u64(p.frequency);
                w.string(p.mode.as_deref());
                w.string(p.dx_call.as_deref());
                w.string(p.report.as_deref());
                w.string(p.tx_mode.as_deref());
                w.bool(p.tx_enabled);
                w.bool(p.transmitting);
                w.bool(p.decoding);
                w.u32(p.rx_df);
                w.u32(p.tx_df);
                w.string(p.de_call.as_deref());
                w.string(p.de_grid.as_deref());
                w.string(p.dx_grid.as_deref());
                w.bool(p.tx_watchdog);
                w.string(p.sub_mode.as_deref());
                w.bool(p.fast_mode);
            }
            Body::Decode(p) => {
                w.bool(p.new);
                w.u32(time_to_ms(p.time));
                w.i32(p.snr);
                w.f64(p.delta_time);
                w.u32(p.delta_frequency);
                w.string(p.mode.as_deref());
                w.string(p.message.as_deref());
                w.bool(p.low_confidence);
                w.bool(p.off_air);
            }
            Body::Clear(p) => {
                if let Some(window) = p.window {
                    w.u8(window);
                }
            }
            Body::Reply(p) => {
                w.u32(time_to_ms(p.time));
                w.i32(p.snr);
                w.f64(p.delta_time);
                w.u32(p.delta_frequency);
                w.string(p.mode.as_deref());
                w.string(p.message.as_deref());
                w.bool(p.low_confidence);
                w.u8(p.modifiers);
            }
            Body::QsoLogged(p) => {
                w.datetime(&p.date_time_off);
                w.string(p.dx_call.as_deref());
                w.string(p.dx_grid.as_deref());
                w.u64(p.dial_frequency);
                w.string(p.mode.as_deref());
                w.string(p.report_sent.as_deref());
                w.string(p.report_received.as_deref());
                w.string(p.tx_power.as_deref());
                w.string(p.comments.as_deref());
                w.string(p.name.as_deref());
                w.datetime(&p.date_time_on);
            }
            Body::Close | Body::Replay => {}
            Body::HaltTx(p) => w.bool(p.auto_tx_only),
            Body::FreeText(p) => {
                w.string(p.text.as_deref());
                w.bool(p.send);
            }
            Body::WsprDecode(p) => {
                w.bool(p.new);
                w.u32(time_to_ms(p.time));
                w.i32(p.snr);
                w.f64(p.delta_time);
                w.u64(p.frequency);
                w.i32(p.drift);
                w.string(p.callsign.as_deref());
                w.string(p.grid.as_deref());
                w.i32(p.power);
                w.bool(p.off_air);
            }
            Body::Location(p) => w.string(p.location.as_deref()),
            Body::LoggedAdif(p) => w.string(p.adif.as_deref()),
            Body::HighlightCallsign(p) => {
                w.string(p.call.as_deref());
                w.color(p.background);
                w.color(p.foreground);
                w.bool(p.highlight_last);
            }
            Body::SwitchConfiguration(p) => w.string(p.configuration_name.as_deref()),
            Body::Configure(p) => {
                w.string(p.mode.as_deref());
                w.u32(p.frequency_tolerance);
                w.string(p.sub_mode.as_deref());
                w.bool(p.fast_mode);
                w.u32(p.tr_period);
                w.u32(p.rx_df);
                w.string(p.dx_call.as_deref());
                w.string(p.dx_grid.as_deref());
                w.bool(p.generate_messages);
            }
        }

        w.into_inner()
    }
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decode one datagram.
///
/// Checks magic and schema, then branches on the type tag. Trailing bytes
/// after the last known field are ignored so newer schemas still decode.
pub fn decode(buf: &[u8]) -> Result<Packet> {
    let mut r = Reader::new(buf);

    let magic = r.u32()?;
    if magic != MAGIC {
        return Err(AutoftError::ProtocolMismatch(magic));
    }
    let schema = r.u32()?;
    if schema < MIN_SCHEMA {
        return Err(AutoftError::Version {
            version: schema,
            minimum: MIN_SCHEMA,
        });
    }
    let kind = PacketType::try_from(r.u32()?)?;
    debug_assert_eq!(r.pos, HEADER_LEN);
    let client_id = r.string()?;

    let body = match kind {
        PacketType::Heartbeat => Body::Heartbeat(Heartbeat {
            max_schema: r.u32()?,
            version: r.string()?,
            revision: r.string()?,
        }),
        PacketType::Status => Body::Status(Status {
            frequency: r.u64()?,
            mode: r.string()?,
            dx_call: r.string()?,
            report: r.string()?,
            tx_mode: r.string()?,
            tx_enabled: r.bool()?,
            transmitting: r.bool()?,
            decoding: r.bool()?,
            rx_df: r.u32()?,
            tx_df: r.u32()?,
            de_call: r.string()?,
            de_grid: r.string()?,
            dx_grid: r.string()?,
            tx_watchdog: r.bool()?,
            sub_mode: r.string()?,
            fast_mode: r.bool()?,
        }),
        PacketType::Decode => Body::Decode(Decode {
            new: r.bool()?,
            time: r.time()?,
            snr: r.i32()?,
            delta_time: round3(r.f64()?),
            delta_frequency: r.u32()?,
            mode: r.string()?,
            message: r.string()?,
            low_confidence: r.bool()?,
            off_air: r.bool()?,
        }),
        PacketType::Clear => Body::Clear(Clear {
            window: if r.is_empty() { None } else { Some(r.u8()?) },
        }),
        PacketType::Reply => Body::Reply(Reply {
            time: r.time()?,
            snr: r.i32()?,
            delta_time: round3(r.f64()?),
            delta_frequency: r.u32()?,
            mode: r.string()?,
            message: r.string()?,
            low_confidence: r.bool()?,
            modifiers: r.u8()?,
        }),
        PacketType::QsoLogged => Body::QsoLogged(QsoLogged {
            date_time_off: r.datetime()?,
            dx_call: r.string()?,
            dx_grid: r.string()?,
            dial_frequency: r.u64()?,
            mode: r.string()?,
            report_sent: r.string()?,
            report_received: r.string()?,
            tx_power: r.string()?,
            comments: r.string()?,
            name: r.string()?,
            date_time_on: r.datetime()?,
        }),
        PacketType::Close => Body::Close,
        PacketType::Replay => Body::Replay,
        PacketType::HaltTx => Body::HaltTx(HaltTx {
            auto_tx_only: r.bool()?,
        }),
        PacketType::FreeText => Body::FreeText(FreeText {
            text: r.string()?,
            send: r.bool()?,
        }),
        PacketType::WsprDecode => Body::WsprDecode(WsprDecode {
            new: r.bool()?,
            time: r.time()?,
            snr: r.i32()?,
            delta_time: round3(r.f64()?),
            frequency: r.u64()?,
            drift: r.i32()?,
            callsign: r.string()?,
            grid: r.string()?,
            power: r.i32()?,
            off_air: r.bool()?,
        }),
        PacketType::Location => Body::Location(Location {
            location: r.string()?,
        }),
        PacketType::LoggedAdif => Body::LoggedAdif(LoggedAdif { adif: r.string()? }),
        PacketType::HighlightCallsign => Body::HighlightCallsign(HighlightCallsign {
            call: r.string()?,
            background: r.color()?,
            foreground: r.color()?,
            highlight_last: r.bool()?,
        }),
        PacketType::SwitchConfiguration => Body::SwitchConfiguration(SwitchConfiguration {
            configuration_name: r.string()?,
        }),
        PacketType::Configure => Body::Configure(Configure {
            mode: r.string()?,
            frequency_tolerance: r.u32()?,
            sub_mode: r.string()?,
            fast_mode: r.bool()?,
            tr_period: r.u32()?,
            rx_df: r.u32()?,
            dx_call: r.string()?,
            dx_grid: r.string()?,
            generate_messages: r.bool()?,
        }),
    };

    Ok(Packet {
        header: Header { schema, client_id },
        body,
    })
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

// ---------------------------------------------------------------------------
// Cursor reader / writer
// ---------------------------------------------------------------------------

/// Big-endian cursor over a received datagram.
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    pub(crate) fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let available = self.buf.len().saturating_sub(self.pos);
        if n > available {
            return Err(AutoftError::Truncation {
                needed: n,
                offset: self.pos,
                available,
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub(crate) fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn bool(&mut self) -> Result<bool> {
        Ok(self.u8()? != 0)
    }

    pub(crate) fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    pub(crate) fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.array()?))
    }

    pub(crate) fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_be_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.array()?))
    }

    fn f64(&mut self) -> Result<f64> {
        Ok(f64::from_be_bytes(self.array()?))
    }

    /// Length-prefixed UTF-8; `-1` is null.
    fn string(&mut self) -> Result<Option<String>> {
        let len = self.i32()?;
        if len == -1 {
            return Ok(None);
        }
        if len < 0 {
            return Err(AutoftError::InvalidField {
                field: "string length",
                value: len.to_string(),
            });
        }
        let bytes = self.take(len as usize)?;
        String::from_utf8(bytes.to_vec())
            .map(Some)
            .map_err(|e| AutoftError::InvalidField {
                field: "string",
                value: e.to_string(),
            })
    }

    fn time(&mut self) -> Result<NaiveTime> {
        time_from_ms(self.u32()?)
    }

    fn datetime(&mut self) -> Result<QDateTime> {
        let julian_day = self.i64()?;
        let ms = self.u32()?;
        let time_spec = match self.u8()? {
            0 => TimeSpec::Local,
            1 => TimeSpec::Utc,
            2 => TimeSpec::OffsetFromUtc(self.i32()?),
            3 => TimeSpec::TimeZone,
            other => {
                return Err(AutoftError::InvalidField {
                    field: "time spec",
                    value: other.to_string(),
                })
            }
        };
        Ok(QDateTime {
            julian_day,
            ms,
            time_spec,
        })
    }

    fn color(&mut self) -> Result<Option<Rgb>> {
        let spec = self.u8()?;
        let _alpha = self.u16()?;
        let r = self.u16()?;
        let g = self.u16()?;
        let b = self.u16()?;
        let _pad = self.u16()?;
        if spec == 0 {
            return Ok(None);
        }
        Ok(Some(Rgb {
            r: (r >> 8) as u8,
            g: (g >> 8) as u8,
            b: (b >> 8) as u8,
        }))
    }
}

/// Big-endian datagram builder.
pub(crate) struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub(crate) fn with_capacity(n: usize) -> Self {
        Writer {
            buf: Vec::with_capacity(n),
        }
    }

    pub(crate) fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    pub(crate) fn bytes(&mut self, b: &[u8]) {
        self.buf.extend_from_slice(b);
    }

    pub(crate) fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub(crate) fn bool(&mut self, v: bool) {
        self.buf.push(v as u8);
    }

    pub(crate) fn u16(&mut self, v: u16) {
        self.bytes(&v.to_be_bytes());
    }

    pub(crate) fn i32(&mut self, v: i32) {
        self.bytes(&v.to_be_bytes());
    }

    pub(crate) fn u32(&mut self, v: u32) {
        self.bytes(&v.to_be_bytes());
    }

    fn i64(&mut self, v: i64) {
        self.bytes(&v.to_be_bytes());
    }

    fn u64(&mut self, v: u64) {
        self.bytes(&v.to_be_bytes());
    }

    fn f64(&mut self, v: f64) {
        self.bytes(&v.to_be_bytes());
    }

    fn string(&mut self, s: Option<&str>) {
        match s {
            None => self.i32(-1),
            Some(s) => {
                self.i32(s.len() as i32);
                self.bytes(s.as_bytes());
            }
        }
    }

    fn datetime(&mut self, dt: &QDateTime) {
        self.i64(dt.julian_day);
        self.u32(dt.ms);
        self.u8(dt.time_spec.code());
        if let TimeSpec::OffsetFromUtc(offset) = dt.time_spec {
            self.i32(offset);
        }
    }

    fn color(&mut self, color: Option<Rgb>) {
        match color {
            None => {
                self.u8(0);
                self.u16(0xFFFF);
                self.u16(0);
                self.u16(0);
                self.u16(0);
            }
            Some(c) => {
                self.u8(1);
                self.u16(0xFFFF);
                self.u16(c.r as u16 * 0x101);
                self.u16(c.g as u16 * 0x101);
                self.u16(c.b as u16 * 0x101);
            }
        }
        self.u16(0);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
