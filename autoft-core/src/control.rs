//! Internal control protocol between the daemon and its consoles.
//!
//! Layout (big-endian): magic u32, version u16, type u16, then a
//! type-specific body:
//!
//! | type | body |
//! |------|------|
//! | 1 heartbeat | none |
//! | 2 pause | pause bool |
//! | 8 data | max_tries u16, xmit u16, pause bool, shutdown bool, call 10 bytes NUL-padded |
//!
//! There are no acknowledgements: a heartbeat doubles as a status pull.

use crate::types::{AutoftError, Result, MAX_CALL_LEN};
use crate::wsjtx::{Reader, Writer};

pub const MAGIC: u32 = 0xBADD_ECAF;
pub const VERSION: u16 = 1;
pub const MIN_VERSION: u16 = 1;

pub const TYPE_HEARTBEAT: u16 = 0x01;
pub const TYPE_PAUSE: u16 = 0x02;
pub const TYPE_DATA: u16 = 0x08;

/// Size of a data message on the wire.
pub const DATA_LEN: usize = 8 + 2 + 2 + 1 + 1 + MAX_CALL_LEN;

/// Full status snapshot carried by a data message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatusData {
    pub max_tries: u16,
    pub xmit: u16,
    pub pause: bool,
    pub shutdown: bool,
    pub call: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    Heartbeat,
    Pause(bool),
    Data(StatusData),
}

impl ControlMessage {
    pub fn message_type(&self) -> u16 {
        match self {
            ControlMessage::Heartbeat => TYPE_HEARTBEAT,
            ControlMessage::Pause(_) => TYPE_PAUSE,
            ControlMessage::Data(_) => TYPE_DATA,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(DATA_LEN);
        w.u32(MAGIC);
        w.u16(VERSION);
        w.u16(self.message_type());

        match self {
            ControlMessage::Heartbeat => {}
            ControlMessage::Pause(flag) => w.bool(*flag),
            ControlMessage::Data(data) => {
                w.u16(data.max_tries);
                w.u16(data.xmit);
                w.bool(data.pause);
                w.bool(data.shutdown);
                w.bytes(&call_field(&data.call));
            }
        }

        w.into_inner()
    }
}

/// Upper-cased, NUL-padded fixed-width call field.
fn call_field(call: &str) -> [u8; MAX_CALL_LEN] {
    let mut field = [0u8; MAX_CALL_LEN];
    let upper = call.trim().to_uppercase();
    let bytes = upper.as_bytes();
    let n = bytes.len().min(MAX_CALL_LEN);
    field[..n].copy_from_slice(&bytes[..n]);
    field
}

/// Decode one control datagram.
pub fn decode(buf: &[u8]) -> Result<ControlMessage> {
    let mut r = Reader::new(buf);

    let magic = r.u32()?;
    if magic != MAGIC {
        return Err(AutoftError::ProtocolMismatch(magic));
    }
    let version = r.u16()?;
    if version < MIN_VERSION {
        return Err(AutoftError::Version {
            version: version as u32,
            minimum: MIN_VERSION as u32,
        });
    }

    match r.u16()? {
        TYPE_HEARTBEAT => Ok(ControlMessage::Heartbeat),
        TYPE_PAUSE => Ok(ControlMessage::Pause(r.bool()?)),
        TYPE_DATA => {
            let max_tries = r.u16()?;
            let xmit = r.u16()?;
            let pause = r.bool()?;
            let shutdown = r.bool()?;
            let raw = r.take(MAX_CALL_LEN)?;
            let call = String::from_utf8_lossy(raw)
                .trim_end_matches('\0')
                .trim()
                .to_string();
            Ok(ControlMessage::Data(StatusData {
                max_tries,
                xmit,
                pause,
                shutdown,
                call,
            }))
        }
        other => Err(AutoftError::UnknownMessageType(other)),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heartbeat_roundtrip() {
        let bytes = ControlMessage::Heartbeat.encode();
        assert_eq!(bytes, vec![0xBA, 0xDD, 0xEC, 0xAF, 0, 1, 0, 1]);
        assert_eq!(decode(&bytes).unwrap(), ControlMessage::Heartbeat);
    }

    #[test]
    fn test_pause_roundtrip() {
        for flag in [true, false] {
            let bytes = ControlMessage::Pause(flag).encode();
            assert_eq!(bytes.len(), 9);
            assert_eq!(decode(&bytes).unwrap(), ControlMessage::Pause(flag));
        }
    }

    #[test]
    fn test_data_roundtrip() {
        let msg = ControlMessage::Data(StatusData {
            max_tries: 5,
            xmit: 3,
            pause: true,
            shutdown: false,
            call: "K1ABC".into(),
        });
        let bytes = msg.encode();
        assert_eq!(bytes.len(), DATA_LEN);
        assert_eq!(&bytes[14..19], b"K1ABC");
        assert_eq!(&bytes[19..24], &[0; 5]);
        assert_eq!(decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_data_call_normalized() {
        let msg = ControlMessage::Data(StatusData {
            max_tries: 1,
            xmit: 0,
            pause: false,
            shutdown: true,
            call: "ja1xyz/p".into(),
        });
        match decode(&msg.encode()).unwrap() {
            ControlMessage::Data(d) => {
                assert_eq!(d.call, "JA1XYZ/P");
                assert!(d.shutdown);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_data_call_full_width() {
        let msg = ControlMessage::Data(StatusData {
            call: "ABCDEFGHIJ".into(),
            ..StatusData::default()
        });
        match decode(&msg.encode()).unwrap() {
            ControlMessage::Data(d) => assert_eq!(d.call, "ABCDEFGHIJ"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_empty_call() {
        let msg = ControlMessage::Data(StatusData::default());
        assert_eq!(decode(&msg.encode()).unwrap(), msg);
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = ControlMessage::Heartbeat.encode();
        bytes[0] = 0xAD;
        assert!(matches!(
            decode(&bytes),
            Err(AutoftError::ProtocolMismatch(_))
        ));
    }

    #[test]
    fn test_wsjtx_packet_is_rejected() {
        let bytes = crate::wsjtx::Packet::halt_tx(false).encode();
        assert!(matches!(
            decode(&bytes),
            Err(AutoftError::ProtocolMismatch(crate::wsjtx::MAGIC))
        ));
    }

    #[test]
    fn test_old_version() {
        let mut bytes = ControlMessage::Heartbeat.encode();
        bytes[4..6].copy_from_slice(&0u16.to_be_bytes());
        assert!(matches!(
            decode(&bytes),
            Err(AutoftError::Version { version: 0, .. })
        ));
    }

    #[test]
    fn test_newer_version_accepted() {
        let mut bytes = ControlMessage::Pause(true).encode();
        bytes[4..6].copy_from_slice(&7u16.to_be_bytes());
        assert_eq!(decode(&bytes).unwrap(), ControlMessage::Pause(true));
    }

    #[test]
    fn test_unknown_type() {
        let mut bytes = ControlMessage::Heartbeat.encode();
        bytes[6..8].copy_from_slice(&4u16.to_be_bytes());
        assert!(matches!(
            decode(&bytes),
            Err(AutoftError::UnknownMessageType(4))
        ));
    }

    #[test]
    fn test_truncated_data() {
        let msg = ControlMessage::Data(StatusData::default());
        let bytes = msg.encode();
        assert!(matches!(
            decode(&bytes[..bytes.len() - 1]),
            Err(AutoftError::Truncation { .. })
        ));
        assert!(matches!(
            decode(&ControlMessage::Pause(true).encode()[..8]),
            Err(AutoftError::Truncation { .. })
        ));
    }
}
