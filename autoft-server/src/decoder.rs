//! WSJT-X receive loop: decode datagrams, store calls, track the contact.
//!
//! WSJT-X sends every decode, status change and logged QSO to its UDP server
//! port. This task owns that socket. It captures the WSJT-X endpoint from
//! the first heartbeat, writes parsed decodes to the repository and adjusts
//! the transmit countdown as the contact progresses.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tracing::{debug, error, info, warn};

use autoft_core::exchange;
use autoft_core::status::SessionStatus;
use autoft_core::types::{timestamp, AttemptRecord, ExchangeKind, Result};
use autoft_core::wsjtx::{self, Body, Decode, QsoLogged, MAX_DATAGRAM};

/// Receive timeout, bounds how long a shutdown goes unnoticed.
pub const POLL: Duration = Duration::from_millis(500);

/// Call records older than this are pruned.
pub const CALL_RETENTION: i64 = 3600;

const PRUNE_EVERY: i64 = 60;

pub struct Decoder {
    status: Arc<SessionStatus>,
    my_call: String,
    home: Option<(f64, f64)>,
    cq_directives: Vec<String>,
}

impl Decoder {
    pub fn new(
        status: Arc<SessionStatus>,
        my_call: &str,
        home: Option<(f64, f64)>,
        cq_directives: Vec<String>,
    ) -> Self {
        Decoder {
            status,
            my_call: my_call.to_uppercase(),
            home,
            cq_directives,
        }
    }

    /// Process one datagram received from `from` at Unix time `now`.
    pub fn handle(&self, data: &[u8], from: SocketAddr, now: i64) -> Result<()> {
        let packet = wsjtx::decode(data)?;
        debug!(%from, kind = %packet.packet_type(), "packet");

        match &packet.body {
            Body::Heartbeat(hb) => {
                if self.status.set_wsjtx_addr(from) {
                    info!(
                        %from,
                        version = hb.version.as_deref().unwrap_or("?"),
                        client = packet.header.client_id.as_deref().unwrap_or("?"),
                        "WSJT-X found"
                    );
                }
            }
            Body::Status(st) => {
                debug!(
                    mode = st.mode.as_deref().unwrap_or(""),
                    transmitting = st.transmitting,
                    dx_call = st.dx_call.as_deref().unwrap_or(""),
                    "status"
                );
            }
            Body::Decode(decode) => self.on_decode(decode, now)?,
            Body::QsoLogged(logged) => self.on_logged(logged, now)?,
            Body::Close => info!(%from, "WSJT-X closed"),
            other => debug!(kind = %other.packet_type(), "ignored"),
        }
        Ok(())
    }

    fn on_decode(&self, decode: &Decode, now: i64) -> Result<()> {
        let message = decode.message.as_deref().unwrap_or("");
        let Some(ex) = exchange::parse(message) else {
            debug!(message, "unparsed message");
            return Ok(());
        };

        if ex.is_cq() && !ex.cq_wanted(&self.cq_directives) {
            debug!(call = %ex.call, directive = ex.extra.as_deref().unwrap_or(""), "directed CQ skipped");
            return Ok(());
        }

        let record = ex.to_record(decode, self.home, now);
        match ex.kind {
            ExchangeKind::Cq | ExchangeKind::Reply => debug!(
                call = %record.call,
                to = %record.to,
                grid = record.grid.as_deref().unwrap_or(""),
                distance = record.distance.unwrap_or(0.0) as i64,
                direction = record.direction.unwrap_or(0.0) as i64,
                snr = record.snr,
                "heard"
            ),
            ExchangeKind::Report | ExchangeKind::RogerReport if ex.is_for(&self.my_call) => {
                self.status.reset_xmit();
                info!(
                    call = %ex.call,
                    kind = %ex.kind,
                    report = ex.report.unwrap_or(0),
                    snr = decode.snr,
                    "report received"
                );
            }
            ExchangeKind::Ack if ex.is_for(&self.my_call) => {
                self.status.add_xmit(self.status.max_tries());
                info!(call = %ex.call, ack = ex.ack.as_deref().unwrap_or(""), "acknowledged");
            }
            _ => {}
        }

        self.status.repo().upsert_call(&record)
    }

    fn on_logged(&self, logged: &QsoLogged, now: i64) -> Result<()> {
        self.status.idle();
        let Some(call) = logged.dx_call.as_deref().filter(|c| !c.is_empty()) else {
            warn!("QSO logged without a call sign");
            return Ok(());
        };
        info!(
            call,
            grid = logged.dx_grid.as_deref().unwrap_or(""),
            sent = logged.report_sent.as_deref().unwrap_or(""),
            received = logged.report_received.as_deref().unwrap_or(""),
            "QSO logged"
        );
        self.status.repo().upsert_attempt(&AttemptRecord {
            call: call.to_uppercase(),
            time: now,
            logged: true,
        })
    }

    /// Drop call records past retention.
    pub fn prune(&self, now: i64) {
        match self.status.repo().prune_calls(now - CALL_RETENTION) {
            Ok(0) => {}
            Ok(n) => debug!(pruned = n, "old calls removed"),
            Err(e) => error!(error = %e, "prune failed"),
        }
    }
}

/// Receive loop. Returns once shutdown is requested.
pub async fn run(socket: UdpSocket, decoder: Decoder) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    let mut last_prune = 0i64;

    while !decoder.status.is_shutdown() {
        let (n, from) = match tokio::time::timeout(POLL, socket.recv_from(&mut buf)).await {
            Err(_) => continue,
            Ok(Err(e)) => {
                error!(error = %e, "receive failed");
                tokio::time::sleep(POLL).await;
                continue;
            }
            Ok(Ok(received)) => received,
        };

        let now = timestamp();
        match decoder.handle(&buf[..n], from, now) {
            Ok(()) => {}
            Err(e) if e.is_packet_error() => warn!(%from, len = n, error = %e, "dropped packet"),
            Err(e) => error!(%from, error = %e, "packet handling failed"),
        }

        if now - last_prune >= PRUNE_EVERY {
            decoder.prune(now);
            last_prune = now;
        }
    }
    info!("decoder stopped");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use autoft_core::repo::{MemoryRepository, Repository};
    use autoft_core::types::AutoftError;
    use autoft_core::wsjtx::{Heartbeat, Packet, QDateTime};
    use chrono::{NaiveDate, NaiveTime};

    const ME: &str = "W6BSD";

    fn from() -> SocketAddr {
        "127.0.0.1:2237".parse().unwrap()
    }

    fn decoder(directives: &[&str]) -> (Arc<MemoryRepository>, Arc<SessionStatus>, Decoder) {
        let repo = Arc::new(MemoryRepository::new());
        let status = Arc::new(SessionStatus::new(repo.clone(), 5));
        let home = autoft_core::geo::grid_to_latlon("CM87vl").ok();
        let d = Decoder::new(
            status.clone(),
            ME,
            home,
            directives.iter().map(|s| s.to_string()).collect(),
        );
        (repo, status, d)
    }

    fn decode_packet(message: &str, snr: i32) -> Vec<u8> {
        Packet::new(Body::Decode(Decode {
            new: true,
            time: NaiveTime::from_hms_opt(18, 30, 15).unwrap(),
            snr,
            delta_time: 0.1,
            delta_frequency: 1450,
            mode: Some("~".into()),
            message: Some(message.into()),
            low_confidence: false,
            off_air: false,
        }))
        .encode()
    }

    fn logged_packet(call: Option<&str>) -> Vec<u8> {
        let dt = QDateTime::utc(
            NaiveDate::from_ymd_opt(2024, 5, 1)
                .unwrap()
                .and_hms_opt(18, 31, 0)
                .unwrap(),
        );
        Packet::new(Body::QsoLogged(QsoLogged {
            date_time_off: dt,
            dx_call: call.map(str::to_string),
            dx_grid: Some("FN42".into()),
            dial_frequency: 14_074_000,
            mode: Some("FT8".into()),
            report_sent: Some("-10".into()),
            report_received: Some("-12".into()),
            tx_power: None,
            comments: None,
            name: None,
            date_time_on: dt,
        }))
        .encode()
    }

    #[test]
    fn test_heartbeat_captures_wsjtx_once() {
        let (_, status, d) = decoder(&[]);
        let hb = Packet::new(Body::Heartbeat(Heartbeat::default())).encode();
        d.handle(&hb, from(), 1).unwrap();
        d.handle(&hb, "127.0.0.1:9999".parse().unwrap(), 2).unwrap();
        assert_eq!(status.wsjtx_addr(), Some(from()));
    }

    #[test]
    fn test_cq_stored_with_distance() {
        let (repo, _, d) = decoder(&[]);
        d.handle(&decode_packet("CQ K1ABC FN42", -4), from(), 100).unwrap();
        let rec = repo.find_call("K1ABC").unwrap().unwrap();
        assert_eq!(rec.to, "CQ");
        assert_eq!(rec.snr, -4);
        assert_eq!(rec.timestamp, 100);
        assert!(rec.distance.unwrap() > 4000.0);
    }

    #[test]
    fn test_directed_cq() {
        let (repo, _, d) = decoder(&[]);
        d.handle(&decode_packet("CQ DX JA1XYZ PM95", 0), from(), 100).unwrap();
        assert!(repo.find_call("JA1XYZ").unwrap().is_none());

        let (repo, _, d) = decoder(&["DX"]);
        d.handle(&decode_packet("CQ DX JA1XYZ PM95", 0), from(), 100).unwrap();
        assert!(repo.find_call("JA1XYZ").unwrap().is_some());
    }

    #[test]
    fn test_report_resets_countdown() {
        let (_, status, d) = decoder(&[]);
        status.set_xmit(1);
        d.handle(&decode_packet("W6BSD K1ABC -12", -12), from(), 100).unwrap();
        assert_eq!(status.xmit(), 5);

        status.set_xmit(0);
        d.handle(&decode_packet("W6BSD K1ABC R-09", -9), from(), 101).unwrap();
        assert_eq!(status.xmit(), 5);
    }

    #[test]
    fn test_report_to_someone_else_ignored() {
        let (repo, status, d) = decoder(&[]);
        d.handle(&decode_packet("N0OTH K1ABC -12", -12), from(), 100).unwrap();
        assert_eq!(status.xmit(), 0);
        assert_eq!(repo.find_call("K1ABC").unwrap().unwrap().to, "N0OTH");
    }

    #[test]
    fn test_ack_extends_countdown() {
        let (_, status, d) = decoder(&[]);
        status.set_xmit(2);
        d.handle(&decode_packet("W6BSD K1ABC RR73", 0), from(), 100).unwrap();
        assert_eq!(status.xmit(), 7);
    }

    #[test]
    fn test_qso_logged() {
        let (repo, status, d) = decoder(&[]);
        status.set_call("K1ABC").unwrap();
        status.set_xmit(3);
        d.handle(&logged_packet(Some("K1ABC")), from(), 500).unwrap();
        assert_eq!(status.call(), "");
        assert_eq!(status.xmit(), 0);
        let attempt = repo.get_attempt("K1ABC").unwrap().unwrap();
        assert!(attempt.logged);
        assert_eq!(attempt.time, 500);
    }

    #[test]
    fn test_qso_logged_without_call() {
        let (repo, status, d) = decoder(&[]);
        status.set_xmit(3);
        d.handle(&logged_packet(None), from(), 500).unwrap();
        assert_eq!(status.xmit(), 0);
        assert!(repo.attempts().unwrap().is_empty());
    }

    #[test]
    fn test_free_text_ignored() {
        let (repo, _, d) = decoder(&[]);
        d.handle(&decode_packet("TNX BOB 73 GL", 0), from(), 100).unwrap();
        assert!(repo.recent_calls(0).unwrap().is_empty());
    }

    #[test]
    fn test_garbage_is_packet_error() {
        let (_, _, d) = decoder(&[]);
        let err = d.handle(b"not a wsjtx packet", from(), 1).unwrap_err();
        assert!(err.is_packet_error());
        assert!(matches!(err, AutoftError::ProtocolMismatch(_)));
    }

    #[test]
    fn test_prune() {
        let (repo, _, d) = decoder(&[]);
        d.handle(&decode_packet("CQ K1ABC FN42", 0), from(), 100).unwrap();
        d.prune(100 + CALL_RETENTION + 1);
        assert!(repo.find_call("K1ABC").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_loop_receives_and_stops() {
        let (repo, status, d) = decoder(&[]);
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let task = tokio::spawn(run(socket, d));

        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let hb = Packet::new(Body::Heartbeat(Heartbeat::default())).encode();
        peer.send_to(&hb, addr).await.unwrap();
        peer.send_to(b"junk", addr).await.unwrap();
        peer.send_to(&decode_packet("CQ K1ABC FN42", 3), addr).await.unwrap();

        for _ in 0..50 {
            if repo.find_call("K1ABC").unwrap().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(status.wsjtx_addr(), Some(peer.local_addr().unwrap()));
        assert!(repo.find_call("K1ABC").unwrap().is_some());

        status.request_shutdown();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
    }
}
