//! Per-period transmit decisions.
//!
//! [`Sequencer::step`] runs once per transmit period. It reads the session
//! status and the repository, mutates the status, and returns the single
//! [`Action`] the scheduler should put on the wire. Rules are evaluated in
//! order and the first match wins:
//!
//! 1. paused: halt immediately and drop the contact
//! 2. our station's latest message went to someone else: drop the contact
//! 3. our station is still calling CQ or answering us: reply again
//! 4. stations answered our own CQ: reply to the strongest
//! 5. countdown running: decrement and wait
//! 6. otherwise ask the selector for a new station, or halt if none
//!
//! Rules 4 and 6 return [`Action::Start`]. Opening the contact (current
//! call, countdown, attempt record) waits for [`Sequencer::commit`], which
//! the scheduler calls only once the reply is on the wire.

use tracing::{debug, info};

use crate::selector::CallSelector;
use crate::status::SessionStatus;
use crate::types::{AttemptRecord, CallRecord, ExchangeKind, Result, CQ};
use crate::wsjtx::Packet;

/// Seconds a decode stays actionable.
pub const ACTIVE_WINDOW: i64 = 15;

/// Seconds before an unanswered station can be tried again.
pub const DEFAULT_COOLDOWN: i64 = 900;

/// Second-of-minute slot starts for 15 s periods.
pub const DEFAULT_OFFSETS: [u32; 4] = [0, 15, 30, 45];

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Send HaltTx. `auto_tx_only == false` stops the transmitter now.
    Halt { auto_tx_only: bool },
    /// Answer this decode within the current contact.
    Reply(CallRecord),
    /// Answer this decode and open a contact with its sender.
    Start(CallRecord),
    /// Nothing to send this period.
    Wait,
}

impl Action {
    /// Fully encoded datagram for this action, if any.
    pub fn to_packet(&self) -> Option<Packet> {
        match self {
            Action::Halt { auto_tx_only } => Some(Packet::halt_tx(*auto_tx_only)),
            Action::Reply(record) | Action::Start(record) => Some(Packet::reply(record)),
            Action::Wait => None,
        }
    }
}

pub struct Sequencer {
    selector: Box<dyn CallSelector>,
    my_call: String,
    window: i64,
    cooldown: i64,
}

impl Sequencer {
    pub fn new(selector: Box<dyn CallSelector>, my_call: &str) -> Self {
        Sequencer {
            selector,
            my_call: my_call.to_uppercase(),
            window: ACTIVE_WINDOW,
            cooldown: DEFAULT_COOLDOWN,
        }
    }

    pub fn with_window(mut self, window: i64) -> Self {
        self.window = window;
        self
    }

    pub fn with_cooldown(mut self, cooldown: i64) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn selector_name(&self) -> &'static str {
        self.selector.name()
    }

    /// Decide what to transmit for the period starting at `now`.
    pub fn step(&self, status: &SessionStatus, now: i64) -> Result<Action> {
        let repo = status.repo();

        if status.is_pause() {
            status.idle();
            return Ok(Action::Halt {
                auto_tx_only: false,
            });
        }

        let call = status.call();
        if !call.is_empty() {
            if let Some(record) = repo.find_call(&call)? {
                if record.is_recent(now, self.window) {
                    if record.to != CQ && record.to != self.my_call {
                        info!(call = %call, to = %record.to, "station went elsewhere, dropping");
                        status.idle();
                        return Ok(Action::Halt { auto_tx_only: true });
                    }
                    debug!(call = %call, message = %record.message, "continuing exchange");
                    return Ok(Action::Reply(record));
                }
            }
        }

        if let Some(record) = self.pile_up(status, now)? {
            info!(
                call = %record.call,
                snr = record.snr,
                distance = record.distance.unwrap_or(0.0) as i64,
                "answering caller"
            );
            return Ok(Action::Start(record));
        }

        if status.xmit() > 0 {
            status.decrement();
            return Ok(Action::Wait);
        }

        let purged = repo.purge_attempts(now - self.cooldown)?;
        if purged > 0 {
            debug!(purged, "expired attempts removed");
        }

        match self.selector.select(repo.as_ref(), now, self.window)? {
            Some(record) => {
                info!(
                    call = %record.call,
                    grid = record.grid.as_deref().unwrap_or("-"),
                    snr = record.snr,
                    distance = record.distance.unwrap_or(0.0) as i64,
                    "calling"
                );
                Ok(Action::Start(record))
            }
            None => {
                status.clear_call();
                Ok(Action::Halt { auto_tx_only: true })
            }
        }
    }

    /// Strongest station that answered our CQ inside the window. Reports
    /// and acks are not new callers, nor is a station already logged. Ties
    /// keep the first one scanned.
    fn pile_up(&self, status: &SessionStatus, now: i64) -> Result<Option<CallRecord>> {
        let repo = status.repo();
        let mut best: Option<CallRecord> = None;
        for record in repo.recent_calls(now - self.window)? {
            if record.to != self.my_call || record.kind != ExchangeKind::Reply {
                continue;
            }
            if repo.get_attempt(&record.call)?.is_some_and(|a| a.logged) {
                continue;
            }
            let better = match &best {
                Some(b) => record.coefficient() > b.coefficient(),
                None => true,
            };
            if better {
                best = Some(record);
            }
        }
        Ok(best)
    }

    /// Open the contact behind a [`Action::Start`] that was transmitted.
    /// Other actions need nothing.
    pub fn commit(&self, status: &SessionStatus, action: &Action, now: i64) -> Result<()> {
        let Action::Start(record) = action else {
            return Ok(());
        };
        status.set_call(&record.call)?;
        status.reset_xmit();
        status.repo().upsert_attempt(&AttemptRecord {
            call: record.call.clone(),
            time: now,
            logged: false,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::SelectorConfig;
    use crate::repo::tests::cq;
    use crate::repo::{MemoryRepository, Repository};
    use crate::selector::{build_selector, AnySelector};
    use crate::status::DEFAULT_MAX_TRIES;
    use crate::wsjtx::{Body, PacketType};

    const ME: &str = "W6BSD";
    const NOW: i64 = 10_000;

    fn setup() -> (Arc<MemoryRepository>, SessionStatus) {
        let repo = Arc::new(MemoryRepository::new());
        let status = SessionStatus::new(repo.clone(), DEFAULT_MAX_TRIES);
        (repo, status)
    }

    fn sequencer() -> Sequencer {
        Sequencer::new(Box::new(AnySelector), ME)
    }

    /// Step, then commit as the scheduler does after a successful send.
    fn transmit(seq: &Sequencer, status: &SessionStatus, now: i64) -> Action {
        let action = seq.step(status, now).unwrap();
        seq.commit(status, &action, now).unwrap();
        action
    }

    fn reply_to(to: &str, call: &str, grid: &str, distance: f64, snr: i32, ts: i64) -> CallRecord {
        let mut r = cq(call, grid, distance, snr, ts);
        r.to = to.into();
        r.kind = ExchangeKind::Reply;
        r.message = format!("{to} {call} {grid}");
        r
    }

    #[test]
    fn test_paused_halts_even_with_pile_up() {
        let (repo, status) = setup();
        repo.upsert_call(&reply_to(ME, "K1ABC", "FN42", 9000.0, 20, NOW - 1))
            .unwrap();
        status.set_call("JA1XYZ").unwrap();
        status.set_xmit(3);
        status.set_pause(true);

        let action = sequencer().step(&status, NOW).unwrap();
        assert_eq!(action, Action::Halt { auto_tx_only: false });
        assert_eq!(status.call(), "");
        assert_eq!(status.xmit(), 0);
        assert!(!repo.is_attempted("K1ABC").unwrap());

        let pkt = action.to_packet().unwrap();
        assert_eq!(pkt.packet_type(), PacketType::HaltTx);
    }

    #[test]
    fn test_new_cq_in_allow_list_gets_called() {
        let (repo, status) = setup();
        repo.upsert_call(&cq("K1ABC", "FN42", 1000.0, 5, NOW - 2)).unwrap();
        let sel = build_selector(&SelectorConfig {
            name: "grid".into(),
            squares: vec!["FN".into()],
        })
        .unwrap();
        let seq = Sequencer::new(sel, ME);

        match transmit(&seq, &status, NOW) {
            Action::Start(rec) => {
                assert_eq!(rec.call, "K1ABC");
                let pkt = Action::Start(rec).to_packet().unwrap();
                match pkt.body {
                    Body::Reply(r) => assert_eq!(r.message.as_deref(), Some("CQ K1ABC FN42")),
                    other => panic!("unexpected {other:?}"),
                }
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(status.call(), "K1ABC");
        assert_eq!(status.xmit(), DEFAULT_MAX_TRIES);
        let attempt = repo.get_attempt("K1ABC").unwrap().unwrap();
        assert!(!attempt.logged);
        assert_eq!(attempt.time, NOW);
    }

    #[test]
    fn test_attempted_call_is_skipped() {
        let (repo, status) = setup();
        repo.upsert_call(&cq("K1ABC", "FN42", 1000.0, 5, NOW - 2)).unwrap();
        repo.upsert_attempt(&AttemptRecord {
            call: "K1ABC".into(),
            time: NOW - 60,
            logged: false,
        })
        .unwrap();
        let action = sequencer().step(&status, NOW).unwrap();
        assert_eq!(action, Action::Halt { auto_tx_only: true });
        assert_eq!(status.call(), "");
    }

    #[test]
    fn test_expired_attempt_is_retried() {
        let (repo, status) = setup();
        repo.upsert_call(&cq("K1ABC", "FN42", 1000.0, 5, NOW - 2)).unwrap();
        repo.upsert_attempt(&AttemptRecord {
            call: "K1ABC".into(),
            time: NOW - DEFAULT_COOLDOWN - 1,
            logged: false,
        })
        .unwrap();
        assert!(matches!(
            sequencer().step(&status, NOW).unwrap(),
            Action::Start(_)
        ));
    }

    #[test]
    fn test_station_went_elsewhere() {
        let (repo, status) = setup();
        repo.upsert_call(&reply_to("N0OTH", "K1ABC", "FN42", 4000.0, 0, NOW - 3))
            .unwrap();
        status.set_call("K1ABC").unwrap();
        status.set_xmit(4);

        let action = sequencer().step(&status, NOW).unwrap();
        assert_eq!(action, Action::Halt { auto_tx_only: true });
        assert_eq!(status.call(), "");
        assert_eq!(status.xmit(), 0);
    }

    #[test]
    fn test_continue_exchange() {
        let (repo, status) = setup();
        let mut report = reply_to(ME, "K1ABC", "FN42", 4000.0, -8, NOW - 3);
        report.kind = ExchangeKind::Report;
        report.message = "W6BSD K1ABC -08".into();
        repo.upsert_call(&report).unwrap();
        status.set_call("K1ABC").unwrap();
        status.set_xmit(2);

        match sequencer().step(&status, NOW).unwrap() {
            Action::Reply(rec) => assert_eq!(rec.message, "W6BSD K1ABC -08"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(status.call(), "K1ABC");
        assert_eq!(status.xmit(), 2);
    }

    #[test]
    fn test_still_calling_cq() {
        let (repo, status) = setup();
        repo.upsert_call(&cq("K1ABC", "FN42", 4000.0, 0, NOW - 5)).unwrap();
        status.set_call("K1ABC").unwrap();
        assert!(matches!(
            sequencer().step(&status, NOW).unwrap(),
            Action::Reply(r) if r.call == "K1ABC"
        ));
    }

    #[test]
    fn test_pile_up_picks_best() {
        let (repo, status) = setup();
        repo.upsert_call(&reply_to(ME, "K1ABC", "FN42", 4000.0, -10, NOW - 2))
            .unwrap(); // 400
        repo.upsert_call(&reply_to(ME, "JA1XYZ", "PM95", 8000.0, 0, NOW - 2))
            .unwrap(); // 8000
        repo.upsert_call(&reply_to("N0OTH", "G4XYZ", "IO91", 9000.0, 10, NOW - 2))
            .unwrap();

        match transmit(&sequencer(), &status, NOW) {
            Action::Start(rec) => assert_eq!(rec.call, "JA1XYZ"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(status.call(), "JA1XYZ");
        assert_eq!(status.xmit(), DEFAULT_MAX_TRIES);
        assert!(repo.is_attempted("JA1XYZ").unwrap());
    }

    #[test]
    fn test_step_alone_opens_no_contact() {
        let (repo, status) = setup();
        repo.upsert_call(&cq("K1ABC", "FN42", 1000.0, 5, NOW - 2)).unwrap();
        let seq = sequencer();

        let action = seq.step(&status, NOW).unwrap();
        assert!(matches!(&action, Action::Start(r) if r.call == "K1ABC"));
        assert_eq!(status.call(), "");
        assert_eq!(status.xmit(), 0);
        assert!(!repo.is_attempted("K1ABC").unwrap());

        // Not sent, so the next period picks the same station again.
        assert_eq!(seq.step(&status, NOW + 5).unwrap(), action);
    }

    #[test]
    fn test_commit_ignores_other_actions() {
        let (repo, status) = setup();
        let seq = sequencer();
        let rec = cq("K1ABC", "FN42", 1000.0, 5, NOW - 2);
        for action in [
            Action::Wait,
            Action::Halt { auto_tx_only: true },
            Action::Reply(rec),
        ] {
            seq.commit(&status, &action, NOW).unwrap();
        }
        assert_eq!(status.call(), "");
        assert!(repo.attempts().unwrap().is_empty());
    }

    #[test]
    fn test_pile_up_tie_keeps_scan_order() {
        let (repo, status) = setup();
        // Same coefficient: equal distance and SNR.
        repo.upsert_call(&reply_to(ME, "K1ABC", "FN42", 5000.0, 0, NOW - 2))
            .unwrap();
        repo.upsert_call(&reply_to(ME, "DL1AAA", "JO62", 5000.0, 0, NOW - 2))
            .unwrap();
        match sequencer().step(&status, NOW).unwrap() {
            Action::Start(rec) => assert_eq!(rec.call, "DL1AAA"),
            other => panic!("unexpected {other:?}"),
        }

        // A newer reply scans first.
        repo.upsert_call(&reply_to(ME, "N2ZZZ", "FN20", 5000.0, 0, NOW - 1))
            .unwrap();
        match sequencer().step(&status, NOW).unwrap() {
            Action::Start(rec) => assert_eq!(rec.call, "N2ZZZ"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_ack_after_logged_contact_is_not_a_caller() {
        let (repo, status) = setup();
        let mut ack = reply_to(ME, "K1ABC", "FN42", 4000.0, 0, NOW - 3);
        ack.kind = ExchangeKind::Ack;
        ack.message = "W6BSD K1ABC RR73".into();
        repo.upsert_call(&ack).unwrap();
        let logged = AttemptRecord {
            call: "K1ABC".into(),
            time: NOW - 20,
            logged: true,
        };
        repo.upsert_attempt(&logged).unwrap();

        let action = transmit(&sequencer(), &status, NOW);
        assert_eq!(action, Action::Halt { auto_tx_only: true });
        assert_eq!(status.call(), "");
        assert_eq!(repo.get_attempt("K1ABC").unwrap(), Some(logged));
    }

    #[test]
    fn test_report_to_us_is_not_a_caller() {
        let (repo, status) = setup();
        let mut report = reply_to(ME, "K1ABC", "FN42", 4000.0, -8, NOW - 3);
        report.kind = ExchangeKind::Report;
        report.message = "W6BSD K1ABC -08".into();
        repo.upsert_call(&report).unwrap();

        let action = sequencer().step(&status, NOW).unwrap();
        assert_eq!(action, Action::Halt { auto_tx_only: true });
    }

    #[test]
    fn test_logged_station_replying_again_is_skipped() {
        let (repo, status) = setup();
        repo.upsert_call(&reply_to(ME, "K1ABC", "FN42", 9000.0, 10, NOW - 2))
            .unwrap();
        repo.upsert_call(&reply_to(ME, "JA1XYZ", "PM95", 1000.0, 0, NOW - 2))
            .unwrap();
        repo.upsert_attempt(&AttemptRecord {
            call: "K1ABC".into(),
            time: NOW - 30,
            logged: true,
        })
        .unwrap();

        match transmit(&sequencer(), &status, NOW) {
            Action::Start(rec) => assert_eq!(rec.call, "JA1XYZ"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(repo.get_attempt("K1ABC").unwrap().unwrap().logged);
    }

    #[test]
    fn test_countdown_waits() {
        let (repo, status) = setup();
        repo.upsert_call(&cq("K1ABC", "FN42", 1000.0, 5, NOW - 2)).unwrap();
        status.set_xmit(2);
        assert_eq!(sequencer().step(&status, NOW).unwrap(), Action::Wait);
        assert_eq!(status.xmit(), 1);
        assert_eq!(sequencer().step(&status, NOW).unwrap(), Action::Wait);
        assert_eq!(status.xmit(), 0);
        assert!(matches!(
            sequencer().step(&status, NOW).unwrap(),
            Action::Start(_)
        ));
    }

    #[test]
    fn test_stale_current_call_falls_through() {
        let (repo, status) = setup();
        repo.upsert_call(&reply_to("N0OTH", "K1ABC", "FN42", 4000.0, 0, NOW - 60))
            .unwrap();
        status.set_call("K1ABC").unwrap();
        let action = sequencer().step(&status, NOW).unwrap();
        assert_eq!(action, Action::Halt { auto_tx_only: true });
        assert_eq!(status.call(), "");
    }

    #[test]
    fn test_wait_has_no_packet() {
        assert!(Action::Wait.to_packet().is_none());
    }
}
