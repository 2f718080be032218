//! Repository contract for decoded calls and attempted stations.
//!
//! The daemon only needs upsert-by-call-sign on a time-windowed set of recent
//! calls, and an attempt set with existence check, upsert, and bulk delete by
//! age. `MemoryRepository` implements it in-process; the server crate adds a
//! SQLite implementation.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::types::{AttemptRecord, AutoftError, CallRecord, Result};

/// Storage for call records and attempt records.
///
/// Implementations must be safe to share between the decoder, scheduler and
/// monitor tasks. Two tasks racing on the same call is tolerated.
pub trait Repository: Send + Sync {
    /// Insert or replace the record for `record.call`.
    ///
    /// Grid, distance and direction already stored survive an update that
    /// lacks them (reports and acks don't carry a grid).
    fn upsert_call(&self, record: &CallRecord) -> Result<()>;

    fn find_call(&self, call: &str) -> Result<Option<CallRecord>>;

    /// Records heard after `since` (Unix seconds), in insertion-independent
    /// but stable order: most recent first, then by call sign.
    fn recent_calls(&self, since: i64) -> Result<Vec<CallRecord>>;

    /// Delete call records older than `before`. Returns rows deleted.
    fn prune_calls(&self, before: i64) -> Result<usize>;

    fn is_attempted(&self, call: &str) -> Result<bool> {
        Ok(self.get_attempt(call)?.is_some())
    }

    fn get_attempt(&self, call: &str) -> Result<Option<AttemptRecord>>;

    fn upsert_attempt(&self, attempt: &AttemptRecord) -> Result<()>;

    /// All attempts, most recent first.
    fn attempts(&self) -> Result<Vec<AttemptRecord>>;

    /// Delete unlogged attempts older than `before`. Logged contacts stay.
    fn purge_attempts(&self, before: i64) -> Result<usize>;
}

/// Merge a new call record over the stored one.
pub fn merge_call(existing: Option<&CallRecord>, update: &CallRecord) -> CallRecord {
    let mut merged = update.clone();
    if let Some(old) = existing {
        if merged.grid.is_none() {
            merged.grid = old.grid.clone();
        }
        if merged.distance.is_none() {
            merged.distance = old.distance;
        }
        if merged.direction.is_none() {
            merged.direction = old.direction;
        }
    }
    merged
}

/// Sort most-recent first, ties by call sign.
pub fn sort_recent(records: &mut [CallRecord]) {
    records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.call.cmp(&b.call)));
}

// ---------------------------------------------------------------------------
// In-memory repository
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryInner {
    calls: HashMap<String, CallRecord>,
    attempts: HashMap<String, AttemptRecord>,
}

/// Process-local repository, used for tests and `--memory` runs.
#[derive(Default)]
pub struct MemoryRepository {
    inner: Mutex<MemoryInner>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryInner>> {
        self.inner
            .lock()
            .map_err(|_| AutoftError::Repository("memory repository poisoned".into()))
    }
}

impl Repository for MemoryRepository {
    fn upsert_call(&self, record: &CallRecord) -> Result<()> {
        let mut inner = self.lock()?;
        let merged = merge_call(inner.calls.get(&record.call), record);
        inner.calls.insert(record.call.clone(), merged);
        Ok(())
    }

    fn find_call(&self, call: &str) -> Result<Option<CallRecord>> {
        Ok(self.lock()?.calls.get(call).cloned())
    }

    fn recent_calls(&self, since: i64) -> Result<Vec<CallRecord>> {
        let mut records: Vec<CallRecord> = self
            .lock()?
            .calls
            .values()
            .filter(|r| r.timestamp > since)
            .cloned()
            .collect();
        sort_recent(&mut records);
        Ok(records)
    }

    fn prune_calls(&self, before: i64) -> Result<usize> {
        let mut inner = self.lock()?;
        let n = inner.calls.len();
        inner.calls.retain(|_, r| r.timestamp >= before);
        Ok(n - inner.calls.len())
    }

    fn get_attempt(&self, call: &str) -> Result<Option<AttemptRecord>> {
        Ok(self.lock()?.attempts.get(call).cloned())
    }

    fn upsert_attempt(&self, attempt: &AttemptRecord) -> Result<()> {
        self.lock()?
            .attempts
            .insert(attempt.call.clone(), attempt.clone());
        Ok(())
    }

    fn attempts(&self) -> Result<Vec<AttemptRecord>> {
        let mut list: Vec<AttemptRecord> = self.lock()?.attempts.values().cloned().collect();
        list.sort_by(|a, b| b.time.cmp(&a.time).then_with(|| a.call.cmp(&b.call)));
        Ok(list)
    }

    fn purge_attempts(&self, before: i64) -> Result<usize> {
        let mut inner = self.lock()?;
        let n = inner.attempts.len();
        inner.attempts.retain(|_, a| a.logged || a.time >= before);
        Ok(n - inner.attempts.len())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
