//! Call selection strategies.
//!
//! A selector looks at the CQ calls heard in the active window, keeps the
//! ones its filter accepts, ranks them by [`coefficient`](crate::types::coefficient)
//! and returns the best one we haven't already tried. Strategies are looked
//! up by name in [`SELECTORS`], so the scheduler never names a concrete type.

use tracing::debug;

use crate::config::SelectorConfig;
use crate::repo::Repository;
use crate::types::{AutoftError, CallRecord, Result};

pub trait CallSelector: Send + Sync {
    fn name(&self) -> &'static str;

    /// Strategy filter over one CQ record.
    fn accepts(&self, record: &CallRecord) -> bool;

    /// Best untried CQ heard after `now - window`.
    fn select(&self, repo: &dyn Repository, now: i64, window: i64) -> Result<Option<CallRecord>> {
        let mut calls: Vec<CallRecord> = repo
            .recent_calls(now - window)?
            .into_iter()
            .filter(|r| r.is_cq() && self.accepts(r))
            .collect();
        // Stable: equal scores keep repository order.
        calls.sort_by(|a, b| b.coefficient().total_cmp(&a.coefficient()));

        let ranked: Vec<(&str, i64)> = calls
            .iter()
            .map(|c| (c.call.as_str(), c.coefficient() as i64))
            .collect();
        debug!(selector = self.name(), ?ranked, "ranked CQ calls");

        for call in calls {
            if !repo.is_attempted(&call.call)? {
                return Ok(Some(call));
            }
        }
        Ok(None)
    }
}

// ---------------------------------------------------------------------------
// Grid prefix patterns
// ---------------------------------------------------------------------------

/// Grid prefix, matched literally or with `?` (one character) and `*`
/// (anything after).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridPattern(String);

impl GridPattern {
    pub fn new(pattern: &str) -> Result<Self> {
        let p = pattern.trim().to_uppercase();
        let valid = !p.is_empty()
            && p.chars().all(|c| c.is_ascii_alphanumeric() || c == '?' || c == '*')
            && p.find('*').map_or(true, |i| i == p.len() - 1);
        if !valid {
            return Err(AutoftError::Config(format!("bad grid pattern '{pattern}'")));
        }
        Ok(GridPattern(p))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn matches(&self, grid: &str) -> bool {
        let mut grid = grid.chars().map(|c| c.to_ascii_uppercase());
        for p in self.0.chars() {
            match p {
                '*' => return true,
                '?' => {
                    if grid.next().is_none() {
                        return false;
                    }
                }
                c => {
                    if grid.next() != Some(c) {
                        return false;
                    }
                }
            }
        }
        true
    }
}

fn patterns(squares: &[String]) -> Result<Vec<GridPattern>> {
    squares.iter().map(|s| GridPattern::new(s)).collect()
}

fn grid_matches(patterns: &[GridPattern], record: &CallRecord) -> Option<bool> {
    let grid = record.grid.as_deref()?;
    Some(patterns.iter().any(|p| p.matches(grid)))
}

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

/// Every CQ is a candidate.
pub struct AnySelector;

impl CallSelector for AnySelector {
    fn name(&self) -> &'static str {
        "any"
    }

    fn accepts(&self, _record: &CallRecord) -> bool {
        true
    }
}

/// Only CQs from the listed grid prefixes.
pub struct GridSelector {
    squares: Vec<GridPattern>,
}

impl GridSelector {
    pub fn new(squares: Vec<GridPattern>) -> Self {
        GridSelector { squares }
    }
}

impl CallSelector for GridSelector {
    fn name(&self) -> &'static str {
        "grid"
    }

    fn accepts(&self, record: &CallRecord) -> bool {
        grid_matches(&self.squares, record).unwrap_or(false)
    }
}

/// CQs from anywhere except the listed grid prefixes.
pub struct NotGridSelector {
    squares: Vec<GridPattern>,
}

impl NotGridSelector {
    pub fn new(squares: Vec<GridPattern>) -> Self {
        NotGridSelector { squares }
    }
}

impl CallSelector for NotGridSelector {
    fn name(&self) -> &'static str {
        "notgrid"
    }

    fn accepts(&self, record: &CallRecord) -> bool {
        !grid_matches(&self.squares, record).unwrap_or(false)
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

type Constructor = fn(&SelectorConfig) -> Result<Box<dyn CallSelector>>;

/// Selector name → constructor.
pub static SELECTORS: &[(&str, Constructor)] = &[
    ("any", build_any),
    ("grid", build_grid),
    ("notgrid", build_notgrid),
];

fn build_any(_cfg: &SelectorConfig) -> Result<Box<dyn CallSelector>> {
    Ok(Box::new(AnySelector))
}

fn build_grid(cfg: &SelectorConfig) -> Result<Box<dyn CallSelector>> {
    if cfg.squares.is_empty() {
        return Err(AutoftError::Config(
            "selector 'grid' needs at least one square".into(),
        ));
    }
    Ok(Box::new(GridSelector::new(patterns(&cfg.squares)?)))
}

fn build_notgrid(cfg: &SelectorConfig) -> Result<Box<dyn CallSelector>> {
    Ok(Box::new(NotGridSelector::new(patterns(&cfg.squares)?)))
}

pub fn selector_names() -> Vec<&'static str> {
    SELECTORS.iter().map(|(name, _)| *name).collect()
}

/// Build the selector named in `cfg` (case-insensitive).
pub fn build_selector(cfg: &SelectorConfig) -> Result<Box<dyn CallSelector>> {
    let wanted = cfg.name.trim().to_lowercase();
    SELECTORS
        .iter()
        .find(|(name, _)| *name == wanted)
        .map(|(_, ctor)| ctor(cfg))
        .unwrap_or_else(|| {
            Err(AutoftError::Config(format!(
                "unknown selector '{}', expected one of {}",
                cfg.name,
                selector_names().join(", ")
            )))
        })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::tests::cq;
    use crate::repo::MemoryRepository;
    use crate::types::{AttemptRecord, ExchangeKind};

    const NOW: i64 = 1_000;

    fn cfg(name: &str, squares: &[&str]) -> SelectorConfig {
        SelectorConfig {
            name: name.into(),
            squares: squares.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_grid_pattern_literal() {
        let p = GridPattern::new("fn").unwrap();
        assert!(p.matches("FN42"));
        assert!(p.matches("fn31"));
        assert!(!p.matches("FM18"));
        assert!(!p.matches("F"));
    }

    #[test]
    fn test_grid_pattern_wildcards() {
        let p = GridPattern::new("J?6").unwrap();
        assert!(p.matches("JO62"));
        assert!(p.matches("JN65"));
        assert!(!p.matches("JO52"));

        let p = GridPattern::new("K*").unwrap();
        assert!(p.matches("KP20"));
        assert!(!p.matches("JP20"));
    }

    #[test]
    fn test_grid_pattern_invalid() {
        assert!(GridPattern::new("").is_err());
        assert!(GridPattern::new("F*N").is_err());
        assert!(GridPattern::new("F-N").is_err());
    }

    #[test]
    fn test_registry() {
        assert_eq!(selector_names(), vec!["any", "grid", "notgrid"]);
        assert_eq!(build_selector(&cfg("Any", &[])).unwrap().name(), "any");
        assert_eq!(build_selector(&cfg("grid", &["FN"])).unwrap().name(), "grid");
        assert_eq!(build_selector(&cfg("notgrid", &[])).unwrap().name(), "notgrid");
        assert!(matches!(
            build_selector(&cfg("grid", &[])),
            Err(AutoftError::Config(_))
        ));
        assert!(matches!(
            build_selector(&cfg("nearest", &[])),
            Err(AutoftError::Config(_))
        ));
    }

    #[test]
    fn test_select_in_allow_list() {
        let repo = MemoryRepository::new();
        repo.upsert_call(&cq("K1ABC", "FN42", 1000.0, 5, NOW - 2)).unwrap();
        let sel = build_selector(&cfg("grid", &["FN"])).unwrap();
        let pick = sel.select(&repo, NOW, 15).unwrap().unwrap();
        assert_eq!(pick.call, "K1ABC");
    }

    #[test]
    fn test_select_skips_attempted() {
        let repo = MemoryRepository::new();
        repo.upsert_call(&cq("K1ABC", "FN42", 1000.0, 5, NOW - 2)).unwrap();
        repo.upsert_attempt(&AttemptRecord {
            call: "K1ABC".into(),
            time: NOW - 60,
            logged: false,
        })
        .unwrap();
        let sel = build_selector(&cfg("grid", &["FN"])).unwrap();
        assert!(sel.select(&repo, NOW, 15).unwrap().is_none());
    }

    #[test]
    fn test_select_highest_coefficient() {
        let repo = MemoryRepository::new();
        repo.upsert_call(&cq("NEAR1", "FN42", 500.0, 10, NOW - 1)).unwrap(); // 5000
        repo.upsert_call(&cq("FAR1", "JO62", 8000.0, -10, NOW - 1)).unwrap(); // 800
        repo.upsert_call(&cq("MID1", "EM12", 2000.0, 5, NOW - 1)).unwrap(); // ~6325
        let pick = AnySelector.select(&repo, NOW, 15).unwrap().unwrap();
        assert_eq!(pick.call, "MID1");
    }

    #[test]
    fn test_select_falls_through_attempted() {
        let repo = MemoryRepository::new();
        repo.upsert_call(&cq("BEST1", "FN42", 9000.0, 0, NOW - 1)).unwrap();
        repo.upsert_call(&cq("NEXT1", "FN42", 100.0, 0, NOW - 1)).unwrap();
        repo.upsert_attempt(&AttemptRecord {
            call: "BEST1".into(),
            time: NOW,
            logged: true,
        })
        .unwrap();
        let pick = AnySelector.select(&repo, NOW, 15).unwrap().unwrap();
        assert_eq!(pick.call, "NEXT1");
    }

    #[test]
    fn test_select_ignores_stale_and_non_cq() {
        let repo = MemoryRepository::new();
        repo.upsert_call(&cq("OLD1", "FN42", 9000.0, 0, NOW - 15)).unwrap();
        let mut reply = cq("RPL1", "FN42", 9000.0, 0, NOW - 1);
        reply.to = "W6BSD".into();
        reply.kind = ExchangeKind::Reply;
        repo.upsert_call(&reply).unwrap();
        assert!(AnySelector.select(&repo, NOW, 15).unwrap().is_none());
    }

    #[test]
    fn test_notgrid_excludes() {
        let repo = MemoryRepository::new();
        repo.upsert_call(&cq("K1ABC", "FN42", 4000.0, 0, NOW - 1)).unwrap();
        repo.upsert_call(&cq("G4XYZ", "IO91", 8000.0, -20, NOW - 1)).unwrap();
        let sel = build_selector(&cfg("notgrid", &["CN", "DN", "EN", "FN"])).unwrap();
        let pick = sel.select(&repo, NOW, 15).unwrap().unwrap();
        assert_eq!(pick.call, "G4XYZ");
    }
}
