//! Engine statistics.
//!
//! Counters describing what an engine actually did on behalf of
//! transactions. Tests rely on the fetch counters to verify that lazy
//! materialization issues exactly the fetches it promises.
//!
//! # Usage
//!
//! ```rust,ignore
//! let engine = RelationalEngine::new(StoreConfig::default());
//! // ... run transactions ...
//! let stats = engine.stats().snapshot();
//! println!("group fetches: {}", stats.group_fetches);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Engine statistics.
///
/// All counters are atomic and can be read while operations are in
/// progress. Values only increase.
#[derive(Debug, Default)]
pub struct EngineStats {
    /// Core-field fetches (one row, no deferred groups).
    core_fetches: AtomicU64,
    /// Single deferred-group fetches.
    group_fetches: AtomicU64,
    /// Fetches of every deferred group of a row at once.
    full_fetches: AtomicU64,
    /// Criteria query executions.
    scans: AtomicU64,
    /// Successful commits that wrote at least one row or relation.
    commits: AtomicU64,
    /// Commits rejected because of stale versions.
    conflicts: AtomicU64,
    /// Rows inserted, updated or removed.
    rows_written: AtomicU64,
}

impl EngineStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_core_fetch(&self) {
        self.core_fetches.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_group_fetch(&self) {
        self.group_fetches.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_full_fetch(&self) {
        self.full_fetches.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_scan(&self) {
        self.scans.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_commit(&self, rows: u64) {
        self.commits.fetch_add(1, Ordering::Relaxed);
        self.rows_written.fetch_add(rows, Ordering::Relaxed);
    }

    pub(crate) fn record_conflict(&self) {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a point-in-time copy of all counters.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            core_fetches: self.core_fetches.load(Ordering::Relaxed),
            group_fetches: self.group_fetches.load(Ordering::Relaxed),
            full_fetches: self.full_fetches.load(Ordering::Relaxed),
            scans: self.scans.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            rows_written: self.rows_written.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of [`EngineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Core-field fetches.
    pub core_fetches: u64,
    /// Single deferred-group fetches.
    pub group_fetches: u64,
    /// All-groups fetches.
    pub full_fetches: u64,
    /// Query executions.
    pub scans: u64,
    /// Successful commits.
    pub commits: u64,
    /// Rejected commits.
    pub conflicts: u64,
    /// Rows written.
    pub rows_written: u64,
}

impl StatsSnapshot {
    /// Total deferred fetches of any granularity.
    #[must_use]
    pub fn deferred_fetches(&self) -> u64 {
        self.group_fetches + self.full_fetches
    }
}
