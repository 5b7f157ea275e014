//! Aggregate store: normalized daily request counters.
//!
//! [`TrafficStore`] is the seam between the live pipeline / report layer and
//! persistence. [`DieselTrafficStore`] is the durable SQLite system of
//! record; [`MemoryTrafficStore`] keeps the same contract in process memory
//! for tests and throwaway sessions.

pub mod diesel_models;
pub mod diesel_pool;
pub mod diesel_traffic;
pub mod memory;
pub mod migrations;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use thiserror::Error;

use crate::models::{DateWindow, Dimension, DimensionValue, RankedCount, TrafficSummary};

pub use diesel_traffic::DieselTrafficStore;
pub use memory::MemoryTrafficStore;

/// Counter key for every request ever recorded.
pub const TOTAL_HITS_KEY: &str = "total_hits";

/// Errors from aggregate store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    #[error("Store task failed: {0}")]
    Task(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Durable counters keyed by (day, address, agent, path, status).
///
/// Writes are atomic per call: concurrent `record_event` calls for the same
/// key never lose or duplicate an increment. Readers see a consistent
/// snapshot and never block writers.
#[async_trait]
pub trait TrafficStore: Send + Sync {
    /// Get-or-create the surrogate id for `value` in dimension `kind`.
    async fn resolve_dimension(&self, kind: Dimension, value: &str) -> StoreResult<i32>;

    /// Look up a dimension row without creating it.
    async fn dimension(&self, kind: Dimension, value: &str)
        -> StoreResult<Option<DimensionValue>>;

    /// Number of rows in a dimension table.
    async fn dimension_len(&self, kind: Dimension) -> StoreResult<u64>;

    /// Resolve all three dimensions and add one to the day's aggregate row.
    async fn record_event(
        &self,
        date: NaiveDate,
        address: &str,
        agent: &str,
        path: &str,
        status: i32,
    ) -> StoreResult<()>;

    /// Current count of one aggregate row, if it exists.
    async fn aggregate_count(
        &self,
        date: NaiveDate,
        address: &str,
        agent: &str,
        path: &str,
        status: i32,
    ) -> StoreResult<Option<i64>>;

    /// Add `amount` (may be negative) to a persistent counter, creating it at
    /// `amount` if absent. Returns the new value.
    async fn increment_counter(&self, key: &str, amount: i64) -> StoreResult<i64>;

    /// Read a persistent counter.
    async fn counter(&self, key: &str) -> StoreResult<Option<i64>>;

    /// Total hits per agent in the window, highest first.
    async fn agent_totals(&self, window: &DateWindow) -> StoreResult<Vec<RankedCount>>;

    /// Total hits per agent restricted to paths matching any SQL `LIKE`
    /// pattern, highest first.
    async fn agent_hits_on_paths(
        &self,
        window: &DateWindow,
        patterns: &[String],
    ) -> StoreResult<Vec<RankedCount>>;

    /// Total hits per path for one status code, highest first.
    async fn path_totals_for_status(
        &self,
        window: &DateWindow,
        status: i32,
    ) -> StoreResult<Vec<RankedCount>>;

    /// Whole-window totals.
    async fn summary(&self, window: &DateWindow) -> StoreResult<TrafficSummary>;
}

/// Timestamp text written to `first_seen` / `last_updated` / `updated_at`.
pub(crate) fn now_timestamp() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// SQLite `LIKE` semantics: `%` any run, `_` one char, ASCII case-insensitive.
pub(crate) fn like_matches(pattern: &str, value: &str) -> bool {
    fn go(p: &[char], v: &[char]) -> bool {
        match p.split_first() {
            None => v.is_empty(),
            Some(('%', rest)) => (0..=v.len()).any(|skip| go(rest, &v[skip..])),
            Some(('_', rest)) => !v.is_empty() && go(rest, &v[1..]),
            Some((c, rest)) => match v.split_first() {
                Some((h, tail)) if h.eq_ignore_ascii_case(c) => go(rest, tail),
                _ => false,
            },
        }
    }
    let p: Vec<char> = pattern.chars().collect();
    let v: Vec<char> = value.chars().collect();
    go(&p, &v)
}
