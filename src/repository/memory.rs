//! In-memory aggregate store.
//!
//! Same contract as the SQLite store, held behind a tokio `RwLock`. Used by
//! tests and by `--ephemeral` sessions that should not touch the database.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::RwLock;

use super::{like_matches, now_timestamp, StoreResult, TrafficStore};
use crate::models::{
    sort_ranked, DateWindow, Dimension, DimensionValue, RankedCount, TrafficSummary,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct AggregateKey {
    date: NaiveDate,
    address_id: i32,
    agent_id: i32,
    path_id: i32,
    status: i32,
}

#[derive(Debug, Default)]
struct DimensionTable {
    by_value: HashMap<String, DimensionValue>,
    by_id: HashMap<i32, String>,
    next_id: i32,
}

impl DimensionTable {
    fn resolve(&mut self, value: &str) -> i32 {
        if let Some(existing) = self.by_value.get(value) {
            return existing.id;
        }
        self.next_id += 1;
        let id = self.next_id;
        self.by_value.insert(
            value.to_string(),
            DimensionValue {
                id,
                value: value.to_string(),
                first_seen: now_timestamp(),
            },
        );
        self.by_id.insert(id, value.to_string());
        id
    }

    fn id_of(&self, value: &str) -> Option<i32> {
        self.by_value.get(value).map(|d| d.id)
    }

    fn value_of(&self, id: i32) -> &str {
        self.by_id.get(&id).map(String::as_str).unwrap_or_default()
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    dimensions: [DimensionTable; 3],
    aggregates: HashMap<AggregateKey, (i64, String)>,
    counters: HashMap<String, i64>,
}

impl MemoryState {
    fn table(&self, kind: Dimension) -> &DimensionTable {
        &self.dimensions[kind.index()]
    }

    fn table_mut(&mut self, kind: Dimension) -> &mut DimensionTable {
        &mut self.dimensions[kind.index()]
    }

    fn key_for(
        &self,
        date: NaiveDate,
        address: &str,
        agent: &str,
        path: &str,
        status: i32,
    ) -> Option<AggregateKey> {
        Some(AggregateKey {
            date,
            address_id: self.table(Dimension::Address).id_of(address)?,
            agent_id: self.table(Dimension::Agent).id_of(agent)?,
            path_id: self.table(Dimension::Path).id_of(path)?,
            status,
        })
    }

    /// Sum aggregate counts grouped by a label derived from each row.
    fn group_by<F>(&self, window: &DateWindow, mut label: F) -> Vec<RankedCount>
    where
        F: FnMut(&AggregateKey) -> Option<String>,
    {
        let mut totals: HashMap<String, i64> = HashMap::new();
        for (key, (count, _)) in &self.aggregates {
            if !window.contains(key.date) {
                continue;
            }
            if let Some(label) = label(key) {
                *totals.entry(label).or_default() += count;
            }
        }
        let mut rows: Vec<RankedCount> = totals
            .into_iter()
            .map(|(label, count)| RankedCount::new(label, count))
            .collect();
        sort_ranked(&mut rows);
        rows
    }
}

/// Process-local [`TrafficStore`].
#[derive(Debug, Default)]
pub struct MemoryTrafficStore {
    state: RwLock<MemoryState>,
}

impl MemoryTrafficStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TrafficStore for MemoryTrafficStore {
    async fn resolve_dimension(&self, kind: Dimension, value: &str) -> StoreResult<i32> {
        let mut state = self.state.write().await;
        Ok(state.table_mut(kind).resolve(value))
    }

    async fn dimension(
        &self,
        kind: Dimension,
        value: &str,
    ) -> StoreResult<Option<DimensionValue>> {
        let state = self.state.read().await;
        Ok(state.table(kind).by_value.get(value).cloned())
    }

    async fn dimension_len(&self, kind: Dimension) -> StoreResult<u64> {
        let state = self.state.read().await;
        Ok(state.table(kind).by_value.len() as u64)
    }

    async fn record_event(
        &self,
        date: NaiveDate,
        address: &str,
        agent: &str,
        path: &str,
        status: i32,
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let key = AggregateKey {
            date,
            address_id: state.table_mut(Dimension::Address).resolve(address),
            agent_id: state.table_mut(Dimension::Agent).resolve(agent),
            path_id: state.table_mut(Dimension::Path).resolve(path),
            status,
        };
        let now = now_timestamp();
        let entry = state.aggregates.entry(key).or_insert((0, now.clone()));
        entry.0 += 1;
        entry.1 = now;
        Ok(())
    }

    async fn aggregate_count(
        &self,
        date: NaiveDate,
        address: &str,
        agent: &str,
        path: &str,
        status: i32,
    ) -> StoreResult<Option<i64>> {
        let state = self.state.read().await;
        Ok(state
            .key_for(date, address, agent, path, status)
            .and_then(|key| state.aggregates.get(&key))
            .map(|(count, _)| *count))
    }

    async fn increment_counter(&self, key: &str, amount: i64) -> StoreResult<i64> {
        let mut state = self.state.write().await;
        let value = state.counters.entry(key.to_string()).or_insert(0);
        *value += amount;
        Ok(*value)
    }

    async fn counter(&self, key: &str) -> StoreResult<Option<i64>> {
        let state = self.state.read().await;
        Ok(state.counters.get(key).copied())
    }

    async fn agent_totals(&self, window: &DateWindow) -> StoreResult<Vec<RankedCount>> {
        let state = self.state.read().await;
        let agents = state.table(Dimension::Agent);
        Ok(state.group_by(window, |key| Some(agents.value_of(key.agent_id).to_string())))
    }

    async fn agent_hits_on_paths(
        &self,
        window: &DateWindow,
        patterns: &[String],
    ) -> StoreResult<Vec<RankedCount>> {
        let state = self.state.read().await;
        let agents = state.table(Dimension::Agent);
        let paths = state.table(Dimension::Path);
        Ok(state.group_by(window, |key| {
            let path = paths.value_of(key.path_id);
            patterns
                .iter()
                .any(|p| like_matches(p, path))
                .then(|| agents.value_of(key.agent_id).to_string())
        }))
    }

    async fn path_totals_for_status(
        &self,
        window: &DateWindow,
        status: i32,
    ) -> StoreResult<Vec<RankedCount>> {
        let state = self.state.read().await;
        let paths = state.table(Dimension::Path);
        Ok(state.group_by(window, |key| {
            (key.status == status).then(|| paths.value_of(key.path_id).to_string())
        }))
    }

    async fn summary(&self, window: &DateWindow) -> StoreResult<TrafficSummary> {
        let state = self.state.read().await;
        let mut summary = TrafficSummary::default();
        let mut addresses = std::collections::HashSet::new();
        let mut agents = std::collections::HashSet::new();
        let mut paths = std::collections::HashSet::new();
        for (key, (count, _)) in &state.aggregates {
            if window.contains(key.date) {
                summary.hits += count;
                addresses.insert(key.address_id);
                agents.insert(key.agent_id);
                paths.insert(key.path_id);
            }
        }
        summary.addresses = addresses.len() as i64;
        summary.agents = agents.len() as i64;
        summary.paths = paths.len() as i64;
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    #[tokio::test]
    async fn resolve_returns_stable_ids() {
        let store = MemoryTrafficStore::new();
        let a = store.resolve_dimension(Dimension::Path, "/").await.unwrap();
        let b = store.resolve_dimension(Dimension::Path, "/about").await.unwrap();
        assert_ne!(a, b);
        assert_eq!(store.resolve_dimension(Dimension::Path, "/").await.unwrap(), a);
        assert_eq!(store.dimension_len(Dimension::Path).await.unwrap(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_upserts_are_counted_once_each() {
        let store = Arc::new(MemoryTrafficStore::new());
        let tasks: Vec<_> = (0..100)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .record_event(day(), "192.0.2.1", "curl/8.0", "/", 200)
                        .await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(
            store
                .aggregate_count(day(), "192.0.2.1", "curl/8.0", "/", 200)
                .await
                .unwrap(),
            Some(100)
        );
    }

    #[tokio::test]
    async fn path_filters_use_like_semantics() {
        let store = MemoryTrafficStore::new();
        store
            .record_event(day(), "192.0.2.1", "BotA", "/a/index.md", 200)
            .await
            .unwrap();
        store
            .record_event(day(), "192.0.2.1", "BotA", "/a/", 200)
            .await
            .unwrap();
        let rows = store
            .agent_hits_on_paths(&DateWindow::single(day()), &["%.md".to_string()])
            .await
            .unwrap();
        assert_eq!(rows, vec![RankedCount::new("BotA", 1)]);
    }
}
