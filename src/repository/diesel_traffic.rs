//! Diesel-based aggregate store for SQLite.
//!
//! Sync Diesel wrapped in spawn_blocking. Every write runs inside an
//! immediate transaction, which takes the database write lock up front:
//! concurrent writers queue on the busy timeout instead of racing between
//! their read and write steps.

use std::path::Path;

use async_trait::async_trait;
use chrono::NaiveDate;
use diesel::prelude::*;
use diesel::sql_types::{Integer, Text};
use diesel::sqlite::Sqlite;

use super::diesel_models::{
    DailyLogRecord, DimensionRecord, KvRecord, LabelTotal, NewDailyLog, SummaryRow,
};
use super::diesel_pool::{create_diesel_pool, run_blocking, DieselError, SqlitePool};
use super::{migrations, now_timestamp, StoreResult, TrafficStore};
use crate::models::{
    format_day, DateWindow, Dimension, DimensionValue, RankedCount, TrafficSummary,
};
use crate::schema::{daily_logs, kv_store};

/// Get-or-create inside one dimension table.
macro_rules! resolve_in {
    ($table:ident, $conn:expr, $value:expr, $now:expr) => {{
        use crate::schema::$table;
        let existing = $table::table
            .filter($table::value.eq($value))
            .select($table::id)
            .first::<i32>($conn)
            .optional()?;
        match existing {
            Some(id) => Ok(id),
            None => {
                diesel::insert_into($table::table)
                    .values(($table::value.eq($value), $table::first_seen.eq($now)))
                    .on_conflict($table::value)
                    .do_nothing()
                    .execute($conn)?;
                $table::table
                    .filter($table::value.eq($value))
                    .select($table::id)
                    .first::<i32>($conn)
            }
        }
    }};
}

macro_rules! lookup_in {
    ($table:ident, $conn:expr, $value:expr) => {{
        use crate::schema::$table;
        $table::table
            .filter($table::value.eq($value))
            .select(($table::id, $table::value, $table::first_seen))
            .first::<DimensionRecord>($conn)
            .optional()
    }};
}

macro_rules! len_of {
    ($table:ident, $conn:expr) => {{
        use crate::schema::$table;
        $table::table.count().get_result::<i64>($conn)
    }};
}

fn resolve_sync(
    conn: &mut SqliteConnection,
    kind: Dimension,
    value: &str,
    now: &str,
) -> Result<i32, DieselError> {
    match kind {
        Dimension::Address => resolve_in!(addresses, conn, value, now),
        Dimension::Agent => resolve_in!(agents, conn, value, now),
        Dimension::Path => resolve_in!(paths, conn, value, now),
    }
}

fn lookup_sync(
    conn: &mut SqliteConnection,
    kind: Dimension,
    value: &str,
) -> Result<Option<DimensionRecord>, DieselError> {
    match kind {
        Dimension::Address => lookup_in!(addresses, conn, value),
        Dimension::Agent => lookup_in!(agents, conn, value),
        Dimension::Path => lookup_in!(paths, conn, value),
    }
}

/// Diesel-backed [`TrafficStore`].
#[derive(Clone)]
pub struct DieselTrafficStore {
    pool: SqlitePool,
}

impl DieselTrafficStore {
    /// Create a store over an existing pool. The schema must already exist.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (or create) the database file and ensure the schema exists.
    pub fn open(db_path: &Path) -> StoreResult<Self> {
        let pool = create_diesel_pool(db_path)?;
        let mut conn = pool.get()?;
        migrations::run_migrations(&mut conn)?;
        tracing::debug!("Aggregate store ready at {}", db_path.display());
        Ok(Self::new(pool))
    }

    async fn load_ranked(
        &self,
        sql: &'static str,
        window: &DateWindow,
        status: Option<i32>,
    ) -> StoreResult<Vec<RankedCount>> {
        let (start, end) = window.bounds();
        let pool = self.pool.clone();

        let rows = run_blocking(pool, move |conn| {
            let query = diesel::sql_query(sql)
                .into_boxed::<Sqlite>()
                .bind::<Text, _>(start)
                .bind::<Text, _>(end);
            let query = match status {
                Some(status) => query.bind::<Integer, _>(status),
                None => query,
            };
            query.load::<LabelTotal>(conn)
        })
        .await?;

        Ok(rows.into_iter().map(RankedCount::from).collect())
    }
}

const AGENT_TOTALS_SQL: &str = r#"
    SELECT a.value AS label, SUM(d.count) AS total
    FROM daily_logs d
    JOIN agents a ON a.id = d.agent_id
    WHERE d.date BETWEEN ? AND ?
    GROUP BY a.value
    ORDER BY total DESC, label ASC"#;

const PATH_TOTALS_FOR_STATUS_SQL: &str = r#"
    SELECT p.value AS label, SUM(d.count) AS total
    FROM daily_logs d
    JOIN paths p ON p.id = d.path_id
    WHERE d.date BETWEEN ? AND ? AND d.status = ?
    GROUP BY p.value
    ORDER BY total DESC, label ASC"#;

const SUMMARY_SQL: &str = r#"
    SELECT COALESCE(SUM(count), 0) AS hits,
           COUNT(DISTINCT address_id) AS addresses,
           COUNT(DISTINCT agent_id) AS agents,
           COUNT(DISTINCT path_id) AS paths
    FROM daily_logs
    WHERE date BETWEEN ? AND ?"#;

#[async_trait]
impl TrafficStore for DieselTrafficStore {
    async fn resolve_dimension(&self, kind: Dimension, value: &str) -> StoreResult<i32> {
        let value = value.to_string();
        let pool = self.pool.clone();

        let id = run_blocking(pool, move |conn| {
            let now = now_timestamp();
            conn.immediate_transaction(|conn| resolve_sync(conn, kind, &value, &now))
        })
        .await?;
        Ok(id)
    }

    async fn dimension(
        &self,
        kind: Dimension,
        value: &str,
    ) -> StoreResult<Option<DimensionValue>> {
        let value = value.to_string();
        let pool = self.pool.clone();

        let record = run_blocking(pool, move |conn| lookup_sync(conn, kind, &value)).await?;
        Ok(record.map(DimensionValue::from))
    }

    async fn dimension_len(&self, kind: Dimension) -> StoreResult<u64> {
        let pool = self.pool.clone();

        let count = run_blocking(pool, move |conn| match kind {
            Dimension::Address => len_of!(addresses, conn),
            Dimension::Agent => len_of!(agents, conn),
            Dimension::Path => len_of!(paths, conn),
        })
        .await?;
        Ok(count as u64)
    }

    async fn record_event(
        &self,
        date: NaiveDate,
        address: &str,
        agent: &str,
        path: &str,
        status: i32,
    ) -> StoreResult<()> {
        let day = format_day(date);
        let address = address.to_string();
        let agent = agent.to_string();
        let path = path.to_string();
        let pool = self.pool.clone();

        run_blocking(pool, move |conn| {
            let now = now_timestamp();
            conn.immediate_transaction(|conn| {
                let new_row = NewDailyLog {
                    date: &day,
                    address_id: resolve_sync(conn, Dimension::Address, &address, &now)?,
                    agent_id: resolve_sync(conn, Dimension::Agent, &agent, &now)?,
                    path_id: resolve_sync(conn, Dimension::Path, &path, &now)?,
                    status,
                    count: 1,
                    last_updated: &now,
                };

                diesel::insert_into(daily_logs::table)
                    .values(&new_row)
                    .on_conflict((
                        daily_logs::date,
                        daily_logs::address_id,
                        daily_logs::agent_id,
                        daily_logs::path_id,
                        daily_logs::status,
                    ))
                    .do_update()
                    .set((
                        daily_logs::count.eq(daily_logs::count + 1_i64),
                        daily_logs::last_updated.eq(&now),
                    ))
                    .execute(conn)?;
                Ok(())
            })
        })
        .await?;
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
        let day = format_day(date);
        let address = address.to_string();
        let agent = agent.to_string();
        let path = path.to_string();
        let pool = self.pool.clone();

        let record = run_blocking(pool, move |conn| {
            let ids = (
                lookup_sync(conn, Dimension::Address, &address)?,
                lookup_sync(conn, Dimension::Agent, &agent)?,
                lookup_sync(conn, Dimension::Path, &path)?,
            );
            let (Some(a), Some(g), Some(p)) = ids else {
                return Ok(None);
            };
            daily_logs::table
                .find((day, a.id, g.id, p.id, status))
                .select(DailyLogRecord::as_select())
                .first(conn)
                .optional()
        })
        .await?;
        Ok(record.map(|r| r.count))
    }

    async fn increment_counter(&self, key: &str, amount: i64) -> StoreResult<i64> {
        let key = key.to_string();
        let pool = self.pool.clone();

        let record = run_blocking(pool, move |conn| {
            let now = now_timestamp();
            conn.immediate_transaction(|conn| {
                diesel::insert_into(kv_store::table)
                    .values((
                        kv_store::key.eq(&key),
                        kv_store::value.eq(amount),
                        kv_store::updated_at.eq(&now),
                    ))
                    .on_conflict(kv_store::key)
                    .do_update()
                    .set((
                        kv_store::value.eq(kv_store::value + amount),
                        kv_store::updated_at.eq(&now),
                    ))
                    .execute(conn)?;
                kv_store::table
                    .find(&key)
                    .select(KvRecord::as_select())
                    .first(conn)
            })
        })
        .await?;
        Ok(record.value)
    }

    async fn counter(&self, key: &str) -> StoreResult<Option<i64>> {
        let key = key.to_string();
        let pool = self.pool.clone();

        let value = run_blocking(pool, move |conn| {
            kv_store::table
                .find(&key)
                .select(kv_store::value)
                .first::<i64>(conn)
                .optional()
        })
        .await?;
        Ok(value)
    }

    async fn agent_totals(&self, window: &DateWindow) -> StoreResult<Vec<RankedCount>> {
        self.load_ranked(AGENT_TOTALS_SQL, window, None).await
    }

    async fn agent_hits_on_paths(
        &self,
        window: &DateWindow,
        patterns: &[String],
    ) -> StoreResult<Vec<RankedCount>> {
        if patterns.is_empty() {
            return Ok(Vec::new());
        }

        let clause = vec!["p.value LIKE ?"; patterns.len()].join(" OR ");
        let sql = format!(
            r#"SELECT a.value AS label, SUM(d.count) AS total
               FROM daily_logs d
               JOIN agents a ON a.id = d.agent_id
               JOIN paths p ON p.id = d.path_id
               WHERE d.date BETWEEN ? AND ? AND ({clause})
               GROUP BY a.value
               ORDER BY total DESC, label ASC"#
        );
        let (start, end) = window.bounds();
        let patterns = patterns.to_vec();
        let pool = self.pool.clone();

        let rows = run_blocking(pool, move |conn| {
            let mut query = diesel::sql_query(sql)
                .into_boxed::<Sqlite>()
                .bind::<Text, _>(start)
                .bind::<Text, _>(end);
            for pattern in patterns {
                query = query.bind::<Text, _>(pattern);
            }
            query.load::<LabelTotal>(conn)
        })
        .await?;

        Ok(rows.into_iter().map(RankedCount::from).collect())
    }

    async fn path_totals_for_status(
        &self,
        window: &DateWindow,
        status: i32,
    ) -> StoreResult<Vec<RankedCount>> {
        self.load_ranked(PATH_TOTALS_FOR_STATUS_SQL, window, Some(status))
            .await
    }

    async fn summary(&self, window: &DateWindow) -> StoreResult<TrafficSummary> {
        let (start, end) = window.bounds();
        let pool = self.pool.clone();

        let row = run_blocking(pool, move |conn| {
            diesel::sql_query(SUMMARY_SQL)
                .bind::<Text, _>(start)
                .bind::<Text, _>(end)
                .get_result::<SummaryRow>(conn)
        })
        .await?;

        Ok(TrafficSummary {
            hits: row.hits,
            addresses: row.addresses,
            agents: row.agents,
            paths: row.paths,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    fn setup_test_db() -> (DieselTrafficStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = DieselTrafficStore::open(&dir.path().join("test.db")).unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn test_resolve_dimension_is_idempotent() {
        let (store, _dir) = setup_test_db();

        let first = store
            .resolve_dimension(Dimension::Agent, "curl/8.0")
            .await
            .unwrap();
        let second = store
            .resolve_dimension(Dimension::Agent, "curl/8.0")
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(store.dimension_len(Dimension::Agent).await.unwrap(), 1);

        // Same string in another dimension is an independent row.
        store
            .resolve_dimension(Dimension::Path, "curl/8.0")
            .await
            .unwrap();
        assert_eq!(store.dimension_len(Dimension::Agent).await.unwrap(), 1);
        assert_eq!(store.dimension_len(Dimension::Path).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_first_seen_is_never_rewritten() {
        let (store, _dir) = setup_test_db();

        store
            .resolve_dimension(Dimension::Address, "192.0.2.1")
            .await
            .unwrap();
        let before = store
            .dimension(Dimension::Address, "192.0.2.1")
            .await
            .unwrap()
            .unwrap();
        store
            .record_event(day(), "192.0.2.1", "curl/8.0", "/", 200)
            .await
            .unwrap();
        let after = store
            .dimension(Dimension::Address, "192.0.2.1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(before, after);
        assert!(store
            .dimension(Dimension::Address, "192.0.2.2")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_record_event_increments_existing_row() {
        let (store, _dir) = setup_test_db();

        for _ in 0..3 {
            store
                .record_event(day(), "192.0.2.1", "curl/8.0", "/", 200)
                .await
                .unwrap();
        }
        store
            .record_event(day(), "192.0.2.1", "curl/8.0", "/", 404)
            .await
            .unwrap();

        let count = store
            .aggregate_count(day(), "192.0.2.1", "curl/8.0", "/", 200)
            .await
            .unwrap();
        assert_eq!(count, Some(3));
        let count = store
            .aggregate_count(day(), "192.0.2.1", "curl/8.0", "/", 404)
            .await
            .unwrap();
        assert_eq!(count, Some(1));
        assert_eq!(
            store
                .aggregate_count(day(), "192.0.2.9", "curl/8.0", "/", 200)
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_concurrent_record_event_loses_nothing() {
        let (store, _dir) = setup_test_db();
        let store = Arc::new(store);

        let mut handles = Vec::new();
        for _ in 0..40 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .record_event(day(), "198.51.100.7", "ExampleBot/2.1", "/feed.xml", 200)
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let count = store
            .aggregate_count(day(), "198.51.100.7", "ExampleBot/2.1", "/feed.xml", 200)
            .await
            .unwrap();
        assert_eq!(count, Some(40));
        for kind in Dimension::ALL {
            assert_eq!(store.dimension_len(kind).await.unwrap(), 1);
        }
        let summary = store.summary(&DateWindow::single(day())).await.unwrap();
        assert_eq!(summary.hits, 40);
    }

    #[tokio::test]
    async fn test_counter_add_or_create() {
        let (store, _dir) = setup_test_db();

        assert_eq!(store.counter("total_hits").await.unwrap(), None);
        assert_eq!(store.increment_counter("total_hits", 5).await.unwrap(), 5);
        assert_eq!(store.increment_counter("total_hits", -2).await.unwrap(), 3);
        assert_eq!(store.counter("total_hits").await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn test_writes_survive_reopen() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("durable.db");

        {
            let store = DieselTrafficStore::open(&db_path).unwrap();
            store
                .record_event(day(), "192.0.2.1", "curl/8.0", "/", 200)
                .await
                .unwrap();
            store.increment_counter("total_hits", 1).await.unwrap();
        }

        let store = DieselTrafficStore::open(&db_path).unwrap();
        assert_eq!(
            store
                .aggregate_count(day(), "192.0.2.1", "curl/8.0", "/", 200)
                .await
                .unwrap(),
            Some(1)
        );
        assert_eq!(store.counter("total_hits").await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_ranked_queries_respect_window_and_patterns() {
        let (store, _dir) = setup_test_db();
        let yesterday = day().pred_opt().unwrap();

        store
            .record_event(day(), "192.0.2.1", "BotA", "/post/index.md", 200)
            .await
            .unwrap();
        store
            .record_event(day(), "192.0.2.2", "BotB", "/post/index.md", 200)
            .await
            .unwrap();
        store
            .record_event(day(), "192.0.2.2", "BotB", "/post/", 200)
            .await
            .unwrap();
        store
            .record_event(yesterday, "192.0.2.3", "BotC", "/post/index.md", 200)
            .await
            .unwrap();
        store
            .record_event(day(), "192.0.2.3", "BotC", "/missing", 404)
            .await
            .unwrap();

        let window = DateWindow::single(day());
        let md = store
            .agent_hits_on_paths(&window, &["%.md".to_string()])
            .await
            .unwrap();
        assert_eq!(md, vec![RankedCount::new("BotA", 1), RankedCount::new("BotB", 1)]);
        assert!(store.agent_hits_on_paths(&window, &[]).await.unwrap().is_empty());

        let totals = store.agent_totals(&window).await.unwrap();
        assert_eq!(totals[0], RankedCount::new("BotB", 2));

        let missing = store.path_totals_for_status(&window, 404).await.unwrap();
        assert_eq!(missing, vec![RankedCount::new("/missing", 1)]);

        let wide = DateWindow::new(yesterday, day());
        assert_eq!(store.summary(&wide).await.unwrap().hits, 5);
        assert_eq!(store.summary(&wide).await.unwrap().agents, 3);
    }
}
