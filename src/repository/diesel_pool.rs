//! Diesel connection pool management for SQLite.
//!
//! SQLite operations use sync Diesel with r2d2 connection pooling, wrapped
//! in spawn_blocking. Every connection handed out by the pool has the WAL
//! journal and a busy timeout applied, so concurrent writers queue on the
//! database lock instead of failing.

use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool};
use std::path::Path;
use std::time::Duration;

use super::{StoreError, StoreResult};

/// Diesel error type alias.
pub type DieselError = diesel::result::Error;

/// r2d2 pool error type alias.
pub type R2D2Error = diesel::r2d2::PoolError;

/// Connection pool for SQLite using r2d2.
pub type SqlitePool = Pool<ConnectionManager<SqliteConnection>>;

/// How long a writer waits on a locked database before giving up.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Applies [`init_connection_pragmas`] whenever r2d2 opens a connection.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionPragmas {
    pub busy_timeout: Duration,
}

impl Default for ConnectionPragmas {
    fn default() -> Self {
        Self {
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }
}

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionPragmas {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        init_connection_pragmas(conn, self.busy_timeout).map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Create a Diesel connection pool for SQLite.
///
/// Returns an r2d2 pool that can be used with spawn_blocking for async operations.
pub fn create_diesel_pool(db_path: &Path) -> Result<SqlitePool, R2D2Error> {
    let db_url = format!("sqlite:{}", db_path.display());
    create_diesel_pool_from_url(&db_url)
}

/// Create a Diesel connection pool from a database URL.
pub fn create_diesel_pool_from_url(database_url: &str) -> Result<SqlitePool, R2D2Error> {
    // Strip "sqlite:" prefix if present for Diesel
    let url = database_url.strip_prefix("sqlite:").unwrap_or(database_url);

    let manager = ConnectionManager::<SqliteConnection>::new(url);

    Pool::builder()
        .max_size(10)
        .connection_timeout(Duration::from_secs(30))
        .connection_customizer(Box::new(ConnectionPragmas::default()))
        .build(manager)
}

/// Initialize SQLite pragmas for a connection.
pub fn init_connection_pragmas(
    conn: &mut SqliteConnection,
    busy_timeout: Duration,
) -> Result<(), DieselError> {
    // busy_timeout first: switching to WAL needs the lock.
    diesel::sql_query(format!("PRAGMA busy_timeout = {}", busy_timeout.as_millis()))
        .execute(conn)?;
    diesel::sql_query("PRAGMA journal_mode = WAL").execute(conn)?;
    diesel::sql_query("PRAGMA synchronous = NORMAL").execute(conn)?;
    diesel::sql_query("PRAGMA cache_size = -16000").execute(conn)?; // 16MB
    diesel::sql_query("PRAGMA temp_store = MEMORY").execute(conn)?;
    Ok(())
}

/// Run a blocking Diesel operation asynchronously.
///
/// Checks a connection out of the pool inside `spawn_blocking` and runs the
/// closure on it, so store calls never stall the async runtime.
///
/// # Example
/// ```ignore
/// let id = run_blocking(pool.clone(), |conn| {
///     agents::table.select(agents::id).first::<i32>(conn)
/// }).await?;
/// ```
pub async fn run_blocking<F, T>(pool: SqlitePool, f: F) -> StoreResult<T>
where
    F: FnOnce(&mut SqliteConnection) -> Result<T, DieselError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || -> StoreResult<T> {
        let mut conn = pool.get()?;
        Ok(f(&mut conn)?)
    })
    .await
    .map_err(|e| StoreError::Task(e.to_string()))?
}
