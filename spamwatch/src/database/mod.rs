//! SQLite persistence: the shared pool, migrations, models and repositories.
//!
//! Every service writes through the one pool opened at startup. The file runs in WAL
//! mode so status and report reads never wait on a check that is recording results;
//! writers queue on SQLite's busy timeout and, for the hot paths, on [`retry::BusyRetry`].

pub mod maintenance;
pub mod models;
pub mod repositories;
pub mod retry;
pub mod time;

pub use maintenance::{MaintenanceConfig, MaintenanceScheduler};

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use tracing::info;

pub type DbPool = Pool<Sqlite>;

/// Upper bound for [`default_pool_size`]. Checks are device-bound, so few connections suffice.
const MAX_POOL_SIZE: u32 = 8;

/// How long a connection waits on a locked database before reporting busy.
const BUSY_TIMEOUT: Duration = Duration::from_secs(15);

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

fn connect_options(database_url: &str) -> Result<SqliteConnectOptions, sqlx::Error> {
    Ok(SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(BUSY_TIMEOUT)
        .pragma("temp_store", "memory"))
}

/// One connection per core, capped at [`MAX_POOL_SIZE`].
pub fn default_pool_size() -> u32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(2)
        .clamp(2, MAX_POOL_SIZE)
}

/// Open the pool for `database_url` (for example `sqlite:spamwatch.db`).
///
/// `sqlite::memory:` gives every connection its own empty database, so tests open it
/// with a single connection.
pub async fn init_pool_with_size(
    database_url: &str,
    max_connections: u32,
) -> Result<DbPool, sqlx::Error> {
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect_with(connect_options(database_url)?)
        .await?;

    info!(url = %database_url, max_connections, "Database pool opened");
    Ok(pool)
}

pub async fn init_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    init_pool_with_size(database_url, default_pool_size()).await
}

pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    info!("Database schema is up to date");
    Ok(())
}
