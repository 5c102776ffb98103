use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result as AnyResult};
use futures::future::BoxFuture;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{ConnectOptions, SqliteConnection, SqlitePool};
use tracing::{error, info, warn};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open (creating if needed) the ledger database with WAL, full sync,
/// foreign keys and a busy timeout on every connection.
pub async fn open_sqlite_pool(db_path: &Path) -> AnyResult<SqlitePool> {
    if let Some(dir) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("create database directory {}", dir.display()))?;
    }

    let opts = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full)
        .foreign_keys(true)
        .busy_timeout(BUSY_TIMEOUT)
        .log_statements(log::LevelFilter::Off);

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(opts)
        .await
        .with_context(|| format!("open database at {}", db_path.display()))?;

    let journal_mode: String = sqlx::query_scalar("PRAGMA journal_mode;")
        .fetch_one(&pool)
        .await
        .context("read journal_mode")?;
    let foreign_keys: i64 = sqlx::query_scalar("PRAGMA foreign_keys;")
        .fetch_one(&pool)
        .await
        .context("read foreign_keys")?;
    info!(
        target: "bizledger",
        event = "db_open",
        path = %db_path.display(),
        journal_mode = %journal_mode,
        foreign_keys,
    );
    if !journal_mode.eq_ignore_ascii_case("wal") {
        warn!(target: "bizledger", event = "db_not_wal", journal_mode = %journal_mode);
    }

    Ok(pool)
}

/// Run work inside a transaction. Commits on success, rolls back on error.
///
/// The closure receives the transaction's connection and must only capture
/// owned data:
///
/// ```ignore
/// run_in_tx(pool, move |conn| async move { delete_row(conn, entity, &id).await }.boxed())
/// ```
pub async fn run_in_tx<R, E, F>(pool: &SqlitePool, f: F) -> Result<R, E>
where
    E: From<sqlx::Error>,
    F: for<'c> FnOnce(&'c mut SqliteConnection) -> BoxFuture<'c, Result<R, E>>,
{
    let mut tx = pool.begin().await.map_err(E::from)?;
    info!(target: "bizledger", event = "db_tx_begin");
    let outcome = f(&mut *tx).await;
    match outcome {
        Ok(val) => {
            tx.commit().await.map_err(E::from)?;
            info!(target: "bizledger", event = "db_tx_commit");
            Ok(val)
        }
        Err(e) => {
            if let Err(rb) = tx.rollback().await {
                error!(target: "bizledger", event = "db_tx_rollback_failed", error = %rb);
            } else {
                warn!(target: "bizledger", event = "db_tx_rollback");
            }
            Err(e)
        }
    }
}
