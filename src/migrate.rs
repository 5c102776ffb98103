use std::collections::HashMap;

use futures::future::BoxFuture;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::{Executor, Row, SqliteConnection, SqlitePool};
use tracing::{error, info};

use crate::error::{LedgerError, LedgerResult};
use crate::ledger::{counters, repair};
use crate::schema;
use crate::time::now_iso;

static ADD_COLUMN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^ALTER\s+TABLE\s+(\w+)\s+ADD\s+COLUMN\s+(\w+)")
        .expect("add column pattern to compile")
});

type CountFn = for<'c> fn(&'c mut SqliteConnection) -> BoxFuture<'c, Result<i64, sqlx::Error>>;
type ApplyFn = for<'c> fn(&'c mut SqliteConnection) -> BoxFuture<'c, Result<u64, sqlx::Error>>;

/// A code-defined migration that rewrites rows instead of schema.
pub struct DataMigration {
    /// Idempotence check: how many rows still need the change.
    pub pending: CountFn,
    /// Performs the change and returns the number of rows touched.
    pub apply: ApplyFn,
}

pub enum Step {
    Sql(&'static str),
    Data(DataMigration),
}

pub struct Migration {
    pub version: &'static str,
    pub description: &'static str,
    pub step: Step,
}

impl Migration {
    fn kind(&self) -> &'static str {
        match self.step {
            Step::Sql(_) => "sql",
            Step::Data(_) => "data",
        }
    }

    fn checksum(&self) -> String {
        let body = match &self.step {
            Step::Sql(sql) => cleaned(sql),
            Step::Data(_) => format!("data:{}:{}", self.version, self.description),
        };
        format!("{:x}", Sha256::digest(body.as_bytes()))
    }
}

/// Ordered, append-only. Never edit an entry once released; add a new one.
pub static MIGRATIONS: &[Migration] = &[
    Migration {
        version: "202501100900_initial.sql",
        description: "core ledger tables",
        step: Step::Sql(include_str!("../migrations/202501100900_initial.sql")),
    },
    Migration {
        version: "202501100930_owner_indexes.sql",
        description: "owner and reference indexes",
        step: Step::Sql(include_str!("../migrations/202501100930_owner_indexes.sql")),
    },
    Migration {
        version: "202502031200_public_profiles_and_declarations.sql",
        description: "public profile flag and customs declaration flag",
        step: Step::Sql(include_str!(
            "../migrations/202502031200_public_profiles_and_declarations.sql"
        )),
    },
    Migration {
        version: "202503150000_repair_transaction_field_swap",
        description: "move date-shaped descriptions back into the date column",
        step: Step::Data(DataMigration {
            pending: repair::pending_field_swaps,
            apply: repair::apply_field_swaps,
        }),
    },
    Migration {
        version: "202503150100_recount_post_counters",
        description: "recompute community post counters from child rows",
        step: Step::Data(DataMigration {
            pending: counters::drifted_posts,
            apply: counters::recount_all_posts,
        }),
    },
];

/// What a call to [`ensure_schema`] changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchemaReport {
    pub applied: Vec<String>,
    pub skipped: Vec<String>,
    pub columns_added: Vec<String>,
    pub rows_repaired: u64,
}

impl SchemaReport {
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty() && self.columns_added.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    pub version: String,
    pub description: String,
    pub kind: String,
    pub applied_at: Option<String>,
}

fn preview(sql: &str) -> String {
    let one_line = sql.replace(['\n', '\t'], " ");
    let trimmed = one_line.trim();
    if trimmed.chars().count() > 160 {
        format!("{}…", trimmed.chars().take(160).collect::<String>())
    } else {
        trimmed.to_string()
    }
}

fn cleaned(sql: &str) -> String {
    sql.lines()
        .filter(|line| {
            let t = line.trim_start();
            !(t.is_empty() || t.starts_with("--"))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn schema_error(migration: &str, ddl: Option<&str>, err: impl ToString) -> LedgerError {
    LedgerError::Schema {
        migration: migration.to_string(),
        ddl: ddl.map(preview),
        reason: err.to_string(),
    }
}

async fn ensure_ledger_table(pool: &SqlitePool) -> LedgerResult<()> {
    pool.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (\
           version    TEXT PRIMARY KEY,\
           applied_at TEXT NOT NULL,\
           checksum   TEXT NOT NULL,\
           kind       TEXT NOT NULL DEFAULT 'sql',\
           changes    INTEGER NOT NULL DEFAULT 0\
         )",
    )
    .await
    .map_err(|err| schema_error("schema_migrations", None, err))?;
    Ok(())
}

async fn applied_checksums(pool: &SqlitePool) -> LedgerResult<HashMap<String, String>> {
    let rows = sqlx::query("SELECT version, checksum FROM schema_migrations")
        .fetch_all(pool)
        .await
        .map_err(|err| schema_error("schema_migrations", None, err))?;
    let mut applied = HashMap::new();
    for r in rows {
        if let (Ok(v), Ok(c)) = (
            r.try_get::<String, _>("version"),
            r.try_get::<String, _>("checksum"),
        ) {
            applied.insert(v, c);
        }
    }
    Ok(applied)
}

async fn column_exists(
    conn: &mut SqliteConnection,
    table: &str,
    column: &str,
) -> Result<bool, sqlx::Error> {
    let exists: Option<i64> =
        sqlx::query_scalar("SELECT 1 FROM pragma_table_info(?1) WHERE name = ?2")
            .bind(table)
            .bind(column)
            .fetch_optional(&mut *conn)
            .await?;
    Ok(exists.is_some())
}

async fn run_sql_migration(
    conn: &mut SqliteConnection,
    version: &str,
    sql: &str,
) -> LedgerResult<u64> {
    for stmt in cleaned(sql).split(';') {
        let s = stmt.trim();
        if s.is_empty() {
            continue;
        }
        let upper = s.to_ascii_uppercase();
        if upper == "BEGIN" || upper == "COMMIT" {
            continue;
        }
        if let Some(caps) = ADD_COLUMN.captures(s) {
            let table = &caps[1];
            let col = &caps[2];
            if column_exists(conn, table, col)
                .await
                .map_err(|err| schema_error(version, Some(s), err))?
            {
                info!(target: "bizledger", event = "migration_stmt_skip", file = %version, sql = %preview(s));
                continue;
            }
        }
        info!(target: "bizledger", event = "migration_stmt", file = %version, sql = %preview(s));
        if let Err(e) = sqlx::query(s).execute(&mut *conn).await {
            error!(target: "bizledger", event = "migration_stmt_error", file = %version, sql = %preview(s), error = %e);
            return Err(schema_error(version, Some(s), e));
        }
    }
    Ok(0)
}

async fn run_data_migration(
    conn: &mut SqliteConnection,
    version: &str,
    data: &DataMigration,
) -> LedgerResult<u64> {
    let pending = (data.pending)(&mut *conn)
        .await
        .map_err(|err| schema_error(version, None, err))?;
    if pending == 0 {
        info!(target: "bizledger", event = "data_migration_nothing_pending", file = %version);
        return Ok(0);
    }
    let changes = (data.apply)(&mut *conn)
        .await
        .map_err(|err| schema_error(version, None, err))?;
    info!(target: "bizledger", event = "data_migration_applied", file = %version, pending, changes);
    Ok(changes)
}

/// Bring the store up to date: ordered migrations, then the column catalog.
///
/// Safe to run on every start. A second run applies nothing and adds no columns.
pub async fn ensure_schema(pool: &SqlitePool) -> LedgerResult<SchemaReport> {
    ensure_ledger_table(pool).await?;
    let applied = applied_checksums(pool).await?;
    let mut report = SchemaReport::default();

    for migration in MIGRATIONS {
        let checksum = migration.checksum();
        if let Some(stored) = applied.get(migration.version) {
            if stored != &checksum {
                return Err(schema_error(
                    migration.version,
                    None,
                    "migration edited after application",
                ));
            }
            info!(target: "bizledger", event = "migration_skip_file", file = %migration.version);
            report.skipped.push(migration.version.to_string());
            continue;
        }

        let mut tx = pool
            .begin()
            .await
            .map_err(|err| schema_error(migration.version, None, err))?;
        let changes = match &migration.step {
            Step::Sql(sql) => run_sql_migration(&mut *tx, migration.version, sql).await?,
            Step::Data(data) => run_data_migration(&mut *tx, migration.version, data).await?,
        };

        sqlx::query(
            "INSERT INTO schema_migrations (version, applied_at, checksum, kind, changes) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(migration.version)
        .bind(now_iso())
        .bind(&checksum)
        .bind(migration.kind())
        .bind(changes as i64)
        .execute(&mut *tx)
        .await
        .map_err(|err| schema_error(migration.version, None, err))?;

        tx.commit()
            .await
            .map_err(|err| schema_error(migration.version, None, err))?;
        info!(target: "bizledger", event = "migration_file_applied", file = %migration.version);
        report.applied.push(migration.version.to_string());
        report.rows_repaired += changes;
    }

    report.columns_added = schema::reconcile_columns(pool).await?;

    info!(
        target: "bizledger",
        event = "schema_ready",
        applied = report.applied.len(),
        skipped = report.skipped.len(),
        columns_added = report.columns_added.len(),
        rows_repaired = report.rows_repaired
    );
    Ok(report)
}

/// Every known migration with its applied timestamp, without changing anything.
pub async fn migration_status(pool: &SqlitePool) -> LedgerResult<Vec<MigrationStatus>> {
    let has_table: Option<i64> = sqlx::query_scalar(
        "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'schema_migrations'",
    )
    .fetch_optional(pool)
    .await?;

    let mut applied_at: HashMap<String, String> = HashMap::new();
    if has_table.is_some() {
        let rows = sqlx::query("SELECT version, applied_at FROM schema_migrations")
            .fetch_all(pool)
            .await?;
        for row in rows {
            applied_at.insert(row.try_get("version")?, row.try_get("applied_at")?);
        }
    }

    Ok(MIGRATIONS
        .iter()
        .map(|m| MigrationStatus {
            version: m.version.to_string(),
            description: m.description.to_string(),
            kind: m.kind().to_string(),
            applied_at: applied_at.get(m.version).cloned(),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("connect sqlite::memory:")
    }

    #[test]
    fn versions_are_strictly_ordered() {
        let versions: Vec<_> = MIGRATIONS.iter().map(|m| m.version).collect();
        let mut sorted = versions.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(versions, sorted);
    }

    #[test]
    fn checksum_ignores_comments_and_blank_lines() {
        let a = Migration {
            version: "v",
            description: "d",
            step: Step::Sql("-- note\nCREATE TABLE t (id TEXT);\n\n"),
        };
        let b = Migration {
            version: "v",
            description: "d",
            step: Step::Sql("CREATE TABLE t (id TEXT);"),
        };
        assert_eq!(a.checksum(), b.checksum());
    }

    #[tokio::test]
    async fn second_run_is_a_noop() {
        let pool = memory_pool().await;
        let first = ensure_schema(&pool).await.expect("first run");
        assert_eq!(first.applied.len(), MIGRATIONS.len());
        assert!(first.columns_added.is_empty());

        let second = ensure_schema(&pool).await.expect("second run");
        assert!(second.is_noop());
        assert_eq!(second.skipped.len(), MIGRATIONS.len());
    }

    #[tokio::test]
    async fn edited_migration_is_rejected() {
        let pool = memory_pool().await;
        ensure_schema(&pool).await.expect("migrate");
        sqlx::query("UPDATE schema_migrations SET checksum = 'tampered' WHERE version = ?")
            .bind(MIGRATIONS[0].version)
            .execute(&pool)
            .await
            .unwrap();
        let err = ensure_schema(&pool).await.expect_err("checksum mismatch");
        assert!(matches!(err, LedgerError::Schema { .. }));
        assert!(err.to_string().contains("edited after application"));
    }

    #[tokio::test]
    async fn status_reports_pending_before_first_run() {
        let pool = memory_pool().await;
        let status = migration_status(&pool).await.unwrap();
        assert!(status.iter().all(|m| m.applied_at.is_none()));

        ensure_schema(&pool).await.unwrap();
        let status = migration_status(&pool).await.unwrap();
        assert!(status.iter().all(|m| m.applied_at.is_some()));
        assert_eq!(status[3].kind, "data");
    }
}
