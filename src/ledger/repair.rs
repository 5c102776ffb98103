//! Repair for transactions whose `description` and `date` were written to
//! each other's columns.

use futures::future::BoxFuture;
use futures::FutureExt;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{info, warn};

use crate::error::LedgerResult;
use crate::time::now_iso;

static DATE_SHAPED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}T").expect("date-shaped pattern to compile"));

pub fn is_date_shaped(value: &str) -> bool {
    DATE_SHAPED.is_match(value)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    pub scanned: u64,
    pub swapped: u64,
    pub ids: Vec<String>,
    /// Date-shaped descriptions left alone because `date` is date-shaped too
    /// (or missing), so swapping could not be undone by a second pass.
    pub ambiguous: Vec<String>,
    pub dry_run: bool,
}

pub(crate) struct Scan {
    pub scanned: u64,
    pub swaps: Vec<String>,
    pub ambiguous: Vec<String>,
}

pub(crate) async fn scan(conn: &mut SqliteConnection) -> Result<Scan, sqlx::Error> {
    let rows: Vec<(String, Option<String>, Option<String>)> =
        sqlx::query_as("SELECT id, description, date FROM financial_transactions ORDER BY id")
            .fetch_all(&mut *conn)
            .await?;
    let mut out = Scan {
        scanned: rows.len() as u64,
        swaps: Vec::new(),
        ambiguous: Vec::new(),
    };
    for (id, description, date) in rows {
        if !description.as_deref().is_some_and(is_date_shaped) {
            continue;
        }
        match date.as_deref() {
            Some(date) if !is_date_shaped(date) => out.swaps.push(id),
            _ => out.ambiguous.push(id),
        }
    }
    Ok(out)
}

async fn swap(conn: &mut SqliteConnection, ids: &[String]) -> Result<u64, sqlx::Error> {
    let now = now_iso();
    let mut swapped = 0;
    for id in ids {
        // SQLite evaluates every SET expression against the old row.
        let res = sqlx::query(
            "UPDATE financial_transactions SET description = date, date = description, updated_at = ? WHERE id = ?",
        )
        .bind(&now)
        .bind(id)
        .execute(&mut *conn)
        .await?;
        swapped += res.rows_affected();
    }
    Ok(swapped)
}

pub fn pending_field_swaps(conn: &mut SqliteConnection) -> BoxFuture<'_, Result<i64, sqlx::Error>> {
    async move { Ok(scan(conn).await?.swaps.len() as i64) }.boxed()
}

pub fn apply_field_swaps(conn: &mut SqliteConnection) -> BoxFuture<'_, Result<u64, sqlx::Error>> {
    async move {
        let found = scan(&mut *conn).await?;
        swap(conn, &found.swaps).await
    }
    .boxed()
}

/// Scan every transaction and swap the fields back where the description is
/// date-shaped and the date is not. A second run finds nothing to do.
pub async fn repair_field_swap(pool: &SqlitePool, dry_run: bool) -> LedgerResult<RepairReport> {
    let mut tx = pool.begin().await?;
    let found = scan(&mut *tx).await?;
    let swapped = if dry_run {
        0
    } else {
        swap(&mut *tx, &found.swaps).await?
    };
    tx.commit().await?;

    if !found.ambiguous.is_empty() {
        warn!(
            target: "bizledger",
            event = "field_swap_ambiguous",
            count = found.ambiguous.len(),
            ids = ?found.ambiguous
        );
    }
    info!(
        target: "bizledger",
        event = "field_swap_repair",
        scanned = found.scanned,
        candidates = found.swaps.len(),
        swapped,
        dry_run
    );
    Ok(RepairReport {
        scanned: found.scanned,
        swapped,
        ids: found.swaps,
        ambiguous: found.ambiguous,
        dry_run,
    })
}
