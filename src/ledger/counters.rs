//! Denormalized community post counters, always recomputed from child rows.

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::info;

use crate::db::run_in_tx;
use crate::entity::Entity;
use crate::error::LedgerResult;
use crate::repo::rows::Record;

const LIKES: &str = "(SELECT COUNT(*) FROM post_reactions r WHERE r.post_id = community_posts.id AND r.type = 'LIKE')";
const HYPES: &str = "(SELECT COUNT(*) FROM post_reactions r WHERE r.post_id = community_posts.id AND r.type = 'HYPE')";
const COMMENTS: &str = "(SELECT COUNT(*) FROM post_comments c WHERE c.post_id = community_posts.id)";

fn recount_sql(predicate: &str) -> String {
    format!(
        "UPDATE community_posts SET likes_count = {LIKES}, hypes_count = {HYPES}, comments_count = {COMMENTS} WHERE {predicate}"
    )
}

fn drift_predicate() -> String {
    format!("likes_count <> {LIKES} OR hypes_count <> {HYPES} OR comments_count <> {COMMENTS}")
}

pub async fn recount_post(conn: &mut SqliteConnection, post_id: &str) -> Result<u64, sqlx::Error> {
    let res = sqlx::query(&recount_sql("id = ?"))
        .bind(post_id)
        .execute(&mut *conn)
        .await?;
    Ok(res.rows_affected())
}

/// Posts whose stored counters disagree with their child rows.
pub fn drifted_posts(conn: &mut SqliteConnection) -> BoxFuture<'_, Result<i64, sqlx::Error>> {
    async move {
        sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM community_posts WHERE {}",
            drift_predicate()
        ))
        .fetch_one(&mut *conn)
        .await
    }
    .boxed()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CounterDrift {
    pub post_id: String,
    pub stored: [i64; 3],
    pub actual: [i64; 3],
}

pub async fn drifted_post_details(
    conn: &mut SqliteConnection,
) -> Result<Vec<CounterDrift>, sqlx::Error> {
    let rows: Vec<(String, i64, i64, i64, i64, i64, i64)> = sqlx::query_as(&format!(
        "SELECT id, likes_count, hypes_count, comments_count, {LIKES}, {HYPES}, {COMMENTS} \
         FROM community_posts WHERE {} ORDER BY id",
        drift_predicate()
    ))
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows
        .into_iter()
        .map(|(post_id, l, h, c, al, ah, ac)| CounterDrift {
            post_id,
            stored: [l, h, c],
            actual: [al, ah, ac],
        })
        .collect())
}

/// Fix every drifted post; returns how many were rewritten.
pub fn recount_all_posts(conn: &mut SqliteConnection) -> BoxFuture<'_, Result<u64, sqlx::Error>> {
    async move {
        let res = sqlx::query(&recount_sql(&drift_predicate()))
            .execute(&mut *conn)
            .await?;
        Ok(res.rows_affected())
    }
    .boxed()
}

/// Keep the parent post in step after a reaction or comment was written or removed.
pub async fn refresh_parent(
    conn: &mut SqliteConnection,
    entity: Entity,
    record: &Record,
) -> Result<(), sqlx::Error> {
    if !matches!(entity, Entity::PostReaction | Entity::PostComment) {
        return Ok(());
    }
    if let Some(post_id) = record.get("post_id").and_then(Value::as_str) {
        recount_post(conn, post_id).await?;
    }
    Ok(())
}

pub async fn recount_posts(pool: &SqlitePool) -> LedgerResult<u64> {
    let fixed = run_in_tx(pool, |conn| recount_all_posts(conn)).await?;
    info!(target: "bizledger", event = "post_counters_recounted", fixed);
    Ok(fixed)
}
