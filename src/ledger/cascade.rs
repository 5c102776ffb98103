//! Account deletion: every row a user owns, in dependency order.

use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::{error, info, warn};

use crate::entity::Entity;
use crate::error::{LedgerError, LedgerResult};
use crate::gateway::GatewayError;
use crate::ledger::counters;
use crate::state::LedgerContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    PostComments,
    PostReactions,
    PostCounters,
    CommunityPosts,
    FinancialTransactions,
    FinancialGoals,
    RecurringExpenses,
    AffiliateEarnings,
    AffiliatePlatforms,
    Shipments,
    Sales,
    Companies,
    User,
}

impl Phase {
    pub const ORDER: [Phase; 13] = [
        Phase::PostComments,
        Phase::PostReactions,
        Phase::PostCounters,
        Phase::CommunityPosts,
        Phase::FinancialTransactions,
        Phase::FinancialGoals,
        Phase::RecurringExpenses,
        Phase::AffiliateEarnings,
        Phase::AffiliatePlatforms,
        Phase::Shipments,
        Phase::Sales,
        Phase::Companies,
        Phase::User,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Phase::PostComments => "post_comments",
            Phase::PostReactions => "post_reactions",
            Phase::PostCounters => "post_counters",
            Phase::CommunityPosts => "community_posts",
            Phase::FinancialTransactions => "financial_transactions",
            Phase::FinancialGoals => "financial_goals",
            Phase::RecurringExpenses => "recurring_expenses",
            Phase::AffiliateEarnings => "affiliate_earnings",
            Phase::AffiliatePlatforms => "affiliate_platforms",
            Phase::Shipments => "shipments",
            Phase::Sales => "sales",
            Phase::Companies => "companies",
            Phase::User => "users",
        }
    }

    /// Owned table removed wholesale by this phase.
    fn owned_entity(self) -> Option<Entity> {
        match self {
            Phase::FinancialTransactions => Some(Entity::FinancialTransaction),
            Phase::FinancialGoals => Some(Entity::FinancialGoal),
            Phase::RecurringExpenses => Some(Entity::RecurringExpense),
            Phase::AffiliateEarnings => Some(Entity::AffiliateEarning),
            Phase::AffiliatePlatforms => Some(Entity::AffiliatePlatform),
            Phase::Shipments => Some(Entity::Shipment),
            Phase::Sales => Some(Entity::Sale),
            Phase::Companies => Some(Entity::Company),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CascadeStep {
    pub phase: Phase,
    /// Rows deleted, or posts recounted for [`Phase::PostCounters`].
    pub affected: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CascadeOutcome {
    pub user_id: String,
    pub steps: Vec<CascadeStep>,
    pub total_deleted: u64,
    /// Every step succeeded.
    pub completed: bool,
}

impl CascadeOutcome {
    pub fn failed_steps(&self) -> impl Iterator<Item = &CascadeStep> {
        self.steps.iter().filter(|s| s.error.is_some())
    }
}

async fn touched_posts(
    conn: &mut SqliteConnection,
    child_table: &str,
    user_id: &str,
) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar(&format!(
        "SELECT DISTINCT post_id FROM {child_table} WHERE user_id = ?1 \
         AND post_id NOT IN (SELECT id FROM community_posts WHERE user_id = ?1)"
    ))
    .bind(user_id)
    .fetch_all(&mut *conn)
    .await
}

async fn delete_where(
    conn: &mut SqliteConnection,
    sql: &str,
    user_id: &str,
) -> Result<u64, sqlx::Error> {
    let res = sqlx::query(sql).bind(user_id).execute(&mut *conn).await?;
    Ok(res.rows_affected())
}

async fn run_phase(
    conn: &mut SqliteConnection,
    phase: Phase,
    user_id: &str,
    touched: &mut Vec<String>,
) -> Result<u64, sqlx::Error> {
    if let Some(entity) = phase.owned_entity() {
        let sql = format!("DELETE FROM {} WHERE user_id = ?", entity.table());
        return delete_where(conn, &sql, user_id).await;
    }
    match phase {
        Phase::PostComments => {
            touched.extend(touched_posts(conn, "post_comments", user_id).await?);
            delete_where(conn, "DELETE FROM post_comments WHERE user_id = ?", user_id).await
        }
        Phase::PostReactions => {
            touched.extend(touched_posts(conn, "post_reactions", user_id).await?);
            delete_where(conn, "DELETE FROM post_reactions WHERE user_id = ?", user_id).await
        }
        Phase::PostCounters => {
            touched.sort();
            touched.dedup();
            let mut recounted = 0;
            for post_id in touched.iter() {
                recounted += counters::recount_post(conn, post_id).await?;
            }
            Ok(recounted)
        }
        Phase::CommunityPosts => {
            let mut deleted = delete_where(
                conn,
                "DELETE FROM post_reactions WHERE post_id IN (SELECT id FROM community_posts WHERE user_id = ?)",
                user_id,
            )
            .await?;
            deleted += delete_where(
                conn,
                "DELETE FROM post_comments WHERE post_id IN (SELECT id FROM community_posts WHERE user_id = ?)",
                user_id,
            )
            .await?;
            deleted +=
                delete_where(conn, "DELETE FROM community_posts WHERE user_id = ?", user_id).await?;
            Ok(deleted)
        }
        Phase::User => delete_where(conn, "DELETE FROM users WHERE id = ?", user_id).await,
        _ => Ok(0),
    }
}

/// Delete a user and everything they own.
///
/// The identity provider is told first; a provider failure other than
/// "already absent" aborts before any local change. Each phase then runs in
/// its own savepoint inside one transaction. A failing phase is rolled back
/// to its savepoint, recorded, and the remaining phases still run.
pub async fn delete_user(ctx: &LedgerContext, user_id: &str) -> LedgerResult<CascadeOutcome> {
    let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(ctx.pool())
        .await?;
    if exists.is_none() {
        return Err(LedgerError::not_found(Entity::User, user_id));
    }

    match ctx.identity().delete_user(user_id).await {
        Ok(()) => info!(target: "bizledger", event = "identity_deleted", user_id),
        Err(GatewayError::AlreadyAbsent) => {
            info!(target: "bizledger", event = "identity_already_absent", user_id)
        }
        Err(GatewayError::Failed(message)) => {
            error!(target: "bizledger", event = "identity_delete_failed", user_id, error = %message);
            return Err(LedgerError::Dependency { message });
        }
    }

    let mut tx = ctx.pool().begin().await?;
    let mut touched = Vec::new();
    let mut steps = Vec::with_capacity(Phase::ORDER.len());

    for phase in Phase::ORDER {
        sqlx::query("SAVEPOINT cascade_step")
            .execute(&mut *tx)
            .await?;
        let outcome = run_phase(&mut *tx, phase, user_id, &mut touched).await;
        match outcome {
            Ok(affected) => {
                sqlx::query("RELEASE cascade_step")
                    .execute(&mut *tx)
                    .await?;
                info!(target: "bizledger", event = "cascade_step", user_id, phase = phase.name(), affected);
                steps.push(CascadeStep {
                    phase,
                    affected,
                    error: None,
                });
            }
            Err(err) => {
                sqlx::query("ROLLBACK TO cascade_step")
                    .execute(&mut *tx)
                    .await?;
                sqlx::query("RELEASE cascade_step")
                    .execute(&mut *tx)
                    .await?;
                warn!(
                    target: "bizledger",
                    event = "cascade_step_failed",
                    user_id,
                    phase = phase.name(),
                    error = %err
                );
                steps.push(CascadeStep {
                    phase,
                    affected: 0,
                    error: Some(err.to_string()),
                });
            }
        }
    }
    tx.commit().await?;

    let total_deleted = steps
        .iter()
        .filter(|s| s.phase != Phase::PostCounters)
        .map(|s| s.affected)
        .sum();
    let completed = steps.iter().all(|s| s.error.is_none());
    info!(
        target: "bizledger",
        event = "cascade_complete",
        user_id,
        total_deleted,
        completed
    );
    Ok(CascadeOutcome {
        user_id: user_id.to_string(),
        steps,
        total_deleted,
        completed,
    })
}
