//! Read-only consistency audit over the whole store.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{info, warn};

use crate::entity::Entity;
use crate::error::LedgerResult;
use crate::ledger::integrity::{Reference, Target, REFERENCES};
use crate::ledger::{counters, repair};
use crate::model::RelatedType;
use crate::time::now_iso;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditCheck {
    pub name: String,
    pub passed: bool,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditOffender {
    pub table: String,
    pub id: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditReport {
    pub status: AuditStatus,
    pub checks: Vec<AuditCheck>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub offenders: Vec<AuditOffender>,
    pub generated_at: String,
}

impl AuditReport {
    pub fn is_ok(&self) -> bool {
        self.status == AuditStatus::Ok
    }
}

type CheckResult = Result<Vec<AuditOffender>, sqlx::Error>;

fn offender(entity: Entity, id: impl Into<String>, message: impl Into<String>) -> AuditOffender {
    AuditOffender {
        table: entity.table().to_string(),
        id: id.into(),
        message: message.into(),
    }
}

async fn broken_references(
    conn: &mut SqliteConnection,
    reference: &Reference,
    target: Entity,
    kind: Option<&str>,
) -> CheckResult {
    let from = reference.from.table();
    let column = reference.column;
    let owner_clause = if reference.same_owner {
        format!(" OR t.{} <> f.user_id", target.owner_column())
    } else {
        String::new()
    };
    let kind_clause = if kind.is_some() {
        " AND f.related_type = ?"
    } else {
        ""
    };
    let sql = format!(
        "SELECT f.id, f.{column}, t.id IS NULL FROM {from} f \
         LEFT JOIN {target_table} t ON t.id = f.{column} \
         WHERE f.{column} IS NOT NULL{kind_clause} AND (t.id IS NULL{owner_clause}) \
         ORDER BY f.id",
        target_table = target.table(),
    );
    let mut query = sqlx::query_as::<_, (String, String, i64)>(&sql);
    if let Some(kind) = kind {
        query = query.bind(kind.to_string());
    }
    let rows = query.fetch_all(&mut *conn).await?;
    Ok(rows
        .into_iter()
        .map(|(id, target_id, missing)| {
            let problem = if missing != 0 {
                "references a missing"
            } else {
                "references another user's"
            };
            offender(
                reference.from,
                id,
                format!("{column} {problem} {target} {target_id}"),
            )
        })
        .collect())
}

async fn check_references(conn: &mut SqliteConnection) -> CheckResult {
    let mut offenders = Vec::new();
    for reference in REFERENCES {
        match reference.target {
            Target::Fixed(target) => {
                offenders.extend(broken_references(conn, reference, target, None).await?);
            }
            Target::Related => {
                for entity in Entity::ALL {
                    if let Some(kind) = RelatedType::for_entity(entity) {
                        offenders.extend(
                            broken_references(conn, reference, entity, Some(kind.as_str())).await?,
                        );
                    }
                }
            }
        }
    }
    Ok(offenders)
}

async fn check_single_shipment(conn: &mut SqliteConnection) -> CheckResult {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT sale_id, COUNT(*) FROM shipments WHERE sale_id IS NOT NULL \
         GROUP BY sale_id HAVING COUNT(*) > 1 ORDER BY sale_id",
    )
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows
        .into_iter()
        .map(|(sale_id, count)| {
            offender(Entity::Sale, sale_id, format!("sale has {count} shipments"))
        })
        .collect())
}

async fn check_counters(conn: &mut SqliteConnection) -> CheckResult {
    let drift = counters::drifted_post_details(conn).await?;
    Ok(drift
        .into_iter()
        .map(|d| {
            offender(
                Entity::CommunityPost,
                d.post_id,
                format!(
                    "counters (likes, hypes, comments) stored {:?}, actual {:?}",
                    d.stored, d.actual
                ),
            )
        })
        .collect())
}

async fn check_field_swap(conn: &mut SqliteConnection) -> CheckResult {
    let scan = repair::scan(conn).await?;
    let swaps = scan.swaps.into_iter().map(|id| {
        offender(
            Entity::FinancialTransaction,
            id,
            "description holds a timestamp; run the field-swap repair",
        )
    });
    let ambiguous = scan.ambiguous.into_iter().map(|id| {
        offender(
            Entity::FinancialTransaction,
            id,
            "description holds a timestamp and date is not free text; needs manual review",
        )
    });
    Ok(swaps.chain(ambiguous).collect())
}

async fn check_owners(conn: &mut SqliteConnection) -> CheckResult {
    let mut offenders = Vec::new();
    for entity in Entity::ALL.into_iter().filter(|e| *e != Entity::User) {
        let ids: Vec<String> = sqlx::query_scalar(&format!(
            "SELECT id FROM {} WHERE user_id NOT IN (SELECT id FROM users) ORDER BY id",
            entity.table()
        ))
        .fetch_all(&mut *conn)
        .await?;
        offenders.extend(
            ids.into_iter()
                .map(|id| offender(entity, id, "owner user does not exist")),
        );
    }
    Ok(offenders)
}

fn record(
    name: &str,
    start: Instant,
    result: CheckResult,
    checks: &mut Vec<AuditCheck>,
    offenders: &mut Vec<AuditOffender>,
) {
    let mut check = AuditCheck {
        name: name.to_string(),
        passed: true,
        duration_ms: 0,
        details: None,
    };
    match result {
        Ok(found) if found.is_empty() => {}
        Ok(found) => {
            check.passed = false;
            check.details = Some(format!("{} offending rows", found.len()));
            offenders.extend(found);
        }
        Err(err) => {
            check.passed = false;
            check.details = Some(format!("{name} failed: {err}"));
        }
    }
    check.duration_ms = start.elapsed().as_millis() as u64;
    checks.push(check);
}

/// Run every consistency check. Never modifies the store.
pub async fn run_audit(pool: &SqlitePool) -> LedgerResult<AuditReport> {
    let mut conn = pool.acquire().await?;
    let mut checks = Vec::new();
    let mut offenders = Vec::new();

    let start = Instant::now();
    let result = check_references(&mut conn).await;
    record("references", start, result, &mut checks, &mut offenders);

    let start = Instant::now();
    let result = check_single_shipment(&mut conn).await;
    record("one_shipment_per_sale", start, result, &mut checks, &mut offenders);

    let start = Instant::now();
    let result = check_counters(&mut conn).await;
    record("post_counters", start, result, &mut checks, &mut offenders);

    let start = Instant::now();
    let result = check_field_swap(&mut conn).await;
    record("field_swap", start, result, &mut checks, &mut offenders);

    let start = Instant::now();
    let result = check_owners(&mut conn).await;
    record("owners", start, result, &mut checks, &mut offenders);

    let status = if checks.iter().all(|c| c.passed) {
        AuditStatus::Ok
    } else {
        AuditStatus::Error
    };
    if status == AuditStatus::Ok {
        info!(target: "bizledger", event = "audit_ok", checks = checks.len());
    } else {
        warn!(target: "bizledger", event = "audit_failed", offenders = offenders.len());
    }
    Ok(AuditReport {
        status,
        checks,
        offenders,
        generated_at: now_iso(),
    })
}
