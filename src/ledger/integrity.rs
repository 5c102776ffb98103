//! Logical foreign keys and the rules that keep them valid.
//!
//! Storage never enforces these references. Every write goes through
//! [`check_write`]; every delete goes through [`release_dependents`].

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use sqlx::SqliteConnection;
use tracing::info;

use crate::entity::Entity;
use crate::error::{LedgerError, LedgerResult};
use crate::model::RelatedType;
use crate::policy::owner_of;
use crate::repo::rows::{self, Record};
use crate::time::now_iso;

/// A reference to a row that is absent or belongs to someone else. Both cases
/// share one code and message so a writer cannot learn other users' ids.
pub const REFERENCE_INVALID: &str = "INTEGRITY/REFERENCE_INVALID";
pub const SALE_ALREADY_SHIPPED: &str = "INTEGRITY/SALE_ALREADY_SHIPPED";
pub const DUPLICATE: &str = "INTEGRITY/DUPLICATE";
pub const OWNER_CHANGE_BLOCKED: &str = "INTEGRITY/OWNER_CHANGE_BLOCKED";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnDelete {
    /// Clear the referencing column.
    Detach,
    /// Delete the referencing row.
    Cascade,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Fixed(Entity),
    /// Resolved per row from `related_type`.
    Related,
}

#[derive(Debug, Clone, Copy)]
pub struct Reference {
    pub from: Entity,
    pub column: &'static str,
    pub target: Target,
    /// Referencing and referenced rows must belong to the same user.
    pub same_owner: bool,
    pub on_delete: OnDelete,
}

pub static REFERENCES: &[Reference] = &[
    Reference {
        from: Entity::Shipment,
        column: "sale_id",
        target: Target::Fixed(Entity::Sale),
        same_owner: true,
        on_delete: OnDelete::Detach,
    },
    Reference {
        from: Entity::FinancialTransaction,
        column: "related_id",
        target: Target::Related,
        same_owner: true,
        on_delete: OnDelete::Detach,
    },
    Reference {
        from: Entity::AffiliateEarning,
        column: "platform_id",
        target: Target::Fixed(Entity::AffiliatePlatform),
        same_owner: true,
        on_delete: OnDelete::Cascade,
    },
    Reference {
        from: Entity::PostReaction,
        column: "post_id",
        target: Target::Fixed(Entity::CommunityPost),
        same_owner: false,
        on_delete: OnDelete::Cascade,
    },
    Reference {
        from: Entity::PostComment,
        column: "post_id",
        target: Target::Fixed(Entity::CommunityPost),
        same_owner: false,
        on_delete: OnDelete::Cascade,
    },
];

impl Reference {
    /// Entity this row's reference points at, if it is a checked reference.
    pub fn target_of(&self, record: &Record) -> Option<Entity> {
        match self.target {
            Target::Fixed(entity) => Some(entity),
            Target::Related => record
                .get("related_type")
                .and_then(Value::as_str)
                .and_then(RelatedType::parse)
                .and_then(RelatedType::entity),
        }
    }

    pub fn points_to(&self, entity: Entity) -> bool {
        match self.target {
            Target::Fixed(target) => target == entity,
            Target::Related => RelatedType::for_entity(entity).is_some(),
        }
    }

    /// Extra predicate and bind narrowing a polymorphic reference to `entity`.
    fn kind_filter(&self, entity: Entity) -> Option<&'static str> {
        match self.target {
            Target::Fixed(_) => None,
            Target::Related => RelatedType::for_entity(entity).map(RelatedType::as_str),
        }
    }
}

fn text<'a>(record: &'a Record, column: &str) -> Option<&'a str> {
    record.get(column).and_then(Value::as_str)
}

async fn exists_other(
    conn: &mut SqliteConnection,
    sql: &str,
    binds: &[&str],
) -> Result<bool, sqlx::Error> {
    let mut query = sqlx::query_scalar::<_, i64>(sql);
    for value in binds {
        query = query.bind(value.to_string());
    }
    Ok(query.fetch_optional(&mut *conn).await?.is_some())
}

/// Validate every reference held by `record`, the full row about to be stored.
pub async fn check_write(
    conn: &mut SqliteConnection,
    entity: Entity,
    record: &Record,
) -> LedgerResult<()> {
    let id = text(record, "id").unwrap_or_default();
    let owner = text(record, "user_id");

    for reference in REFERENCES.iter().filter(|r| r.from == entity) {
        let Some(target_id) = text(record, reference.column) else {
            continue;
        };
        let Some(target) = reference.target_of(record) else {
            continue;
        };
        let found = rows::fetch_row(conn, target, target_id).await?;
        let reason = match &found {
            None => Some("missing"),
            Some(row) if reference.same_owner && owner_of(target, row) != owner => {
                Some("owner_mismatch")
            }
            Some(_) => None,
        };
        if let Some(reason) = reason {
            info!(
                target: "bizledger",
                event = "reference_rejected",
                entity = entity.name(),
                column = reference.column,
                target_entity = target.name(),
                target_id,
                reason,
            );
            return Err(LedgerError::integrity(
                REFERENCE_INVALID,
                format!("{entity}.{} references an unknown {target}", reference.column),
            ));
        }
    }

    match entity {
        Entity::Shipment => {
            if let Some(sale_id) = text(record, "sale_id") {
                if exists_other(
                    conn,
                    "SELECT 1 FROM shipments WHERE sale_id = ? AND id <> ? LIMIT 1",
                    &[sale_id, id],
                )
                .await?
                {
                    return Err(LedgerError::integrity(
                        SALE_ALREADY_SHIPPED,
                        "Sale already has a shipment",
                    ));
                }
            }
        }
        Entity::PostReaction => {
            if let (Some(post_id), Some(user_id), Some(kind)) = (
                text(record, "post_id"),
                text(record, "user_id"),
                text(record, "type"),
            ) {
                if exists_other(
                    conn,
                    "SELECT 1 FROM post_reactions WHERE post_id = ? AND user_id = ? AND type = ? AND id <> ? LIMIT 1",
                    &[post_id, user_id, kind, id],
                )
                .await?
                {
                    return Err(LedgerError::integrity(
                        DUPLICATE,
                        format!("{kind} reaction already recorded for this post"),
                    ));
                }
            }
        }
        Entity::User => {
            if let Some(email) = text(record, "email") {
                if exists_other(
                    conn,
                    "SELECT 1 FROM users WHERE email = ? AND id <> ? LIMIT 1",
                    &[email, id],
                )
                .await?
                {
                    return Err(LedgerError::integrity(
                        DUPLICATE,
                        "a user with this email already exists",
                    ));
                }
            }
        }
        _ => {}
    }
    Ok(())
}

async fn dependent_ids(
    conn: &mut SqliteConnection,
    reference: &Reference,
    entity: Entity,
    id: &str,
) -> Result<Vec<String>, sqlx::Error> {
    let table = reference.from.table();
    let column = reference.column;
    match reference.kind_filter(entity) {
        Some(kind) => {
            sqlx::query_scalar(&format!(
                "SELECT id FROM {table} WHERE {column} = ? AND related_type = ? ORDER BY id"
            ))
            .bind(id)
            .bind(kind)
            .fetch_all(&mut *conn)
            .await
        }
        None => {
            sqlx::query_scalar(&format!(
                "SELECT id FROM {table} WHERE {column} = ? ORDER BY id"
            ))
            .bind(id)
            .fetch_all(&mut *conn)
            .await
        }
    }
}

/// Changing the owner of a row that same-owner references point at would
/// leave those references crossing users.
pub async fn check_owner_change(
    conn: &mut SqliteConnection,
    entity: Entity,
    previous: &Record,
    merged: &Record,
) -> LedgerResult<()> {
    if owner_of(entity, previous) == owner_of(entity, merged) {
        return Ok(());
    }
    let id = text(previous, "id").unwrap_or_default();
    for reference in REFERENCES
        .iter()
        .filter(|r| r.same_owner && r.points_to(entity))
    {
        if !dependent_ids(conn, reference, entity, id).await?.is_empty() {
            return Err(LedgerError::integrity(
                OWNER_CHANGE_BLOCKED,
                format!(
                    "{entity} has dependent {} rows; detach them before changing its owner",
                    reference.from
                ),
            ));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeleteEffects {
    /// Rows whose reference was cleared.
    pub detached: u64,
    /// Dependent rows deleted along with the target.
    pub removed: u64,
}

impl std::ops::AddAssign for DeleteEffects {
    fn add_assign(&mut self, other: Self) {
        self.detached += other.detached;
        self.removed += other.removed;
    }
}

/// Detach or delete everything that references `entity`/`id`, depth first.
/// Runs on the caller's transaction; the target row itself is left in place.
pub fn release_dependents<'a>(
    conn: &'a mut SqliteConnection,
    entity: Entity,
    id: &'a str,
) -> BoxFuture<'a, Result<DeleteEffects, sqlx::Error>> {
    async move {
        let mut effects = DeleteEffects::default();
        for reference in REFERENCES.iter().filter(|r| r.points_to(entity)) {
            let table = reference.from.table();
            let column = reference.column;
            match reference.on_delete {
                OnDelete::Detach => {
                    let res = match reference.kind_filter(entity) {
                        Some(kind) => {
                            sqlx::query(&format!(
                                "UPDATE {table} SET {column} = NULL, related_type = NULL, updated_at = ? \
                                 WHERE {column} = ? AND related_type = ?"
                            ))
                            .bind(now_iso())
                            .bind(id)
                            .bind(kind)
                            .execute(&mut *conn)
                            .await?
                        }
                        None => {
                            sqlx::query(&format!(
                                "UPDATE {table} SET {column} = NULL, updated_at = ? WHERE {column} = ?"
                            ))
                            .bind(now_iso())
                            .bind(id)
                            .execute(&mut *conn)
                            .await?
                        }
                    };
                    effects.detached += res.rows_affected();
                }
                OnDelete::Cascade => {
                    for child in dependent_ids(conn, reference, entity, id).await? {
                        effects += release_dependents(&mut *conn, reference.from, &child).await?;
                        effects.removed += rows::delete_row(conn, reference.from, &child).await?;
                    }
                }
            }
        }
        if effects != DeleteEffects::default() {
            info!(
                target: "bizledger",
                event = "dependents_released",
                entity = %entity,
                id,
                detached = effects.detached,
                removed = effects.removed
            );
        }
        Ok(effects)
    }
    .boxed()
}
