//! Generic CRUD over every ledger table, with validation on the way in and
//! ledger checks inside the same transaction as the write.

pub mod rows;
mod typed;
pub mod validate;

use futures::FutureExt;
use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::SqliteConnection;
use tracing::info;

use crate::db::run_in_tx;
use crate::entity::Entity;
use crate::error::{LedgerError, LedgerResult};
use crate::ledger::cascade::{self, CascadeOutcome};
use crate::ledger::integrity::{self, DeleteEffects};
use crate::ledger::counters;
use crate::policy::Scope;
use crate::state::LedgerContext;
use crate::time::now_iso;

pub use rows::Record;
pub use typed::*;
pub use validate::{normalize_key, normalize_payload};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListFilter {
    /// Equality predicates; a JSON null matches `IS NULL`.
    pub eq: Vec<(String, Value)>,
    pub scope: Option<Scope>,
    pub order_by: Option<String>,
    pub descending: bool,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl ListFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.eq.push((column.into(), value.into()));
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, descending: bool) -> Self {
        self.order_by = Some(column.into());
        self.descending = descending;
        self
    }

    pub fn page(mut self, limit: Option<i64>, offset: Option<i64>) -> Self {
        self.limit = limit;
        self.offset = offset;
        self
    }

    pub fn scoped(mut self, scope: Option<Scope>) -> Self {
        self.scope = scope;
        self
    }

    fn checked(&self, entity: Entity) -> LedgerResult<ListFilter> {
        let mut issues = Vec::new();
        let mut checked = ListFilter {
            scope: self.scope.clone(),
            descending: self.descending,
            limit: self.limit,
            offset: self.offset,
            ..ListFilter::default()
        };
        for (key, value) in &self.eq {
            let name = normalize_key(key);
            match entity.column(&name) {
                Some(column) => checked.eq.push((column.name.to_string(), value.clone())),
                None => issues.push(format!("unknown filter column {key}")),
            }
        }
        if let Some(order) = &self.order_by {
            match entity.column(&normalize_key(order)) {
                Some(column) => checked.order_by = Some(column.name.to_string()),
                None => issues.push(format!("unknown order column {order}")),
            }
        }
        if self.limit.is_some_and(|l| l < 0) || self.offset.is_some_and(|o| o < 0) {
            issues.push("limit and offset must not be negative".to_string());
        }
        if issues.is_empty() {
            Ok(checked)
        } else {
            Err(LedgerError::validation(entity, issues))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeleteOutcome {
    Row {
        entity: Entity,
        id: String,
        effects: DeleteEffects,
    },
    User(CascadeOutcome),
}

async fn fetch_required(
    conn: &mut SqliteConnection,
    entity: Entity,
    id: &str,
) -> LedgerResult<Record> {
    rows::fetch_row(conn, entity, id)
        .await?
        .ok_or_else(|| LedgerError::not_found(entity, id))
}

pub async fn create(
    ctx: &LedgerContext,
    entity: Entity,
    payload: Map<String, Value>,
) -> LedgerResult<Record> {
    let record = validate::prepare_create(entity, payload)?;
    let id = record
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let stored = run_in_tx(ctx.pool(), move |conn| {
        async move {
            integrity::check_write(conn, entity, &record).await?;
            rows::insert_row(conn, entity, &record).await?;
            counters::refresh_parent(conn, entity, &record).await?;
            fetch_required(conn, entity, &id).await
        }
        .boxed()
    })
    .await?;
    info!(target: "bizledger", event = "row_created", entity = %entity, id = ?stored.get("id"));
    Ok(stored)
}

pub async fn read(ctx: &LedgerContext, entity: Entity, id: &str) -> LedgerResult<Record> {
    let mut conn = ctx.pool().acquire().await?;
    fetch_required(&mut conn, entity, id).await
}

/// Matching rows, possibly none. Never fails with not-found.
pub async fn list(
    ctx: &LedgerContext,
    entity: Entity,
    filter: &ListFilter,
) -> LedgerResult<Vec<Record>> {
    let filter = filter.checked(entity)?;
    let mut conn = ctx.pool().acquire().await?;
    Ok(rows::select_rows(&mut conn, entity, &filter).await?)
}

/// Partial update. Fields absent from `patch` keep their stored values.
pub async fn update(
    ctx: &LedgerContext,
    entity: Entity,
    id: &str,
    patch: Map<String, Value>,
) -> LedgerResult<Record> {
    let mut changes = validate::prepare_patch(entity, id, patch)?;
    changes.insert("updated_at".into(), Value::String(now_iso()));
    let id = id.to_string();
    let stored = run_in_tx(ctx.pool(), move |conn| {
        async move {
            let previous = fetch_required(conn, entity, &id).await?;
            let mut merged = previous.clone();
            for (column, value) in &changes {
                merged.insert(column.clone(), value.clone());
            }
            let issues = validate::check_rules(entity, &merged);
            if !issues.is_empty() {
                return Err(LedgerError::validation(entity, issues));
            }
            integrity::check_write(conn, entity, &merged).await?;
            integrity::check_owner_change(conn, entity, &previous, &merged).await?;
            rows::update_row(conn, entity, &id, &changes).await?;
            counters::refresh_parent(conn, entity, &previous).await?;
            counters::refresh_parent(conn, entity, &merged).await?;
            fetch_required(conn, entity, &id).await
        }
        .boxed()
    })
    .await?;
    info!(target: "bizledger", event = "row_updated", entity = %entity, id = ?stored.get("id"));
    Ok(stored)
}

/// Delete one row. Users go through the account cascade; every other entity
/// detaches or removes its dependents in the same transaction.
pub async fn delete(ctx: &LedgerContext, entity: Entity, id: &str) -> LedgerResult<DeleteOutcome> {
    if entity == Entity::User {
        return cascade::delete_user(ctx, id).await.map(DeleteOutcome::User);
    }
    let owned_id = id.to_string();
    let effects = run_in_tx(ctx.pool(), move |conn| {
        async move {
            let existing = fetch_required(conn, entity, &owned_id).await?;
            let effects = integrity::release_dependents(conn, entity, &owned_id).await?;
            rows::delete_row(conn, entity, &owned_id).await?;
            counters::refresh_parent(conn, entity, &existing).await?;
            Ok::<_, LedgerError>(effects)
        }
        .boxed()
    })
    .await?;
    info!(
        target: "bizledger",
        event = "row_deleted",
        entity = %entity,
        id,
        detached = effects.detached,
        removed = effects.removed
    );
    Ok(DeleteOutcome::Row {
        entity,
        id: id.to_string(),
        effects,
    })
}
