//! The core boundary: authorize, then hand off to the repository and ledger.
//!
//! Every function returns [`AppResult`] so the routing layer can pass the
//! result straight to [`crate::error::response::render`].

use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{error, info};

use crate::entity::Entity;
use crate::error::{AppError, AppResult, LedgerError, LedgerResult};
use crate::gateway::GatewayError;
use crate::ledger::{self, RepairReport};
use crate::model::{ReactionType, Role};
use crate::policy::{self, Actor, Decision, Operation};
use crate::repo::{self, DeleteOutcome, ListFilter, Record};
use crate::state::LedgerContext;

/// User columns only an admin may change.
const ADMIN_ONLY_USER_COLUMNS: [&str; 2] = ["role", "is_active"];

fn boundary(err: LedgerError, operation: &str, entity: Entity) -> AppError {
    AppError::from(err)
        .with_context("call", operation)
        .with_context("entity", entity.name())
}

fn redact(entity: Entity, mut record: Record) -> Record {
    if entity == Entity::User {
        record.remove("password_hash");
    }
    record
}

fn forbidden(entity: Entity, operation: Operation) -> LedgerError {
    LedgerError::Forbidden { entity, operation }
}

/// Load `id` if the actor may perform `operation` on it. A row the actor may
/// not touch is reported exactly like a missing one.
async fn visible(
    ctx: &LedgerContext,
    actor: &Actor,
    entity: Entity,
    id: &str,
    operation: Operation,
) -> LedgerResult<Record> {
    let row = repo::read(ctx, entity, id).await?;
    match policy::authorize(actor, entity, &row, operation) {
        Decision::Allow => Ok(row),
        Decision::Deny => Err(LedgerError::not_found(entity, id)),
    }
}

/// The acting user, looked up fresh. Unknown or deactivated users are forbidden.
pub async fn resolve_actor(ctx: &LedgerContext, user_id: &str) -> AppResult<Actor> {
    let user = match repo::read(ctx, Entity::User, user_id).await {
        Ok(user) => user,
        Err(err) if err.is_not_found() => {
            return Err(boundary(
                forbidden(Entity::User, Operation::Select),
                "resolve_actor",
                Entity::User,
            ))
        }
        Err(err) => return Err(boundary(err, "resolve_actor", Entity::User)),
    };
    if user.get("is_active").and_then(Value::as_bool) == Some(false) {
        return Err(boundary(
            forbidden(Entity::User, Operation::Select),
            "resolve_actor",
            Entity::User,
        ));
    }
    let role = user
        .get("role")
        .and_then(Value::as_str)
        .and_then(Role::parse)
        .unwrap_or_default();
    Ok(Actor {
        user_id: user_id.to_string(),
        role,
    })
}

async fn create_inner(
    ctx: &LedgerContext,
    actor: &Actor,
    entity: Entity,
    payload: Map<String, Value>,
) -> LedgerResult<Record> {
    let mut payload = repo::normalize_payload(entity, payload)?;
    if entity != Entity::User && !payload.contains_key("user_id") {
        payload.insert("user_id".into(), Value::String(actor.user_id.clone()));
    }
    policy::require(actor, entity, &payload, Operation::Insert)?;
    if entity == Entity::User && !actor.is_admin() {
        if let Some(column) = ADMIN_ONLY_USER_COLUMNS
            .iter()
            .find(|c| payload.contains_key(**c))
        {
            info!(target: "bizledger", event = "admin_column_rejected", column = *column);
            return Err(forbidden(entity, Operation::Insert));
        }
    }
    repo::create(ctx, entity, payload).await
}

/// Create a row owned by the actor. `user_id` defaults to the actor.
pub async fn create(
    ctx: &LedgerContext,
    actor: &Actor,
    entity: Entity,
    payload: Map<String, Value>,
) -> AppResult<Record> {
    create_inner(ctx, actor, entity, payload)
        .await
        .map(|r| redact(entity, r))
        .map_err(|e| boundary(e, "create", entity))
}

pub async fn get(
    ctx: &LedgerContext,
    actor: &Actor,
    entity: Entity,
    id: &str,
) -> AppResult<Record> {
    visible(ctx, actor, entity, id, Operation::Select)
        .await
        .map(|r| redact(entity, r))
        .map_err(|e| boundary(e, "get", entity))
}

/// Rows the actor may see: their own, everything for admins, plus public
/// profiles when listing users.
pub async fn list(
    ctx: &LedgerContext,
    actor: &Actor,
    entity: Entity,
    filter: &ListFilter,
) -> AppResult<Vec<Record>> {
    let scoped = filter.clone().scoped(policy::list_scope(actor, entity));
    repo::list(ctx, entity, &scoped)
        .await
        .map(|rows| rows.into_iter().map(|r| redact(entity, r)).collect())
        .map_err(|e| boundary(e, "list", entity))
}

async fn update_inner(
    ctx: &LedgerContext,
    actor: &Actor,
    entity: Entity,
    id: &str,
    patch: Map<String, Value>,
) -> LedgerResult<Record> {
    visible(ctx, actor, entity, id, Operation::Update).await?;
    let patch = repo::normalize_payload(entity, patch)?;
    if !actor.is_admin() {
        let reassigns = patch
            .get(entity.owner_column())
            .is_some_and(|owner| owner.as_str() != Some(actor.user_id.as_str()));
        let escalates = entity == Entity::User
            && ADMIN_ONLY_USER_COLUMNS
                .iter()
                .any(|c| patch.contains_key(*c));
        if reassigns || escalates {
            return Err(forbidden(entity, Operation::Update));
        }
    }
    repo::update(ctx, entity, id, patch).await
}

pub async fn update(
    ctx: &LedgerContext,
    actor: &Actor,
    entity: Entity,
    id: &str,
    patch: Map<String, Value>,
) -> AppResult<Record> {
    update_inner(ctx, actor, entity, id, patch)
        .await
        .map(|r| redact(entity, r))
        .map_err(|e| boundary(e, "update", entity))
}

async fn delete_inner(
    ctx: &LedgerContext,
    actor: &Actor,
    entity: Entity,
    id: &str,
) -> LedgerResult<DeleteOutcome> {
    visible(ctx, actor, entity, id, Operation::Delete).await?;
    repo::delete(ctx, entity, id).await
}

/// Deleting a user (yourself, or anyone as admin) runs the account cascade.
pub async fn delete(
    ctx: &LedgerContext,
    actor: &Actor,
    entity: Entity,
    id: &str,
) -> AppResult<DeleteOutcome> {
    delete_inner(ctx, actor, entity, id)
        .await
        .map_err(|e| boundary(e, "delete", entity))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReactionToggle {
    pub post_id: String,
    #[serde(rename = "type")]
    pub kind: ReactionType,
    /// Whether the reaction exists after the toggle.
    pub active: bool,
}

async fn toggle_reaction_inner(
    ctx: &LedgerContext,
    actor: &Actor,
    post_id: &str,
    kind: ReactionType,
) -> LedgerResult<ReactionToggle> {
    repo::read(ctx, Entity::CommunityPost, post_id).await?;
    let filter = ListFilter::new()
        .eq("post_id", post_id)
        .eq("user_id", actor.user_id.as_str())
        .eq("type", kind.as_str());
    let existing = repo::list(ctx, Entity::PostReaction, &filter).await?;
    let active = match existing.first().and_then(|r| r.get("id")).and_then(Value::as_str) {
        Some(reaction_id) => {
            repo::delete(ctx, Entity::PostReaction, reaction_id).await?;
            false
        }
        None => {
            let mut payload = Map::new();
            payload.insert("post_id".into(), Value::String(post_id.to_string()));
            payload.insert("user_id".into(), Value::String(actor.user_id.clone()));
            payload.insert("type".into(), Value::String(kind.as_str().to_string()));
            repo::create(ctx, Entity::PostReaction, payload).await?;
            true
        }
    };
    Ok(ReactionToggle {
        post_id: post_id.to_string(),
        kind,
        active,
    })
}

/// Add the actor's reaction to a post, or remove it if already present.
pub async fn toggle_reaction(
    ctx: &LedgerContext,
    actor: &Actor,
    post_id: &str,
    kind: ReactionType,
) -> AppResult<ReactionToggle> {
    toggle_reaction_inner(ctx, actor, post_id, kind)
        .await
        .map_err(|e| boundary(e, "toggle_reaction", Entity::PostReaction))
}

async fn invite_user_inner(
    ctx: &LedgerContext,
    actor: &Actor,
    email: &str,
    plan: Option<&str>,
) -> LedgerResult<Record> {
    if !actor.is_admin() {
        return Err(forbidden(Entity::User, Operation::Insert));
    }
    let plan = plan.unwrap_or("FREE");
    let metadata = json!({ "plan": plan, "invited_by": actor.user_id });
    let identity_id = match ctx.identity().invite_user(email, &metadata).await {
        Ok(id) => id,
        // An invite has no "already absent" success case.
        Err(err @ (GatewayError::Failed(_) | GatewayError::AlreadyAbsent)) => {
            error!(target: "bizledger", event = "identity_invite_failed", email, error = %err);
            return Err(LedgerError::Dependency {
                message: err.to_string(),
            });
        }
    };
    let mut payload = Map::new();
    payload.insert("id".into(), Value::String(identity_id));
    payload.insert("email".into(), Value::String(email.to_string()));
    payload.insert("plan".into(), Value::String(plan.to_string()));
    repo::create(ctx, Entity::User, payload).await
}

/// Admin only: register the email at the identity provider, then create the
/// local user with the provider's id.
pub async fn invite_user(
    ctx: &LedgerContext,
    actor: &Actor,
    email: &str,
    plan: Option<&str>,
) -> AppResult<Record> {
    invite_user_inner(ctx, actor, email, plan)
        .await
        .map(|r| redact(Entity::User, r))
        .map_err(|e| boundary(e, "invite_user", Entity::User))
}

/// Admin only.
pub async fn repair_field_swap(
    ctx: &LedgerContext,
    actor: &Actor,
    dry_run: bool,
) -> AppResult<RepairReport> {
    let entity = Entity::FinancialTransaction;
    if !actor.is_admin() {
        return Err(boundary(
            forbidden(entity, Operation::Update),
            "repair_field_swap",
            entity,
        ));
    }
    ledger::repair_field_swap(ctx.pool(), dry_run)
        .await
        .map_err(|e| boundary(e, "repair_field_swap", entity))
}

/// Admin only.
pub async fn recount_posts(ctx: &LedgerContext, actor: &Actor) -> AppResult<u64> {
    let entity = Entity::CommunityPost;
    if !actor.is_admin() {
        return Err(boundary(
            forbidden(entity, Operation::Update),
            "recount_posts",
            entity,
        ));
    }
    ledger::recount_posts(ctx.pool())
        .await
        .map_err(|e| boundary(e, "recount_posts", entity))
}
