//! Row-ownership authorization.
//!
//! A row is visible and mutable only to the user named by its owner column,
//! to admins, and (read-only) to anyone when it is a public user profile.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::entity::Entity;
use crate::error::{LedgerError, LedgerResult};
use crate::model::Role;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: String,
    pub role: Role,
}

impl Actor {
    pub fn user(user_id: impl Into<String>) -> Self {
        Actor {
            user_id: user_id.into(),
            role: Role::User,
        }
    }

    pub fn admin(user_id: impl Into<String>) -> Self {
        Actor {
            user_id: user_id.into(),
            role: Role::Admin,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    Select,
    Insert,
    Update,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Select => "SELECT",
            Operation::Insert => "INSERT",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

pub fn owner_of(entity: Entity, row: &Map<String, Value>) -> Option<&str> {
    row.get(entity.owner_column()).and_then(Value::as_str)
}

fn is_set(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_i64() == Some(1),
        _ => false,
    }
}

pub fn authorize(
    actor: &Actor,
    entity: Entity,
    row: &Map<String, Value>,
    operation: Operation,
) -> Decision {
    if actor.is_admin() {
        return Decision::Allow;
    }
    if owner_of(entity, row) == Some(actor.user_id.as_str()) {
        return Decision::Allow;
    }
    if entity == Entity::User
        && operation == Operation::Select
        && is_set(row.get("is_public_profile"))
    {
        return Decision::Allow;
    }
    debug!(
        target: "bizledger",
        event = "policy_deny",
        entity = %entity,
        operation = %operation,
        actor = %actor.user_id
    );
    Decision::Deny
}

/// Row set a non-admin actor may list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    Owner(String),
    /// Own row plus every public profile. Users only.
    OwnerOrPublic(String),
}

/// `None` means unrestricted.
pub fn list_scope(actor: &Actor, entity: Entity) -> Option<Scope> {
    if actor.is_admin() {
        None
    } else if entity == Entity::User {
        Some(Scope::OwnerOrPublic(actor.user_id.clone()))
    } else {
        Some(Scope::Owner(actor.user_id.clone()))
    }
}

/// [`authorize`], turning a deny into [`LedgerError::Forbidden`].
pub fn require(
    actor: &Actor,
    entity: Entity,
    row: &Map<String, Value>,
    operation: Operation,
) -> LedgerResult<()> {
    match authorize(actor, entity, row, operation) {
        Decision::Allow => Ok(()),
        Decision::Deny => Err(LedgerError::Forbidden { entity, operation }),
    }
}
