#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use std::sync::{Arc, Mutex};

use bizledger_lib::gateway::{GatewayError, IdentityGateway};
use bizledger_lib::migrate::ensure_schema;
use bizledger_lib::model::Role;
use bizledger_lib::policy::Actor;
use bizledger_lib::{repo, Entity, LedgerContext};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{Map, Value};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

pub async fn temp_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("connect sqlite::memory:");
    sqlx::query("PRAGMA foreign_keys=ON;")
        .execute(&pool)
        .await
        .unwrap();
    pool
}

pub async fn migrated_pool() -> SqlitePool {
    let pool = temp_pool().await;
    ensure_schema(&pool).await.expect("ensure schema");
    pool
}

pub async fn ledger() -> LedgerContext {
    LedgerContext::detached(migrated_pool().await)
}

pub async fn ledger_with(gateway: Arc<dyn IdentityGateway>) -> LedgerContext {
    LedgerContext::new(migrated_pool().await, gateway)
}

pub fn payload(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("payload must be an object, got {other}"),
    }
}

pub fn id_of(record: &Map<String, Value>) -> String {
    record["id"].as_str().expect("id").to_string()
}

/// Insert a user straight through the repository and return its id.
pub async fn seed_user(ctx: &LedgerContext, email: &str) -> String {
    let user = repo::create(ctx, Entity::User, payload(serde_json::json!({ "email": email })))
        .await
        .expect("seed user");
    id_of(&user)
}

pub async fn seed_admin(ctx: &LedgerContext, email: &str) -> Actor {
    let user = repo::create(
        ctx,
        Entity::User,
        payload(serde_json::json!({ "email": email, "role": "ADMIN" })),
    )
    .await
    .expect("seed admin");
    Actor {
        user_id: id_of(&user),
        role: Role::Admin,
    }
}

pub async fn count(pool: &SqlitePool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(pool)
        .await
        .unwrap()
}

pub async fn count_owned(pool: &SqlitePool, table: &str, user_id: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table} WHERE user_id = ?1"))
        .bind(user_id)
        .fetch_one(pool)
        .await
        .unwrap()
}

/// Identity provider double that answers from a script and records calls.
#[derive(Default)]
pub struct ScriptedGateway {
    pub delete_result: Mutex<Option<GatewayError>>,
    pub invite_result: Mutex<Option<GatewayError>>,
    pub calls: Mutex<Vec<String>>,
}

impl ScriptedGateway {
    pub fn failing_deletes(message: &str) -> Arc<Self> {
        let gateway = ScriptedGateway::default();
        *gateway.delete_result.lock().unwrap() = Some(GatewayError::Failed(message.into()));
        Arc::new(gateway)
    }

    pub fn failing_invites(message: &str) -> Arc<Self> {
        let gateway = ScriptedGateway::default();
        *gateway.invite_result.lock().unwrap() = Some(GatewayError::Failed(message.into()));
        Arc::new(gateway)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl IdentityGateway for ScriptedGateway {
    fn delete_user<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, Result<(), GatewayError>> {
        async move {
            self.calls.lock().unwrap().push(format!("delete:{user_id}"));
            match self.delete_result.lock().unwrap().clone() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }
        .boxed()
    }

    fn invite_user<'a>(
        &'a self,
        email: &'a str,
        _metadata: &'a Value,
    ) -> BoxFuture<'a, Result<String, GatewayError>> {
        async move {
            self.calls.lock().unwrap().push(format!("invite:{email}"));
            match self.invite_result.lock().unwrap().clone() {
                Some(err) => Err(err),
                None => Ok(format!("idp-{email}")),
            }
        }
        .boxed()
    }
}
