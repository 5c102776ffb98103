use std::sync::Arc;

use sqlx::SqlitePool;
use tracing::{error, info};

use crate::config::Config;
use crate::db;
use crate::gateway::{DetachedIdentityGateway, IdentityGateway};
use crate::migrate::{self, SchemaReport};

/// Everything a ledger operation needs. Cheap to clone; passed explicitly.
#[derive(Clone)]
pub struct LedgerContext {
    pool: SqlitePool,
    identity: Arc<dyn IdentityGateway>,
    production: bool,
}

impl LedgerContext {
    pub fn new(pool: SqlitePool, identity: Arc<dyn IdentityGateway>) -> Self {
        LedgerContext {
            pool,
            identity,
            production: false,
        }
    }

    /// A context with no identity provider attached.
    pub fn detached(pool: SqlitePool) -> Self {
        LedgerContext::new(pool, Arc::new(DetachedIdentityGateway))
    }

    pub fn with_production(mut self, production: bool) -> Self {
        self.production = production;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn identity(&self) -> &dyn IdentityGateway {
        self.identity.as_ref()
    }

    pub fn production(&self) -> bool {
        self.production
    }
}

/// Open the configured database and bring its schema up to date. A schema
/// failure is returned as an error; callers treat it as fatal.
pub async fn bootstrap(
    config: &Config,
    identity: Arc<dyn IdentityGateway>,
) -> anyhow::Result<(LedgerContext, SchemaReport)> {
    let pool = db::open_sqlite_pool(&config.db_path).await?;
    let report = match migrate::ensure_schema(&pool).await {
        Ok(report) => report,
        Err(err) => {
            error!(target: "bizledger", event = "schema_startup_failed", error = %err);
            return Err(anyhow::Error::new(err).context("schema migration failed at startup"));
        }
    };
    info!(
        target: "bizledger",
        event = "ledger_ready",
        production = config.production,
        applied = report.applied.len()
    );
    let ctx = LedgerContext::new(pool, identity).with_production(config.production);
    Ok((ctx, report))
}
