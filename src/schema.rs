//! Column catalog for every ledger table.
//!
//! The catalog is the single description of what a row may contain. The
//! repository validates payloads against it and [`reconcile_columns`] adds any
//! catalogued column a database is missing, so stores created by older builds
//! converge without destructive alteration.

use std::collections::HashSet;

use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::entity::Entity;
use crate::error::{LedgerError, LedgerResult};
use crate::model::{
    EARNING_STATUSES, REACTION_TYPES, RELATED_TYPES, ROLES, SHIPMENT_STATUSES,
    TRANSACTION_STATUSES, TRANSACTION_TYPES,
};

pub const CATALOG_MIGRATION: &str = "column_catalog";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Integer,
    Real,
    /// Boolean persisted as 0/1.
    Flag,
    /// ISO-8601 timestamp persisted as text.
    Timestamp,
    Choice(&'static [&'static str]),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub kind: ColumnKind,
    /// Must be present (and non-null) when a row is created.
    pub required: bool,
    /// Maintained by the ledger; callers may not write it.
    pub managed: bool,
    /// SQL literal used when the column is added to an existing table.
    pub default: Option<&'static str>,
}

impl Column {
    const fn new(name: &'static str, kind: ColumnKind) -> Self {
        Column {
            name,
            kind,
            required: false,
            managed: false,
            default: None,
        }
    }

    const fn text(name: &'static str) -> Self {
        Column::new(name, ColumnKind::Text)
    }

    const fn integer(name: &'static str) -> Self {
        Column::new(name, ColumnKind::Integer)
    }

    const fn real(name: &'static str) -> Self {
        Column::new(name, ColumnKind::Real)
    }

    const fn flag(name: &'static str) -> Self {
        Column::new(name, ColumnKind::Flag)
    }

    const fn timestamp(name: &'static str) -> Self {
        Column::new(name, ColumnKind::Timestamp)
    }

    const fn choice(name: &'static str, values: &'static [&'static str]) -> Self {
        Column::new(name, ColumnKind::Choice(values))
    }

    const fn required(self) -> Self {
        Column {
            required: true,
            ..self
        }
    }

    const fn managed(self) -> Self {
        Column {
            managed: true,
            ..self
        }
    }

    const fn default(self, literal: &'static str) -> Self {
        Column {
            default: Some(literal),
            ..self
        }
    }

    /// Whether NULL is an acceptable stored value.
    pub fn nullable(&self) -> bool {
        !self.required && self.default.is_none()
    }

    pub fn sql_type(&self) -> &'static str {
        match self.kind {
            ColumnKind::Integer | ColumnKind::Flag => "INTEGER",
            ColumnKind::Real => "REAL",
            ColumnKind::Text | ColumnKind::Timestamp | ColumnKind::Choice(_) => "TEXT",
        }
    }

    /// DDL that adds this column to `table`. Columns with a default are added as
    /// `NOT NULL DEFAULT …`; everything else is added nullable.
    pub fn add_column_ddl(&self, table: &str) -> String {
        match self.default {
            Some(default) => format!(
                "ALTER TABLE {table} ADD COLUMN {} {} NOT NULL DEFAULT {default}",
                self.name,
                self.sql_type()
            ),
            None => format!(
                "ALTER TABLE {table} ADD COLUMN {} {}",
                self.name,
                self.sql_type()
            ),
        }
    }
}

const ID: Column = Column::text("id");
const USER_ID: Column = Column::text("user_id").required();
const CREATED_AT: Column = Column::timestamp("created_at").managed();
const UPDATED_AT: Column = Column::timestamp("updated_at").managed();

static USERS: &[Column] = &[
    ID,
    Column::text("email").required(),
    Column::text("password_hash"),
    Column::text("name"),
    Column::text("plan").default("'FREE'"),
    Column::choice("role", ROLES).default("'USER'"),
    Column::flag("is_active").default("1"),
    Column::flag("is_public_profile").default("0"),
    Column::text("street"),
    Column::text("city"),
    Column::text("state"),
    Column::text("zip_code"),
    CREATED_AT,
    UPDATED_AT,
];

static COMPANIES: &[Column] = &[
    ID,
    USER_ID,
    Column::text("name").required(),
    Column::text("document"),
    CREATED_AT,
    UPDATED_AT,
];

static SALES: &[Column] = &[
    ID,
    USER_ID,
    Column::text("customer_name").required(),
    Column::text("customer_cpf"),
    Column::text("product_id"),
    Column::real("sale_price").required().default("0"),
    CREATED_AT,
    UPDATED_AT,
];

static SHIPMENTS: &[Column] = &[
    ID,
    USER_ID,
    Column::text("recipient_name").required(),
    Column::text("content_description"),
    Column::text("tracking_code"),
    Column::choice("status", SHIPMENT_STATUSES).default("'PENDING'"),
    Column::flag("label_generated").default("0"),
    Column::flag("declaration_generated").default("0"),
    Column::text("sale_id"),
    CREATED_AT,
    UPDATED_AT,
];

static FINANCIAL_TRANSACTIONS: &[Column] = &[
    ID,
    USER_ID,
    Column::text("description").required(),
    Column::timestamp("date").required(),
    Column::real("amount").required(),
    Column::choice("type", TRANSACTION_TYPES).required(),
    Column::text("category"),
    Column::choice("status", TRANSACTION_STATUSES).default("'PAID'"),
    Column::text("related_id"),
    Column::choice("related_type", RELATED_TYPES),
    CREATED_AT,
    UPDATED_AT,
];

static FINANCIAL_GOALS: &[Column] = &[
    ID,
    USER_ID,
    Column::text("name").required(),
    Column::real("target_amount").required(),
    Column::real("current_amount").default("0"),
    Column::timestamp("deadline"),
    CREATED_AT,
    UPDATED_AT,
];

static RECURRING_EXPENSES: &[Column] = &[
    ID,
    USER_ID,
    Column::text("description").required(),
    Column::real("amount").required(),
    Column::text("category"),
    Column::integer("day_of_month").default("1"),
    Column::flag("is_active").default("1"),
    CREATED_AT,
    UPDATED_AT,
];

static AFFILIATE_PLATFORMS: &[Column] = &[
    ID,
    USER_ID,
    Column::text("name").required(),
    Column::real("commission_rate"),
    CREATED_AT,
    UPDATED_AT,
];

static AFFILIATE_EARNINGS: &[Column] = &[
    ID,
    USER_ID,
    Column::text("platform_id").required(),
    Column::real("amount").required(),
    Column::timestamp("date").required(),
    Column::text("description"),
    Column::choice("status", EARNING_STATUSES).default("'PENDING'"),
    CREATED_AT,
    UPDATED_AT,
];

static COMMUNITY_POSTS: &[Column] = &[
    ID,
    USER_ID,
    Column::text("content").required(),
    Column::text("image_url"),
    Column::integer("likes_count").managed().default("0"),
    Column::integer("hypes_count").managed().default("0"),
    Column::integer("comments_count").managed().default("0"),
    CREATED_AT,
    UPDATED_AT,
];

static POST_REACTIONS: &[Column] = &[
    ID,
    Column::text("post_id").required(),
    USER_ID,
    Column::choice("type", REACTION_TYPES).required(),
    CREATED_AT,
    UPDATED_AT,
];

static POST_COMMENTS: &[Column] = &[
    ID,
    Column::text("post_id").required(),
    USER_ID,
    Column::text("content").required(),
    CREATED_AT,
    UPDATED_AT,
];

pub fn columns(entity: Entity) -> &'static [Column] {
    match entity {
        Entity::User => USERS,
        Entity::Company => COMPANIES,
        Entity::Sale => SALES,
        Entity::Shipment => SHIPMENTS,
        Entity::FinancialTransaction => FINANCIAL_TRANSACTIONS,
        Entity::FinancialGoal => FINANCIAL_GOALS,
        Entity::RecurringExpense => RECURRING_EXPENSES,
        Entity::AffiliatePlatform => AFFILIATE_PLATFORMS,
        Entity::AffiliateEarning => AFFILIATE_EARNINGS,
        Entity::CommunityPost => COMMUNITY_POSTS,
        Entity::PostReaction => POST_REACTIONS,
        Entity::PostComment => POST_COMMENTS,
    }
}

fn is_duplicate_column(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.message().contains("duplicate column name"))
}

fn catalog_error(ddl: Option<String>, err: impl ToString) -> LedgerError {
    LedgerError::Schema {
        migration: CATALOG_MIGRATION.to_string(),
        ddl,
        reason: err.to_string(),
    }
}

/// Add every catalogued column missing from its table. Never drops or renames.
/// Returns the `table.column` names that were added.
pub async fn reconcile_columns(pool: &SqlitePool) -> LedgerResult<Vec<String>> {
    let mut added = Vec::new();
    for entity in Entity::ALL {
        let table = entity.table();
        let existing: HashSet<String> =
            sqlx::query_scalar::<_, String>("SELECT name FROM pragma_table_info(?1)")
                .bind(table)
                .fetch_all(pool)
                .await
                .map_err(|err| catalog_error(None, err))?
                .into_iter()
                .collect();
        if existing.is_empty() {
            return Err(catalog_error(None, format!("table {table} is missing")));
        }

        for column in entity.columns() {
            if existing.contains(column.name) {
                continue;
            }
            let ddl = column.add_column_ddl(table);
            match sqlx::query(&ddl).execute(pool).await {
                Ok(_) => {
                    info!(target: "bizledger", event = "schema_column_added", table, column = column.name);
                    added.push(format!("{table}.{}", column.name));
                }
                Err(err) if is_duplicate_column(&err) => {
                    debug!(target: "bizledger", event = "schema_column_present", table, column = column.name);
                }
                Err(err) => return Err(catalog_error(Some(ddl), err)),
            }
        }
    }
    Ok(added)
}
