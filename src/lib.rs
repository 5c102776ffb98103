//! Ledger core for small-business operations: schema management, validated
//! CRUD, relational integrity, repairs and row-ownership policy.

pub mod config;
pub mod db;
pub mod entity;
pub mod error;
pub mod gateway;
pub mod id;
pub mod ledger;
pub mod logging;
pub mod migrate;
pub mod model;
pub mod policy;
pub mod repo;
pub mod schema;
pub mod service;
pub mod state;
pub mod time;

pub use config::Config;
pub use entity::{Entity, WeakRef};
pub use error::{AppError, AppResult, ErrorResponse, LedgerError, LedgerResult};
pub use gateway::{DetachedIdentityGateway, GatewayError, IdentityGateway};
pub use migrate::{ensure_schema, SchemaReport};
pub use policy::{Actor, Operation};
pub use repo::{ListFilter, Record};
pub use state::LedgerContext;
