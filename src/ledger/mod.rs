//! Relational guarantees the store itself does not enforce.

pub mod audit;
pub mod cascade;
pub mod counters;
pub mod integrity;
pub mod repair;

pub use audit::{run_audit, AuditReport, AuditStatus};
pub use cascade::{delete_user, CascadeOutcome, CascadeStep, Phase};
pub use counters::recount_posts;
pub use integrity::DeleteEffects;
pub use repair::{repair_field_swap, RepairReport};
