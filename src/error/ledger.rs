use thiserror::Error;

use super::AppError;
use crate::entity::Entity;
use crate::policy::Operation;

pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

/// Failures raised by the schema manager, repository, ledger engine and policy engine.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("invalid {entity} payload: {}", .issues.join("; "))]
    Validation { entity: Entity, issues: Vec<String> },
    #[error("{entity} not found")]
    NotFound { entity: Entity, id: String },
    #[error("{operation} on {entity} is not permitted")]
    Forbidden { entity: Entity, operation: Operation },
    #[error("{message}")]
    Integrity { code: &'static str, message: String },
    #[error("identity provider call failed: {message}")]
    Dependency { message: String },
    #[error("migration {migration} failed: {reason}")]
    Schema {
        migration: String,
        ddl: Option<String>,
        reason: String,
    },
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Decode(#[from] serde_json::Error),
}

impl LedgerError {
    pub fn validation(entity: Entity, issues: Vec<String>) -> Self {
        LedgerError::Validation { entity, issues }
    }

    pub fn not_found(entity: Entity, id: impl Into<String>) -> Self {
        LedgerError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn integrity(code: &'static str, message: impl Into<String>) -> Self {
        LedgerError::Integrity {
            code,
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, LedgerError::NotFound { .. })
    }
}

impl From<LedgerError> for AppError {
    fn from(error: LedgerError) -> Self {
        let message = error.to_string();
        match error {
            LedgerError::Validation { entity, issues } => {
                AppError::new(AppError::VALIDATION_CODE, message)
                    .with_context("entity", entity.name())
                    .with_context("issues", issues.join("; "))
            }
            LedgerError::NotFound { entity, id } => AppError::new(AppError::NOT_FOUND_CODE, message)
                .with_context("entity", entity.name())
                .with_context("id", id),
            LedgerError::Forbidden { entity, operation } => {
                AppError::new(AppError::FORBIDDEN_CODE, message)
                    .with_context("entity", entity.name())
                    .with_context("operation", operation.to_string())
            }
            LedgerError::Integrity { code, .. } => AppError::new(code, message),
            LedgerError::Dependency { .. } => AppError::new(AppError::DEPENDENCY_CODE, message),
            LedgerError::Schema { migration, ddl, .. } => {
                let error =
                    AppError::new(AppError::SCHEMA_CODE, message).with_context("migration", migration);
                match ddl {
                    Some(ddl) => error.with_context("ddl", ddl),
                    None => error,
                }
            }
            LedgerError::Database(err) => AppError::from(err),
            LedgerError::Decode(_) => AppError::new(AppError::DECODE_CODE, message),
        }
    }
}
