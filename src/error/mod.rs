use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::error::ErrorKind;
use sqlx::Error as SqlxError;

mod ledger;
pub mod response;

pub use ledger::{LedgerError, LedgerResult};
pub use response::ErrorResponse;

use crate::ledger::integrity::DUPLICATE;

/// A structured error surfaced at the core boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppError {
    /// Machine readable error code.
    pub code: String,
    /// Human friendly message that can be shown directly to the caller.
    pub message: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, String>,
    /// Lower-level failure this one wraps, when the driver reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<AppError>>,
}

pub type AppResult<T> = std::result::Result<T, AppError>;

impl AppError {
    pub const VALIDATION_CODE: &'static str = "VALIDATION/INVALID";
    pub const NOT_FOUND_CODE: &'static str = "NOT_FOUND";
    pub const FORBIDDEN_CODE: &'static str = "FORBIDDEN";
    pub const DEPENDENCY_CODE: &'static str = "DEPENDENCY/IDENTITY";
    pub const SCHEMA_CODE: &'static str = "SCHEMA/MIGRATION";
    pub const CONSTRAINT_CODE: &'static str = "INTEGRITY/CONSTRAINT";
    pub const DECODE_CODE: &'static str = "SQLX/DECODE";
    pub const STORAGE_CODE: &'static str = "SQLX/DATABASE";

    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        AppError {
            code: code.into(),
            message: message.into(),
            context: HashMap::new(),
            cause: None,
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> &HashMap<String, String> {
        &self.context
    }

    pub fn cause(&self) -> Option<&AppError> {
        self.cause.as_deref()
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// HTTP status the routing layer should answer with.
    ///
    /// Anything without a recognised caller-side code is treated as unexpected.
    pub fn http_status(&self) -> u16 {
        let code = self.code.as_str();
        if code.starts_with("VALIDATION") {
            400
        } else if code == Self::FORBIDDEN_CODE {
            403
        } else if code == Self::NOT_FOUND_CODE {
            404
        } else if code.starts_with("INTEGRITY") {
            409
        } else if code.starts_with("DEPENDENCY") {
            502
        } else {
            500
        }
    }

    /// Whether the failure was caused by the caller rather than the system.
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.http_status())
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.context.is_empty() {
            write!(f, "[{}] {}", self.code, self.message)
        } else {
            write!(f, "[{}] {} ({:?})", self.code, self.message, self.context)
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

impl From<SqlxError> for AppError {
    /// Constraint violations are caller conflicts; every other storage failure
    /// is unexpected and keeps an `SQLX/` code.
    fn from(error: SqlxError) -> Self {
        match error {
            SqlxError::RowNotFound => AppError::new(Self::NOT_FOUND_CODE, "Record not found"),
            SqlxError::Database(db) => {
                let (code, message) = match db.kind() {
                    ErrorKind::UniqueViolation => (DUPLICATE, "record already exists".to_string()),
                    ErrorKind::ForeignKeyViolation
                    | ErrorKind::NotNullViolation
                    | ErrorKind::CheckViolation => {
                        (Self::CONSTRAINT_CODE, db.message().to_string())
                    }
                    _ => (Self::STORAGE_CODE, db.message().to_string()),
                };
                let mut app_error = AppError::new(code, message);
                if let Some(sqlite_code) = db.code() {
                    app_error = app_error.with_context("sqlite_code", sqlite_code.into_owned());
                }
                if let Some(constraint) = db.constraint() {
                    app_error = app_error.with_context("constraint", constraint);
                }
                app_error
            }
            SqlxError::PoolTimedOut => {
                AppError::new("SQLX/UNAVAILABLE", "Timed out waiting for a ledger connection")
            }
            SqlxError::PoolClosed => AppError::new("SQLX/UNAVAILABLE", "Ledger database is closed"),
            SqlxError::Io(io) => AppError {
                cause: Some(Box::new(AppError::new(
                    format!("IO/{:?}", io.kind()),
                    io.to_string(),
                ))),
                ..AppError::new("SQLX/IO", "Ledger database I/O failed")
            },
            SqlxError::ColumnDecode { index, source } => {
                AppError::new(Self::DECODE_CODE, source.to_string())
                    .with_context("column", index.to_string())
            }
            SqlxError::Decode(source) => AppError::new(Self::DECODE_CODE, source.to_string()),
            other => AppError::new(Self::STORAGE_CODE, other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::SqlitePool;

    async fn memory_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("connect sqlite::memory:");
        sqlx::query("CREATE TABLE companies (id TEXT PRIMARY KEY, name TEXT NOT NULL)")
            .execute(&pool)
            .await
            .unwrap();
        pool
    }

    #[test]
    fn http_status_follows_code_family() {
        assert_eq!(AppError::new(AppError::VALIDATION_CODE, "x").http_status(), 400);
        assert_eq!(AppError::new(AppError::FORBIDDEN_CODE, "x").http_status(), 403);
        assert_eq!(AppError::new(AppError::NOT_FOUND_CODE, "x").http_status(), 404);
        assert_eq!(
            AppError::new("INTEGRITY/REFERENCE_INVALID", "x").http_status(),
            409
        );
        assert_eq!(AppError::new(AppError::DEPENDENCY_CODE, "x").http_status(), 502);
        assert_eq!(AppError::new(AppError::STORAGE_CODE, "x").http_status(), 500);
        assert_eq!(AppError::new(AppError::SCHEMA_CODE, "x").http_status(), 500);
    }

    #[tokio::test]
    async fn unique_violation_is_a_duplicate_conflict() {
        let pool = memory_pool().await;
        let insert = "INSERT INTO companies (id, name) VALUES ('c1', 'Acme')";
        sqlx::query(insert).execute(&pool).await.unwrap();
        let err = sqlx::query(insert).execute(&pool).await.unwrap_err();

        let app_error = AppError::from(err);
        assert_eq!(app_error.code(), DUPLICATE);
        assert_eq!(app_error.message(), "record already exists");
        assert_eq!(app_error.http_status(), 409);
        assert!(app_error.context().contains_key("sqlite_code"));
    }

    #[tokio::test]
    async fn not_null_violation_is_a_constraint_conflict() {
        let pool = memory_pool().await;
        let err = sqlx::query("INSERT INTO companies (id, name) VALUES ('c1', NULL)")
            .execute(&pool)
            .await
            .unwrap_err();
        let app_error = AppError::from(err);
        assert_eq!(app_error.code(), AppError::CONSTRAINT_CODE);
        assert!(app_error.message().contains("companies.name"));
    }

    #[tokio::test]
    async fn other_database_failures_are_unexpected() {
        let pool = memory_pool().await;
        let err = sqlx::query("SELECT * FROM sales")
            .execute(&pool)
            .await
            .unwrap_err();
        let app_error = AppError::from(err);
        assert_eq!(app_error.code(), AppError::STORAGE_CODE);
        assert!(!app_error.is_client_error());
        assert!(app_error.message().contains("sales"));
    }

    #[test]
    fn missing_row_maps_to_not_found() {
        let app_error = AppError::from(SqlxError::RowNotFound);
        assert_eq!(app_error.code(), AppError::NOT_FOUND_CODE);
        assert_eq!(app_error.http_status(), 404);
    }

    #[test]
    fn io_failures_keep_the_driver_error_as_cause() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only volume");
        let app_error = AppError::from(SqlxError::Io(io));
        assert_eq!(app_error.code(), "SQLX/IO");
        let cause = app_error.cause().expect("cause present");
        assert_eq!(cause.code(), "IO/PermissionDenied");
        assert_eq!(cause.message(), "read-only volume");
        let value = serde_json::to_value(&app_error).expect("serialize app error");
        assert_eq!(value["cause"]["message"], "read-only volume");
    }
}
