//! The only failure body the routing layer ever returns: `{ "error": string }`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, warn};

use super::{AppError, AppResult};

/// Message used in production for anything the caller did not cause.
pub const MASKED_MESSAGE: &str = "Internal server error";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    /// Build the external body for `err`. In production mode unexpected failures
    /// are logged here and replaced by [`MASKED_MESSAGE`].
    pub fn from_app_error(err: &AppError, production: bool) -> Self {
        if err.is_client_error() {
            warn!(
                target: "bizledger",
                event = "request_rejected",
                code = %err.code(),
                status = err.http_status(),
                message = %err.message()
            );
            return ErrorResponse {
                error: err.message().to_string(),
            };
        }

        error!(
            target: "bizledger",
            event = "request_failed",
            code = %err.code(),
            status = err.http_status(),
            error = %err
        );
        let error = if production {
            MASKED_MESSAGE.to_string()
        } else {
            err.message().to_string()
        };
        ErrorResponse { error }
    }
}

/// Translate a core result into `(status, body)` for the routing layer. Success
/// echoes the serialized value.
pub fn render<T: Serialize>(result: &AppResult<T>, production: bool) -> (u16, Value) {
    match result {
        Ok(value) => match serde_json::to_value(value) {
            Ok(body) => (200, body),
            Err(err) => {
                let err = AppError::new("SERIALIZE/RESPONSE", err.to_string());
                let body = ErrorResponse::from_app_error(&err, production);
                (err.http_status(), serde_json::json!({ "error": body.error }))
            }
        },
        Err(err) => {
            let body = ErrorResponse::from_app_error(err, production);
            (err.http_status(), serde_json::json!({ "error": body.error }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_errors_keep_their_message() {
        let err = AppError::new(AppError::VALIDATION_CODE, "customer_name is required");
        let (status, body) = render::<()>(&Err(err), true);
        assert_eq!(status, 400);
        assert_eq!(body, json!({ "error": "customer_name is required" }));
    }

    #[test]
    fn production_masks_unexpected_errors() {
        let err = AppError::new("SQLX/DATABASE", "database is locked");
        let (status, body) = render::<()>(&Err(err.clone()), true);
        assert_eq!(status, 500);
        assert_eq!(body, json!({ "error": MASKED_MESSAGE }));

        let (_, body) = render::<()>(&Err(err), false);
        assert_eq!(body, json!({ "error": "database is locked" }));
    }

    #[test]
    fn success_echoes_value() {
        let (status, body) = render(&Ok(json!({ "id": "s1" })), true);
        assert_eq!(status, 200);
        assert_eq!(body, json!({ "id": "s1" }));
    }
}
