use actix_web::http::StatusCode;
use actix_web::{error::ResponseError, HttpResponse};
use log::{debug, error, warn};
use serde_json::json;
use thiserror::Error;

use crate::store::StoreError;

// Custom error handling
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    /// Rejected login or token exchange; answered as a 400 like other form errors.
    #[error("Invalid credentials: {0}")]
    CredentialsError(String),
    #[error("Authentication error: {0}")]
    AuthError(String),
    #[error("Permission denied: {0}")]
    Forbidden(String),
    #[error("Not found: {0}")]
    NotFoundError(String),
    #[error("Delivery error: {0}")]
    DeliveryError(String),
    #[error("Internal server error: {0}")]
    InternalError(String),
}

impl ApiError {
    /// The generic 403 used by resource guards. It never names the missing grant.
    pub fn permission_denied() -> Self {
        ApiError::Forbidden("You do not have permission to perform this action.".to_string())
    }

    pub fn not_found(what: &str) -> Self {
        ApiError::NotFoundError(format!("{} not found", what))
    }
}

impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        match self {
            ApiError::DatabaseError(msg) => {
                error!("\x1B[1;31mDATABASE ERROR:\x1B[0m {}", msg);
                HttpResponse::build(status).json(json!({ "error": "Database error" }))
            },
            ApiError::ValidationError(msg) => {
                warn!("\x1B[1;33mVALIDATION ERROR:\x1B[0m {}", msg);
                HttpResponse::build(status).json(json!({ "error": msg }))
            },
            ApiError::CredentialsError(msg) => {
                warn!("\x1B[1;33mCREDENTIALS ERROR:\x1B[0m {}", msg);
                HttpResponse::build(status).json(json!({ "non_field_errors": [msg] }))
            },
            ApiError::AuthError(msg) => {
                warn!("\x1B[1;33mAUTHENTICATION ERROR:\x1B[0m {}", msg);
                HttpResponse::build(status).json(json!({ "error": msg }))
            },
            ApiError::Forbidden(msg) => {
                warn!("\x1B[1;33mFORBIDDEN:\x1B[0m {}", msg);
                HttpResponse::build(status).json(json!({ "error": msg }))
            },
            ApiError::NotFoundError(msg) => {
                debug!("\x1B[1;36mNOT FOUND ERROR:\x1B[0m {}", msg);
                HttpResponse::build(status).json(json!({ "error": msg }))
            },
            ApiError::DeliveryError(msg) => {
                error!("\x1B[1;31mDELIVERY ERROR:\x1B[0m {}", msg);
                HttpResponse::build(status).json(json!({ "error": msg }))
            },
            ApiError::InternalError(msg) => {
                error!("\x1B[1;31mINTERNAL SERVER ERROR:\x1B[0m {}", msg);
                HttpResponse::build(status).json(json!({ "error": "Internal server error" }))
            },
        }
    }

    fn status_code(&self) -> StatusCode {
        match *self {
            ApiError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::ValidationError(_) => StatusCode::BAD_REQUEST,
            ApiError::CredentialsError(_) => StatusCode::BAD_REQUEST,
            ApiError::AuthError(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFoundError(_) => StatusCode::NOT_FOUND,
            ApiError::DeliveryError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => ApiError::NotFoundError(what),
            StoreError::Conflict(msg) | StoreError::Invalid(msg) => ApiError::ValidationError(msg),
            StoreError::Database(msg) | StoreError::Pool(msg) => ApiError::DatabaseError(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_to_http_statuses() {
        let conflict: ApiError = StoreError::Conflict("Email already exists".into()).into();
        assert_eq!(conflict.status_code(), StatusCode::BAD_REQUEST);
        let missing: ApiError = StoreError::NotFound("Role not found".into()).into();
        assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);
        let pool: ApiError = StoreError::Pool("timed out".into()).into();
        assert_eq!(pool.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn permission_denied_is_generic() {
        let denied = ApiError::permission_denied();
        assert_eq!(denied.status_code(), StatusCode::FORBIDDEN);
        assert!(!denied.to_string().contains("can_"));
    }
}
