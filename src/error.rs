//! Application error taxonomy and HTTP mapping.
//!
//! Validation and state errors are raised before any external call is made.
//! Provider business rejections (card declined, refund refused) are not
//! errors at all; they come back as normal outcomes recorded on the entity.
//! Only transport/availability failures surface as `ProviderUnavailable`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::store::error::DatabaseError;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    /// Malformed or out-of-range input. Never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Requested provider name is not registered.
    #[error("unknown payment provider '{0}'")]
    UnknownProvider(String),

    /// Operation attempted against an entity whose current state forbids it.
    #[error("{entity} is {current}: {operation} not permitted")]
    InvalidState {
        entity: &'static str,
        current: String,
        operation: &'static str,
    },

    /// External network call did not succeed within the retry budget.
    #[error("provider '{provider}' unavailable: {message}")]
    ProviderUnavailable { provider: String, message: String },

    /// Webhook signature or authenticity check failed; the event is dropped.
    #[error("webhook signature verification failed")]
    WebhookVerificationFailed,

    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::UnknownProvider(_) => StatusCode::BAD_REQUEST,
            Self::InvalidState { .. } => StatusCode::CONFLICT,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::ProviderUnavailable { .. } => StatusCode::BAD_GATEWAY,
            Self::WebhookVerificationFailed => StatusCode::UNAUTHORIZED,
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_tag(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::UnknownProvider(_) => "unknown_provider",
            Self::InvalidState { .. } => "invalid_state",
            Self::ProviderUnavailable { .. } => "provider_unavailable",
            Self::WebhookVerificationFailed => "webhook_verification_failed",
            Self::NotFound { .. } => "not_found",
            Self::Database(_) => "internal_error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Database details stay in the logs, not in the response body.
        let message = match &self {
            AppError::Database(e) => {
                tracing::error!(error = %e, "request failed on database error");
                "internal error".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": self.error_tag(),
            "message": message,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_map_to_4xx() {
        assert_eq!(
            AppError::validation("bad amount").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::UnknownProvider("foo".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::not_found("payment", "p-1").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::InvalidState {
                entity: "payment",
                current: "pending".into(),
                operation: "refund",
            }
            .status_code(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn provider_unavailable_is_an_upstream_error() {
        let err = AppError::ProviderUnavailable {
            provider: "hosted_checkout".into(),
            message: "timed out after 3 attempts".into(),
        };
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }
}
