use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;

use crate::carriers::CarrierError;

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Error body returned by every failing endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "Not Found",
    "message": "Not found: Shipment with tracking number JD014600003RU not found",
    "details": null,
    "request_id": "req-abc123xyz",
    "timestamp": "2024-12-09T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Unauthorized")
    #[schema(example = "Not Found")]
    pub error: String,
    /// Human-readable error description
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Unique request identifier for support and debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(example = "req-abc123xyz")]
    pub request_id: Option<String>,
    #[schema(example = "2024-12-09T10:30:00.000Z")]
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        DbErr,
    ),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid webhook signature for provider {0}")]
    SignatureInvalid(String),

    #[error("Unknown shipping provider: {0}")]
    UnknownProvider(String),

    #[error("Carrier {provider} request failed: {message}")]
    CarrierApiError { provider: String, message: String },

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Transaction conflict: {0}")]
    TransactionConflict(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(
        #[from]
        #[serde(skip)]
        anyhow::Error,
    ),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::SerializationError(err.to_string())
    }
}

impl From<CarrierError> for ServiceError {
    fn from(err: CarrierError) -> Self {
        match err {
            // The request can never succeed with this carrier
            CarrierError::Unsupported { .. } => ServiceError::BadRequest(err.to_string()),
            _ => ServiceError::CarrierApiError {
                provider: err.provider().to_string(),
                message: err.to_string(),
            },
        }
    }
}

pub trait IntoDbErr {
    fn into_db_err(self) -> DbErr;
}

impl IntoDbErr for DbErr {
    fn into_db_err(self) -> DbErr {
        self
    }
}

impl IntoDbErr for String {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self)
    }
}

impl IntoDbErr for &str {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self.to_string())
    }
}

impl ServiceError {
    /// Normalizes a database error, promoting lock contention into
    /// `TransactionConflict` so callers can retry the unit of work.
    pub fn db_error<E: IntoDbErr>(error: E) -> Self {
        let err = error.into_db_err();
        if is_lock_conflict(&err) {
            return ServiceError::TransactionConflict(err.to_string());
        }
        ServiceError::DatabaseError(err)
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransactionConflict(_))
    }

    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_)
            | Self::BadRequest(_)
            | Self::UnknownProvider(_)
            | Self::InvalidStatus(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) | Self::SignatureInvalid(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::CarrierApiError { .. } | Self::ExternalServiceError(_) => {
                StatusCode::BAD_GATEWAY
            }
            Self::TransactionConflict(_) | Self::Conflict(_) => StatusCode::CONFLICT,
            Self::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            Self::SerializationError(_) | Self::InternalError(_) | Self::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal and carrier errors return generic messages; the detail is logged.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::SerializationError(_) | Self::InternalError(_) | Self::Other(_) => {
                "Internal server error".to_string()
            }
            Self::CarrierApiError { .. } => "Carrier service unavailable".to_string(),
            Self::ExternalServiceError(_) => "External service unavailable".to_string(),
            Self::SignatureInvalid(_) => "Invalid signature".to_string(),
            Self::TransactionConflict(_) => {
                "Concurrent update in progress, please retry".to_string()
            }
            _ => self.to_string(),
        }
    }
}

fn is_lock_conflict(err: &DbErr) -> bool {
    let text = err.to_string().to_ascii_lowercase();
    text.contains("deadlock")
        || text.contains("could not serialize")
        || text.contains("lock timeout")
        || text.contains("database is locked")
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "request failed");
        }

        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            details: None,
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn service_error_response_includes_request_id() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("req-123"), async {
                ServiceError::NotFound("missing".into()).into_response()
            })
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload.request_id.as_deref(), Some("req-123"));
    }

    #[test]
    fn service_error_status_code_mapping() {
        assert_eq!(
            ServiceError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::SignatureInvalid("dhl".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ServiceError::CarrierApiError {
                provider: "dhl".into(),
                message: "timeout".into()
            }
            .status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ServiceError::TransactionConflict("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::RateLimitExceeded.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ServiceError::UnknownProvider("ups".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn response_message_hides_internal_and_carrier_details() {
        assert_eq!(
            ServiceError::InternalError("secret".into()).response_message(),
            "Internal server error"
        );
        let carrier = ServiceError::CarrierApiError {
            provider: "dhl".into(),
            message: "401 invalid api key abc".into(),
        };
        assert!(!carrier.response_message().contains("abc"));
        assert_eq!(
            ServiceError::NotFound("Shipment not found".into()).response_message(),
            "Not found: Shipment not found"
        );
    }

    #[test]
    fn unsupported_carrier_requests_are_client_errors() {
        let err: ServiceError = CarrierError::Unsupported {
            provider: crate::carriers::CarrierCode::BoxNow,
            message: "BoxNow requires a pickup point".into(),
        }
        .into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(err.response_message().contains("pickup point"));
    }

    #[test]
    fn lock_errors_become_transaction_conflicts() {
        let err = ServiceError::db_error("deadlock detected");
        assert!(err.is_transient());
        let err = ServiceError::db_error("syntax error");
        assert!(matches!(err, ServiceError::DatabaseError(_)));
    }
}
