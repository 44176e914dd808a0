//! Shared-key guards for the admin console and the manual tracking trigger.

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use tracing::warn;

use crate::errors::ServiceError;
use crate::AppState;

pub const ADMIN_KEY_HEADER: &str = "x-admin-key";
pub const API_KEY_HEADER: &str = "x-api-key";

pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Compares the header value against the configured key.
/// An unconfigured key rejects every request.
pub fn check_key(
    headers: &HeaderMap,
    header: &str,
    expected: Option<&str>,
) -> Result<(), ServiceError> {
    let expected = expected
        .filter(|k| !k.is_empty())
        .ok_or_else(|| ServiceError::Forbidden("access key is not configured".to_string()))?;

    let presented = headers
        .get(header)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ServiceError::Unauthorized(format!("missing {header} header")))?;

    if constant_time_eq(presented.as_bytes(), expected.as_bytes()) {
        Ok(())
    } else {
        Err(ServiceError::Unauthorized("invalid access key".to_string()))
    }
}

/// Admin gate for `/shipping/admin/*`
pub async fn require_admin_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ServiceError> {
    if let Err(err) = check_key(
        request.headers(),
        ADMIN_KEY_HEADER,
        state.config.admin_api_key.as_deref(),
    ) {
        warn!(path = %request.uri().path(), error = %err, "admin request rejected");
        return Err(err);
    }
    Ok(next.run(request).await)
}
