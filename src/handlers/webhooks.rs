use axum::{
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    response::Json,
};
use serde::Deserialize;
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    auth::{check_key, API_KEY_HEADER},
    carriers::CarrierCode,
    errors::ServiceError,
    services::tracking_update::{BulkUpdateResult, TrackingRefresh},
    webhooks::{self, SIGNATURE_HEADER},
    ApiResponse, ApiResult, AppState,
};

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ManualTrackingRequest {
    #[serde(default)]
    pub shipment_ids: Vec<Uuid>,
}

/// Status push from a carrier. The signature is checked against the raw
/// body before anything touches the database.
#[utoipa::path(
    post,
    path = "/webhooks/shipping/{provider}",
    params(
        ("provider" = String, Path, description = "Carrier code: hp_express, dhl, overseas or boxnow")
    ),
    request_body(content = String, description = "Carrier-specific JSON payload"),
    responses(
        (status = 200, description = "Update applied", body = ApiResponse<TrackingRefresh>),
        (status = 400, description = "Unknown provider or malformed payload", body = crate::errors::ErrorResponse),
        (status = 401, description = "Invalid signature", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown tracking number", body = crate::errors::ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = crate::errors::ErrorResponse)
    ),
    tag = "webhooks"
)]
pub async fn carrier_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<TrackingRefresh> {
    let code = CarrierCode::parse(&provider)?;
    let secret = state
        .config
        .carriers
        .webhook_secret(code.as_ref())
        .ok_or_else(|| ServiceError::UnknownProvider(provider.clone()))?;

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    if let Err(reason) = webhooks::verify(code, secret, &body, signature) {
        warn!(provider = %code, ?reason, "webhook signature rejected");
        metrics::counter!("webhooks.rejected", 1, "provider" => code.to_string());
        return Err(ServiceError::SignatureInvalid(code.to_string()));
    }

    let push = webhooks::parse(code, &body)?;
    metrics::counter!("webhooks.received", 1, "provider" => code.to_string());
    info!(provider = %code, tracking_number = %push.tracking_number, status = %push.status, "carrier webhook accepted");

    let refresh = state.services.tracking.handle_webhook(code, push).await?;
    Ok(Json(ApiResponse::success(refresh)))
}

/// Manual trigger for refreshing a set of shipments
#[utoipa::path(
    post,
    path = "/webhooks/tracking/manual",
    request_body = ManualTrackingRequest,
    responses(
        (status = 200, description = "Shipments refreshed", body = ApiResponse<BulkUpdateResult>),
        (status = 400, description = "No shipment ids", body = crate::errors::ErrorResponse),
        (status = 401, description = "Missing or invalid API key", body = crate::errors::ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = crate::errors::ErrorResponse)
    ),
    tag = "webhooks"
)]
pub async fn manual_tracking(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ManualTrackingRequest>,
) -> ApiResult<BulkUpdateResult> {
    check_key(
        &headers,
        API_KEY_HEADER,
        state.config.manual_tracking_api_key.as_deref(),
    )
    .map_err(|_| ServiceError::Unauthorized("invalid API key".to_string()))?;

    if request.shipment_ids.is_empty() {
        return Err(ServiceError::ValidationError(
            "shipmentIds must be a non-empty array".to_string(),
        ));
    }

    let result = state
        .services
        .tracking
        .bulk_update(&request.shipment_ids)
        .await?;
    Ok(Json(ApiResponse::success(result)))
}
