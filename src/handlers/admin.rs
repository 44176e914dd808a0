use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    carriers::{CarrierCode, CreateShipmentRequest},
    errors::ServiceError,
    services::shipments::{
        FilterOptions, IssueView, ShipmentDetail, ShipmentFilters, ShipmentRow, ShipmentView,
    },
    services::tracking_update::{BulkUpdateResult, TrackingRefresh},
    ApiResponse, ApiResult, AppState, PaginatedResponse,
};

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BulkUpdateRequest {
    #[serde(default)]
    pub shipment_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct BookShipmentRequest {
    pub provider: CarrierCode,
    #[serde(flatten)]
    pub shipment: CreateShipmentRequest,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LabelResponse {
    pub label_url: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ResolveIssueRequest {
    #[validate(length(min = 1, max = 2000))]
    pub resolution: String,
}

#[utoipa::path(
    post,
    path = "/shipping/admin/shipments",
    request_body = BookShipmentRequest,
    responses(
        (status = 200, description = "Shipment booked and stored as pending", body = ApiResponse<ShipmentView>),
        (status = 400, description = "No packages or unsupported booking", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order already has a shipment", body = crate::errors::ErrorResponse),
        (status = 502, description = "Carrier rejected the booking", body = crate::errors::ErrorResponse)
    ),
    security(("admin_key" = [])),
    tag = "admin"
)]
pub async fn book_shipment(
    State(state): State<AppState>,
    Json(request): Json<BookShipmentRequest>,
) -> ApiResult<ShipmentView> {
    let shipment = state
        .services
        .booking
        .book(request.provider, &request.shipment)
        .await?;
    Ok(Json(ApiResponse::success(shipment.into())))
}

#[utoipa::path(
    get,
    path = "/shipping/admin/shipments/{id}/label",
    params(("id" = Uuid, Path, description = "Shipment ID")),
    responses(
        (status = 200, description = "Label location", body = ApiResponse<LabelResponse>),
        (status = 404, description = "Shipment not found", body = crate::errors::ErrorResponse),
        (status = 502, description = "Carrier unavailable", body = crate::errors::ErrorResponse)
    ),
    security(("admin_key" = [])),
    tag = "admin"
)]
pub async fn shipment_label(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<LabelResponse> {
    let label_url = state.services.booking.label(id).await?;
    Ok(Json(ApiResponse::success(LabelResponse { label_url })))
}

#[utoipa::path(
    post,
    path = "/shipping/admin/shipments/{id}/update-tracking",
    params(("id" = Uuid, Path, description = "Shipment ID")),
    responses(
        (status = 200, description = "Tracking refreshed", body = ApiResponse<TrackingRefresh>),
        (status = 404, description = "Shipment not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Shipment already in a terminal state", body = crate::errors::ErrorResponse),
        (status = 502, description = "Carrier unavailable", body = crate::errors::ErrorResponse)
    ),
    security(("admin_key" = [])),
    tag = "admin"
)]
pub async fn update_tracking(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<TrackingRefresh> {
    let refresh = state.services.tracking.update_single(id).await?;
    Ok(Json(ApiResponse::success(refresh)))
}

#[utoipa::path(
    post,
    path = "/shipping/admin/shipments/bulk-update",
    request_body = BulkUpdateRequest,
    responses(
        (status = 200, description = "Per-shipment results", body = ApiResponse<BulkUpdateResult>),
        (status = 400, description = "No shipment ids", body = crate::errors::ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = crate::errors::ErrorResponse)
    ),
    security(("admin_key" = [])),
    tag = "admin"
)]
pub async fn bulk_update(
    State(state): State<AppState>,
    Json(request): Json<BulkUpdateRequest>,
) -> ApiResult<BulkUpdateResult> {
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

#[utoipa::path(
    get,
    path = "/shipping/admin/shipments",
    params(ShipmentFilters),
    responses(
        (status = 200, description = "Shipments listed", body = ApiResponse<PaginatedResponse<ShipmentRow>>),
        (status = 401, description = "Missing or invalid admin key", body = crate::errors::ErrorResponse)
    ),
    security(("admin_key" = [])),
    tag = "admin"
)]
pub async fn list_shipments(
    State(state): State<AppState>,
    Query(filters): Query<ShipmentFilters>,
) -> ApiResult<PaginatedResponse<ShipmentRow>> {
    let page = filters.page();
    let limit = filters.limit();
    let (items, total) = state.services.queries.list_shipments(&filters).await?;

    Ok(Json(ApiResponse::success(PaginatedResponse {
        items,
        total,
        page,
        limit,
        total_pages: total.div_ceil(limit),
    })))
}

#[utoipa::path(
    get,
    path = "/shipping/admin/shipments/{id}",
    params(("id" = Uuid, Path, description = "Shipment ID")),
    responses(
        (status = 200, description = "Shipment with history and issues", body = ApiResponse<ShipmentDetail>),
        (status = 404, description = "Shipment not found", body = crate::errors::ErrorResponse)
    ),
    security(("admin_key" = [])),
    tag = "admin"
)]
pub async fn get_shipment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<ShipmentDetail> {
    let detail = state.services.queries.get_shipment(id).await?;
    Ok(Json(ApiResponse::success(detail)))
}

#[utoipa::path(
    get,
    path = "/shipping/admin/filter-options",
    responses(
        (status = 200, description = "Values available for listing filters", body = ApiResponse<FilterOptions>)
    ),
    security(("admin_key" = [])),
    tag = "admin"
)]
pub async fn filter_options(State(state): State<AppState>) -> ApiResult<FilterOptions> {
    let options = state.services.queries.filter_options().await?;
    Ok(Json(ApiResponse::success(options)))
}

#[utoipa::path(
    post,
    path = "/shipping/admin/issues/{id}/resolve",
    params(("id" = Uuid, Path, description = "Issue ID")),
    request_body = ResolveIssueRequest,
    responses(
        (status = 200, description = "Issue resolved", body = ApiResponse<IssueView>),
        (status = 400, description = "Empty resolution", body = crate::errors::ErrorResponse),
        (status = 404, description = "Issue not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Issue already resolved", body = crate::errors::ErrorResponse)
    ),
    security(("admin_key" = [])),
    tag = "admin"
)]
pub async fn resolve_issue(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<ResolveIssueRequest>,
) -> ApiResult<IssueView> {
    request.validate()?;
    let issue = state
        .services
        .delays
        .resolve_issue(id, &request.resolution)
        .await?;
    Ok(Json(ApiResponse::success(issue.into())))
}
