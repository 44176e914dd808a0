use axum::{
    extract::{Query, State},
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::{
    carriers::{CarrierCode, PickupPoint, RateRequest, ShippingRate},
    errors::ServiceError,
    ApiResponse, ApiResult, AppState,
};

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct RateQuery {
    /// Total weight in kilograms
    pub weight: f64,
    /// Destination postal code
    pub postal_code: String,
    /// Destination country, defaults to the sender's country
    pub country_code: Option<String>,
    /// Quote locker delivery instead of door delivery
    #[serde(default)]
    pub pickup_point: bool,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PickupPointQuery {
    pub postcode: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ProviderInfo {
    pub id: CarrierCode,
    pub name: String,
}

#[utoipa::path(
    get,
    path = "/shipping/rates",
    params(RateQuery),
    responses(
        (status = 200, description = "Quotes from every available carrier", body = ApiResponse<Vec<ShippingRate>>),
        (status = 400, description = "Invalid weight or postal code", body = crate::errors::ErrorResponse)
    ),
    tag = "shipping"
)]
pub async fn rates(
    State(state): State<AppState>,
    Query(query): Query<RateQuery>,
) -> ApiResult<Vec<ShippingRate>> {
    if !(query.weight.is_finite() && query.weight > 0.0) {
        return Err(ServiceError::ValidationError(
            "weight must be a positive number".to_string(),
        ));
    }
    if query.postal_code.trim().is_empty() {
        return Err(ServiceError::ValidationError(
            "postal_code is required".to_string(),
        ));
    }

    let company = &state.config.carriers.company;
    let request = RateRequest {
        from_postal_code: company.postal_code.clone(),
        to_postal_code: query.postal_code.trim().to_string(),
        to_country_code: query
            .country_code
            .unwrap_or_else(|| company.country_code.clone()),
        weight: query.weight,
        pickup_point: query.pickup_point,
    };

    let mut rates = state.services.carriers.quote_rates(&request).await;
    rates.sort_by(|a, b| a.price.cmp(&b.price));
    Ok(Json(ApiResponse::success(rates)))
}

#[utoipa::path(
    get,
    path = "/shipping/pickup-points",
    params(PickupPointQuery),
    responses(
        (status = 200, description = "BoxNow lockers near the postcode", body = ApiResponse<Vec<PickupPoint>>),
        (status = 400, description = "BoxNow is not configured", body = crate::errors::ErrorResponse),
        (status = 502, description = "Carrier unavailable", body = crate::errors::ErrorResponse)
    ),
    tag = "shipping"
)]
pub async fn pickup_points(
    State(state): State<AppState>,
    Query(query): Query<PickupPointQuery>,
) -> ApiResult<Vec<PickupPoint>> {
    let points = state
        .services
        .carriers
        .pickup_points(query.postcode.trim())
        .await?;
    Ok(Json(ApiResponse::success(points)))
}

#[utoipa::path(
    get,
    path = "/shipping/providers",
    responses(
        (status = 200, description = "Configured carriers", body = ApiResponse<Vec<ProviderInfo>>)
    ),
    tag = "shipping"
)]
pub async fn providers(State(state): State<AppState>) -> ApiResult<Vec<ProviderInfo>> {
    let providers = state
        .services
        .carriers
        .codes()
        .into_iter()
        .map(|code| ProviderInfo {
            id: code,
            name: code.display_name().to_string(),
        })
        .collect();
    Ok(Json(ApiResponse::success(providers)))
}
