use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use tracing::instrument;

use super::http::{resolve_base_url, Auth, CarrierHttp};
use super::{
    BookedShipment, CarrierAdapter, CarrierCode, CarrierError, CreateShipmentRequest, RateRequest,
    ShippingRate, TrackingEvent, TrackingInfo,
};
use crate::config::{CarrierSettings, CompanyAddress, OverseasConfig};
use crate::errors::ServiceError;

pub const SANDBOX_URL: &str = "https://apitest.overseas.hr/api/v1";
pub const PRODUCTION_URL: &str = "https://api.overseas.hr/api/v1";

/// Overseas does not return a delivery estimate
const ESTIMATED_TRANSIT_DAYS: i64 = 2;

pub struct OverseasAdapter {
    http: CarrierHttp,
    company: CompanyAddress,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedResponse {
    id: String,
    tracking_number: String,
    label_url: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrackingResponse {
    status: String,
    last_update: DateTime<Utc>,
    current_location: Option<String>,
    #[serde(default)]
    history: Vec<HistoryEntry>,
}

#[derive(Deserialize)]
struct HistoryEntry {
    status: String,
    timestamp: DateTime<Utc>,
    location: Option<String>,
    description: Option<String>,
}

#[derive(Deserialize)]
struct RatesResponse {
    #[serde(default)]
    services: Vec<ServiceQuote>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceQuote {
    code: String,
    name: String,
    price: Decimal,
    estimated_days: Option<u32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LabelResponse {
    label_url: String,
}

impl OverseasAdapter {
    pub fn new(config: &OverseasConfig, settings: &CarrierSettings) -> Result<Self, ServiceError> {
        let base_url = resolve_base_url(
            config.base_url.as_deref(),
            settings.sandbox,
            SANDBOX_URL,
            PRODUCTION_URL,
        );
        Ok(Self {
            http: CarrierHttp::new(
                CarrierCode::Overseas,
                base_url,
                Auth::Bearer(config.api_key.clone()),
                settings.request_timeout(),
            )?,
            company: settings.company.clone(),
        })
    }
}

#[async_trait]
impl CarrierAdapter for OverseasAdapter {
    fn code(&self) -> CarrierCode {
        CarrierCode::Overseas
    }

    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn create_shipment(
        &self,
        request: &CreateShipmentRequest,
    ) -> Result<BookedShipment, CarrierError> {
        let c = &self.company;
        let r = &request.recipient;
        let payload = json!({
            "sender": {
                "name": c.name,
                "street": c.street,
                "city": c.city,
                "postCode": c.postal_code,
                "country": c.country_code,
                "contact": c.contact,
                "phone": c.phone,
                "email": c.email,
            },
            "receiver": {
                "name": r.name,
                "street": r.street,
                "city": r.city,
                "postCode": r.postal_code,
                "country": r.country_code,
                "phone": r.phone,
                "email": r.email,
            },
            "parcels": request.packages.iter().map(|p| {
                let (length, width, height) = p.dimensions();
                json!({ "weight": p.weight, "width": width, "height": height, "length": length })
            }).collect::<Vec<_>>(),
            "service": "express",
            "reference": request.order_id,
            "pickupPoint": request.pickup_point_id,
            "cod": false,
        });

        let created: CreatedResponse = self.http.post("/shipments", &payload).await?;
        Ok(BookedShipment {
            shipment_id: created.id,
            tracking_number: created.tracking_number,
            label_url: created.label_url,
            estimated_delivery_date: Some(Utc::now() + Duration::days(ESTIMATED_TRANSIT_DAYS)),
        })
    }

    #[instrument(skip(self))]
    async fn get_tracking(&self, tracking_number: &str) -> Result<TrackingInfo, CarrierError> {
        let response: TrackingResponse = self
            .http
            .get(&format!("/tracking/{tracking_number}"))
            .await?;

        let is_delivered = response.status == "DELIVERED";
        Ok(TrackingInfo {
            delivery_date: is_delivered.then_some(response.last_update),
            is_delivered,
            status: response.status,
            status_date: response.last_update,
            location: response.current_location,
            events: response
                .history
                .into_iter()
                .map(|e| TrackingEvent {
                    status: e.status,
                    timestamp: e.timestamp,
                    location: e.location,
                    description: e.description,
                })
                .collect(),
        })
    }

    async fn calculate_rates(
        &self,
        request: &RateRequest,
    ) -> Result<Vec<ShippingRate>, CarrierError> {
        let payload = json!({
            "from": { "postCode": request.from_postal_code, "country": self.company.country_code },
            "to": { "postCode": request.to_postal_code, "country": request.to_country_code },
            "parcels": [{
                "weight": request.weight,
                "dimensions": { "width": 30, "height": 30, "length": 30 }
            }],
            "pickupPoint": request.pickup_point,
        });
        let response: RatesResponse = self.http.post("/rates", &payload).await?;

        Ok(response
            .services
            .into_iter()
            .map(|s| ShippingRate {
                id: s.code,
                name: s.name,
                price: s.price,
                currency: "EUR".to_string(),
                estimated_days: s.estimated_days.unwrap_or(ESTIMATED_TRANSIT_DAYS as u32),
                provider: CarrierCode::Overseas,
            })
            .collect())
    }

    async fn get_label(&self, shipment_id: &str) -> Result<String, CarrierError> {
        let response: LabelResponse = self
            .http
            .get(&format!("/shipments/{shipment_id}/label"))
            .await?;
        Ok(response.label_url)
    }
}
