use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use serde_json::json;
use tracing::instrument;

use super::http::{resolve_base_url, Auth, CarrierHttp};
use super::{
    BookedShipment, CarrierAdapter, CarrierCode, CarrierError, CreateShipmentRequest, PickupPoint,
    RateRequest, ShippingRate, TrackingEvent, TrackingInfo,
};
use crate::config::{BoxNowConfig, CarrierSettings, CompanyAddress};
use crate::errors::ServiceError;

pub const SANDBOX_URL: &str = "https://api.sandbox.boxnow.hr/v1";
pub const PRODUCTION_URL: &str = "https://api.boxnow.hr/v1";

pub const STANDARD_RATE_ID: &str = "boxnow_standard";
const BASE_PRICE: Decimal = dec!(3.99);
const STEP_PRICE: Decimal = dec!(2);
const STEP_KG: f64 = 5.0;
const STANDARD_DAYS: u32 = 2;

pub struct BoxNowAdapter {
    http: CarrierHttp,
    company: CompanyAddress,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedResponse {
    id: String,
    tracking_code: String,
    label_url: Option<String>,
    estimated_delivery_days: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrackingResponse {
    status: String,
    last_update: DateTime<Utc>,
    current_box: Option<BoxRef>,
    #[serde(default)]
    history: Vec<HistoryEntry>,
}

#[derive(Deserialize)]
pub(crate) struct BoxRef {
    pub(crate) name: Option<String>,
}

#[derive(Deserialize)]
struct HistoryEntry {
    status: String,
    timestamp: DateTime<Utc>,
    #[serde(rename = "box")]
    locker: Option<BoxRef>,
    description: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LabelResponse {
    label_url: String,
}

#[derive(Deserialize)]
struct BoxesResponse {
    #[serde(default)]
    boxes: Vec<Locker>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Locker {
    id: String,
    name: String,
    address: LockerAddress,
    location: LockerLocation,
    working_hours: Option<String>,
}

#[derive(Deserialize)]
struct LockerAddress {
    street: String,
    city: String,
    postcode: String,
}

#[derive(Deserialize)]
struct LockerLocation {
    latitude: f64,
    longitude: f64,
}

/// Flat locker tariff: 3.99 EUR plus 2 EUR for every started 5 kg above the first
pub fn standard_price(weight_kg: f64) -> Decimal {
    let steps = (weight_kg / STEP_KG).ceil().max(1.0) as i64;
    BASE_PRICE + Decimal::from(steps - 1) * STEP_PRICE
}

impl BoxNowAdapter {
    pub fn new(config: &BoxNowConfig, settings: &CarrierSettings) -> Result<Self, ServiceError> {
        let base_url = resolve_base_url(
            config.base_url.as_deref(),
            settings.sandbox,
            SANDBOX_URL,
            PRODUCTION_URL,
        );
        Ok(Self {
            http: CarrierHttp::new(
                CarrierCode::BoxNow,
                base_url,
                Auth::Header {
                    name: "X-API-Key",
                    value: config.api_key.clone(),
                },
                settings.request_timeout(),
            )?,
            company: settings.company.clone(),
        })
    }
}

#[async_trait]
impl CarrierAdapter for BoxNowAdapter {
    fn code(&self) -> CarrierCode {
        CarrierCode::BoxNow
    }

    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn create_shipment(
        &self,
        request: &CreateShipmentRequest,
    ) -> Result<BookedShipment, CarrierError> {
        let box_id = request
            .pickup_point_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| CarrierError::Unsupported {
                provider: CarrierCode::BoxNow,
                message: "BoxNow requires a pickup point".to_string(),
            })?;

        let c = &self.company;
        let r = &request.recipient;
        // grams and millimetres
        let payload = json!({
            "merchant": {
                "name": c.name,
                "address": {
                    "street": c.street,
                    "city": c.city,
                    "postcode": c.postal_code,
                    "country": c.country_code,
                },
                "contact": { "name": c.contact, "phone": c.phone, "email": c.email }
            },
            "recipient": { "name": r.name, "phone": r.phone, "email": r.email },
            "delivery": { "boxId": box_id },
            "parcels": request.packages.iter().map(|p| {
                let (length, width, height) = p.dimensions();
                json!({
                    "weight": p.weight * 1000.0,
                    "width": width * 10.0,
                    "height": height * 10.0,
                    "length": length * 10.0,
                })
            }).collect::<Vec<_>>(),
            "reference": request.order_id,
            "notifications": true,
        });

        let created: CreatedResponse = self.http.post("/shipments", &payload).await?;
        Ok(BookedShipment {
            shipment_id: created.id,
            tracking_number: created.tracking_code,
            label_url: created.label_url,
            estimated_delivery_date: created
                .estimated_delivery_days
                .map(|days| Utc::now() + Duration::days(days)),
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
            location: response.current_box.and_then(|b| b.name),
            events: response
                .history
                .into_iter()
                .map(|e| TrackingEvent {
                    status: e.status,
                    timestamp: e.timestamp,
                    location: e.locker.and_then(|b| b.name),
                    description: e.description,
                })
                .collect(),
        })
    }

    async fn calculate_rates(
        &self,
        request: &RateRequest,
    ) -> Result<Vec<ShippingRate>, CarrierError> {
        if !request.pickup_point {
            return Ok(Vec::new());
        }

        Ok(vec![ShippingRate {
            id: STANDARD_RATE_ID.to_string(),
            name: "BoxNow Standard Delivery".to_string(),
            price: standard_price(request.weight),
            currency: "EUR".to_string(),
            estimated_days: STANDARD_DAYS,
            provider: CarrierCode::BoxNow,
        }])
    }

    async fn get_label(&self, shipment_id: &str) -> Result<String, CarrierError> {
        let response: LabelResponse = self
            .http
            .get(&format!("/shipments/{shipment_id}/label"))
            .await?;
        Ok(response.label_url)
    }

    #[instrument(skip(self))]
    async fn pickup_points(&self, postal_code: &str) -> Result<Vec<PickupPoint>, CarrierError> {
        let response: BoxesResponse = self
            .http
            .get(&format!("/boxes?postcode={}", postal_code.trim()))
            .await?;

        Ok(response
            .boxes
            .into_iter()
            .map(|b| PickupPoint {
                id: b.id,
                name: b.name,
                address: b.address.street,
                city: b.address.city,
                postal_code: b.address.postcode,
                latitude: b.location.latitude,
                longitude: b.location.longitude,
                working_hours: b.working_hours,
            })
            .collect())
    }
}
