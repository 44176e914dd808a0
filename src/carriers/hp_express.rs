use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use tracing::instrument;

use super::http::{resolve_base_url, Auth, CarrierHttp};
use super::{
    BookedShipment, CarrierAdapter, CarrierCode, CarrierError, CreateShipmentRequest, RateRequest,
    ShippingRate, TrackingEvent, TrackingInfo,
};
use crate::config::{CarrierSettings, CompanyAddress, HpExpressConfig};
use crate::errors::ServiceError;

pub const SANDBOX_URL: &str = "https://test.api.posta.hr/v1";
pub const PRODUCTION_URL: &str = "https://api.posta.hr/v1";

pub struct HpExpressAdapter {
    http: CarrierHttp,
    company: CompanyAddress,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedResponse {
    shipment_id: String,
    tracking_number: String,
    label_url: Option<String>,
    estimated_delivery: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrackingResponse {
    status: String,
    status_date: DateTime<Utc>,
    location: Option<String>,
    #[serde(default)]
    events: Vec<EventResponse>,
}

#[derive(Deserialize)]
struct EventResponse {
    status: String,
    date: DateTime<Utc>,
    location: Option<String>,
    description: Option<String>,
}

#[derive(Deserialize)]
struct RatesResponse {
    rates: Vec<RateResponse>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RateResponse {
    id: String,
    name: String,
    price: Decimal,
    estimated_days: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LabelResponse {
    label_url: String,
}

impl HpExpressAdapter {
    pub fn new(config: &HpExpressConfig, settings: &CarrierSettings) -> Result<Self, ServiceError> {
        let base_url = resolve_base_url(
            config.base_url.as_deref(),
            settings.sandbox,
            SANDBOX_URL,
            PRODUCTION_URL,
        );
        Ok(Self {
            http: CarrierHttp::new(
                CarrierCode::HpExpress,
                base_url,
                Auth::Bearer(config.api_key.clone()),
                settings.request_timeout(),
            )?,
            company: settings.company.clone(),
        })
    }

    fn service(pickup_point: bool) -> &'static str {
        if pickup_point {
            "pickup_point"
        } else {
            "door_to_door"
        }
    }
}

#[async_trait]
impl CarrierAdapter for HpExpressAdapter {
    fn code(&self) -> CarrierCode {
        CarrierCode::HpExpress
    }

    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn create_shipment(
        &self,
        request: &CreateShipmentRequest,
    ) -> Result<BookedShipment, CarrierError> {
        let company = &self.company;
        let recipient = &request.recipient;
        let payload = json!({
            "sender": {
                "name": company.name,
                "street": company.street,
                "city": company.city,
                "postalCode": company.postal_code,
                "countryCode": company.country_code,
                "contact": company.contact,
                "phone": company.phone,
                "email": company.email,
            },
            "recipient": {
                "name": recipient.name,
                "street": recipient.street,
                "city": recipient.city,
                "postalCode": recipient.postal_code,
                "countryCode": recipient.country_code,
                "phone": recipient.phone,
                "email": recipient.email,
            },
            "packages": request.packages.iter().map(|p| {
                let (length, width, height) = p.dimensions();
                json!({ "weight": p.weight, "width": width, "height": height, "length": length })
            }).collect::<Vec<_>>(),
            "service": Self::service(request.pickup_point_id.is_some()),
            "pickupPointId": request.pickup_point_id,
            "reference": request.order_id,
        });

        let created: CreatedResponse = self.http.post("/shipments", &payload).await?;
        Ok(BookedShipment {
            shipment_id: created.shipment_id,
            tracking_number: created.tracking_number,
            label_url: created.label_url,
            estimated_delivery_date: created.estimated_delivery,
        })
    }

    #[instrument(skip(self))]
    async fn get_tracking(&self, tracking_number: &str) -> Result<TrackingInfo, CarrierError> {
        let response: TrackingResponse = self
            .http
            .get(&format!("/tracking/{tracking_number}"))
            .await?;

        let is_delivered = response.status.eq_ignore_ascii_case("delivered");
        Ok(TrackingInfo {
            delivery_date: is_delivered.then_some(response.status_date),
            is_delivered,
            status: response.status,
            status_date: response.status_date,
            location: response.location,
            events: response
                .events
                .into_iter()
                .map(|e| TrackingEvent {
                    status: e.status,
                    timestamp: e.date,
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
            "fromPostalCode": request.from_postal_code,
            "toPostalCode": request.to_postal_code,
            "toCountryCode": request.to_country_code,
            "weight": request.weight,
            "service": Self::service(request.pickup_point),
        });
        let response: RatesResponse = self.http.post("/rates/calculate", &payload).await?;

        Ok(response
            .rates
            .into_iter()
            .map(|r| ShippingRate {
                id: r.id,
                name: r.name,
                price: r.price,
                currency: "EUR".to_string(),
                estimated_days: r.estimated_days,
                provider: CarrierCode::HpExpress,
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
