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
use crate::config::{CarrierSettings, CompanyAddress, DhlConfig};
use crate::errors::ServiceError;

pub const SANDBOX_URL: &str = "https://api-sandbox.dhl.com/express/v1";
pub const PRODUCTION_URL: &str = "https://api.dhl.com/express/v1";

const LABEL_DOCUMENT: &str = "label";
const EXPRESS_WORLDWIDE: &str = "P";
const DEFAULT_TRANSIT_DAYS: u32 = 3;

pub struct DhlAdapter {
    http: CarrierHttp,
    company: CompanyAddress,
    account_number: String,
}

#[derive(Deserialize)]
struct Document {
    #[serde(rename = "typeCode")]
    type_code: String,
    #[serde(rename = "contentUrl")]
    content_url: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedResponse {
    shipment_tracking_number: String,
    #[serde(default)]
    documents: Vec<Document>,
    estimated_delivery_date: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct DocumentsResponse {
    #[serde(default)]
    documents: Vec<Document>,
}

#[derive(Deserialize)]
struct TrackingResponse {
    #[serde(default)]
    shipments: Vec<TrackedShipment>,
}

#[derive(Deserialize)]
struct TrackedShipment {
    status: StatusBlock,
    #[serde(default)]
    events: Vec<EventBlock>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusBlock {
    status_code: String,
    timestamp: DateTime<Utc>,
    location: Option<Location>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventBlock {
    status_code: String,
    timestamp: DateTime<Utc>,
    location: Option<Location>,
    description: Option<String>,
}

#[derive(Deserialize)]
pub(crate) struct Location {
    pub(crate) address: Option<Address>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Address {
    pub(crate) address_locality: Option<String>,
}

impl Location {
    pub(crate) fn locality(self) -> Option<String> {
        self.address.and_then(|a| a.address_locality)
    }
}

#[derive(Deserialize)]
struct RatesResponse {
    #[serde(default)]
    products: Vec<Product>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Product {
    product_code: String,
    product_name: String,
    total_price: Decimal,
    total_price_currency: Option<String>,
    delivery_capabilities: Option<DeliveryCapabilities>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeliveryCapabilities {
    estimated_delivery_date_and_time: Option<DateTime<Utc>>,
}

fn label_url(documents: Vec<Document>) -> Option<String> {
    documents
        .into_iter()
        .find(|d| d.type_code == LABEL_DOCUMENT)
        .map(|d| d.content_url)
}

/// Whole days until `eta`, rounded up
fn days_until(eta: DateTime<Utc>, now: DateTime<Utc>) -> u32 {
    let secs = (eta - now).num_seconds().max(0);
    let day = Duration::days(1).num_seconds();
    ((secs + day - 1) / day) as u32
}

impl DhlAdapter {
    pub fn new(config: &DhlConfig, settings: &CarrierSettings) -> Result<Self, ServiceError> {
        let base_url = resolve_base_url(
            config.base_url.as_deref(),
            settings.sandbox,
            SANDBOX_URL,
            PRODUCTION_URL,
        );
        Ok(Self {
            http: CarrierHttp::new(
                CarrierCode::Dhl,
                base_url,
                Auth::Basic {
                    username: config.api_key.clone(),
                    password: config.api_secret.clone(),
                },
                settings.request_timeout(),
            )?,
            company: settings.company.clone(),
            account_number: config.account_number.clone(),
        })
    }

    fn shipper(&self) -> serde_json::Value {
        let c = &self.company;
        json!({
            "postalAddress": {
                "streetLines": [c.street],
                "city": c.city,
                "postalCode": c.postal_code,
                "countryCode": c.country_code,
            },
            "contactInformation": {
                "email": c.email,
                "phone": c.phone,
                "companyName": c.name,
                "fullName": c.contact,
            }
        })
    }
}

#[async_trait]
impl CarrierAdapter for DhlAdapter {
    fn code(&self) -> CarrierCode {
        CarrierCode::Dhl
    }

    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn create_shipment(
        &self,
        request: &CreateShipmentRequest,
    ) -> Result<BookedShipment, CarrierError> {
        let r = &request.recipient;
        let payload = json!({
            "plannedShippingDateAndTime": Utc::now().to_rfc3339(),
            "pickup": { "isRequested": false },
            "productCode": EXPRESS_WORLDWIDE,
            "accounts": [{ "typeCode": "shipper", "number": self.account_number }],
            "customerDetails": {
                "shipperDetails": self.shipper(),
                "receiverDetails": {
                    "postalAddress": {
                        "streetLines": [r.street],
                        "city": r.city,
                        "postalCode": r.postal_code,
                        "countryCode": r.country_code,
                    },
                    "contactInformation": {
                        "email": r.email,
                        "phone": r.phone,
                        "fullName": r.name,
                    }
                }
            },
            "content": {
                "packages": request.packages.iter().map(|p| {
                    let (length, width, height) = p.dimensions();
                    json!({
                        "weight": p.weight,
                        "dimensions": { "length": length, "width": width, "height": height }
                    })
                }).collect::<Vec<_>>(),
                "isCustomsDeclarable": r.country_code != self.company.country_code,
                "incoterm": "DAP",
            }
        });

        let created: CreatedResponse = self.http.post("/shipments", &payload).await?;
        Ok(BookedShipment {
            shipment_id: created.shipment_tracking_number.clone(),
            tracking_number: created.shipment_tracking_number,
            label_url: label_url(created.documents),
            estimated_delivery_date: created.estimated_delivery_date,
        })
    }

    #[instrument(skip(self))]
    async fn get_tracking(&self, tracking_number: &str) -> Result<TrackingInfo, CarrierError> {
        let response: TrackingResponse = self
            .http
            .get(&format!("/tracking/{tracking_number}"))
            .await?;

        let shipment = response
            .shipments
            .into_iter()
            .next()
            .ok_or_else(|| CarrierError::decode(CarrierCode::Dhl, "no shipments in response"))?;

        let is_delivered = shipment.status.status_code == "delivered";
        Ok(TrackingInfo {
            delivery_date: is_delivered.then_some(shipment.status.timestamp),
            is_delivered,
            status_date: shipment.status.timestamp,
            location: shipment.status.location.and_then(Location::locality),
            status: shipment.status.status_code,
            events: shipment
                .events
                .into_iter()
                .map(|e| TrackingEvent {
                    status: e.status_code,
                    timestamp: e.timestamp,
                    location: e.location.and_then(Location::locality),
                    description: e.description,
                })
                .collect(),
        })
    }

    async fn calculate_rates(
        &self,
        request: &RateRequest,
    ) -> Result<Vec<ShippingRate>, CarrierError> {
        let now = Utc::now();
        let payload = json!({
            "customerDetails": {
                "shipperDetails": {
                    "postalCode": request.from_postal_code,
                    "countryCode": self.company.country_code,
                },
                "receiverDetails": {
                    "postalCode": request.to_postal_code,
                    "countryCode": request.to_country_code,
                }
            },
            "plannedShippingDate": now.format("%Y-%m-%d").to_string(),
            "unitOfMeasurement": "metric",
            "packages": [{
                "weight": request.weight,
                "dimensions": { "length": 30, "width": 30, "height": 30 }
            }]
        });
        let response: RatesResponse = self.http.post("/rates", &payload).await?;

        Ok(response
            .products
            .into_iter()
            .map(|p| ShippingRate {
                id: p.product_code,
                name: p.product_name,
                price: p.total_price,
                currency: p.total_price_currency.unwrap_or_else(|| "EUR".to_string()),
                estimated_days: p
                    .delivery_capabilities
                    .and_then(|d| d.estimated_delivery_date_and_time)
                    .map(|eta| days_until(eta, now))
                    .unwrap_or(DEFAULT_TRANSIT_DAYS),
                provider: CarrierCode::Dhl,
            })
            .collect())
    }

    async fn get_label(&self, shipment_id: &str) -> Result<String, CarrierError> {
        let response: DocumentsResponse = self
            .http
            .get(&format!("/shipments/{shipment_id}/documents"))
            .await?;
        label_url(response.documents)
            .ok_or_else(|| CarrierError::decode(CarrierCode::Dhl, "no label document"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transit_days_round_up() {
        let now = Utc::now();
        assert_eq!(days_until(now + Duration::hours(30), now), 2);
        assert_eq!(days_until(now + Duration::days(1), now), 1);
        assert_eq!(days_until(now - Duration::hours(1), now), 0);
    }

    #[test]
    fn picks_label_document() {
        let docs = vec![
            Document {
                type_code: "invoice".into(),
                content_url: "https://x/invoice".into(),
            },
            Document {
                type_code: "label".into(),
                content_url: "https://x/label".into(),
            },
        ];
        assert_eq!(label_url(docs).as_deref(), Some("https://x/label"));
    }
}
