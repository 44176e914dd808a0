//! Carrier integrations.
//!
//! Each adapter speaks one carrier's HTTP API and returns the carrier's raw
//! status vocabulary; [`status::normalize`] maps it onto [`ShipmentStatus`].
//! Calls made through [`CarrierRegistry`] pass a per-carrier circuit breaker.
//!
//! [`ShipmentStatus`]: crate::models::ShipmentStatus

pub mod boxnow;
pub mod dhl;
pub mod hp_express;
mod http;
pub mod overseas;
pub mod status;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use strum::IntoEnumIterator;
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerRegistry};
use crate::config::CarrierSettings;
use crate::errors::ServiceError;

pub use status::{normalize, NormalizedStatus};

/// Registered carrier identifiers as stored in `shipments.provider_id`
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
    strum::EnumIter,
)]
pub enum CarrierCode {
    #[serde(rename = "hp_express")]
    #[strum(serialize = "hp_express")]
    HpExpress,
    #[serde(rename = "dhl")]
    #[strum(serialize = "dhl")]
    Dhl,
    #[serde(rename = "overseas")]
    #[strum(serialize = "overseas")]
    Overseas,
    #[serde(rename = "boxnow")]
    #[strum(serialize = "boxnow")]
    BoxNow,
}

impl CarrierCode {
    pub fn display_name(self) -> &'static str {
        match self {
            CarrierCode::HpExpress => "HP Express",
            CarrierCode::Dhl => "DHL Express",
            CarrierCode::Overseas => "Overseas Express",
            CarrierCode::BoxNow => "BoxNow",
        }
    }

    /// Parses a provider path segment or column value
    pub fn parse(value: &str) -> Result<Self, ServiceError> {
        value
            .parse()
            .map_err(|_| ServiceError::UnknownProvider(value.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CarrierError {
    #[error("{provider} request failed: {source}")]
    Http {
        provider: CarrierCode,
        #[source]
        source: reqwest::Error,
    },
    #[error("{provider} responded with {status}: {body}")]
    Status {
        provider: CarrierCode,
        status: u16,
        body: String,
    },
    #[error("{provider} returned an unexpected payload: {message}")]
    Decode {
        provider: CarrierCode,
        message: String,
    },
    #[error("{provider}: {message}")]
    Unsupported {
        provider: CarrierCode,
        message: String,
    },
    #[error("{provider} circuit is open")]
    CircuitOpen { provider: CarrierCode },
}

impl CarrierError {
    pub fn provider(&self) -> CarrierCode {
        match self {
            CarrierError::Http { provider, .. }
            | CarrierError::Status { provider, .. }
            | CarrierError::Decode { provider, .. }
            | CarrierError::Unsupported { provider, .. }
            | CarrierError::CircuitOpen { provider } => *provider,
        }
    }

    pub(crate) fn decode(provider: CarrierCode, message: impl Into<String>) -> Self {
        CarrierError::Decode {
            provider,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Recipient {
    pub name: String,
    pub street: String,
    pub city: String,
    pub postal_code: String,
    pub country_code: String,
    pub phone: String,
    pub email: String,
}

/// Parcel dimensions in kilograms and centimetres
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Package {
    pub weight: f64,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub length: Option<f64>,
}

impl Package {
    pub const DEFAULT_SIDE_CM: f64 = 30.0;

    pub fn dimensions(&self) -> (f64, f64, f64) {
        (
            self.length.unwrap_or(Self::DEFAULT_SIDE_CM),
            self.width.unwrap_or(Self::DEFAULT_SIDE_CM),
            self.height.unwrap_or(Self::DEFAULT_SIDE_CM),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateShipmentRequest {
    pub order_id: Uuid,
    pub recipient: Recipient,
    pub packages: Vec<Package>,
    pub pickup_point_id: Option<String>,
    pub shipping_rate_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BookedShipment {
    pub shipment_id: String,
    pub tracking_number: String,
    pub label_url: Option<String>,
    pub estimated_delivery_date: Option<DateTime<Utc>>,
}

/// One scan event, status still in the carrier's vocabulary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TrackingEvent {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub location: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TrackingInfo {
    pub status: String,
    pub status_date: DateTime<Utc>,
    pub location: Option<String>,
    pub events: Vec<TrackingEvent>,
    pub is_delivered: bool,
    pub delivery_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RateRequest {
    pub from_postal_code: String,
    pub to_postal_code: String,
    pub to_country_code: String,
    pub weight: f64,
    pub pickup_point: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ShippingRate {
    pub id: String,
    pub name: String,
    #[schema(value_type = f64)]
    pub price: Decimal,
    pub currency: String,
    pub estimated_days: u32,
    pub provider: CarrierCode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PickupPoint {
    pub id: String,
    pub name: String,
    pub address: String,
    pub city: String,
    pub postal_code: String,
    pub latitude: f64,
    pub longitude: f64,
    pub working_hours: Option<String>,
}

#[async_trait]
pub trait CarrierAdapter: Send + Sync {
    fn code(&self) -> CarrierCode;

    /// Books a shipment with the carrier. Never retried automatically.
    async fn create_shipment(
        &self,
        request: &CreateShipmentRequest,
    ) -> Result<BookedShipment, CarrierError>;

    async fn get_tracking(&self, tracking_number: &str) -> Result<TrackingInfo, CarrierError>;

    async fn calculate_rates(&self, request: &RateRequest)
        -> Result<Vec<ShippingRate>, CarrierError>;

    async fn get_label(&self, shipment_id: &str) -> Result<String, CarrierError>;

    async fn pickup_points(&self, _postal_code: &str) -> Result<Vec<PickupPoint>, CarrierError> {
        Err(CarrierError::Unsupported {
            provider: self.code(),
            message: "pickup points are not offered".to_string(),
        })
    }
}

/// Configured carriers keyed by code
pub struct CarrierRegistry {
    adapters: BTreeMap<CarrierCode, Arc<dyn CarrierAdapter>>,
    breakers: CircuitBreakerRegistry,
}

impl Default for CarrierRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CarrierRegistry {
    pub fn new() -> Self {
        Self {
            adapters: BTreeMap::new(),
            breakers: CircuitBreakerRegistry::new(CircuitBreakerConfig::default()),
        }
    }

    pub fn with_breaker_config(mut self, config: CircuitBreakerConfig) -> Self {
        self.breakers = CircuitBreakerRegistry::new(config);
        self
    }

    /// Builds adapters for every carrier that has a config block
    pub fn from_settings(settings: &CarrierSettings) -> Result<Self, ServiceError> {
        let mut registry = Self::new();

        if let Some(cfg) = &settings.hp_express {
            registry.register(Arc::new(hp_express::HpExpressAdapter::new(cfg, settings)?));
        }
        if let Some(cfg) = &settings.dhl {
            registry.register(Arc::new(dhl::DhlAdapter::new(cfg, settings)?));
        }
        if let Some(cfg) = &settings.overseas {
            registry.register(Arc::new(overseas::OverseasAdapter::new(cfg, settings)?));
        }
        if let Some(cfg) = &settings.boxnow {
            registry.register(Arc::new(boxnow::BoxNowAdapter::new(cfg, settings)?));
        }

        info!(
            carriers = ?registry.codes(),
            sandbox = settings.sandbox,
            "carrier registry initialized"
        );
        Ok(registry)
    }

    pub fn register(&mut self, adapter: Arc<dyn CarrierAdapter>) {
        self.adapters.insert(adapter.code(), adapter);
    }

    pub fn codes(&self) -> Vec<CarrierCode> {
        self.adapters.keys().copied().collect()
    }

    /// Breaker state per carrier that has been called at least once
    pub fn circuit_states(&self) -> BTreeMap<String, String> {
        self.breakers
            .states()
            .into_iter()
            .map(|(name, state)| (name, format!("{state:?}").to_ascii_lowercase()))
            .collect()
    }

    pub fn get(&self, code: CarrierCode) -> Result<Arc<dyn CarrierAdapter>, ServiceError> {
        self.adapters
            .get(&code)
            .cloned()
            .ok_or_else(|| ServiceError::UnknownProvider(code.to_string()))
    }

    /// Resolves a provider string such as `shipments.provider_id`
    pub fn get_by_name(&self, provider: &str) -> Result<Arc<dyn CarrierAdapter>, ServiceError> {
        self.get(CarrierCode::parse(provider)?)
    }

    async fn guarded<T, F, Fut>(&self, code: CarrierCode, f: F) -> Result<T, CarrierError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, CarrierError>>,
    {
        let breaker = self.breakers.get(code.as_ref());
        // Caller mistakes are not carrier outages and must not trip the breaker
        let outcome = breaker
            .call(move || async move {
                match f().await {
                    Err(err @ CarrierError::Unsupported { .. }) => Ok(Err(err)),
                    other => other.map(Ok),
                }
            })
            .await;

        match outcome {
            Ok(inner) => inner,
            Err(CircuitBreakerError::CircuitOpen) => Err(CarrierError::CircuitOpen { provider: code }),
            Err(CircuitBreakerError::Inner(err)) => Err(err),
        }
    }

    pub async fn track(
        &self,
        code: CarrierCode,
        tracking_number: &str,
    ) -> Result<TrackingInfo, ServiceError> {
        let adapter = self.get(code)?;
        let info = self
            .guarded(code, || adapter.get_tracking(tracking_number))
            .await?;
        Ok(info)
    }

    pub async fn create_shipment(
        &self,
        code: CarrierCode,
        request: &CreateShipmentRequest,
    ) -> Result<BookedShipment, ServiceError> {
        let adapter = self.get(code)?;
        let booked = self
            .guarded(code, || adapter.create_shipment(request))
            .await?;
        Ok(booked)
    }

    pub async fn label(&self, code: CarrierCode, shipment_id: &str) -> Result<String, ServiceError> {
        let adapter = self.get(code)?;
        let url = self.guarded(code, || adapter.get_label(shipment_id)).await?;
        Ok(url)
    }

    pub async fn pickup_points(&self, postal_code: &str) -> Result<Vec<PickupPoint>, ServiceError> {
        let adapter = self.get(CarrierCode::BoxNow)?;
        let points = self
            .guarded(CarrierCode::BoxNow, || adapter.pickup_points(postal_code))
            .await?;
        Ok(points)
    }

    /// Quotes every registered carrier. A failing carrier is logged and left out.
    pub async fn quote_rates(&self, request: &RateRequest) -> Vec<ShippingRate> {
        let quotes = futures::future::join_all(self.adapters.iter().map(|(code, adapter)| {
            let code = *code;
            let adapter = adapter.clone();
            async move {
                (
                    code,
                    self.guarded(code, || adapter.calculate_rates(request)).await,
                )
            }
        }))
        .await;

        let mut rates = Vec::new();
        for (code, quote) in quotes {
            match quote {
                Ok(mut found) => rates.append(&mut found),
                Err(err) => {
                    warn!(carrier = %code, error = %err, "rate quote failed");
                    metrics::counter!("carrier.rate_quote_failures", 1, "carrier" => code.to_string());
                }
            }
        }
        rates
    }
}

/// All carrier codes with display names, in a stable order
pub fn known_carriers() -> Vec<(CarrierCode, &'static str)> {
    CarrierCode::iter().map(|c| (c, c.display_name())).collect()
}
