#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    extract::ConnectInfo,
    http::{Method, Request},
    Router,
};
use chrono::{DateTime, Utc};
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use serde_json::Value;
use shipment_tracking::{
    carriers::{
        BookedShipment, CarrierAdapter, CarrierCode, CarrierError, CarrierRegistry,
        CreateShipmentRequest, RateRequest, ShippingRate, TrackingEvent, TrackingInfo,
    },
    config::{AppConfig, BoxNowConfig, DhlConfig, HpExpressConfig, OverseasConfig},
    db,
    handlers::AppServices,
    models::{
        order, order_item, order_status_history, shipment, shipment_tracking_event, OrderStatus,
        ShipmentStatus,
    },
    notifications::{EmailSender, NotificationError},
    AppState,
};
use tower::ServiceExt;
use uuid::Uuid;

pub const ADMIN_KEY: &str = "admin-test-key";
pub const MANUAL_KEY: &str = "manual-test-key";
pub const DHL_SECRET: &str = "dhl-webhook-secret";
pub const HP_EXPRESS_SECRET: &str = "hp-webhook-secret";
pub const OVERSEAS_SECRET: &str = "overseas-webhook-secret";
pub const BOXNOW_SECRET: &str = "boxnow-webhook-secret";

/// Webhook secret `test_config` sets for `provider`
pub fn webhook_secret(provider: CarrierCode) -> &'static str {
    match provider {
        CarrierCode::HpExpress => HP_EXPRESS_SECRET,
        CarrierCode::Dhl => DHL_SECRET,
        CarrierCode::Overseas => OVERSEAS_SECRET,
        CarrierCode::BoxNow => BOXNOW_SECRET,
    }
}

/// Nothing listens here; outbound carrier calls fail fast
const UNREACHABLE: &str = "http://127.0.0.1:9";

/// Carrier the harness scripts; its vocabulary is the Overseas one
pub const SCRIPTED: CarrierCode = CarrierCode::Overseas;

#[derive(Debug, Clone, PartialEq)]
pub struct SentEmail {
    pub to: String,
    pub template: String,
    pub data: Value,
}

/// Keeps every email instead of sending it
#[derive(Default)]
pub struct RecordingEmailSender {
    sent: Mutex<Vec<SentEmail>>,
}

impl RecordingEmailSender {
    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmailSender for RecordingEmailSender {
    async fn send_template(
        &self,
        to: &str,
        template: &str,
        data: &Value,
    ) -> Result<(), NotificationError> {
        self.sent.lock().unwrap().push(SentEmail {
            to: to.to_string(),
            template: template.to_string(),
            data: data.clone(),
        });
        Ok(())
    }
}

/// Answers tracking lookups from a table filled in by the test
pub struct ScriptedCarrier {
    code: CarrierCode,
    tracking: Mutex<HashMap<String, TrackingInfo>>,
}

impl ScriptedCarrier {
    pub fn new(code: CarrierCode) -> Self {
        Self {
            code,
            tracking: Mutex::new(HashMap::new()),
        }
    }

    /// Next lookup of `tracking_number` reports `status` with the given scans
    pub fn script(
        &self,
        tracking_number: &str,
        status: &str,
        status_date: DateTime<Utc>,
        events: Vec<(&str, DateTime<Utc>)>,
    ) {
        let is_delivered = status == "DELIVERED";
        let info = TrackingInfo {
            status: status.to_string(),
            status_date,
            location: Some("Athens".to_string()),
            events: events
                .into_iter()
                .map(|(status, timestamp)| TrackingEvent {
                    status: status.to_string(),
                    timestamp,
                    location: Some("Athens".to_string()),
                    description: None,
                })
                .collect(),
            is_delivered,
            delivery_date: is_delivered.then_some(status_date),
        };
        self.tracking
            .lock()
            .unwrap()
            .insert(tracking_number.to_string(), info);
    }
}

#[async_trait]
impl CarrierAdapter for ScriptedCarrier {
    fn code(&self) -> CarrierCode {
        self.code
    }

    async fn create_shipment(
        &self,
        request: &CreateShipmentRequest,
    ) -> Result<BookedShipment, CarrierError> {
        Ok(BookedShipment {
            shipment_id: request.order_id.to_string(),
            tracking_number: format!("SCR-{}", request.order_id.simple()),
            label_url: None,
            estimated_delivery_date: None,
        })
    }

    async fn get_tracking(&self, tracking_number: &str) -> Result<TrackingInfo, CarrierError> {
        self.tracking
            .lock()
            .unwrap()
            .get(tracking_number)
            .cloned()
            .ok_or_else(|| CarrierError::Status {
                provider: self.code,
                status: 404,
                body: format!("unknown tracking number {tracking_number}"),
            })
    }

    async fn calculate_rates(
        &self,
        _request: &RateRequest,
    ) -> Result<Vec<ShippingRate>, CarrierError> {
        Ok(vec![ShippingRate {
            id: "scripted-standard".to_string(),
            name: "Scripted Standard".to_string(),
            price: dec!(4.50),
            currency: "EUR".to_string(),
            estimated_days: 2,
            provider: self.code,
        }])
    }

    async fn get_label(&self, shipment_id: &str) -> Result<String, CarrierError> {
        Ok(format!("https://labels.test/{shipment_id}.pdf"))
    }
}

/// Application state backed by an in-memory SQLite database
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub carrier: Arc<ScriptedCarrier>,
    pub emails: Arc<RecordingEmailSender>,
}

pub fn test_config() -> AppConfig {
    let mut cfg = AppConfig::new("sqlite::memory:", "test");
    // One connection keeps every query on the same in-memory database
    cfg.db_max_connections = 1;
    cfg.db_min_connections = 1;
    cfg.db_idle_timeout_secs = 3_600;
    cfg.admin_api_key = Some(ADMIN_KEY.to_string());
    cfg.manual_tracking_api_key = Some(MANUAL_KEY.to_string());
    cfg.carriers.hp_express = Some(HpExpressConfig {
        api_key: "hp-key".to_string(),
        webhook_secret: HP_EXPRESS_SECRET.to_string(),
        base_url: Some(UNREACHABLE.to_string()),
    });
    cfg.carriers.dhl = Some(DhlConfig {
        api_key: "dhl-key".to_string(),
        api_secret: "dhl-api-secret".to_string(),
        account_number: "123456789".to_string(),
        webhook_secret: DHL_SECRET.to_string(),
        base_url: Some(UNREACHABLE.to_string()),
    });
    cfg.carriers.overseas = Some(OverseasConfig {
        api_key: "overseas-key".to_string(),
        webhook_secret: OVERSEAS_SECRET.to_string(),
        base_url: Some(UNREACHABLE.to_string()),
    });
    cfg.carriers.boxnow = Some(BoxNowConfig {
        api_key: "boxnow-key".to_string(),
        webhook_secret: BOXNOW_SECRET.to_string(),
        base_url: Some(UNREACHABLE.to_string()),
    });
    cfg
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(cfg: AppConfig) -> Self {
        let emails = Arc::new(RecordingEmailSender::default());
        Self::with_sender(cfg, emails.clone(), emails).await
    }

    /// Same wiring, with `sender` delivering the emails instead of the recorder
    pub async fn with_sender(
        cfg: AppConfig,
        sender: Arc<dyn EmailSender>,
        emails: Arc<RecordingEmailSender>,
    ) -> Self {
        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db_arc = Arc::new(pool);

        let carrier = Arc::new(ScriptedCarrier::new(SCRIPTED));
        let mut registry = CarrierRegistry::new();
        registry.register(carrier.clone());

        let services = AppServices::new(db_arc.clone(), &cfg, Arc::new(registry), sender)
            .expect("services should build");

        let state = AppState::new(db_arc, cfg, services);
        let router = shipment_tracking::router(state.clone());

        Self {
            router,
            state,
            carrier,
            emails,
        }
    }

    pub fn db(&self) -> &db::DbPool {
        &self.state.db
    }

    /// Order with one line item and no shipment yet
    pub async fn seed_order(&self, order_status: OrderStatus, email: &str) -> order::Model {
        let now = Utc::now();
        let order_id = Uuid::new_v4();

        let order = order::ActiveModel {
            id: Set(order_id),
            status: Set(order_status),
            payment_status: Set("paid".to_string()),
            customer_email: Set(email.to_string()),
            customer_name: Set("Maria Papadopoulou".to_string()),
            total_amount: Set(dec!(59.90)),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(self.db())
        .await
        .expect("seed order");

        order_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            name: Set("Espresso grinder".to_string()),
            quantity: Set(1),
            price: Set(dec!(59.90)),
        }
        .insert(self.db())
        .await
        .expect("seed order item");

        order
    }

    /// Order with one line item, plus its shipment
    pub async fn seed_shipment(
        &self,
        provider: CarrierCode,
        tracking_number: &str,
        status: ShipmentStatus,
        order_status: OrderStatus,
    ) -> shipment::Model {
        let now = Utc::now();
        let order_id = self
            .seed_order(order_status, &format!("{tracking_number}@example.com"))
            .await
            .id;

        shipment::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            provider_id: Set(provider.to_string()),
            tracking_number: Set(tracking_number.to_string()),
            status: Set(status),
            raw_status: Set(None),
            estimated_delivery_date: Set(None),
            actual_delivery_date: Set(None),
            shipping_rate_id: Set(None),
            label_url: Set(None),
            weight: Set(Some(2.5)),
            shipping_cost: Set(Some(4.5)),
            priority: Set(Some("normal".to_string())),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(self.db())
        .await
        .expect("seed shipment")
    }

    pub async fn shipment(&self, id: Uuid) -> shipment::Model {
        shipment::Entity::find_by_id(id)
            .one(self.db())
            .await
            .expect("load shipment")
            .expect("shipment exists")
    }

    pub async fn order(&self, id: Uuid) -> order::Model {
        order::Entity::find_by_id(id)
            .one(self.db())
            .await
            .expect("load order")
            .expect("order exists")
    }

    pub async fn events(&self, shipment_id: Uuid) -> Vec<shipment_tracking_event::Model> {
        shipment_tracking_event::Entity::find()
            .filter(shipment_tracking_event::Column::ShipmentId.eq(shipment_id))
            .order_by_asc(shipment_tracking_event::Column::Timestamp)
            .all(self.db())
            .await
            .expect("load events")
    }

    pub async fn history(&self, order_id: Uuid) -> Vec<order_status_history::Model> {
        order_status_history::Entity::find()
            .filter(order_status_history::Column::OrderId.eq(order_id))
            .all(self.db())
            .await
            .expect("load order history")
    }

    /// Send a JSON request with extra headers
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> axum::response::Response {
        let bytes = body
            .map(|json| serde_json::to_vec(&json).expect("failed to serialize json request body"));
        self.send(method, uri, bytes, headers).await
    }

    /// Send raw bytes, as carriers do
    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        body: Option<Vec<u8>>,
        headers: &[(&str, &str)],
    ) -> axum::response::Response {
        self.send_from(None, method, uri, body, headers).await
    }

    /// Same as `send`, with the connection's peer address attached
    pub async fn send_from(
        &self,
        peer: Option<SocketAddr>,
        method: Method,
        uri: &str,
        body: Option<Vec<u8>>,
        headers: &[(&str, &str)],
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(addr) = peer {
            builder = builder.extension(ConnectInfo(addr));
        }
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let body = match body {
            Some(bytes) => {
                builder = builder.header("content-type", "application/json");
                Body::from(bytes)
            }
            None => Body::empty(),
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    pub async fn admin(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        self.request(method, uri, body, &[("x-admin-key", ADMIN_KEY)])
            .await
    }
}

pub async fn json_body(response: axum::response::Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("response is JSON")
}
