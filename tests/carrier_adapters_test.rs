use std::time::Duration;

use rust_decimal_macros::dec;
use serde_json::json;
use shipment_tracking::{
    carriers::{
        CarrierCode, CarrierRegistry, CreateShipmentRequest, Package, RateRequest, Recipient,
    },
    circuit_breaker::CircuitBreakerConfig,
    config::{BoxNowConfig, CarrierSettings, DhlConfig, HpExpressConfig},
    errors::ServiceError,
};
use uuid::Uuid;
use wiremock::matchers::{basic_auth, bearer_token, body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn dhl(server: &MockServer) -> CarrierSettings {
    CarrierSettings {
        dhl: Some(DhlConfig {
            api_key: "dhl-user".to_string(),
            api_secret: "dhl-pass".to_string(),
            account_number: "123456789".to_string(),
            webhook_secret: "s".to_string(),
            base_url: Some(server.uri()),
        }),
        ..CarrierSettings::default()
    }
}

fn boxnow(server: &MockServer) -> CarrierSettings {
    CarrierSettings {
        boxnow: Some(BoxNowConfig {
            api_key: "box-key".to_string(),
            webhook_secret: "s".to_string(),
            base_url: Some(server.uri()),
        }),
        ..CarrierSettings::default()
    }
}

fn rate_request(pickup_point: bool) -> RateRequest {
    RateRequest {
        from_postal_code: "10431".to_string(),
        to_postal_code: "54624".to_string(),
        to_country_code: "GR".to_string(),
        weight: 7.0,
        pickup_point,
    }
}

#[tokio::test]
async fn dhl_tracking_reads_status_and_scans() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tracking/JD014600006101"))
        .and(basic_auth("dhl-user", "dhl-pass"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "shipments": [{
                "status": {
                    "statusCode": "delivered",
                    "timestamp": "2026-03-02T10:15:00Z",
                    "location": { "address": { "addressLocality": "Thessaloniki" } }
                },
                "events": [
                    { "statusCode": "pre-transit", "timestamp": "2026-02-28T08:00:00Z" },
                    {
                        "statusCode": "transit",
                        "timestamp": "2026-03-01T12:30:00Z",
                        "location": { "address": { "addressLocality": "Athens" } },
                        "description": "Arrived at hub"
                    }
                ]
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let registry = CarrierRegistry::from_settings(&dhl(&server)).unwrap();
    let info = registry
        .track(CarrierCode::Dhl, "JD014600006101")
        .await
        .unwrap();

    assert_eq!(info.status, "delivered");
    assert!(info.is_delivered);
    assert_eq!(info.delivery_date, Some(info.status_date));
    assert_eq!(info.location.as_deref(), Some("Thessaloniki"));
    assert_eq!(info.events.len(), 2);
    assert_eq!(info.events[1].location.as_deref(), Some("Athens"));
    assert_eq!(info.events[1].description.as_deref(), Some("Arrived at hub"));
}

#[tokio::test]
async fn carrier_error_status_surfaces_as_carrier_api_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .mount(&server)
        .await;

    let registry = CarrierRegistry::from_settings(&dhl(&server)).unwrap();
    let err = registry.track(CarrierCode::Dhl, "JD1").await.unwrap_err();

    match err {
        ServiceError::CarrierApiError { provider, message } => {
            assert_eq!(provider, "dhl");
            assert!(message.contains("500"), "{message}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn unregistered_carrier_is_an_unknown_provider() {
    let registry = CarrierRegistry::from_settings(&CarrierSettings::default()).unwrap();
    assert!(registry.codes().is_empty());

    let err = registry.track(CarrierCode::Overseas, "OV1").await.unwrap_err();
    assert!(matches!(err, ServiceError::UnknownProvider(p) if p == "overseas"));
}

#[tokio::test]
async fn repeated_failures_open_the_breaker() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;

    let registry = CarrierRegistry::from_settings(&dhl(&server))
        .unwrap()
        .with_breaker_config(CircuitBreakerConfig {
            failure_threshold: 2,
            timeout: Duration::from_secs(60),
            success_threshold: 1,
        });

    for _ in 0..2 {
        assert!(registry.track(CarrierCode::Dhl, "JD1").await.is_err());
    }
    let err = registry.track(CarrierCode::Dhl, "JD1").await.unwrap_err();
    match err {
        ServiceError::CarrierApiError { message, .. } => {
            assert!(message.contains("circuit"), "{message}")
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(
        registry.circuit_states().get("dhl").map(String::as_str),
        Some("open")
    );
}

#[tokio::test]
async fn boxnow_lists_lockers_with_api_key() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/boxes"))
        .and(header("X-API-Key", "box-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "boxes": [{
                "id": "box-17",
                "name": "AB Vasilopoulos Kalamaria",
                "address": { "street": "Komninon 12", "city": "Thessaloniki", "postcode": "55131" },
                "location": { "latitude": 40.58, "longitude": 22.95 },
                "workingHours": "24/7"
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let registry = CarrierRegistry::from_settings(&boxnow(&server)).unwrap();
    let points = registry.pickup_points(" 55131 ").await.unwrap();

    assert_eq!(points.len(), 1);
    assert_eq!(points[0].id, "box-17");
    assert_eq!(points[0].postal_code, "55131");
    assert_eq!(points[0].working_hours.as_deref(), Some("24/7"));

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests[0].url.query(), Some("postcode=55131"));
}

#[tokio::test]
async fn boxnow_tracking_uses_locker_names_as_locations() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tracking/BN-4410"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "IN_BOX",
            "lastUpdate": "2026-03-02T09:00:00Z",
            "currentBox": { "name": "Kalamaria 17" },
            "history": [
                { "status": "IN_TRANSIT", "timestamp": "2026-03-01T09:00:00Z" },
                { "status": "IN_BOX", "timestamp": "2026-03-02T09:00:00Z", "box": { "name": "Kalamaria 17" } }
            ]
        })))
        .mount(&server)
        .await;

    let registry = CarrierRegistry::from_settings(&boxnow(&server)).unwrap();
    let info = registry.track(CarrierCode::BoxNow, "BN-4410").await.unwrap();

    assert_eq!(info.status, "IN_BOX");
    assert!(!info.is_delivered);
    assert_eq!(info.location.as_deref(), Some("Kalamaria 17"));
    assert_eq!(info.events[0].location, None);
    assert_eq!(info.events[1].location.as_deref(), Some("Kalamaria 17"));
}

#[tokio::test]
async fn quotes_skip_failing_carriers() {
    let hp = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rates/calculate"))
        .and(bearer_token("hp-key"))
        .and(body_partial_json(json!({ "toPostalCode": "54624", "weight": 7.0 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "rates": [{ "id": "hp-std", "name": "HP Standard", "price": 5.2, "estimatedDays": 1 }]
        })))
        .mount(&hp)
        .await;
    let down = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&down)
        .await;

    let mut settings = dhl(&down);
    settings.hp_express = Some(HpExpressConfig {
        api_key: "hp-key".to_string(),
        webhook_secret: "s".to_string(),
        base_url: Some(hp.uri()),
    });
    settings.boxnow = boxnow(&down).boxnow;
    let registry = CarrierRegistry::from_settings(&settings).unwrap();

    let home = registry.quote_rates(&rate_request(false)).await;
    assert_eq!(home.len(), 1);
    assert_eq!(home[0].id, "hp-std");
    assert_eq!(home[0].provider, CarrierCode::HpExpress);

    // BoxNow prices lockers locally, without an API call
    let lockers = registry.quote_rates(&rate_request(true)).await;
    let boxnow_rate = lockers
        .iter()
        .find(|r| r.provider == CarrierCode::BoxNow)
        .expect("locker rate");
    assert_eq!(boxnow_rate.price, dec!(5.99));
}

fn booking(pickup_point_id: Option<&str>) -> CreateShipmentRequest {
    CreateShipmentRequest {
        order_id: Uuid::new_v4(),
        recipient: Recipient {
            name: "Eleni Georgiou".to_string(),
            street: "Egnatia 12".to_string(),
            city: "Thessaloniki".to_string(),
            postal_code: "54624".to_string(),
            country_code: "GR".to_string(),
            phone: "+302310000000".to_string(),
            email: "eleni@example.com".to_string(),
        },
        packages: vec![Package {
            weight: 1.5,
            width: Some(20.0),
            height: None,
            length: Some(40.0),
        }],
        pickup_point_id: pickup_point_id.map(str::to_string),
        shipping_rate_id: Some("P".to_string()),
    }
}

#[tokio::test]
async fn dhl_booking_returns_tracking_number_and_label() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/shipments"))
        .and(basic_auth("dhl-user", "dhl-pass"))
        .and(body_partial_json(json!({
            "productCode": "P",
            "accounts": [{ "typeCode": "shipper", "number": "123456789" }],
            "content": {
                "packages": [{
                    "weight": 1.5,
                    "dimensions": { "length": 40.0, "width": 20.0, "height": 30.0 }
                }]
            }
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "shipmentTrackingNumber": "JD014600009999",
            "documents": [
                { "typeCode": "invoice", "contentUrl": "https://dhl.test/invoice.pdf" },
                { "typeCode": "label", "contentUrl": "https://dhl.test/label.pdf" }
            ],
            "estimatedDeliveryDate": "2026-03-05T18:00:00Z"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/shipments/JD014600009999/documents"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "documents": [{ "typeCode": "label", "contentUrl": "https://dhl.test/label-2.pdf" }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let registry = CarrierRegistry::from_settings(&dhl(&server)).unwrap();
    let booked = registry
        .create_shipment(CarrierCode::Dhl, &booking(None))
        .await
        .unwrap();

    assert_eq!(booked.tracking_number, "JD014600009999");
    assert_eq!(booked.shipment_id, "JD014600009999");
    assert_eq!(booked.label_url.as_deref(), Some("https://dhl.test/label.pdf"));
    assert_eq!(
        booked.estimated_delivery_date.map(|d| d.to_rfc3339()),
        Some("2026-03-05T18:00:00+00:00".to_string())
    );

    let label = registry
        .label(CarrierCode::Dhl, &booked.shipment_id)
        .await
        .unwrap();
    assert_eq!(label, "https://dhl.test/label-2.pdf");
}

#[tokio::test]
async fn failed_booking_is_not_resubmitted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/shipments"))
        .respond_with(ResponseTemplate::new(500).set_body_string("booking backend down"))
        .expect(1)
        .mount(&server)
        .await;

    let registry = CarrierRegistry::from_settings(&dhl(&server)).unwrap();
    let err = registry
        .create_shipment(CarrierCode::Dhl, &booking(None))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::CarrierApiError { .. }), "{err:?}");
}

#[tokio::test]
async fn boxnow_booking_targets_the_chosen_locker() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/shipments"))
        .and(header("X-API-Key", "box-key"))
        .and(body_partial_json(json!({
            "delivery": { "boxId": "BX-204" },
            "recipient": { "name": "Eleni Georgiou", "email": "eleni@example.com" },
            "parcels": [{ "weight": 1500.0, "width": 200.0, "height": 300.0, "length": 400.0 }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "bn-7781",
            "trackingCode": "BN123456",
            "labelUrl": "https://boxnow.test/labels/bn-7781.pdf",
            "estimatedDeliveryDays": 2
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/shipments/bn-7781/label"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "labelUrl": "https://boxnow.test/labels/bn-7781-reprint.pdf"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let registry = CarrierRegistry::from_settings(&boxnow(&server)).unwrap();
    let booked = registry
        .create_shipment(CarrierCode::BoxNow, &booking(Some("BX-204")))
        .await
        .unwrap();

    assert_eq!(booked.shipment_id, "bn-7781");
    assert_eq!(booked.tracking_number, "BN123456");
    assert_eq!(
        booked.label_url.as_deref(),
        Some("https://boxnow.test/labels/bn-7781.pdf")
    );
    assert!(booked.estimated_delivery_date.is_some());

    let label = registry.label(CarrierCode::BoxNow, "bn-7781").await.unwrap();
    assert_eq!(label, "https://boxnow.test/labels/bn-7781-reprint.pdf");
}

#[tokio::test]
async fn boxnow_booking_without_locker_is_refused_locally() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let registry = CarrierRegistry::from_settings(&boxnow(&server)).unwrap();
    for pickup_point in [None, Some("")] {
        let err = registry
            .create_shipment(CarrierCode::BoxNow, &booking(pickup_point))
            .await
            .unwrap_err();
        match err {
            ServiceError::BadRequest(message) => {
                assert!(message.contains("pickup point"), "{message}")
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
