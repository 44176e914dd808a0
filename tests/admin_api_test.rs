mod common;

use axum::http::{Method, StatusCode};
use chrono::{Duration, Utc};
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde_json::json;
use shipment_tracking::{
    carriers::CarrierCode,
    models::{shipment, shipment_issue, OrderStatus, ShipmentStatus},
    services::delay_detection::DELAY_DESCRIPTION,
};
use uuid::Uuid;

use common::{json_body, TestApp, SCRIPTED};

async fn set_eta(app: &TestApp, model: shipment::Model, eta: chrono::DateTime<Utc>) -> shipment::Model {
    let mut active: shipment::ActiveModel = model.into();
    active.estimated_delivery_date = Set(Some(eta));
    active.update(app.db()).await.expect("set eta")
}

#[tokio::test]
async fn admin_routes_require_the_admin_key() {
    let app = TestApp::new().await;

    let missing = app
        .request(Method::GET, "/shipping/admin/shipments", None, &[])
        .await;
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

    let wrong = app
        .request(
            Method::GET,
            "/shipping/admin/filter-options",
            None,
            &[("x-admin-key", "nope")],
        )
        .await;
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

    let ok = app.admin(Method::GET, "/shipping/admin/shipments", None).await;
    assert_eq!(ok.status(), StatusCode::OK);
}

#[tokio::test]
async fn admin_routes_are_closed_without_a_configured_key() {
    let mut cfg = common::test_config();
    cfg.admin_api_key = None;
    let app = TestApp::with_config(cfg).await;

    let response = app.admin(Method::GET, "/shipping/admin/shipments", None).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn listing_filters_and_paginates() {
    let app = TestApp::new().await;
    for n in 0..3 {
        app.seed_shipment(
            SCRIPTED,
            &format!("OV-L{n}"),
            ShipmentStatus::Processing,
            OrderStatus::Processing,
        )
        .await;
    }
    let delivered = app
        .seed_shipment(
            CarrierCode::Dhl,
            "JD-L9",
            ShipmentStatus::Delivered,
            OrderStatus::Delivered,
        )
        .await;

    let response = app
        .admin(
            Method::GET,
            "/shipping/admin/shipments?status=processing&limit=2&page=2",
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let payload = json_body(response).await;
    assert_eq!(payload["data"]["total"], 3);
    assert_eq!(payload["data"]["total_pages"], 2);
    assert_eq!(payload["data"]["items"].as_array().unwrap().len(), 1);

    let response = app
        .admin(Method::GET, "/shipping/admin/shipments?provider=dhl", None)
        .await;
    let payload = json_body(response).await;
    let items = payload["data"]["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["id"], delivered.id.to_string());
    assert_eq!(items[0]["is_delayed"], false);

    let response = app
        .admin(Method::GET, "/shipping/admin/shipments?search=OV-L1", None)
        .await;
    let payload = json_body(response).await;
    assert_eq!(payload["data"]["total"], 1);
    assert_eq!(payload["data"]["items"][0]["tracking_number"], "OV-L1");
}

#[tokio::test]
async fn delayed_filter_and_issue_flags() {
    let app = TestApp::new().await;
    let late = app
        .seed_shipment(SCRIPTED, "OV-D1", ShipmentStatus::Processing, OrderStatus::Processing)
        .await;
    let late = set_eta(&app, late, Utc::now() - Duration::days(2)).await;
    let on_time = app
        .seed_shipment(SCRIPTED, "OV-D2", ShipmentStatus::Processing, OrderStatus::Processing)
        .await;
    set_eta(&app, on_time, Utc::now() + Duration::days(2)).await;

    let report = app
        .state
        .services
        .delays
        .sweep(Utc::now())
        .await
        .expect("delay sweep");
    assert_eq!(report.flagged, 1);

    let response = app
        .admin(Method::GET, "/shipping/admin/shipments?is_delayed=true", None)
        .await;
    let payload = json_body(response).await;
    let items = payload["data"]["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["id"], late.id.to_string());
    assert_eq!(items[0]["is_delayed"], true);
    assert_eq!(items[0]["has_issues"], true);

    let response = app
        .admin(
            Method::GET,
            "/shipping/admin/shipments?has_issues=false",
            None,
        )
        .await;
    let payload = json_body(response).await;
    assert_eq!(payload["data"]["total"], 1);
    assert_eq!(payload["data"]["items"][0]["tracking_number"], "OV-D2");
}

#[tokio::test]
async fn shipment_detail_includes_history_newest_first() {
    let app = TestApp::new().await;
    let shipment = app
        .seed_shipment(SCRIPTED, "OV-H1", ShipmentStatus::Pending, OrderStatus::Pending)
        .await;
    let t0 = Utc::now() - Duration::hours(3);
    let t1 = t0 + Duration::hours(1);
    app.carrier.script(
        "OV-H1",
        "IN_TRANSIT",
        t1,
        vec![("CREATED", t0), ("IN_TRANSIT", t1)],
    );

    let refresh = app
        .admin(
            Method::POST,
            &format!("/shipping/admin/shipments/{}/update-tracking", shipment.id),
            None,
        )
        .await;
    assert_eq!(refresh.status(), StatusCode::OK);

    let response = app
        .admin(
            Method::GET,
            &format!("/shipping/admin/shipments/{}", shipment.id),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let payload = json_body(response).await;
    let detail = &payload["data"];
    assert_eq!(detail["shipment"]["status"], "processing");
    assert_eq!(detail["order"]["status"], "processing");
    let history = detail["tracking_history"].as_array().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0]["status"], "processing");
    assert_eq!(history[1]["status"], "pending");

    let missing = app
        .admin(
            Method::GET,
            &format!("/shipping/admin/shipments/{}", Uuid::new_v4()),
            None,
        )
        .await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn single_update_on_terminal_shipment_conflicts() {
    let app = TestApp::new().await;
    let shipment = app
        .seed_shipment(SCRIPTED, "OV-T1", ShipmentStatus::Cancelled, OrderStatus::Cancelled)
        .await;

    let response = app
        .admin(
            Method::POST,
            &format!("/shipping/admin/shipments/{}/update-tracking", shipment.id),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn carrier_failure_on_single_update_is_a_bad_gateway() {
    let app = TestApp::new().await;
    let shipment = app
        .seed_shipment(SCRIPTED, "OV-T2", ShipmentStatus::Pending, OrderStatus::Pending)
        .await;

    let response = app
        .admin(
            Method::POST,
            &format!("/shipping/admin/shipments/{}/update-tracking", shipment.id),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn bulk_update_validates_and_is_rate_limited() {
    let mut cfg = common::test_config();
    cfg.rate_limits.bulk_update_per_minute = 2;
    let app = TestApp::with_config(cfg).await;
    let shipment = app
        .seed_shipment(SCRIPTED, "OV-B1", ShipmentStatus::Pending, OrderStatus::Pending)
        .await;

    let empty = app
        .admin(
            Method::POST,
            "/shipping/admin/shipments/bulk-update",
            Some(json!({ "shipmentIds": [] })),
        )
        .await;
    assert_eq!(empty.status(), StatusCode::BAD_REQUEST);

    let ok = app
        .admin(
            Method::POST,
            "/shipping/admin/shipments/bulk-update",
            Some(json!({ "shipmentIds": [shipment.id] })),
        )
        .await;
    assert_eq!(ok.status(), StatusCode::OK);
    let payload = json_body(ok).await;
    assert_eq!(payload["data"]["total"], 1);
    assert_eq!(payload["data"]["failed"], 1);

    let limited = app
        .admin(
            Method::POST,
            "/shipping/admin/shipments/bulk-update",
            Some(json!({ "shipmentIds": [shipment.id] })),
        )
        .await;
    assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn filter_options_reflect_stored_shipments() {
    let app = TestApp::new().await;
    app.seed_shipment(SCRIPTED, "OV-F1", ShipmentStatus::Processing, OrderStatus::Processing)
        .await;
    app.seed_shipment(CarrierCode::Dhl, "JD-F2", ShipmentStatus::Shipped, OrderStatus::Shipped)
        .await;

    let response = app
        .admin(Method::GET, "/shipping/admin/filter-options", None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let payload = json_body(response).await;
    let providers: Vec<&str> = payload["data"]["providers"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|p| p["id"].as_str())
        .collect();
    assert!(providers.contains(&"dhl"));
    assert!(providers.contains(&"overseas"));
    assert_eq!(payload["data"]["weightRange"]["min"], 2.5);
}

#[tokio::test]
async fn delay_sweep_flags_once_and_resolution_closes_issue() {
    let app = TestApp::new().await;
    let shipment = app
        .seed_shipment(SCRIPTED, "OV-R1", ShipmentStatus::Shipped, OrderStatus::Shipped)
        .await;
    let shipment = set_eta(&app, shipment, Utc::now() - Duration::hours(6)).await;

    let first = app.state.services.delays.sweep(Utc::now()).await.unwrap();
    let second = app.state.services.delays.sweep(Utc::now()).await.unwrap();
    assert_eq!((first.flagged, first.notified), (1, 1));
    assert_eq!((second.overdue, second.flagged), (1, 0));

    let emails = app.emails.sent();
    assert_eq!(emails.len(), 1);
    assert_eq!(emails[0].data["status"], "delayed");

    let issues = shipment_issue::Entity::find().all(app.db()).await.unwrap();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].shipment_id, shipment.id);
    assert_eq!(issues[0].description, DELAY_DESCRIPTION);

    let uri = format!("/shipping/admin/issues/{}/resolve", issues[0].id);
    let blank = app
        .admin(Method::POST, &uri, Some(json!({ "resolution": "" })))
        .await;
    assert_eq!(blank.status(), StatusCode::BAD_REQUEST);

    let resolved = app
        .admin(
            Method::POST,
            &uri,
            Some(json!({ "resolution": "Carrier confirmed new ETA" })),
        )
        .await;
    assert_eq!(resolved.status(), StatusCode::OK);
    let payload = json_body(resolved).await;
    assert_eq!(payload["data"]["resolution"], "Carrier confirmed new ETA");

    let again = app
        .admin(Method::POST, &uri, Some(json!({ "resolution": "again" })))
        .await;
    assert_eq!(again.status(), StatusCode::CONFLICT);

    // Once resolved, the next sweep opens a fresh issue
    let third = app.state.services.delays.sweep(Utc::now()).await.unwrap();
    assert_eq!(third.flagged, 1);
}

#[tokio::test]
async fn cleanup_prunes_closed_history_and_archives_old_issues() {
    let app = TestApp::new().await;
    let now = Utc::now();
    let closed = app
        .seed_shipment(SCRIPTED, "OV-C1", ShipmentStatus::Delivered, OrderStatus::Delivered)
        .await;
    let open = app
        .seed_shipment(SCRIPTED, "OV-C2", ShipmentStatus::Processing, OrderStatus::Processing)
        .await;

    for (shipment_id, age_days) in [(closed.id, 400), (closed.id, 10), (open.id, 400)] {
        shipment_tracking::models::shipment_tracking_event::ActiveModel {
            id: Set(Uuid::new_v4()),
            shipment_id: Set(shipment_id),
            status: Set("processing".to_string()),
            timestamp: Set(now - Duration::days(age_days)),
            location: Set(None),
            description: Set(None),
            created_at: Set(now - Duration::days(age_days)),
        }
        .insert(app.db())
        .await
        .unwrap();
    }

    shipment_issue::ActiveModel {
        id: Set(Uuid::new_v4()),
        shipment_id: Set(closed.id),
        issue_type: Set("delay".to_string()),
        description: Set(DELAY_DESCRIPTION.to_string()),
        created_at: Set(now - Duration::days(200)),
        resolved_at: Set(Some(now - Duration::days(120))),
        resolution: Set(Some("Delivered late".to_string())),
    }
    .insert(app.db())
    .await
    .unwrap();

    let report = app
        .state
        .services
        .maintenance
        .cleanup(now)
        .await
        .expect("cleanup");
    assert_eq!(report.events_deleted, 1);
    assert_eq!(report.issues_archived, 1);

    assert_eq!(app.events(closed.id).await.len(), 1);
    assert_eq!(app.events(open.id).await.len(), 1);
    assert!(shipment_issue::Entity::find()
        .all(app.db())
        .await
        .unwrap()
        .is_empty());
    let archived = shipment_tracking::models::shipment_issue_archive::Entity::find()
        .all(app.db())
        .await
        .unwrap();
    assert_eq!(archived.len(), 1);
}

#[tokio::test]
async fn public_shipping_endpoints() {
    let app = TestApp::new().await;

    let providers = app
        .request(Method::GET, "/shipping/providers", None, &[])
        .await;
    assert_eq!(providers.status(), StatusCode::OK);
    let payload = json_body(providers).await;
    assert_eq!(payload["data"][0]["id"], "overseas");

    let rates = app
        .request(
            Method::GET,
            "/shipping/rates?weight=2.5&postal_code=10431",
            None,
            &[],
        )
        .await;
    assert_eq!(rates.status(), StatusCode::OK);
    let payload = json_body(rates).await;
    assert_eq!(payload["data"][0]["id"], "scripted-standard");

    let bad = app
        .request(
            Method::GET,
            "/shipping/rates?weight=0&postal_code=10431",
            None,
            &[],
        )
        .await;
    assert_eq!(bad.status(), StatusCode::BAD_REQUEST);

    // BoxNow is not registered in the harness
    let lockers = app
        .request(Method::GET, "/shipping/pickup-points?postcode=10431", None, &[])
        .await;
    assert_eq!(lockers.status(), StatusCode::BAD_REQUEST);

    let health = app.request(Method::GET, "/health", None, &[]).await;
    assert_eq!(health.status(), StatusCode::OK);
    let payload = json_body(health).await;
    assert_eq!(payload["status"], "up");
    assert_eq!(payload["database"], "up");
}
