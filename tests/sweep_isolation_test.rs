mod common;

use chrono::{Duration, Utc};
use sea_orm::{ActiveModelTrait, ConnectionTrait, EntityTrait, Set};
use serde_json::json;
use shipment_tracking::models::{shipment, webhook_retry, OrderStatus, ShipmentStatus};
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{TestApp, SCRIPTED};

async fn overdue(app: &TestApp, tracking_number: &str) -> shipment::Model {
    let seeded = app
        .seed_shipment(
            SCRIPTED,
            tracking_number,
            ShipmentStatus::Processing,
            OrderStatus::Processing,
        )
        .await;
    let mut active: shipment::ActiveModel = seeded.into();
    active.estimated_delivery_date = Set(Some(Utc::now() - Duration::days(2)));
    active.update(app.db()).await.unwrap()
}

#[tokio::test]
async fn delay_sweep_continues_past_a_failed_insert() {
    let app = TestApp::new().await;
    let broken = overdue(&app, "OV-DL-1").await;
    let healthy = overdue(&app, "OV-DL-2").await;

    app.db()
        .execute_unprepared(
            "CREATE TRIGGER reject_issue BEFORE INSERT ON shipment_issues \
             WHEN (SELECT tracking_number FROM shipments WHERE id = NEW.shipment_id) = 'OV-DL-1' \
             BEGIN SELECT RAISE(ABORT, 'issue storage offline'); END;",
        )
        .await
        .unwrap();

    let report = app.state.services.delays.sweep(Utc::now()).await.unwrap();
    assert_eq!(report.overdue, 2);
    assert_eq!(report.flagged, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.notified, 1);

    let sent = app.emails.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].data["trackingNumber"], healthy.tracking_number);

    app.db()
        .execute_unprepared("DROP TRIGGER reject_issue;")
        .await
        .unwrap();

    // The skipped shipment is picked up on the next run
    let next = app.state.services.delays.sweep(Utc::now()).await.unwrap();
    assert_eq!(next.flagged, 1);
    assert_eq!(next.failed, 0);
    let sent = app.emails.sent();
    assert_eq!(sent[1].data["trackingNumber"], broken.tracking_number);
}

#[tokio::test]
async fn retry_queue_continues_past_a_row_it_cannot_update() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;
    let app = TestApp::new().await;
    let queue = &app.state.services.webhook_retries;

    let t0 = Utc::now();
    let payload = json!({ "event": "shipment.status_changed", "data": {} });
    let stuck = queue
        .enqueue(
            &format!("{}/stuck", server.uri()),
            &payload,
            "HTTP error! status: 500",
            t0,
        )
        .await
        .unwrap();
    let flaky = queue
        .enqueue(
            &format!("{}/flaky", server.uri()),
            &payload,
            "HTTP error! status: 500",
            t0 + Duration::seconds(1),
        )
        .await
        .unwrap();

    app.db()
        .execute_unprepared(
            "CREATE TRIGGER pin_retry BEFORE UPDATE ON webhook_retries \
             WHEN OLD.endpoint LIKE '%/stuck' \
             BEGIN SELECT RAISE(ABORT, 'retry table is read-only'); END;",
        )
        .await
        .unwrap();

    let report = queue
        .process_due(t0 + Duration::minutes(6))
        .await
        .expect("one bad row does not fail the run");
    assert_eq!(report.attempted, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.rescheduled, 1);

    let stuck_row = webhook_retry::Entity::find_by_id(stuck)
        .one(app.db())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stuck_row.attempts, 1);
    let flaky_row = webhook_retry::Entity::find_by_id(flaky)
        .one(app.db())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(flaky_row.attempts, 2);
}

#[tokio::test]
async fn unreadable_stored_payload_is_dropped_unsent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/corrupt"))
        .respond_with(ResponseTemplate::new(204))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    let app = TestApp::new().await;
    let queue = &app.state.services.webhook_retries;

    let t0 = Utc::now();
    let corrupt = Uuid::new_v4();
    webhook_retry::ActiveModel {
        id: Set(corrupt),
        endpoint: Set(format!("{}/corrupt", server.uri())),
        payload: Set("{\"event\": \"shipment.status_chan".to_string()),
        attempts: Set(1),
        max_attempts: Set(5),
        next_retry: Set(t0),
        last_error: Set(Some("HTTP error! status: 502".to_string())),
        created_at: Set(t0),
    }
    .insert(app.db())
    .await
    .unwrap();
    queue
        .enqueue(
            &format!("{}/hook", server.uri()),
            &json!({ "event": "shipment.status_changed" }),
            "HTTP error! status: 502",
            t0,
        )
        .await
        .unwrap();

    let report = queue.process_due(t0 + Duration::minutes(6)).await.unwrap();
    assert_eq!(report.attempted, 2);
    assert_eq!(report.dropped, 1);
    assert_eq!(report.delivered, 1);
    assert!(webhook_retry::Entity::find()
        .all(app.db())
        .await
        .unwrap()
        .is_empty());
}
