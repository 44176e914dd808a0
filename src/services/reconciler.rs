//! Applies a carrier status observation to a shipment and its order.
//!
//! All three trigger sources (inbound webhooks, the polling sweep and admin
//! actions) funnel through [`ShipmentReconciler::reconcile`]. Each call runs
//! in one transaction that locks the shipment row first, so racing triggers
//! for the same shipment serialize and only one of them can move the status.
//! Customer notifications and outbound webhooks are sent after commit.

use chrono::{DateTime, Utc};
use sea_orm::sea_query::OnConflict;
use sea_orm::{ActiveModelTrait, DatabaseTransaction, EntityTrait, QuerySelect, Set};
use serde::Serialize;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::carriers::{normalize, CarrierCode, NormalizedStatus, TrackingInfo};
use crate::db::{self, DbPool};
use crate::errors::ServiceError;
use crate::models::{
    order, order_status_history, shipment, shipment_tracking_event, OrderStatus, ShipmentStatus,
};
use crate::notifications::NotificationDispatcher;
use crate::services::order_bridge;
use crate::services::webhook_retry::WebhookRetryService;
use crate::webhooks::InboundTrackingUpdate;

pub const STATUS_CHANGED_EVENT: &str = "shipment.status_changed";

/// Tracking event ready for insertion, status already normalized
#[derive(Debug, Clone, PartialEq)]
pub struct NewTrackingEvent {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub location: Option<String>,
    pub description: Option<String>,
}

/// One observation of a shipment's state from any trigger source
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingUpdate {
    pub status: NormalizedStatus,
    pub raw_status: String,
    pub status_date: DateTime<Utc>,
    pub delivery_date: Option<DateTime<Utc>>,
    pub events: Vec<NewTrackingEvent>,
}

fn dedup_events(events: Vec<NewTrackingEvent>) -> Vec<NewTrackingEvent> {
    let mut seen = HashSet::new();
    events
        .into_iter()
        .filter(|e| seen.insert((e.status.clone(), e.timestamp)))
        .collect()
}

impl TrackingUpdate {
    /// From a polled carrier response
    pub fn from_carrier(carrier: CarrierCode, info: TrackingInfo) -> Self {
        let status = normalize(carrier, &info.status);
        let mut events: Vec<NewTrackingEvent> = info
            .events
            .into_iter()
            .map(|e| NewTrackingEvent {
                status: normalize(carrier, &e.status).event_label(),
                timestamp: e.timestamp,
                location: e.location,
                description: e.description,
            })
            .collect();
        if events.is_empty() {
            events.push(NewTrackingEvent {
                status: status.event_label(),
                timestamp: info.status_date,
                location: info.location,
                description: None,
            });
        }

        Self {
            status,
            raw_status: info.status,
            status_date: info.status_date,
            delivery_date: info.delivery_date,
            events: dedup_events(events),
        }
    }

    /// From a verified carrier push
    pub fn from_webhook(carrier: CarrierCode, push: InboundTrackingUpdate) -> Self {
        let status = normalize(carrier, &push.status);
        let event = NewTrackingEvent {
            status: status.event_label(),
            timestamp: push.timestamp,
            location: push.location,
            description: push.description,
        };
        Self {
            status,
            raw_status: push.status,
            status_date: push.timestamp,
            delivery_date: None,
            events: vec![event],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// Observation matched the stored status; nothing written
    Unchanged { status: ShipmentStatus },
    /// Shipment already closed; nothing written
    AlreadyTerminal { status: ShipmentStatus },
    Transitioned {
        from: ShipmentStatus,
        to: ShipmentStatus,
        order_status: Option<OrderStatus>,
        notified: bool,
    },
    /// Observation would move the shipment backwards
    Rejected {
        from: ShipmentStatus,
        to: ShipmentStatus,
    },
    /// Carrier status outside the known vocabulary; events kept, status untouched
    Unrecognized { raw: String },
}

impl ReconcileOutcome {
    pub fn is_transition(&self) -> bool {
        matches!(self, ReconcileOutcome::Transitioned { .. })
    }

    fn label(&self) -> &'static str {
        match self {
            ReconcileOutcome::Unchanged { .. } => "unchanged",
            ReconcileOutcome::AlreadyTerminal { .. } => "already_terminal",
            ReconcileOutcome::Transitioned { .. } => "transitioned",
            ReconcileOutcome::Rejected { .. } => "rejected",
            ReconcileOutcome::Unrecognized { .. } => "unrecognized",
        }
    }
}

/// Work that must wait for the commit
struct PostCommit {
    shipment_id: Uuid,
    order_id: Uuid,
    tracking_number: String,
    provider: String,
    order_status: Option<OrderStatus>,
}

struct Applied {
    outcome: ReconcileOutcome,
    post_commit: Option<PostCommit>,
}

impl Applied {
    fn only(outcome: ReconcileOutcome) -> Self {
        Self {
            outcome,
            post_commit: None,
        }
    }
}

pub fn order_history_note(status: ShipmentStatus) -> String {
    format!("Automatically updated based on shipping status: {status}")
}

#[derive(Clone)]
pub struct ShipmentReconciler {
    db: Arc<DbPool>,
    notifications: NotificationDispatcher,
    outbound: Arc<WebhookRetryService>,
}

impl ShipmentReconciler {
    pub fn new(
        db: Arc<DbPool>,
        notifications: NotificationDispatcher,
        outbound: Arc<WebhookRetryService>,
    ) -> Self {
        Self {
            db,
            notifications,
            outbound,
        }
    }

    /// Reconciles one observation. Lock conflicts are retried once.
    #[instrument(skip(self, update), fields(status = ?update.status))]
    pub async fn reconcile(
        &self,
        shipment_id: Uuid,
        update: &TrackingUpdate,
    ) -> Result<ReconcileOutcome, ServiceError> {
        let applied = match self.reconcile_once(shipment_id, update).await {
            Err(ServiceError::TransactionConflict(reason)) => {
                warn!(shipment_id = %shipment_id, %reason, "reconciliation conflicted, retrying once");
                metrics::counter!("shipments.reconcile_conflicts", 1);
                self.reconcile_once(shipment_id, update).await?
            }
            other => other?,
        };

        metrics::counter!("shipments.reconciled", 1, "outcome" => applied.outcome.label());

        let mut outcome = applied.outcome;
        if let Some(effects) = applied.post_commit {
            let notified = self.after_commit(&outcome, effects).await;
            if let ReconcileOutcome::Transitioned { notified: flag, .. } = &mut outcome {
                *flag = notified;
            }
        }
        Ok(outcome)
    }

    async fn reconcile_once(
        &self,
        shipment_id: Uuid,
        update: &TrackingUpdate,
    ) -> Result<Applied, ServiceError> {
        let txn = db::begin(&self.db).await?;
        let outcome = apply(&txn, shipment_id, update, Utc::now()).await;
        db::finish(txn, outcome).await
    }

    /// Side effects of a committed transition. Failures are logged only.
    async fn after_commit(&self, outcome: &ReconcileOutcome, effects: PostCommit) -> bool {
        let mut notified = false;
        if let Some(order_status) = effects.order_status {
            match self
                .notifications
                .order_status_changed(
                    effects.order_id,
                    order_status,
                    Some(effects.tracking_number.clone()),
                )
                .await
            {
                Ok(()) => notified = true,
                Err(err) => warn!(
                    order_id = %effects.order_id,
                    error = %err,
                    "order status notification failed"
                ),
            }
        }

        if let ReconcileOutcome::Transitioned { from, to, .. } = outcome {
            let data = json!({
                "shipment_id": effects.shipment_id,
                "order_id": effects.order_id,
                "provider": effects.provider,
                "tracking_number": effects.tracking_number,
                "from": from,
                "to": to,
                "order_status": effects.order_status,
            });
            if let Err(err) = self.outbound.publish(STATUS_CHANGED_EVENT, data).await {
                warn!(shipment_id = %effects.shipment_id, error = %err, "outbound webhook publish failed");
            }
        }
        notified
    }
}

async fn insert_events(
    txn: &DatabaseTransaction,
    shipment_id: Uuid,
    events: &[NewTrackingEvent],
    now: DateTime<Utc>,
) -> Result<(), ServiceError> {
    if events.is_empty() {
        return Ok(());
    }

    let rows = events.iter().map(|e| shipment_tracking_event::ActiveModel {
        id: Set(Uuid::new_v4()),
        shipment_id: Set(shipment_id),
        status: Set(e.status.clone()),
        timestamp: Set(e.timestamp),
        location: Set(e.location.clone()),
        description: Set(e.description.clone()),
        created_at: Set(now),
    });

    shipment_tracking_event::Entity::insert_many(rows)
        .on_conflict(
            OnConflict::columns([
                shipment_tracking_event::Column::ShipmentId,
                shipment_tracking_event::Column::Status,
                shipment_tracking_event::Column::Timestamp,
            ])
            .do_nothing()
            .to_owned(),
        )
        .exec_without_returning(txn)
        .await
        .map_err(ServiceError::db_error)?;
    Ok(())
}

async fn apply(
    txn: &DatabaseTransaction,
    shipment_id: Uuid,
    update: &TrackingUpdate,
    now: DateTime<Utc>,
) -> Result<Applied, ServiceError> {
    let shipment = shipment::Entity::find_by_id(shipment_id)
        .lock_exclusive()
        .one(txn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("Shipment {shipment_id} not found")))?;

    if shipment.is_terminal() {
        return Ok(Applied::only(ReconcileOutcome::AlreadyTerminal {
            status: shipment.status,
        }));
    }

    let next = match &update.status {
        NormalizedStatus::Known(next) => *next,
        NormalizedStatus::Unrecognized(raw) => {
            warn!(
                provider = %shipment.provider_id,
                tracking_number = %shipment.tracking_number,
                raw_status = %raw,
                "unrecognized carrier status"
            );
            metrics::counter!(
                "shipments.unrecognized_status",
                1,
                "provider" => shipment.provider_id.clone()
            );
            insert_events(txn, shipment.id, &update.events, now).await?;
            let mut active: shipment::ActiveModel = shipment.into();
            active.raw_status = Set(Some(raw.clone()));
            active.updated_at = Set(now);
            active.update(txn).await.map_err(ServiceError::db_error)?;
            return Ok(Applied::only(ReconcileOutcome::Unrecognized { raw: raw.clone() }));
        }
    };

    let from = shipment.status;
    if next == from {
        return Ok(Applied::only(ReconcileOutcome::Unchanged { status: from }));
    }
    if !from.can_transition_to(next) {
        warn!(
            shipment_id = %shipment.id,
            from = %from,
            to = %next,
            "ignoring backwards carrier status"
        );
        return Ok(Applied::only(ReconcileOutcome::Rejected { from, to: next }));
    }

    let order_id = shipment.order_id;
    let tracking_number = shipment.tracking_number.clone();
    let provider = shipment.provider_id.clone();

    let mut active: shipment::ActiveModel = shipment.into();
    active.status = Set(next);
    active.raw_status = Set(Some(update.raw_status.clone()));
    active.actual_delivery_date = Set((next == ShipmentStatus::Delivered)
        .then(|| update.delivery_date.unwrap_or(update.status_date)));
    active.updated_at = Set(now);
    active.update(txn).await.map_err(ServiceError::db_error)?;

    insert_events(txn, shipment_id, &update.events, now).await?;

    let order = order::Entity::find_by_id(order_id)
        .lock_exclusive()
        .one(txn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))?;

    let order_status = order_bridge::order_transition(order.status, next);
    if let Some(new_status) = order_status {
        let mut active: order::ActiveModel = order.into();
        active.status = Set(new_status);
        active.updated_at = Set(now);
        active.update(txn).await.map_err(ServiceError::db_error)?;

        order_status_history::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            status: Set(new_status),
            notes: Set(Some(order_history_note(next))),
            created_at: Set(now),
        }
        .insert(txn)
        .await
        .map_err(ServiceError::db_error)?;
    }

    info!(
        shipment_id = %shipment_id,
        from = %from,
        to = %next,
        order_status = ?order_status,
        "shipment status reconciled"
    );

    Ok(Applied {
        outcome: ReconcileOutcome::Transitioned {
            from,
            to: next,
            order_status,
            notified: false,
        },
        post_commit: Some(PostCommit {
            shipment_id,
            order_id,
            tracking_number,
            provider,
            order_status,
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::carriers::TrackingEvent;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn carrier_update_normalizes_events_and_drops_duplicates() {
        let info = TrackingInfo {
            status: "transit".into(),
            status_date: at(12),
            location: Some("Zagreb".into()),
            events: vec![
                TrackingEvent {
                    status: "pre-transit".into(),
                    timestamp: at(8),
                    location: None,
                    description: None,
                },
                TrackingEvent {
                    status: "transit".into(),
                    timestamp: at(12),
                    location: Some("Zagreb".into()),
                    description: None,
                },
                TrackingEvent {
                    status: "transit".into(),
                    timestamp: at(12),
                    location: Some("Zagreb".into()),
                    description: Some("dup".into()),
                },
            ],
            is_delivered: false,
            delivery_date: None,
        };

        let update = TrackingUpdate::from_carrier(CarrierCode::Dhl, info);
        assert_eq!(
            update.status,
            NormalizedStatus::Known(ShipmentStatus::Processing)
        );
        assert_eq!(update.raw_status, "transit");
        let labels: Vec<_> = update.events.iter().map(|e| e.status.as_str()).collect();
        assert_eq!(labels, vec!["pending", "processing"]);
    }

    #[test]
    fn carrier_update_without_history_records_current_status() {
        let info = TrackingInfo {
            status: "IN_BOX".into(),
            status_date: at(9),
            location: Some("Locker 12".into()),
            events: vec![],
            is_delivered: false,
            delivery_date: None,
        };
        let update = TrackingUpdate::from_carrier(CarrierCode::BoxNow, info);
        assert_eq!(update.events.len(), 1);
        assert_eq!(update.events[0].status, "shipped");
        assert_eq!(update.events[0].location.as_deref(), Some("Locker 12"));
    }

    #[test]
    fn unrecognized_webhook_status_keeps_raw_label() {
        let push = InboundTrackingUpdate {
            tracking_number: "OV1".into(),
            status: "AT_DEPOT".into(),
            timestamp: at(10),
            location: None,
            description: None,
        };
        let update = TrackingUpdate::from_webhook(CarrierCode::Overseas, push);
        assert_eq!(
            update.status,
            NormalizedStatus::Unrecognized("AT_DEPOT".into())
        );
        assert_eq!(update.events[0].status, "AT_DEPOT");
    }

    #[test]
    fn history_note_names_shipping_status() {
        assert_eq!(
            order_history_note(ShipmentStatus::Shipped),
            "Automatically updated based on shipping status: shipped"
        );
    }
}
