use chrono::{DateTime, Utc};
use futures::future::join_all;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder, QuerySelect, RelationTrait};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::carriers::{CarrierCode, CarrierRegistry};
use crate::db::DbPool;
use crate::errors::ServiceError;
use crate::models::{order, shipment, OrderStatus, ShipmentStatus};
use crate::services::reconciler::{ReconcileOutcome, ShipmentReconciler, TrackingUpdate};
use crate::webhooks::InboundTrackingUpdate;

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct SweepReport {
    pub checked: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BulkItemStatus {
    Updated,
    Unchanged,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BulkUpdateDetail {
    pub shipment_id: Uuid,
    pub status: BulkItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_status: Option<ShipmentStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_status: Option<ShipmentStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BulkUpdateDetail {
    fn new(shipment_id: Uuid, status: BulkItemStatus) -> Self {
        Self {
            shipment_id,
            status,
            old_status: None,
            new_status: None,
            reason: None,
            error: None,
        }
    }

    fn failed(shipment_id: Uuid, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(shipment_id, BulkItemStatus::Failed)
        }
    }

    fn skipped(shipment_id: Uuid, reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::new(shipment_id, BulkItemStatus::Skipped)
        }
    }

    fn from_outcome(shipment_id: Uuid, outcome: ReconcileOutcome) -> Self {
        match outcome {
            ReconcileOutcome::Transitioned { from, to, .. } => Self {
                old_status: Some(from),
                new_status: Some(to),
                ..Self::new(shipment_id, BulkItemStatus::Updated)
            },
            ReconcileOutcome::Unchanged { status } => Self {
                old_status: Some(status),
                new_status: Some(status),
                ..Self::new(shipment_id, BulkItemStatus::Unchanged)
            },
            ReconcileOutcome::AlreadyTerminal { status } => {
                Self::skipped(shipment_id, terminal_reason(status))
            }
            ReconcileOutcome::Rejected { from, to } => Self {
                old_status: Some(from),
                reason: Some(format!("Carrier reported {to} after {from}")),
                ..Self::new(shipment_id, BulkItemStatus::Skipped)
            },
            ReconcileOutcome::Unrecognized { raw } => Self {
                reason: Some(format!("Unrecognized carrier status: {raw}")),
                ..Self::new(shipment_id, BulkItemStatus::Unchanged)
            },
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct BulkUpdateResult {
    pub total: usize,
    pub updated: usize,
    pub failed: usize,
    pub skipped: usize,
    pub details: Vec<BulkUpdateDetail>,
}

impl BulkUpdateResult {
    fn push(&mut self, detail: BulkUpdateDetail) {
        match detail.status {
            BulkItemStatus::Updated => self.updated += 1,
            BulkItemStatus::Failed => self.failed += 1,
            BulkItemStatus::Skipped => self.skipped += 1,
            BulkItemStatus::Unchanged => {}
        }
        self.details.push(detail);
    }
}

/// Result of a single admin refresh or an accepted webhook
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TrackingRefresh {
    pub shipment_id: Uuid,
    pub tracking_number: String,
    pub outcome: ReconcileOutcome,
}

fn terminal_reason(status: ShipmentStatus) -> String {
    format!("Shipment already in terminal state: {status}")
}

/// Drives reconciliation from the three trigger sources
#[derive(Clone)]
pub struct TrackingUpdateService {
    db: Arc<DbPool>,
    carriers: Arc<CarrierRegistry>,
    reconciler: ShipmentReconciler,
    batch_size: u64,
}

impl TrackingUpdateService {
    pub fn new(
        db: Arc<DbPool>,
        carriers: Arc<CarrierRegistry>,
        reconciler: ShipmentReconciler,
        batch_size: u64,
    ) -> Self {
        Self {
            db,
            carriers,
            reconciler,
            batch_size: batch_size.max(1),
        }
    }

    async fn poll(&self, shipment: &shipment::Model) -> Result<ReconcileOutcome, ServiceError> {
        let code = CarrierCode::parse(&shipment.provider_id)?;
        let info = self.carriers.track(code, &shipment.tracking_number).await?;
        let update = TrackingUpdate::from_carrier(code, info);
        self.reconciler.reconcile(shipment.id, &update).await
    }

    /// One page of the shipments the periodic poll looks at: open shipments
    /// whose order is still open, in id order after `after`.
    pub async fn active_shipments(
        &self,
        after: Option<Uuid>,
    ) -> Result<Vec<shipment::Model>, ServiceError> {
        let mut query = shipment::Entity::find()
            .join(
                sea_orm::JoinType::InnerJoin,
                shipment::Relation::Order.def(),
            )
            .filter(shipment::Column::Status.is_not_in(ShipmentStatus::TERMINAL))
            .filter(order::Column::Status.is_not_in(OrderStatus::TERMINAL));
        if let Some(cursor) = after {
            query = query.filter(shipment::Column::Id.gt(cursor));
        }
        query
            .order_by_asc(shipment::Column::Id)
            .limit(self.batch_size)
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)
    }

    /// Polls every active shipment, `batch_size` rows per page. A failing
    /// shipment never stops the sweep.
    #[instrument(skip(self))]
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, ServiceError> {
        let mut report = SweepReport::default();
        let mut cursor = None;

        loop {
            let page = self.active_shipments(cursor).await?;
            let Some(last) = page.last() else { break };
            cursor = Some(last.id);

            for shipment in &page {
                report.checked += 1;
                match self.poll(shipment).await {
                    Ok(outcome) if outcome.is_transition() => report.updated += 1,
                    Ok(_) => report.unchanged += 1,
                    Err(err) => {
                        report.failed += 1;
                        metrics::counter!(
                            "tracking.poll_failures",
                            1,
                            "provider" => shipment.provider_id.clone()
                        );
                        error!(
                            shipment_id = %shipment.id,
                            provider = %shipment.provider_id,
                            tracking_number = %shipment.tracking_number,
                            error = %err,
                            "tracking poll failed"
                        );
                    }
                }
            }

            if (page.len() as u64) < self.batch_size {
                break;
            }
        }

        info!(
            started_at = %now,
            checked = report.checked,
            updated = report.updated,
            failed = report.failed,
            "tracking sweep finished"
        );
        Ok(report)
    }

    /// Refreshes a list of shipments concurrently. Each id gets one detail row.
    #[instrument(skip(self, shipment_ids), fields(count = shipment_ids.len()))]
    pub async fn bulk_update(
        &self,
        shipment_ids: &[Uuid],
    ) -> Result<BulkUpdateResult, ServiceError> {
        let mut seen = HashSet::new();
        let ids: Vec<Uuid> = shipment_ids
            .iter()
            .copied()
            .filter(|id| seen.insert(*id))
            .collect();

        let mut found: HashMap<Uuid, shipment::Model> = shipment::Entity::find()
            .filter(shipment::Column::Id.is_in(ids.clone()))
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)?
            .into_iter()
            .map(|s| (s.id, s))
            .collect();

        let mut result = BulkUpdateResult {
            total: ids.len(),
            ..Default::default()
        };
        let mut pending = Vec::new();
        for id in &ids {
            match found.remove(id) {
                None => result.push(BulkUpdateDetail::failed(*id, "Shipment not found")),
                Some(s) if s.is_terminal() => {
                    result.push(BulkUpdateDetail::skipped(*id, terminal_reason(s.status)))
                }
                Some(s) => pending.push(s),
            }
        }

        let outcomes = join_all(pending.iter().map(|s| async move {
            match self.poll(s).await {
                Ok(outcome) => BulkUpdateDetail::from_outcome(s.id, outcome),
                Err(err) => {
                    warn!(shipment_id = %s.id, error = %err, "bulk tracking update failed");
                    BulkUpdateDetail::failed(s.id, err.response_message())
                }
            }
        }))
        .await;
        for detail in outcomes {
            result.push(detail);
        }

        info!(
            total = result.total,
            updated = result.updated,
            failed = result.failed,
            skipped = result.skipped,
            "bulk tracking update finished"
        );
        Ok(result)
    }

    /// Admin refresh of one shipment. Carrier failures are surfaced.
    #[instrument(skip(self))]
    pub async fn update_single(&self, shipment_id: Uuid) -> Result<TrackingRefresh, ServiceError> {
        let shipment = shipment::Entity::find_by_id(shipment_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound("Shipment not found".to_string()))?;

        if shipment.is_terminal() {
            return Err(ServiceError::Conflict(terminal_reason(shipment.status)));
        }

        let outcome = self.poll(&shipment).await?;
        Ok(TrackingRefresh {
            shipment_id: shipment.id,
            tracking_number: shipment.tracking_number,
            outcome,
        })
    }

    /// Applies a verified carrier push
    #[instrument(skip(self, push), fields(tracking_number = %push.tracking_number))]
    pub async fn handle_webhook(
        &self,
        provider: CarrierCode,
        push: InboundTrackingUpdate,
    ) -> Result<TrackingRefresh, ServiceError> {
        let shipment = shipment::Entity::find()
            .filter(shipment::Column::ProviderId.eq(provider.as_ref()))
            .filter(shipment::Column::TrackingNumber.eq(push.tracking_number.as_str()))
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "Shipment with tracking number {} not found",
                    push.tracking_number
                ))
            })?;

        let update = TrackingUpdate::from_webhook(provider, push);
        let outcome = self.reconciler.reconcile(shipment.id, &update).await?;
        Ok(TrackingRefresh {
            shipment_id: shipment.id,
            tracking_number: shipment.tracking_number,
            outcome,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bulk_result_counts_by_status() {
        let mut result = BulkUpdateResult {
            total: 4,
            ..Default::default()
        };
        let id = Uuid::new_v4();
        result.push(BulkUpdateDetail::failed(id, "Shipment not found"));
        result.push(BulkUpdateDetail::skipped(id, "done"));
        result.push(BulkUpdateDetail::from_outcome(
            id,
            ReconcileOutcome::Transitioned {
                from: ShipmentStatus::Processing,
                to: ShipmentStatus::Shipped,
                order_status: None,
                notified: false,
            },
        ));
        result.push(BulkUpdateDetail::from_outcome(
            id,
            ReconcileOutcome::Unchanged {
                status: ShipmentStatus::Shipped,
            },
        ));
        assert_eq!((result.updated, result.failed, result.skipped), (1, 1, 1));
        assert_eq!(result.details.len(), 4);
    }

    #[test]
    fn detail_serializes_camel_case_and_omits_empty_fields() {
        let detail = BulkUpdateDetail::from_outcome(
            Uuid::nil(),
            ReconcileOutcome::Transitioned {
                from: ShipmentStatus::Pending,
                to: ShipmentStatus::Processing,
                order_status: None,
                notified: false,
            },
        );
        let value = serde_json::to_value(&detail).unwrap();
        assert_eq!(value["status"], "updated");
        assert_eq!(value["oldStatus"], "pending");
        assert_eq!(value["newStatus"], "processing");
        assert!(value.get("error").is_none());
        assert!(value.get("shipmentId").is_some());
    }
}
