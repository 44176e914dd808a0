use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QuerySelect, Set};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::db::DbPool;
use crate::errors::ServiceError;
use crate::models::shipment_issue::{self, ISSUE_TYPE_DELAY};
use crate::models::{shipment, ShipmentStatus};
use crate::notifications::NotificationDispatcher;

pub const DELAY_DESCRIPTION: &str = "Delivery is delayed beyond estimated delivery date";

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct DelayReport {
    pub overdue: usize,
    pub flagged: usize,
    pub notified: usize,
    /// Shipments whose issue could not be recorded
    pub failed: usize,
}

/// Flags shipments that missed their estimated delivery date
#[derive(Clone)]
pub struct DelayDetector {
    db: Arc<DbPool>,
    notifications: NotificationDispatcher,
}

impl DelayDetector {
    pub fn new(db: Arc<DbPool>, notifications: NotificationDispatcher) -> Self {
        Self { db, notifications }
    }

    /// Opens one `delay` issue per overdue shipment and tells the customer.
    /// Shipments that already have an unresolved delay issue are skipped.
    /// A shipment whose issue cannot be stored is counted as failed and the
    /// sweep moves on.
    #[instrument(skip(self))]
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<DelayReport, ServiceError> {
        let db = &*self.db;
        let overdue = shipment::Entity::find()
            .filter(shipment::Column::Status.is_not_in(ShipmentStatus::TERMINAL))
            .filter(shipment::Column::EstimatedDeliveryDate.lt(now))
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        let mut report = DelayReport {
            overdue: overdue.len(),
            ..Default::default()
        };
        if overdue.is_empty() {
            return Ok(report);
        }

        let already_flagged: HashSet<Uuid> = shipment_issue::Entity::find()
            .select_only()
            .column(shipment_issue::Column::ShipmentId)
            .filter(shipment_issue::Column::IssueType.eq(ISSUE_TYPE_DELAY))
            .filter(shipment_issue::Column::ResolvedAt.is_null())
            .filter(shipment_issue::Column::ShipmentId.is_in(overdue.iter().map(|s| s.id)))
            .into_tuple::<Uuid>()
            .all(db)
            .await
            .map_err(ServiceError::db_error)?
            .into_iter()
            .collect();

        for shipment in overdue
            .into_iter()
            .filter(|s| !already_flagged.contains(&s.id))
        {
            if let Err(err) = self.open_delay_issue(&shipment, now).await {
                report.failed += 1;
                error!(
                    shipment_id = %shipment.id,
                    error = %err,
                    "could not record delay issue"
                );
                continue;
            }
            report.flagged += 1;
            metrics::counter!("shipments.delayed", 1, "provider" => shipment.provider_id.clone());

            match self
                .notifications
                .shipment_delayed(shipment.order_id, Some(shipment.tracking_number.clone()))
                .await
            {
                Ok(()) => report.notified += 1,
                Err(err) => warn!(
                    shipment_id = %shipment.id,
                    error = %err,
                    "delay notification failed"
                ),
            }
        }

        if report.flagged > 0 || report.failed > 0 {
            info!(
                flagged = report.flagged,
                notified = report.notified,
                failed = report.failed,
                "delayed shipments flagged"
            );
        }
        Ok(report)
    }

    async fn open_delay_issue(
        &self,
        shipment: &shipment::Model,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        shipment_issue::ActiveModel {
            id: Set(Uuid::new_v4()),
            shipment_id: Set(shipment.id),
            issue_type: Set(ISSUE_TYPE_DELAY.to_string()),
            description: Set(DELAY_DESCRIPTION.to_string()),
            created_at: Set(now),
            resolved_at: Set(None),
            resolution: Set(None),
        }
        .insert(&*self.db)
        .await
        .map_err(ServiceError::db_error)?;
        Ok(())
    }

    /// Closes an issue with an admin-supplied resolution
    #[instrument(skip(self, resolution))]
    pub async fn resolve_issue(
        &self,
        issue_id: Uuid,
        resolution: &str,
    ) -> Result<shipment_issue::Model, ServiceError> {
        let resolution = resolution.trim();
        if resolution.is_empty() {
            return Err(ServiceError::ValidationError(
                "resolution must not be empty".to_string(),
            ));
        }

        let db = &*self.db;
        let issue = shipment_issue::Entity::find_by_id(issue_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Issue {issue_id} not found")))?;

        if !issue.is_open() {
            return Err(ServiceError::Conflict(format!(
                "Issue {issue_id} is already resolved"
            )));
        }

        let mut active: shipment_issue::ActiveModel = issue.into();
        active.resolved_at = Set(Some(Utc::now()));
        active.resolution = Set(Some(resolution.to_string()));
        let issue = active.update(db).await.map_err(ServiceError::db_error)?;

        info!(issue_id = %issue.id, shipment_id = %issue.shipment_id, "shipment issue resolved");
        Ok(issue)
    }
}
