use chrono::{DateTime, Months, Utc};
use sea_orm::sea_query::Query;
use sea_orm::{ColumnTrait, DatabaseTransaction, EntityTrait, QueryFilter};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;

use crate::db::{self, DbPool};
use crate::errors::ServiceError;
use crate::models::{
    shipment, shipment_issue, shipment_issue_archive, shipment_tracking_event, ShipmentStatus,
};

pub const EVENT_RETENTION_MONTHS: u32 = 6;
pub const RESOLVED_ISSUE_RETENTION_MONTHS: u32 = 3;

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct CleanupReport {
    pub events_deleted: u64,
    pub issues_archived: u64,
}

fn months_before(now: DateTime<Utc>, months: u32) -> Result<DateTime<Utc>, ServiceError> {
    now.checked_sub_months(Months::new(months))
        .ok_or_else(|| ServiceError::InternalError(format!("cannot step {months} months back")))
}

/// Retention housekeeping for tracking history and closed issues
#[derive(Clone)]
pub struct MaintenanceService {
    db: Arc<DbPool>,
}

impl MaintenanceService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub async fn cleanup(&self, now: DateTime<Utc>) -> Result<CleanupReport, ServiceError> {
        let event_cutoff = months_before(now, EVENT_RETENTION_MONTHS)?;
        let issue_cutoff = months_before(now, RESOLVED_ISSUE_RETENTION_MONTHS)?;

        let txn = db::begin(&self.db).await?;
        let outcome = purge(&txn, event_cutoff, issue_cutoff, now).await;
        let report = db::finish(txn, outcome).await?;

        info!(
            events_deleted = report.events_deleted,
            issues_archived = report.issues_archived,
            "maintenance cleanup finished"
        );
        Ok(report)
    }
}

async fn purge(
    txn: &DatabaseTransaction,
    event_cutoff: DateTime<Utc>,
    issue_cutoff: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<CleanupReport, ServiceError> {
    // History of open shipments is kept regardless of age
    let closed_shipments = Query::select()
        .column(shipment::Column::Id)
        .from(shipment::Entity)
        .and_where(shipment::Column::Status.is_in(ShipmentStatus::TERMINAL))
        .to_owned();

    let events_deleted = shipment_tracking_event::Entity::delete_many()
        .filter(shipment_tracking_event::Column::Timestamp.lt(event_cutoff))
        .filter(shipment_tracking_event::Column::ShipmentId.in_subquery(closed_shipments))
        .exec(txn)
        .await
        .map_err(ServiceError::db_error)?
        .rows_affected;

    let stale_issues = shipment_issue::Entity::find()
        .filter(shipment_issue::Column::ResolvedAt.is_not_null())
        .filter(shipment_issue::Column::ResolvedAt.lt(issue_cutoff))
        .all(txn)
        .await
        .map_err(ServiceError::db_error)?;

    if stale_issues.is_empty() {
        return Ok(CleanupReport {
            events_deleted,
            issues_archived: 0,
        });
    }

    let ids: Vec<_> = stale_issues.iter().map(|i| i.id).collect();
    shipment_issue_archive::Entity::insert_many(
        stale_issues
            .into_iter()
            .map(|issue| shipment_issue_archive::ActiveModel::from((issue, now))),
    )
    .exec_without_returning(txn)
    .await
    .map_err(ServiceError::db_error)?;

    let issues_archived = shipment_issue::Entity::delete_many()
        .filter(shipment_issue::Column::Id.is_in(ids))
        .exec(txn)
        .await
        .map_err(ServiceError::db_error)?
        .rows_affected;

    Ok(CleanupReport {
        events_deleted,
        issues_archived,
    })
}
