use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::sea_query::{Query, SelectStatement};
use sea_orm::{
    ColumnTrait, Condition, EntityTrait, Order, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::instrument;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::carriers::CarrierRegistry;
use crate::db::DbPool;
use crate::errors::ServiceError;
use crate::models::{
    order, shipment, shipment_issue, shipment_tracking_event, OrderStatus, ShipmentStatus,
};

pub const DEFAULT_PAGE_SIZE: u64 = 10;
pub const MAX_PAGE_SIZE: u64 = 100;
pub const PRIORITIES: [&str; 3] = ["high", "medium", "low"];

/// Columns the admin listing may be sorted by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    CreatedAt,
    Status,
    TrackingNumber,
    EstimatedDeliveryDate,
    ActualDeliveryDate,
}

impl SortField {
    /// Anything outside the allow-list sorts by creation time
    pub fn from_param(value: Option<&str>) -> Self {
        match value.map(str::trim).unwrap_or_default() {
            "status" => SortField::Status,
            "tracking_number" => SortField::TrackingNumber,
            "estimated_delivery_date" => SortField::EstimatedDeliveryDate,
            "actual_delivery_date" => SortField::ActualDeliveryDate,
            _ => SortField::CreatedAt,
        }
    }

    fn column(self) -> shipment::Column {
        match self {
            SortField::CreatedAt => shipment::Column::CreatedAt,
            SortField::Status => shipment::Column::Status,
            SortField::TrackingNumber => shipment::Column::TrackingNumber,
            SortField::EstimatedDeliveryDate => shipment::Column::EstimatedDeliveryDate,
            SortField::ActualDeliveryDate => shipment::Column::ActualDeliveryDate,
        }
    }
}

fn sort_order(value: Option<&str>) -> Order {
    match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
        Some("asc") => Order::Asc,
        _ => Order::Desc,
    }
}

fn split_list(value: &Option<String>) -> Vec<String> {
    value
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Query string of the admin shipment listing
#[derive(Debug, Default, Clone, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct ShipmentFilters {
    pub page: Option<u64>,
    pub limit: Option<u64>,
    pub status: Option<ShipmentStatus>,
    pub provider: Option<String>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    /// Tracking number fragment, or an exact shipment/order id
    pub search: Option<String>,
    pub is_delayed: Option<bool>,
    pub has_issues: Option<bool>,
    pub estimated_delivery_from: Option<DateTime<Utc>>,
    pub estimated_delivery_to: Option<DateTime<Utc>>,
    pub actual_delivery_from: Option<DateTime<Utc>>,
    pub actual_delivery_to: Option<DateTime<Utc>>,
    pub priority: Option<String>,
    pub weight_min: Option<f64>,
    pub weight_max: Option<f64>,
    pub price_min: Option<f64>,
    pub price_max: Option<f64>,
    /// Comma separated tracking event locations
    pub locations: Option<String>,
    /// Comma separated unresolved issue types
    pub issue_types: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

impl ShipmentFilters {
    pub fn page(&self) -> u64 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn limit(&self) -> u64 {
        self.limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE)
    }

    fn condition(&self, now: DateTime<Utc>) -> Condition {
        let mut cond = Condition::all();

        if let Some(status) = self.status {
            cond = cond.add(shipment::Column::Status.eq(status));
        }
        if let Some(provider) = &self.provider {
            cond = cond.add(shipment::Column::ProviderId.eq(provider.as_str()));
        }
        if let Some(from) = self.date_from {
            cond = cond.add(shipment::Column::CreatedAt.gte(from));
        }
        if let Some(to) = self.date_to {
            cond = cond.add(shipment::Column::CreatedAt.lte(to));
        }
        if let Some(search) = self.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let mut any = Condition::any().add(shipment::Column::TrackingNumber.contains(search));
            if let Ok(id) = Uuid::parse_str(search) {
                any = any
                    .add(shipment::Column::Id.eq(id))
                    .add(shipment::Column::OrderId.eq(id));
            }
            cond = cond.add(any);
        }

        match self.is_delayed {
            Some(true) => {
                cond = cond
                    .add(shipment::Column::Status.is_not_in(ShipmentStatus::TERMINAL))
                    .add(shipment::Column::EstimatedDeliveryDate.lt(now));
            }
            Some(false) => {
                cond = cond.add(
                    Condition::any()
                        .add(shipment::Column::Status.is_in(ShipmentStatus::TERMINAL))
                        .add(shipment::Column::EstimatedDeliveryDate.is_null())
                        .add(shipment::Column::EstimatedDeliveryDate.gte(now)),
                );
            }
            None => {}
        }

        match self.has_issues {
            Some(true) => cond = cond.add(shipment::Column::Id.in_subquery(open_issues(&[]))),
            Some(false) => {
                cond = cond.add(shipment::Column::Id.not_in_subquery(open_issues(&[])))
            }
            None => {}
        }

        if let Some(from) = self.estimated_delivery_from {
            cond = cond.add(shipment::Column::EstimatedDeliveryDate.gte(from));
        }
        if let Some(to) = self.estimated_delivery_to {
            cond = cond.add(shipment::Column::EstimatedDeliveryDate.lte(to));
        }
        if let Some(from) = self.actual_delivery_from {
            cond = cond.add(shipment::Column::ActualDeliveryDate.gte(from));
        }
        if let Some(to) = self.actual_delivery_to {
            cond = cond.add(shipment::Column::ActualDeliveryDate.lte(to));
        }
        if let Some(priority) = &self.priority {
            cond = cond.add(shipment::Column::Priority.eq(priority.as_str()));
        }
        if let Some(min) = self.weight_min {
            cond = cond.add(shipment::Column::Weight.gte(min));
        }
        if let Some(max) = self.weight_max {
            cond = cond.add(shipment::Column::Weight.lte(max));
        }
        if let Some(min) = self.price_min {
            cond = cond.add(shipment::Column::ShippingCost.gte(min));
        }
        if let Some(max) = self.price_max {
            cond = cond.add(shipment::Column::ShippingCost.lte(max));
        }

        let locations = split_list(&self.locations);
        if !locations.is_empty() {
            let subquery = Query::select()
                .column(shipment_tracking_event::Column::ShipmentId)
                .from(shipment_tracking_event::Entity)
                .and_where(shipment_tracking_event::Column::Location.is_in(locations))
                .to_owned();
            cond = cond.add(shipment::Column::Id.in_subquery(subquery));
        }

        let issue_types = split_list(&self.issue_types);
        if !issue_types.is_empty() {
            cond = cond.add(shipment::Column::Id.in_subquery(open_issues(&issue_types)));
        }

        cond
    }
}

/// Shipment ids with at least one unresolved issue, optionally of the given types
fn open_issues(types: &[String]) -> SelectStatement {
    let mut query = Query::select()
        .column(shipment_issue::Column::ShipmentId)
        .from(shipment_issue::Entity)
        .and_where(shipment_issue::Column::ResolvedAt.is_null())
        .to_owned();
    if !types.is_empty() {
        query.and_where(shipment_issue::Column::IssueType.is_in(types.to_vec()));
    }
    query
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ShipmentView {
    pub id: Uuid,
    pub order_id: Uuid,
    pub provider_id: String,
    pub tracking_number: String,
    pub status: ShipmentStatus,
    pub raw_status: Option<String>,
    pub estimated_delivery_date: Option<DateTime<Utc>>,
    pub actual_delivery_date: Option<DateTime<Utc>>,
    pub label_url: Option<String>,
    pub weight: Option<f64>,
    pub shipping_cost: Option<f64>,
    pub priority: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<shipment::Model> for ShipmentView {
    fn from(s: shipment::Model) -> Self {
        Self {
            id: s.id,
            order_id: s.order_id,
            provider_id: s.provider_id,
            tracking_number: s.tracking_number,
            status: s.status,
            raw_status: s.raw_status,
            estimated_delivery_date: s.estimated_delivery_date,
            actual_delivery_date: s.actual_delivery_date,
            label_url: s.label_url,
            weight: s.weight,
            shipping_cost: s.shipping_cost,
            priority: s.priority,
            created_at: s.created_at,
            updated_at: s.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct TrackingEventView {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub location: Option<String>,
    pub description: Option<String>,
}

impl From<shipment_tracking_event::Model> for TrackingEventView {
    fn from(e: shipment_tracking_event::Model) -> Self {
        Self {
            status: e.status,
            timestamp: e.timestamp,
            location: e.location,
            description: e.description,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct IssueView {
    pub id: Uuid,
    pub issue_type: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution: Option<String>,
}

impl From<shipment_issue::Model> for IssueView {
    fn from(i: shipment_issue::Model) -> Self {
        Self {
            id: i.id,
            issue_type: i.issue_type,
            description: i.description,
            created_at: i.created_at,
            resolved_at: i.resolved_at,
            resolution: i.resolution,
        }
    }
}

/// Listing row
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ShipmentRow {
    #[serde(flatten)]
    pub shipment: ShipmentView,
    pub latest_event: Option<TrackingEventView>,
    pub is_delayed: bool,
    pub has_issues: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct OrderSummary {
    pub id: Uuid,
    pub status: OrderStatus,
    pub customer_name: String,
    pub customer_email: String,
    pub total_amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ShipmentDetail {
    pub shipment: ShipmentView,
    pub order: Option<OrderSummary>,
    /// Newest first
    pub tracking_history: Vec<TrackingEventView>,
    pub issues: Vec<IssueView>,
    pub is_delayed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ProviderOption {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct ValueRange {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FilterOptions {
    pub statuses: Vec<ShipmentStatus>,
    pub providers: Vec<ProviderOption>,
    pub locations: Vec<String>,
    pub issue_types: Vec<String>,
    pub weight_range: ValueRange,
    pub price_range: ValueRange,
    pub priorities: Vec<String>,
}

/// Read side of the admin console
#[derive(Clone)]
pub struct ShipmentQueryService {
    db: Arc<DbPool>,
    carriers: Arc<CarrierRegistry>,
}

impl ShipmentQueryService {
    pub fn new(db: Arc<DbPool>, carriers: Arc<CarrierRegistry>) -> Self {
        Self { db, carriers }
    }

    /// Lists shipments matching `filters`; returns the page and the total count
    #[instrument(skip(self))]
    pub async fn list_shipments(
        &self,
        filters: &ShipmentFilters,
    ) -> Result<(Vec<ShipmentRow>, u64), ServiceError> {
        let db = &*self.db;
        let now = Utc::now();

        let paginator = shipment::Entity::find()
            .filter(filters.condition(now))
            .order_by(
                SortField::from_param(filters.sort_by.as_deref()).column(),
                sort_order(filters.sort_order.as_deref()),
            )
            .order_by_asc(shipment::Column::Id)
            .paginate(db, filters.limit());

        let total = paginator.num_items().await.map_err(ServiceError::db_error)?;
        let shipments = paginator
            .fetch_page(filters.page() - 1)
            .await
            .map_err(ServiceError::db_error)?;

        if shipments.is_empty() {
            return Ok((vec![], total));
        }

        let ids: Vec<Uuid> = shipments.iter().map(|s| s.id).collect();

        let mut latest: HashMap<Uuid, TrackingEventView> = HashMap::new();
        for event in shipment_tracking_event::Entity::find()
            .filter(shipment_tracking_event::Column::ShipmentId.is_in(ids.clone()))
            .order_by_desc(shipment_tracking_event::Column::Timestamp)
            .all(db)
            .await
            .map_err(ServiceError::db_error)?
        {
            latest.entry(event.shipment_id).or_insert_with(|| event.into());
        }

        let with_issues: HashSet<Uuid> = shipment_issue::Entity::find()
            .select_only()
            .column(shipment_issue::Column::ShipmentId)
            .filter(shipment_issue::Column::ResolvedAt.is_null())
            .filter(shipment_issue::Column::ShipmentId.is_in(ids))
            .into_tuple::<Uuid>()
            .all(db)
            .await
            .map_err(ServiceError::db_error)?
            .into_iter()
            .collect();

        let rows = shipments
            .into_iter()
            .map(|s| ShipmentRow {
                is_delayed: s.is_delayed_at(now),
                has_issues: with_issues.contains(&s.id),
                latest_event: latest.remove(&s.id),
                shipment: s.into(),
            })
            .collect();
        Ok((rows, total))
    }

    #[instrument(skip(self))]
    pub async fn get_shipment(&self, shipment_id: Uuid) -> Result<ShipmentDetail, ServiceError> {
        let db = &*self.db;
        let shipment = shipment::Entity::find_by_id(shipment_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound("Shipment not found".to_string()))?;

        let order = order::Entity::find_by_id(shipment.order_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .map(|o| OrderSummary {
                id: o.id,
                status: o.status,
                customer_name: o.customer_name,
                customer_email: o.customer_email,
                total_amount: o.total_amount,
            });

        let tracking_history = shipment_tracking_event::Entity::find()
            .filter(shipment_tracking_event::Column::ShipmentId.eq(shipment_id))
            .order_by_desc(shipment_tracking_event::Column::Timestamp)
            .all(db)
            .await
            .map_err(ServiceError::db_error)?
            .into_iter()
            .map(Into::into)
            .collect();

        let issues = shipment_issue::Entity::find()
            .filter(shipment_issue::Column::ShipmentId.eq(shipment_id))
            .order_by_desc(shipment_issue::Column::CreatedAt)
            .all(db)
            .await
            .map_err(ServiceError::db_error)?
            .into_iter()
            .map(Into::into)
            .collect();

        Ok(ShipmentDetail {
            is_delayed: shipment.is_delayed_at(Utc::now()),
            shipment: shipment.into(),
            order,
            tracking_history,
            issues,
        })
    }

    pub async fn filter_options(&self) -> Result<FilterOptions, ServiceError> {
        let db = &*self.db;

        let mut statuses: Vec<ShipmentStatus> = shipment::Entity::find()
            .select_only()
            .column(shipment::Column::Status)
            .distinct()
            .into_tuple()
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;
        statuses.sort_by_key(|s| s.to_string());

        let locations: Vec<String> = shipment_tracking_event::Entity::find()
            .select_only()
            .column(shipment_tracking_event::Column::Location)
            .filter(shipment_tracking_event::Column::Location.is_not_null())
            .distinct()
            .order_by_asc(shipment_tracking_event::Column::Location)
            .into_tuple()
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        let issue_types: Vec<String> = shipment_issue::Entity::find()
            .select_only()
            .column(shipment_issue::Column::IssueType)
            .distinct()
            .order_by_asc(shipment_issue::Column::IssueType)
            .into_tuple()
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        let weight_range = self.range(shipment::Column::Weight).await?;
        let price_range = self.range(shipment::Column::ShippingCost).await?;

        let providers = self
            .carriers
            .codes()
            .into_iter()
            .map(|code| ProviderOption {
                id: code.to_string(),
                name: code.display_name().to_string(),
            })
            .collect();

        Ok(FilterOptions {
            statuses,
            providers,
            locations,
            issue_types,
            weight_range,
            price_range,
            priorities: PRIORITIES.iter().map(|p| p.to_string()).collect(),
        })
    }

    async fn range(&self, column: shipment::Column) -> Result<ValueRange, ServiceError> {
        let bounds = shipment::Entity::find()
            .select_only()
            .column_as(column.min(), "min")
            .column_as(column.max(), "max")
            .into_tuple::<(Option<f64>, Option<f64>)>()
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;
        Ok(bounds
            .map(|(min, max)| ValueRange { min, max })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Some("status"), SortField::Status)]
    #[case(Some("tracking_number"), SortField::TrackingNumber)]
    #[case(Some("estimated_delivery_date"), SortField::EstimatedDeliveryDate)]
    #[case(Some("actual_delivery_date"), SortField::ActualDeliveryDate)]
    #[case(Some("created_at"), SortField::CreatedAt)]
    #[case(Some("id; DROP TABLE shipments"), SortField::CreatedAt)]
    #[case(Some("customer_email"), SortField::CreatedAt)]
    #[case(None, SortField::CreatedAt)]
    fn sort_field_is_restricted_to_allow_list(
        #[case] param: Option<&str>,
        #[case] expected: SortField,
    ) {
        assert_eq!(SortField::from_param(param), expected);
    }

    #[test]
    fn sort_order_defaults_to_descending() {
        assert_eq!(sort_order(None), Order::Desc);
        assert_eq!(sort_order(Some("ASC")), Order::Asc);
        assert_eq!(sort_order(Some("sideways")), Order::Desc);
    }

    #[test]
    fn paging_defaults_and_caps() {
        let filters = ShipmentFilters::default();
        assert_eq!((filters.page(), filters.limit()), (1, DEFAULT_PAGE_SIZE));

        let filters = ShipmentFilters {
            page: Some(0),
            limit: Some(500),
            ..Default::default()
        };
        assert_eq!((filters.page(), filters.limit()), (1, MAX_PAGE_SIZE));
    }

    #[test]
    fn comma_lists_ignore_blanks() {
        assert_eq!(
            split_list(&Some("Zagreb, ,Split,".to_string())),
            vec!["Zagreb".to_string(), "Split".to_string()]
        );
        assert!(split_list(&None).is_empty());
    }
}
