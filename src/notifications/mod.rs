//! Customer notifications for order and shipment changes.
//!
//! Template rendering and delivery belong to an [`EmailSender`]; this module
//! only assembles the data bag and picks the template.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sea_orm::EntityTrait;
use sea_orm::{ColumnTrait, QueryFilter};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::db::DbPool;
use crate::errors::ServiceError;
use crate::models::{order, order_item, OrderStatus};

pub const ORDER_STATUS_TEMPLATE: &str = "order-status-update";
pub const DELAYED_STATUS: &str = "delayed";

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("email delivery failed: {0}")]
    Delivery(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<NotificationError> for ServiceError {
    fn from(err: NotificationError) -> Self {
        ServiceError::ExternalServiceError(err.to_string())
    }
}

/// Outbound email transport
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send_template(
        &self,
        to: &str,
        template: &str,
        data: &Value,
    ) -> Result<(), NotificationError>;
}

/// Default sender: records the email in the log stream
#[derive(Debug, Default, Clone)]
pub struct LoggingEmailSender;

#[async_trait]
impl EmailSender for LoggingEmailSender {
    async fn send_template(
        &self,
        to: &str,
        template: &str,
        data: &Value,
    ) -> Result<(), NotificationError> {
        info!(to, template, data = %data, "email dispatched");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmailItem {
    pub name: String,
    pub quantity: i32,
    pub price: Decimal,
}

/// Data bag for the `order-status-update` template
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStatusEmail {
    pub id: Uuid,
    pub status: String,
    pub customer_name: String,
    pub items: Vec<EmailItem>,
    pub total_amount: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracking_number: Option<String>,
}

#[derive(Clone)]
pub struct NotificationDispatcher {
    db: Arc<DbPool>,
    sender: Arc<dyn EmailSender>,
}

impl NotificationDispatcher {
    pub fn new(db: Arc<DbPool>, sender: Arc<dyn EmailSender>) -> Self {
        Self { db, sender }
    }

    /// Tells the customer their order moved to `status`
    #[instrument(skip(self, tracking_number))]
    pub async fn order_status_changed(
        &self,
        order_id: Uuid,
        status: OrderStatus,
        tracking_number: Option<String>,
    ) -> Result<(), ServiceError> {
        self.send(order_id, &status.to_string(), tracking_number)
            .await
    }

    /// Tells the customer their parcel is late
    #[instrument(skip(self, tracking_number))]
    pub async fn shipment_delayed(
        &self,
        order_id: Uuid,
        tracking_number: Option<String>,
    ) -> Result<(), ServiceError> {
        self.send(order_id, DELAYED_STATUS, tracking_number).await
    }

    async fn send(
        &self,
        order_id: Uuid,
        status: &str,
        tracking_number: Option<String>,
    ) -> Result<(), ServiceError> {
        let db = &*self.db;
        let order = order::Entity::find_by_id(order_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))?;

        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(db)
            .await
            .map_err(ServiceError::db_error)?
            .into_iter()
            .map(|item| EmailItem {
                name: item.name,
                quantity: item.quantity,
                price: item.price,
            })
            .collect();

        let email = OrderStatusEmail {
            id: order.id,
            status: status.to_string(),
            customer_name: order.customer_name,
            items,
            total_amount: order.total_amount,
            tracking_number,
        };
        let data = serde_json::to_value(&email).map_err(NotificationError::from)?;

        match self
            .sender
            .send_template(&order.customer_email, ORDER_STATUS_TEMPLATE, &data)
            .await
        {
            Ok(()) => {
                metrics::counter!("notifications.sent", 1, "status" => status.to_string());
                Ok(())
            }
            Err(err) => {
                warn!(order_id = %order_id, error = %err, "customer notification failed");
                metrics::counter!("notifications.failed", 1);
                Err(err.into())
            }
        }
    }
}
