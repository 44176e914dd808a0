use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::carriers::{CarrierCode, CarrierRegistry, CreateShipmentRequest};
use crate::db::DbPool;
use crate::errors::ServiceError;
use crate::models::{order, shipment, ShipmentStatus};

/// Books shipments with a carrier and records them as `pending`
#[derive(Clone)]
pub struct ShipmentBookingService {
    db: Arc<DbPool>,
    carriers: Arc<CarrierRegistry>,
}

impl ShipmentBookingService {
    pub fn new(db: Arc<DbPool>, carriers: Arc<CarrierRegistry>) -> Self {
        Self { db, carriers }
    }

    /// Creates the carrier shipment for an order and stores it.
    ///
    /// The carrier is called exactly once. A booking that succeeds at the
    /// carrier but cannot be stored is logged with its tracking number so it
    /// can be voided by hand; it is never re-submitted.
    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    pub async fn book(
        &self,
        provider: CarrierCode,
        request: &CreateShipmentRequest,
    ) -> Result<shipment::Model, ServiceError> {
        if request.packages.is_empty() {
            return Err(ServiceError::ValidationError(
                "at least one package is required".to_string(),
            ));
        }
        if request
            .packages
            .iter()
            .any(|p| !(p.weight.is_finite() && p.weight > 0.0))
        {
            return Err(ServiceError::ValidationError(
                "package weight must be positive".to_string(),
            ));
        }

        let db = &*self.db;
        order::Entity::find_by_id(request.order_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound("Order not found".to_string()))?;

        let existing = shipment::Entity::find()
            .filter(shipment::Column::OrderId.eq(request.order_id))
            .one(db)
            .await
            .map_err(ServiceError::db_error)?;
        if let Some(existing) = existing {
            return Err(ServiceError::Conflict(format!(
                "Order already has shipment {}",
                existing.id
            )));
        }

        let booked = self.carriers.create_shipment(provider, request).await?;

        let now = Utc::now();
        let stored = shipment::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(request.order_id),
            provider_id: Set(provider.to_string()),
            tracking_number: Set(booked.tracking_number.clone()),
            status: Set(ShipmentStatus::Pending),
            raw_status: Set(None),
            estimated_delivery_date: Set(booked.estimated_delivery_date),
            actual_delivery_date: Set(None),
            shipping_rate_id: Set(request.shipping_rate_id.clone()),
            label_url: Set(booked.label_url.clone()),
            weight: Set(Some(request.packages.iter().map(|p| p.weight).sum())),
            shipping_cost: Set(None),
            priority: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(db)
        .await;

        match stored {
            Ok(model) => {
                metrics::counter!("shipments.booked", 1, "provider" => provider.to_string());
                info!(
                    shipment_id = %model.id,
                    provider = %provider,
                    tracking_number = %model.tracking_number,
                    "shipment booked"
                );
                Ok(model)
            }
            Err(err) => {
                error!(
                    provider = %provider,
                    carrier_shipment_id = %booked.shipment_id,
                    tracking_number = %booked.tracking_number,
                    error = %err,
                    "carrier booking succeeded but the shipment could not be stored"
                );
                Err(ServiceError::db_error(err))
            }
        }
    }

    /// Stored label, or the carrier's current one looked up by tracking number
    #[instrument(skip(self))]
    pub async fn label(&self, shipment_id: Uuid) -> Result<String, ServiceError> {
        let shipment = shipment::Entity::find_by_id(shipment_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound("Shipment not found".to_string()))?;

        if let Some(url) = shipment.label_url {
            return Ok(url);
        }
        let provider = CarrierCode::parse(&shipment.provider_id)?;
        self.carriers
            .label(provider, &shipment.tracking_number)
            .await
    }
}
