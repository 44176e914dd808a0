pub mod admin;
pub mod health;
pub mod shipping;
pub mod webhooks;

use std::sync::Arc;

use crate::carriers::CarrierRegistry;
use crate::config::AppConfig;
use crate::db::DbPool;
use crate::errors::ServiceError;
use crate::notifications::{EmailSender, NotificationDispatcher};
use crate::scheduler::{jobs, Job};
use crate::services::{
    DelayDetector, MaintenanceService, ShipmentBookingService, ShipmentQueryService,
    ShipmentReconciler, TrackingUpdateService, WebhookRetryService,
};

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub carriers: Arc<CarrierRegistry>,
    pub booking: ShipmentBookingService,
    pub notifications: NotificationDispatcher,
    pub webhook_retries: Arc<WebhookRetryService>,
    pub reconciler: ShipmentReconciler,
    pub tracking: TrackingUpdateService,
    pub delays: DelayDetector,
    pub maintenance: MaintenanceService,
    pub queries: ShipmentQueryService,
}

impl AppServices {
    /// Wires every service over one pool, carrier registry and email transport
    pub fn new(
        db_pool: Arc<DbPool>,
        config: &AppConfig,
        carriers: Arc<CarrierRegistry>,
        email: Arc<dyn EmailSender>,
    ) -> Result<Self, ServiceError> {
        let notifications = NotificationDispatcher::new(db_pool.clone(), email);
        let webhook_retries = Arc::new(WebhookRetryService::new(
            db_pool.clone(),
            config.outbound_webhook_urls.clone(),
            config.carriers.request_timeout(),
        )?);
        let reconciler = ShipmentReconciler::new(
            db_pool.clone(),
            notifications.clone(),
            webhook_retries.clone(),
        );
        let tracking = TrackingUpdateService::new(
            db_pool.clone(),
            carriers.clone(),
            reconciler.clone(),
            config.scheduler.poll_batch_size,
        );

        Ok(Self {
            delays: DelayDetector::new(db_pool.clone(), notifications.clone()),
            maintenance: MaintenanceService::new(db_pool.clone()),
            booking: ShipmentBookingService::new(db_pool.clone(), carriers.clone()),
            queries: ShipmentQueryService::new(db_pool, carriers.clone()),
            carriers,
            notifications,
            webhook_retries,
            reconciler,
            tracking,
        })
    }

    /// Background jobs backed by these services
    pub fn jobs(&self, config: &AppConfig) -> Vec<Arc<dyn Job>> {
        jobs::standard_jobs(
            &config.scheduler,
            self.tracking.clone(),
            self.webhook_retries.clone(),
            self.delays.clone(),
            self.maintenance.clone(),
        )
    }
}
