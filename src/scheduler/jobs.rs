use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use super::Job;
use crate::config::SchedulerConfig;
use crate::errors::ServiceError;
use crate::services::{DelayDetector, MaintenanceService, TrackingUpdateService, WebhookRetryService};

pub const UPDATE_ACTIVE_SHIPMENTS: &str = "update_active_shipments";
pub const PROCESS_WEBHOOK_RETRIES: &str = "process_webhook_retries";
pub const CHECK_DELAYED_SHIPMENTS: &str = "check_delayed_shipments";
pub const CLEANUP_OLD_EVENTS: &str = "cleanup_old_events";

/// Polls carriers for every active shipment
pub struct UpdateActiveShipments {
    pub tracking: TrackingUpdateService,
    pub interval: Duration,
}

#[async_trait]
impl Job for UpdateActiveShipments {
    fn name(&self) -> &'static str {
        UPDATE_ACTIVE_SHIPMENTS
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&self, now: DateTime<Utc>) -> Result<Value, ServiceError> {
        Ok(json!(self.tracking.sweep(now).await?))
    }
}

pub struct ProcessWebhookRetries {
    pub retries: Arc<WebhookRetryService>,
    pub interval: Duration,
}

#[async_trait]
impl Job for ProcessWebhookRetries {
    fn name(&self) -> &'static str {
        PROCESS_WEBHOOK_RETRIES
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&self, now: DateTime<Utc>) -> Result<Value, ServiceError> {
        Ok(json!(self.retries.process_due(now).await?))
    }
}

pub struct CheckDelayedShipments {
    pub detector: DelayDetector,
    pub interval: Duration,
}

#[async_trait]
impl Job for CheckDelayedShipments {
    fn name(&self) -> &'static str {
        CHECK_DELAYED_SHIPMENTS
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&self, now: DateTime<Utc>) -> Result<Value, ServiceError> {
        Ok(json!(self.detector.sweep(now).await?))
    }
}

pub struct CleanupOldEvents {
    pub maintenance: MaintenanceService,
    pub interval: Duration,
}

#[async_trait]
impl Job for CleanupOldEvents {
    fn name(&self) -> &'static str {
        CLEANUP_OLD_EVENTS
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&self, now: DateTime<Utc>) -> Result<Value, ServiceError> {
        Ok(json!(self.maintenance.cleanup(now).await?))
    }
}

/// The four standard jobs with intervals from configuration
pub fn standard_jobs(
    config: &SchedulerConfig,
    tracking: TrackingUpdateService,
    retries: Arc<WebhookRetryService>,
    detector: DelayDetector,
    maintenance: MaintenanceService,
) -> Vec<Arc<dyn Job>> {
    vec![
        Arc::new(UpdateActiveShipments {
            tracking,
            interval: Duration::from_secs(config.tracking_poll_interval_secs),
        }),
        Arc::new(ProcessWebhookRetries {
            retries,
            interval: Duration::from_secs(config.webhook_retry_interval_secs),
        }),
        Arc::new(CheckDelayedShipments {
            detector,
            interval: Duration::from_secs(config.delay_check_interval_secs),
        }),
        Arc::new(CleanupOldEvents {
            maintenance,
            interval: Duration::from_secs(config.cleanup_interval_secs),
        }),
    ]
}
