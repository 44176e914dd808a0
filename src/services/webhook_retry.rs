use chrono::{DateTime, Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::db::DbPool;
use crate::errors::ServiceError;
use crate::models::webhook_retry;

pub const MAX_ATTEMPTS: i32 = 5;
const BASE_DELAY_MINUTES: i64 = 5;
const DUE_BATCH: u64 = 100;

/// Delay before the next attempt once `attempts` deliveries have failed:
/// 5 minutes doubled for every failure after the first.
pub fn backoff(attempts: i32) -> Duration {
    let exponent = attempts.saturating_sub(1).clamp(0, 16) as u32;
    Duration::minutes(BASE_DELAY_MINUTES * 2_i64.pow(exponent))
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct RetryReport {
    pub attempted: usize,
    pub delivered: usize,
    pub rescheduled: usize,
    pub dropped: usize,
    /// Rows whose bookkeeping failed; they stay queued as they were
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetryOutcome {
    Delivered,
    Rescheduled,
    Dropped,
}

/// Outbound webhook delivery with a persistent retry queue
#[derive(Clone)]
pub struct WebhookRetryService {
    db: Arc<DbPool>,
    client: reqwest::Client,
    endpoints: Arc<Vec<String>>,
}

impl WebhookRetryService {
    pub fn new(
        db: Arc<DbPool>,
        endpoints: Vec<String>,
        timeout: std::time::Duration,
    ) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::InternalError(format!("webhook client: {e}")))?;
        Ok(Self {
            db,
            client,
            endpoints: Arc::new(endpoints),
        })
    }

    /// Stores a failed delivery for later
    #[instrument(skip(self, payload))]
    pub async fn enqueue(
        &self,
        endpoint: &str,
        payload: &Value,
        last_error: &str,
        now: DateTime<Utc>,
    ) -> Result<Uuid, ServiceError> {
        let id = Uuid::new_v4();
        webhook_retry::ActiveModel {
            id: Set(id),
            endpoint: Set(endpoint.to_string()),
            payload: Set(payload.to_string()),
            attempts: Set(1),
            max_attempts: Set(MAX_ATTEMPTS),
            next_retry: Set(now + backoff(1)),
            last_error: Set(Some(last_error.to_string())),
            created_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .map_err(ServiceError::db_error)?;

        metrics::counter!("webhooks.retry_enqueued", 1);
        info!(retry_id = %id, endpoint, "webhook delivery queued for retry");
        Ok(id)
    }

    async fn post(&self, endpoint: &str, payload: &Value) -> Result<(), String> {
        let response = self
            .client
            .post(endpoint)
            .json(payload)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(format!("HTTP error! status: {}", response.status().as_u16()))
        }
    }

    /// Sends once, queueing a retry on failure. Returns whether it was delivered.
    #[instrument(skip(self, payload))]
    pub async fn deliver(&self, endpoint: &str, payload: &Value) -> Result<bool, ServiceError> {
        match self.post(endpoint, payload).await {
            Ok(()) => {
                metrics::counter!("webhooks.delivered", 1);
                Ok(true)
            }
            Err(err) => {
                warn!(endpoint, error = %err, "webhook delivery failed");
                self.enqueue(endpoint, payload, &err, Utc::now()).await?;
                Ok(false)
            }
        }
    }

    /// Delivers `event` to every configured endpoint
    pub async fn publish(&self, event: &str, data: Value) -> Result<(), ServiceError> {
        if self.endpoints.is_empty() {
            return Ok(());
        }
        let payload = json!({
            "event": event,
            "data": data,
            "occurred_at": Utc::now().to_rfc3339(),
        });
        for endpoint in self.endpoints.iter() {
            self.deliver(endpoint, &payload).await?;
        }
        Ok(())
    }

    /// Retries every row whose `next_retry` has passed. A row that cannot
    /// be updated is logged and counted; the rest are still processed.
    #[instrument(skip(self))]
    pub async fn process_due(&self, now: DateTime<Utc>) -> Result<RetryReport, ServiceError> {
        let due = webhook_retry::Entity::find()
            .filter(webhook_retry::Column::NextRetry.lte(now))
            .filter(
                sea_orm::sea_query::Expr::col(webhook_retry::Column::Attempts)
                    .lt(sea_orm::sea_query::Expr::col(webhook_retry::Column::MaxAttempts)),
            )
            .order_by_asc(webhook_retry::Column::NextRetry)
            .limit(DUE_BATCH)
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;

        let mut report = RetryReport::default();
        for retry in due {
            report.attempted += 1;
            let retry_id = retry.id;
            match self.retry_one(retry, now).await {
                Ok(RetryOutcome::Delivered) => report.delivered += 1,
                Ok(RetryOutcome::Rescheduled) => report.rescheduled += 1,
                Ok(RetryOutcome::Dropped) => report.dropped += 1,
                Err(err) => {
                    report.failed += 1;
                    error!(retry_id = %retry_id, error = %err, "webhook retry bookkeeping failed");
                }
            }
        }

        if report.attempted > 0 {
            info!(?report, "processed webhook retries");
        }
        Ok(report)
    }

    async fn drop_retry(
        &self,
        retry: &webhook_retry::Model,
        attempts: i32,
        reason: &str,
    ) -> Result<RetryOutcome, ServiceError> {
        webhook_retry::Entity::delete_by_id(retry.id)
            .exec(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;
        metrics::counter!("webhooks.permanent_failures", 1);
        error!(
            retry_id = %retry.id,
            endpoint = %retry.endpoint,
            attempts,
            error = %reason,
            "webhook retry failed permanently"
        );
        Ok(RetryOutcome::Dropped)
    }

    async fn retry_one(
        &self,
        retry: webhook_retry::Model,
        now: DateTime<Utc>,
    ) -> Result<RetryOutcome, ServiceError> {
        // A payload that no longer parses can never be delivered
        let payload: Value = match serde_json::from_str(&retry.payload) {
            Ok(payload) => payload,
            Err(err) => {
                let reason = format!("stored payload is not valid JSON: {err}");
                return self.drop_retry(&retry, retry.attempts, &reason).await;
            }
        };

        match self.post(&retry.endpoint, &payload).await {
            Ok(()) => {
                webhook_retry::Entity::delete_by_id(retry.id)
                    .exec(&*self.db)
                    .await
                    .map_err(ServiceError::db_error)?;
                metrics::counter!("webhooks.retry_delivered", 1);
                Ok(RetryOutcome::Delivered)
            }
            Err(err) => {
                let attempts = retry.attempts + 1;
                if attempts >= retry.max_attempts {
                    return self.drop_retry(&retry, attempts, &err).await;
                }
                let mut active: webhook_retry::ActiveModel = retry.into();
                active.attempts = Set(attempts);
                active.next_retry = Set(now + backoff(attempts));
                active.last_error = Set(Some(err));
                active.update(&*self.db).await.map_err(ServiceError::db_error)?;
                Ok(RetryOutcome::Rescheduled)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_from_five_minutes() {
        assert_eq!(backoff(1), Duration::minutes(5));
        assert_eq!(backoff(2), Duration::minutes(10));
        assert_eq!(backoff(3), Duration::minutes(20));
        assert_eq!(backoff(4), Duration::minutes(40));
    }

    #[test]
    fn backoff_never_goes_below_base() {
        assert_eq!(backoff(0), Duration::minutes(5));
        assert_eq!(backoff(-3), Duration::minutes(5));
    }
}
