//! Periodic background jobs.
//!
//! Each [`Job`] gets its own tokio interval loop. Runs are recorded in the
//! `batch_jobs` table so operators can see when a sweep last ran and how it
//! ended. A job error is logged and recorded; the loop keeps going.

pub mod jobs;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::OnConflict;
use sea_orm::{EntityTrait, Set};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::db::DbPool;
use crate::errors::ServiceError;
use crate::models::batch_job;

pub const STATUS_SUCCESS: &str = "success";
pub const STATUS_FAILED: &str = "failed";

#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &'static str;

    fn interval(&self) -> Duration;

    /// Runs once. The returned summary is logged.
    async fn run(&self, now: DateTime<Utc>) -> Result<Value, ServiceError>;
}

/// Cron rendering of a fixed interval, for the `batch_jobs` listing
pub fn schedule_expression(interval: Duration) -> String {
    let secs = interval.as_secs();
    match secs {
        s if s > 0 && s % 3600 == 0 && s < 86_400 => format!("0 */{} * * *", s / 3600),
        86_400 => "0 0 * * *".to_string(),
        s if s > 0 && s % 60 == 0 && s < 3600 => format!("*/{} * * * *", s / 60),
        s => format!("@every {s}s"),
    }
}

pub struct Scheduler {
    db: Arc<DbPool>,
    jobs: Vec<Arc<dyn Job>>,
    shutdown: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(db: Arc<DbPool>, jobs: Vec<Arc<dyn Job>>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            db,
            jobs,
            shutdown,
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn job_names(&self) -> Vec<&'static str> {
        self.jobs.iter().map(|j| j.name()).collect()
    }

    /// Registers every job and spawns its loop. Returns immediately.
    pub async fn start(&self) -> Result<(), ServiceError> {
        let mut handles = self.handles.lock().await;
        if !handles.is_empty() {
            warn!("scheduler already running");
            return Ok(());
        }
        let _ = self.shutdown.send(false);

        for job in &self.jobs {
            register(&self.db, job.as_ref()).await?;

            let job = job.clone();
            let db = self.db.clone();
            let mut stop = self.shutdown.subscribe();
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(job.interval());
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                // The first tick completes immediately; jobs first run one interval after start
                ticker.tick().await;

                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            execute(&db, job.as_ref(), Utc::now()).await;
                        }
                        changed = stop.changed() => {
                            if changed.is_err() || *stop.borrow() {
                                debug!(job = job.name(), "job loop stopping");
                                break;
                            }
                        }
                    }
                }
            }));
        }

        info!(jobs = ?self.job_names(), "scheduler started");
        Ok(())
    }

    /// Signals every loop and waits for in-flight runs to finish
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        let handles: Vec<_> = self.handles.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(err) = handle.await {
                error!(error = %err, "scheduler task panicked");
            }
        }
        info!("scheduler stopped");
    }

    /// Runs one job in place and records the outcome
    pub async fn tick(&self, name: &str, now: DateTime<Utc>) -> Result<Value, ServiceError> {
        let job = self
            .jobs
            .iter()
            .find(|j| j.name() == name)
            .ok_or_else(|| ServiceError::NotFound(format!("Job {name} not found")))?;
        register(&self.db, job.as_ref()).await?;
        let result = job.run(now).await;
        record(&self.db, job.as_ref(), now, &result).await?;
        result
    }
}

async fn execute(db: &DbPool, job: &dyn Job, now: DateTime<Utc>) {
    let started = std::time::Instant::now();
    let result = job.run(now).await;
    let elapsed_ms = started.elapsed().as_millis() as f64;

    match &result {
        Ok(summary) => {
            info!(job = job.name(), elapsed_ms, summary = %summary, "job finished");
            metrics::counter!("scheduler.runs", 1, "job" => job.name(), "status" => STATUS_SUCCESS);
        }
        Err(err) => {
            error!(job = job.name(), elapsed_ms, error = %err, "job failed");
            metrics::counter!("scheduler.runs", 1, "job" => job.name(), "status" => STATUS_FAILED);
        }
    }

    if let Err(err) = record(db, job, now, &result).await {
        warn!(job = job.name(), error = %err, "could not record job run");
    }
}

fn row(job: &dyn Job) -> batch_job::ActiveModel {
    batch_job::ActiveModel {
        name: Set(job.name().to_string()),
        cron_expression: Set(schedule_expression(job.interval())),
        interval_secs: Set(job.interval().as_secs() as i64),
        enabled: Set(true),
        last_run: Set(None),
        last_status: Set(None),
        last_error: Set(None),
    }
}

async fn register(db: &DbPool, job: &dyn Job) -> Result<(), ServiceError> {
    batch_job::Entity::insert(row(job))
        .on_conflict(
            OnConflict::column(batch_job::Column::Name)
                .update_columns([
                    batch_job::Column::CronExpression,
                    batch_job::Column::IntervalSecs,
                    batch_job::Column::Enabled,
                ])
                .to_owned(),
        )
        .exec_without_returning(db)
        .await
        .map_err(ServiceError::db_error)?;
    Ok(())
}

async fn record(
    db: &DbPool,
    job: &dyn Job,
    now: DateTime<Utc>,
    result: &Result<Value, ServiceError>,
) -> Result<(), ServiceError> {
    let mut active = row(job);
    active.last_run = Set(Some(now));
    match result {
        Ok(_) => {
            active.last_status = Set(Some(STATUS_SUCCESS.to_string()));
            active.last_error = Set(None);
        }
        Err(err) => {
            active.last_status = Set(Some(STATUS_FAILED.to_string()));
            active.last_error = Set(Some(err.to_string()));
        }
    }

    batch_job::Entity::insert(active)
        .on_conflict(
            OnConflict::column(batch_job::Column::Name)
                .update_columns([
                    batch_job::Column::LastRun,
                    batch_job::Column::LastStatus,
                    batch_job::Column::LastError,
                ])
                .to_owned(),
        )
        .exec_without_returning(db)
        .await
        .map_err(ServiceError::db_error)?;
    Ok(())
}
