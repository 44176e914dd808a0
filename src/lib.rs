//! Shipment Tracking API
//!
//! Reconciles carrier-reported shipment state with the shipment and order
//! records: carrier adapters, webhook ingestion, polling and delay sweeps,
//! admin tooling and the outbound event queue.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod auth;
pub mod carriers;
pub mod circuit_breaker;
pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod migrator;
pub mod models;
pub mod notifications;
pub mod openapi;
pub mod rate_limiter;
pub mod scheduler;
pub mod services;
pub mod tracing;
pub mod webhooks;

use axum::{
    http::HeaderValue,
    middleware::from_fn_with_state,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
};
use utoipa::ToSchema;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::handlers::{admin, health, shipping, webhooks as webhook_handlers, AppServices};
use crate::rate_limiter::{rate_limit_middleware, RateLimiter};

/// Per-class limiters shared by the router and the cleanup task
#[derive(Clone)]
pub struct RateLimiters {
    pub webhook: RateLimiter,
    pub manual_tracking: RateLimiter,
    pub bulk_update: RateLimiter,
}

impl RateLimiters {
    pub fn from_config(config: &AppConfig) -> Self {
        let limits = &config.rate_limits;
        let limiter = |class, limit| {
            RateLimiter::per_minute(class, limit).trusting_forwarded_for(limits.trust_forwarded_for)
        };
        Self {
            webhook: limiter("webhook", limits.webhook_per_minute),
            manual_tracking: limiter("manual_tracking", limits.manual_tracking_per_minute),
            bulk_update: limiter("bulk_update", limits.bulk_update_per_minute),
        }
    }

    pub fn all(&self) -> Vec<RateLimiter> {
        vec![
            self.webhook.clone(),
            self.manual_tracking.clone(),
            self.bulk_update.clone(),
        ]
    }
}

// Application state
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DbPool>,
    pub config: AppConfig,
    pub services: AppServices,
    pub rate_limiters: RateLimiters,
}

impl AppState {
    pub fn new(db: Arc<DbPool>, config: AppConfig, services: AppServices) -> Self {
        let rate_limiters = RateLimiters::from_config(&config);
        Self {
            db,
            config,
            services,
            rate_limiters,
        }
    }
}

// Common response wrappers
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub total_pages: u64,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn validation_errors(errors: Vec<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some("Validation failed".to_string()),
            errors: Some(errors),
            meta: Some(ResponseMeta::capture()),
        }
    }
}


/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

/// Carrier pushes and the manual trigger, each behind its own limiter
fn webhook_routes(limiters: &RateLimiters) -> Router<AppState> {
    let carrier = Router::new()
        .route(
            "/webhooks/shipping/:provider",
            post(webhook_handlers::carrier_webhook),
        )
        .route_layer(from_fn_with_state(
            limiters.webhook.clone(),
            rate_limit_middleware,
        ));

    let manual = Router::new()
        .route(
            "/webhooks/tracking/manual",
            post(webhook_handlers::manual_tracking),
        )
        .route_layer(from_fn_with_state(
            limiters.manual_tracking.clone(),
            rate_limit_middleware,
        ));

    carrier.merge(manual)
}

/// Admin console routes, gated by `x-admin-key`
fn admin_routes(state: &AppState) -> Router<AppState> {
    let bulk = Router::new()
        .route(
            "/shipping/admin/shipments/bulk-update",
            post(admin::bulk_update),
        )
        .route_layer(from_fn_with_state(
            state.rate_limiters.bulk_update.clone(),
            rate_limit_middleware,
        ));

    Router::new()
        .route(
            "/shipping/admin/shipments",
            get(admin::list_shipments).post(admin::book_shipment),
        )
        .route("/shipping/admin/shipments/:id", get(admin::get_shipment))
        .route(
            "/shipping/admin/shipments/:id/label",
            get(admin::shipment_label),
        )
        .route(
            "/shipping/admin/shipments/:id/update-tracking",
            post(admin::update_tracking),
        )
        .route("/shipping/admin/filter-options", get(admin::filter_options))
        .route(
            "/shipping/admin/issues/:id/resolve",
            post(admin::resolve_issue),
        )
        .merge(bulk)
        .route_layer(from_fn_with_state(
            state.clone(),
            auth::require_admin_key,
        ))
}

fn shipping_routes() -> Router<AppState> {
    Router::new()
        .route("/shipping/rates", get(shipping::rates))
        .route("/shipping/pickup-points", get(shipping::pickup_points))
        .route("/shipping/providers", get(shipping::providers))
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_origins()
        .iter()
        .filter(|origin| origin.as_str() != "*")
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();

    if origins.is_empty() {
        if !config.is_production() {
            ::tracing::info!("Using permissive CORS because explicit origins were not configured");
        }
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Full HTTP surface: webhooks, admin, shipping, health and Swagger UI
pub fn router(state: AppState) -> Router {
    let timeout = Duration::from_secs(state.config.request_timeout_secs.max(1));
    let cors = cors_layer(&state.config);

    Router::new()
        .merge(webhook_routes(&state.rate_limiters))
        .merge(admin_routes(&state))
        .merge(shipping_routes())
        .route("/health", get(health::health_check))
        .merge(openapi::swagger_ui())
        .layer(TimeoutLayer::new(timeout))
        .layer(crate::tracing::configure_http_tracing())
        .layer(cors)
        // Ensure every request carries a request id for traceability
        .layer(axum::middleware::from_fn(
            crate::tracing::request_id_middleware,
        ))
        .with_state(state)
}

pub mod prelude {
    pub use crate::db::*;
    pub use crate::errors::*;
    pub use crate::services::*;
    pub use crate::{ApiResponse, ApiResult, AppState, PaginatedResponse};
}
