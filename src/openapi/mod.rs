use utoipa::openapi::security::{ApiKey, ApiKeyValue, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

use crate::handlers;

/// Declares the shared-key header used by the admin console
#[derive(Debug)]
pub struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "admin_key",
            SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new(
                crate::auth::ADMIN_KEY_HEADER,
            ))),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Shipment Tracking API",
        version = "1.0.0",
        description = r#"
Keeps shipment and order status in step with what the carriers report.

Status updates arrive three ways: signed carrier webhooks, a periodic
polling sweep, and admin-triggered refreshes. All of them go through the
same reconciliation, so a replayed or racing update never moves a shipment
twice.

## Rate Limiting

Webhook, manual tracking and bulk update routes are rate-limited per client:
- `X-RateLimit-Limit`: Maximum requests per window
- `X-RateLimit-Remaining`: Remaining requests in current window
- `X-RateLimit-Reset`: Seconds until the window resets
        "#
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "webhooks", description = "Carrier pushes and manual tracking triggers"),
        (name = "admin", description = "Shipment console, requires x-admin-key"),
        (name = "shipping", description = "Rates, pickup points and carriers"),
        (name = "health", description = "Health check endpoints")
    ),
    paths(
        handlers::webhooks::carrier_webhook,
        handlers::webhooks::manual_tracking,
        handlers::admin::book_shipment,
        handlers::admin::shipment_label,
        handlers::admin::update_tracking,
        handlers::admin::bulk_update,
        handlers::admin::list_shipments,
        handlers::admin::get_shipment,
        handlers::admin::filter_options,
        handlers::admin::resolve_issue,
        handlers::shipping::rates,
        handlers::shipping::pickup_points,
        handlers::shipping::providers,
        handlers::health::health_check,
    ),
    components(
        schemas(
            crate::errors::ErrorResponse,
            crate::models::ShipmentStatus,
            crate::models::OrderStatus,
            crate::carriers::CarrierCode,
            crate::services::ReconcileOutcome,
            crate::services::tracking_update::SweepReport,
            crate::services::tracking_update::BulkItemStatus,
            crate::services::tracking_update::BulkUpdateDetail,
            crate::services::tracking_update::BulkUpdateResult,
            crate::services::tracking_update::TrackingRefresh,
            crate::services::shipments::ShipmentView,
            crate::services::shipments::ShipmentRow,
            crate::services::shipments::ShipmentDetail,
            crate::services::shipments::FilterOptions,
            crate::services::shipments::IssueView,
            handlers::webhooks::ManualTrackingRequest,
            handlers::admin::BookShipmentRequest,
            handlers::admin::LabelResponse,
            crate::carriers::CreateShipmentRequest,
            crate::carriers::Recipient,
            crate::carriers::Package,
            handlers::admin::BulkUpdateRequest,
            handlers::admin::ResolveIssueRequest,
            handlers::shipping::ProviderInfo,
            handlers::health::HealthInfo,
        )
    )
)]
pub struct ApiDocV1;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDocV1::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_lists_every_route() {
        let json = serde_json::to_string(&ApiDocV1::openapi()).unwrap();
        for path in [
            "/webhooks/shipping/{provider}",
            "/webhooks/tracking/manual",
            "/shipping/admin/shipments/{id}/update-tracking",
            "/shipping/admin/shipments/bulk-update",
            "/shipping/admin/shipments/{id}/label",
            "/shipping/admin/filter-options",
            "/shipping/rates",
            "/health",
        ] {
            assert!(json.contains(path), "missing {path}");
        }
        assert!(json.contains("admin_key"));
    }
}
