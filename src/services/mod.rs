// Carrier bookings
pub mod booking;

// Reconciliation core
pub mod order_bridge;
pub mod reconciler;

// Trigger sources
pub mod tracking_update;

// Background sweeps
pub mod delay_detection;
pub mod maintenance;
pub mod webhook_retry;

// Admin read side
pub mod shipments;

pub use booking::ShipmentBookingService;
pub use delay_detection::DelayDetector;
pub use maintenance::MaintenanceService;
pub use reconciler::{ReconcileOutcome, ShipmentReconciler, TrackingUpdate};
pub use shipments::ShipmentQueryService;
pub use tracking_update::TrackingUpdateService;
pub use webhook_retry::WebhookRetryService;
