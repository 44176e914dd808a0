// Shipment tracking
pub mod shipment;
pub mod shipment_issue;
pub mod shipment_issue_archive;
pub mod shipment_tracking_event;

// Orders
pub mod order;
pub mod order_item;
pub mod order_status_history;

// Background processing
pub mod batch_job;
pub mod webhook_retry;

// Re-export common types for convenience
pub use order::OrderStatus;
pub use shipment::ShipmentStatus;

// Export a prelude module with common entity types
pub mod prelude {
    pub use super::batch_job::Entity as BatchJob;
    pub use super::order::Entity as Order;
    pub use super::order_item::Entity as OrderItem;
    pub use super::order_status_history::Entity as OrderStatusHistory;
    pub use super::shipment::Entity as Shipment;
    pub use super::shipment_issue::Entity as ShipmentIssue;
    pub use super::shipment_issue_archive::Entity as ShipmentIssueArchive;
    pub use super::shipment_tracking_event::Entity as ShipmentTrackingEvent;
    pub use super::webhook_retry::Entity as WebhookRetry;
}
