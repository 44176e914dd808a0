//! Shipment status to order status mapping.

use crate::models::{OrderStatus, ShipmentStatus};

/// Order status implied by a shipment status. `pending` shipments leave the
/// order untouched; returned parcels cancel it.
pub fn order_status_for(status: ShipmentStatus) -> Option<OrderStatus> {
    match status {
        ShipmentStatus::Pending => None,
        ShipmentStatus::Processing => Some(OrderStatus::Processing),
        ShipmentStatus::Shipped => Some(OrderStatus::Shipped),
        ShipmentStatus::Delivered => Some(OrderStatus::Delivered),
        ShipmentStatus::Cancelled | ShipmentStatus::Returned => Some(OrderStatus::Cancelled),
    }
}

/// Carrier-neutral shipping labels as used by storefront and email copy
pub fn map_shipping_label(label: &str) -> Option<OrderStatus> {
    match label.trim().to_ascii_lowercase().as_str() {
        "processing" | "in_transit" => Some(OrderStatus::Processing),
        "shipped" | "out_for_delivery" => Some(OrderStatus::Shipped),
        "delivered" => Some(OrderStatus::Delivered),
        "cancelled" | "failed" | "returned" => Some(OrderStatus::Cancelled),
        _ => None,
    }
}

/// Reverse direction, for order-centric views
pub fn shipping_label_for(status: OrderStatus) -> &'static str {
    match status {
        OrderStatus::Pending => "pending",
        OrderStatus::Processing => "in_transit",
        OrderStatus::Shipped => "out_for_delivery",
        OrderStatus::Delivered => "delivered",
        OrderStatus::Cancelled => "failed",
    }
}

/// Update to apply to an order, or `None` when it already matches or is closed
pub fn order_transition(
    current: OrderStatus,
    shipment_status: ShipmentStatus,
) -> Option<OrderStatus> {
    let target = order_status_for(shipment_status)?;
    if target == current || current.is_terminal() {
        return None;
    }
    Some(target)
}
