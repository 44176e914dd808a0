//! Carrier status vocabularies mapped onto [`ShipmentStatus`].

use serde::{Deserialize, Serialize};

use super::CarrierCode;
use crate::models::ShipmentStatus;

/// Result of normalizing a raw carrier status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum NormalizedStatus {
    Known(ShipmentStatus),
    /// Carrier reported something outside its documented vocabulary
    Unrecognized(String),
}

impl NormalizedStatus {
    pub fn known(&self) -> Option<ShipmentStatus> {
        match self {
            NormalizedStatus::Known(status) => Some(*status),
            NormalizedStatus::Unrecognized(_) => None,
        }
    }

    /// Value stored on tracking event rows
    pub fn event_label(&self) -> String {
        match self {
            NormalizedStatus::Known(status) => status.to_string(),
            NormalizedStatus::Unrecognized(raw) => raw.clone(),
        }
    }
}

/// Maps a raw carrier status. Never fails: unknown values come back as
/// [`NormalizedStatus::Unrecognized`] carrying the input unchanged.
pub fn normalize(carrier: CarrierCode, raw: &str) -> NormalizedStatus {
    let key = raw.trim();
    let mapped = match carrier {
        CarrierCode::Dhl => dhl(&key.to_ascii_lowercase()),
        CarrierCode::Overseas => overseas(&key.to_ascii_uppercase()),
        CarrierCode::BoxNow => boxnow(&key.to_ascii_uppercase()),
        CarrierCode::HpExpress => hp_express(&key.to_ascii_lowercase()),
    };

    match mapped {
        Some(status) => NormalizedStatus::Known(status),
        None => NormalizedStatus::Unrecognized(raw.to_string()),
    }
}

fn dhl(code: &str) -> Option<ShipmentStatus> {
    Some(match code {
        "pre-transit" => ShipmentStatus::Pending,
        "transit" => ShipmentStatus::Processing,
        "out-for-delivery" => ShipmentStatus::Shipped,
        "delivered" => ShipmentStatus::Delivered,
        "failure" => ShipmentStatus::Cancelled,
        _ => return None,
    })
}

fn overseas(code: &str) -> Option<ShipmentStatus> {
    Some(match code {
        "CREATED" => ShipmentStatus::Pending,
        "IN_TRANSIT" => ShipmentStatus::Processing,
        "OUT_FOR_DELIVERY" => ShipmentStatus::Shipped,
        "DELIVERED" => ShipmentStatus::Delivered,
        "CANCELLED" => ShipmentStatus::Cancelled,
        _ => return None,
    })
}

fn boxnow(code: &str) -> Option<ShipmentStatus> {
    Some(match code {
        "CREATED" => ShipmentStatus::Pending,
        "IN_TRANSIT" => ShipmentStatus::Processing,
        "IN_BOX" => ShipmentStatus::Shipped,
        "DELIVERED" => ShipmentStatus::Delivered,
        // Lockers send parcels back before the customer ever had them
        "CANCELLED" | "RETURNED" => ShipmentStatus::Cancelled,
        _ => return None,
    })
}

// HP Express reports our own vocabulary plus a few aliases
fn hp_express(code: &str) -> Option<ShipmentStatus> {
    Some(match code {
        "pending" | "created" => ShipmentStatus::Pending,
        "processing" | "in_transit" => ShipmentStatus::Processing,
        "shipped" | "out_for_delivery" => ShipmentStatus::Shipped,
        "delivered" => ShipmentStatus::Delivered,
        "cancelled" | "failed" => ShipmentStatus::Cancelled,
        "returned" => ShipmentStatus::Returned,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use ShipmentStatus::*;

    #[rstest]
    #[case(CarrierCode::Dhl, "pre-transit", Pending)]
    #[case(CarrierCode::Dhl, "transit", Processing)]
    #[case(CarrierCode::Dhl, "out-for-delivery", Shipped)]
    #[case(CarrierCode::Dhl, "delivered", Delivered)]
    #[case(CarrierCode::Dhl, "failure", Cancelled)]
    #[case(CarrierCode::Overseas, "CREATED", Pending)]
    #[case(CarrierCode::Overseas, "IN_TRANSIT", Processing)]
    #[case(CarrierCode::Overseas, "OUT_FOR_DELIVERY", Shipped)]
    #[case(CarrierCode::Overseas, "DELIVERED", Delivered)]
    #[case(CarrierCode::Overseas, "CANCELLED", Cancelled)]
    #[case(CarrierCode::BoxNow, "CREATED", Pending)]
    #[case(CarrierCode::BoxNow, "IN_TRANSIT", Processing)]
    #[case(CarrierCode::BoxNow, "IN_BOX", Shipped)]
    #[case(CarrierCode::BoxNow, "DELIVERED", Delivered)]
    #[case(CarrierCode::BoxNow, "CANCELLED", Cancelled)]
    #[case(CarrierCode::BoxNow, "RETURNED", Cancelled)]
    #[case(CarrierCode::HpExpress, "in_transit", Processing)]
    #[case(CarrierCode::HpExpress, "Delivered", Delivered)]
    #[case(CarrierCode::HpExpress, "failed", Cancelled)]
    fn maps_documented_vocabulary(
        #[case] carrier: CarrierCode,
        #[case] raw: &str,
        #[case] expected: ShipmentStatus,
    ) {
        assert_eq!(normalize(carrier, raw), NormalizedStatus::Known(expected));
    }

    #[rstest]
    #[case(CarrierCode::Dhl, "customs-hold")]
    #[case(CarrierCode::Overseas, "AT_DEPOT")]
    #[case(CarrierCode::BoxNow, "IN_LOCKER_EXPIRED")]
    #[case(CarrierCode::HpExpress, "")]
    fn passes_unknown_values_through(#[case] carrier: CarrierCode, #[case] raw: &str) {
        assert_eq!(
            normalize(carrier, raw),
            NormalizedStatus::Unrecognized(raw.to_string())
        );
    }

    #[test]
    fn vocabularies_are_not_shared_between_carriers() {
        assert!(matches!(
            normalize(CarrierCode::Overseas, "IN_BOX"),
            NormalizedStatus::Unrecognized(_)
        ));
        assert!(matches!(
            normalize(CarrierCode::Dhl, "IN_TRANSIT"),
            NormalizedStatus::Unrecognized(_)
        ));
    }

    #[test]
    fn event_label_uses_internal_name_when_known() {
        assert_eq!(normalize(CarrierCode::Dhl, "transit").event_label(), "processing");
        assert_eq!(normalize(CarrierCode::Dhl, "odd").event_label(), "odd");
    }
}
