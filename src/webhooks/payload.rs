use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::carriers::CarrierCode;
use crate::errors::ServiceError;

/// A single status push from a carrier, status still raw
#[derive(Debug, Clone, PartialEq)]
pub struct InboundTrackingUpdate {
    pub tracking_number: String,
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub location: Option<String>,
    pub description: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HpExpressPush {
    tracking_number: String,
    status: String,
    timestamp: DateTime<Utc>,
    location: Option<String>,
    description: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DhlPush {
    shipment_id: String,
    status: DhlStatus,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DhlStatus {
    status_code: String,
    timestamp: DateTime<Utc>,
    location: Option<DhlLocation>,
    description: Option<String>,
}

#[derive(Deserialize)]
struct DhlLocation {
    address: Option<DhlAddress>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DhlAddress {
    address_locality: Option<String>,
}

#[derive(Deserialize)]
struct OverseasPush {
    tracking_number: String,
    status: String,
    last_update: DateTime<Utc>,
    current_location: Option<String>,
    status_description: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BoxNowPush {
    tracking_code: String,
    status: String,
    last_update: DateTime<Utc>,
    current_box: Option<BoxNowLocker>,
    status_description: Option<String>,
}

#[derive(Deserialize)]
struct BoxNowLocker {
    name: Option<String>,
}

fn decode<'a, T: Deserialize<'a>>(provider: CarrierCode, body: &'a [u8]) -> Result<T, ServiceError> {
    serde_json::from_slice(body).map_err(|e| {
        ServiceError::ValidationError(format!("malformed {provider} webhook payload: {e}"))
    })
}

/// Extracts the tracking update from a verified webhook body
pub fn parse(provider: CarrierCode, body: &[u8]) -> Result<InboundTrackingUpdate, ServiceError> {
    let update = match provider {
        CarrierCode::HpExpress => {
            let p: HpExpressPush = decode(provider, body)?;
            InboundTrackingUpdate {
                tracking_number: p.tracking_number,
                status: p.status,
                timestamp: p.timestamp,
                location: p.location,
                description: p.description,
            }
        }
        CarrierCode::Dhl => {
            let p: DhlPush = decode(provider, body)?;
            InboundTrackingUpdate {
                tracking_number: p.shipment_id,
                status: p.status.status_code,
                timestamp: p.status.timestamp,
                location: p
                    .status
                    .location
                    .and_then(|l| l.address)
                    .and_then(|a| a.address_locality),
                description: p.status.description,
            }
        }
        CarrierCode::Overseas => {
            let p: OverseasPush = decode(provider, body)?;
            InboundTrackingUpdate {
                tracking_number: p.tracking_number,
                status: p.status,
                timestamp: p.last_update,
                location: p.current_location,
                description: p.status_description,
            }
        }
        CarrierCode::BoxNow => {
            let p: BoxNowPush = decode(provider, body)?;
            InboundTrackingUpdate {
                tracking_number: p.tracking_code,
                status: p.status,
                timestamp: p.last_update,
                location: p.current_box.and_then(|b| b.name),
                description: p.status_description,
            }
        }
    };

    if update.tracking_number.trim().is_empty() {
        return Err(ServiceError::ValidationError(
            "webhook payload has an empty tracking number".to_string(),
        ));
    }
    Ok(update)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dhl_nested_status() {
        let body = br#"{
            "shipmentId": "JD014600003",
            "status": {
                "statusCode": "delivered",
                "timestamp": "2024-06-01T10:00:00Z",
                "location": {"address": {"addressLocality": "Zagreb"}},
                "description": "Delivered to recipient"
            }
        }"#;
        let update = parse(CarrierCode::Dhl, body).unwrap();
        assert_eq!(update.tracking_number, "JD014600003");
        assert_eq!(update.status, "delivered");
        assert_eq!(update.location.as_deref(), Some("Zagreb"));
    }

    #[test]
    fn parses_boxnow_locker_name() {
        let body = br#"{
            "trackingCode": "BX99",
            "status": "IN_BOX",
            "lastUpdate": "2024-06-01T10:00:00Z",
            "timestamp": "2024-06-01T10:00:00Z",
            "currentBox": {"name": "Locker Savica"}
        }"#;
        let update = parse(CarrierCode::BoxNow, body).unwrap();
        assert_eq!(update.location.as_deref(), Some("Locker Savica"));
        assert_eq!(update.description, None);
    }

    #[test]
    fn parses_overseas_snake_case() {
        let body = br#"{
            "tracking_number": "OV1",
            "status": "IN_TRANSIT",
            "last_update": "2024-06-01T10:00:00Z",
            "current_location": "Split",
            "status_description": "On the way"
        }"#;
        let update = parse(CarrierCode::Overseas, body).unwrap();
        assert_eq!(update.tracking_number, "OV1");
        assert_eq!(update.description.as_deref(), Some("On the way"));
    }

    #[test]
    fn rejects_payload_without_tracking_number() {
        let body = br#"{"status": "delivered", "timestamp": "2024-06-01T10:00:00Z"}"#;
        assert!(matches!(
            parse(CarrierCode::HpExpress, body),
            Err(ServiceError::ValidationError(_))
        ));
    }
}
