use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Internal shipment state. Carrier vocabularies are normalized into these
/// values before they reach the reconciler.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
    ToSchema,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ShipmentStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "processing")]
    Processing,
    #[sea_orm(string_value = "shipped")]
    Shipped,
    #[sea_orm(string_value = "delivered")]
    Delivered,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
    #[sea_orm(string_value = "returned")]
    Returned,
}

impl ShipmentStatus {
    pub const TERMINAL: [ShipmentStatus; 3] = [
        ShipmentStatus::Delivered,
        ShipmentStatus::Cancelled,
        ShipmentStatus::Returned,
    ];

    /// No reconciliation is attempted once a shipment reaches one of these.
    pub fn is_terminal(self) -> bool {
        Self::TERMINAL.contains(&self)
    }

    /// Forward-only progression. Carriers may skip intermediate scans, so
    /// any later happy-path state is accepted; `returned` only follows `shipped`.
    pub fn can_transition_to(self, next: ShipmentStatus) -> bool {
        use ShipmentStatus::*;
        match (self, next) {
            (from, to) if from == to => false,
            (Delivered | Cancelled | Returned, _) => false,
            (_, Cancelled) => true,
            (Shipped, Returned) => true,
            (_, Returned) => false,
            (from, to) => to.rank() > from.rank(),
        }
    }

    fn rank(self) -> u8 {
        match self {
            ShipmentStatus::Pending => 0,
            ShipmentStatus::Processing => 1,
            ShipmentStatus::Shipped => 2,
            ShipmentStatus::Delivered => 3,
            ShipmentStatus::Cancelled | ShipmentStatus::Returned => 4,
        }
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "shipments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(unique)]
    pub order_id: Uuid,

    /// Carrier code (`hp_express`, `dhl`, `overseas`, `boxnow`)
    pub provider_id: String,

    pub tracking_number: String,

    pub status: ShipmentStatus,

    /// Last status string reported by the carrier, kept verbatim
    pub raw_status: Option<String>,

    pub estimated_delivery_date: Option<DateTime<Utc>>,

    /// Set only while `status` is `delivered`
    pub actual_delivery_date: Option<DateTime<Utc>>,

    pub shipping_rate_id: Option<String>,

    pub label_url: Option<String>,

    pub weight: Option<f64>,

    pub shipping_cost: Option<f64>,

    pub priority: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::order::Entity",
        from = "Column::OrderId",
        to = "super::order::Column::Id",
        on_delete = "Cascade"
    )]
    Order,

    #[sea_orm(has_many = "super::shipment_tracking_event::Entity")]
    TrackingEvents,

    #[sea_orm(has_many = "super::shipment_issue::Entity")]
    Issues,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

impl Related<super::shipment_tracking_event::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::TrackingEvents.def()
    }
}

impl Related<super::shipment_issue::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Issues.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_delayed_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_terminal()
            && self
                .estimated_delivery_date
                .map(|eta| eta < now)
                .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::Iterable;
    use std::str::FromStr;
    use ShipmentStatus::*;

    #[test]
    fn terminal_states_accept_nothing() {
        for from in ShipmentStatus::TERMINAL {
            for to in ShipmentStatus::iter() {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn forward_progression_only() {
        assert!(Pending.can_transition_to(Processing));
        assert!(Pending.can_transition_to(Delivered));
        assert!(Processing.can_transition_to(Shipped));
        assert!(Shipped.can_transition_to(Delivered));
        assert!(!Shipped.can_transition_to(Processing));
        assert!(!Processing.can_transition_to(Pending));
        assert!(!Processing.can_transition_to(Processing));
    }

    #[test]
    fn cancelled_from_any_open_state_returned_only_from_shipped() {
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Processing.can_transition_to(Cancelled));
        assert!(Shipped.can_transition_to(Cancelled));
        assert!(Shipped.can_transition_to(Returned));
        assert!(!Processing.can_transition_to(Returned));
        assert!(!Pending.can_transition_to(Returned));
    }

    #[test]
    fn parses_and_displays_snake_case() {
        assert_eq!(ShipmentStatus::from_str("Delivered").unwrap(), Delivered);
        assert_eq!(Processing.to_string(), "processing");
        assert!(ShipmentStatus::from_str("in_box").is_err());
    }
}
