use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Resolved issues moved out of `shipment_issues` after the retention window
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "shipment_issues_archive")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub shipment_id: Uuid,
    pub issue_type: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution: Option<String>,
    pub archived_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<(super::shipment_issue::Model, DateTime<Utc>)> for ActiveModel {
    fn from((issue, archived_at): (super::shipment_issue::Model, DateTime<Utc>)) -> Self {
        use sea_orm::Set;
        Self {
            id: Set(issue.id),
            shipment_id: Set(issue.shipment_id),
            issue_type: Set(issue.issue_type),
            description: Set(issue.description),
            created_at: Set(issue.created_at),
            resolved_at: Set(issue.resolved_at),
            resolution: Set(issue.resolution),
            archived_at: Set(archived_at),
        }
    }
}
