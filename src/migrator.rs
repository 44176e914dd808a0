use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240601_000001_create_orders_tables::Migration),
            Box::new(m20240601_000002_create_shipments_tables::Migration),
            Box::new(m20240601_000003_create_webhook_retries_table::Migration),
            Box::new(m20240601_000004_create_batch_jobs_table::Migration),
        ]
    }
}

mod m20240601_000001_create_orders_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000001_create_orders_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Orders::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Orders::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Orders::Status).string_len(32).not_null())
                        .col(
                            ColumnDef::new(Orders::PaymentStatus)
                                .string_len(32)
                                .not_null()
                                .default("pending"),
                        )
                        .col(ColumnDef::new(Orders::CustomerEmail).string().not_null())
                        .col(ColumnDef::new(Orders::CustomerName).string().not_null())
                        .col(
                            ColumnDef::new(Orders::TotalAmount)
                                .decimal_len(12, 2)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Orders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_status")
                        .table(Orders::Table)
                        .col(Orders::Status)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(OrderItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(OrderItems::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderItems::OrderId).uuid().not_null())
                        .col(ColumnDef::new(OrderItems::Name).string().not_null())
                        .col(ColumnDef::new(OrderItems::Quantity).integer().not_null())
                        .col(
                            ColumnDef::new(OrderItems::Price)
                                .decimal_len(12, 2)
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_order_items_order_id")
                                .from(OrderItems::Table, OrderItems::OrderId)
                                .to(Orders::Table, Orders::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(OrderStatusHistory::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(OrderStatusHistory::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(OrderStatusHistory::OrderId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(OrderStatusHistory::Status)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderStatusHistory::Notes).text().null())
                        .col(
                            ColumnDef::new(OrderStatusHistory::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_order_status_history_order_id")
                                .from(OrderStatusHistory::Table, OrderStatusHistory::OrderId)
                                .to(Orders::Table, Orders::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_order_status_history_order_id")
                        .table(OrderStatusHistory::Table)
                        .col(OrderStatusHistory::OrderId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(OrderStatusHistory::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(OrderItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Orders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Orders {
        Table,
        Id,
        Status,
        PaymentStatus,
        CustomerEmail,
        CustomerName,
        TotalAmount,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum OrderItems {
        Table,
        Id,
        OrderId,
        Name,
        Quantity,
        Price,
    }

    #[derive(DeriveIden)]
    enum OrderStatusHistory {
        Table,
        Id,
        OrderId,
        Status,
        Notes,
        CreatedAt,
    }
}

mod m20240601_000002_create_shipments_tables {
    use super::m20240601_000001_create_orders_tables::Orders;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000002_create_shipments_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Shipments::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Shipments::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Shipments::OrderId).uuid().not_null())
                        .col(ColumnDef::new(Shipments::ProviderId).string_len(32).not_null())
                        .col(ColumnDef::new(Shipments::TrackingNumber).string().not_null())
                        .col(ColumnDef::new(Shipments::Status).string_len(32).not_null())
                        .col(ColumnDef::new(Shipments::RawStatus).string().null())
                        .col(
                            ColumnDef::new(Shipments::EstimatedDeliveryDate)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Shipments::ActualDeliveryDate)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(ColumnDef::new(Shipments::ShippingRateId).string().null())
                        .col(ColumnDef::new(Shipments::LabelUrl).string().null())
                        .col(ColumnDef::new(Shipments::Weight).double().null())
                        .col(ColumnDef::new(Shipments::ShippingCost).double().null())
                        .col(ColumnDef::new(Shipments::Priority).string_len(16).null())
                        .col(
                            ColumnDef::new(Shipments::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Shipments::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_shipments_order_id")
                                .from(Shipments::Table, Shipments::OrderId)
                                .to(Orders::Table, Orders::Id)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_shipments_order_id")
                        .table(Shipments::Table)
                        .col(Shipments::OrderId)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_shipments_provider_tracking_number")
                        .table(Shipments::Table)
                        .col(Shipments::ProviderId)
                        .col(Shipments::TrackingNumber)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_shipments_tracking_number")
                        .table(Shipments::Table)
                        .col(Shipments::TrackingNumber)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_shipments_status")
                        .table(Shipments::Table)
                        .col(Shipments::Status)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(ShipmentTrackingEvents::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ShipmentTrackingEvents::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ShipmentTrackingEvents::ShipmentId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ShipmentTrackingEvents::Status)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ShipmentTrackingEvents::Timestamp)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(ColumnDef::new(ShipmentTrackingEvents::Location).string().null())
                        .col(ColumnDef::new(ShipmentTrackingEvents::Description).text().null())
                        .col(
                            ColumnDef::new(ShipmentTrackingEvents::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_tracking_events_shipment_id")
                                .from(
                                    ShipmentTrackingEvents::Table,
                                    ShipmentTrackingEvents::ShipmentId,
                                )
                                .to(Shipments::Table, Shipments::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            // Idempotent inserts rely on this index
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("uq_tracking_events_shipment_status_timestamp")
                        .table(ShipmentTrackingEvents::Table)
                        .col(ShipmentTrackingEvents::ShipmentId)
                        .col(ShipmentTrackingEvents::Status)
                        .col(ShipmentTrackingEvents::Timestamp)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(ShipmentIssues::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ShipmentIssues::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(ShipmentIssues::ShipmentId).uuid().not_null())
                        .col(
                            ColumnDef::new(ShipmentIssues::IssueType)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(ColumnDef::new(ShipmentIssues::Description).text().not_null())
                        .col(
                            ColumnDef::new(ShipmentIssues::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ShipmentIssues::ResolvedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(ColumnDef::new(ShipmentIssues::Resolution).text().null())
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_shipment_issues_shipment_id")
                                .from(ShipmentIssues::Table, ShipmentIssues::ShipmentId)
                                .to(Shipments::Table, Shipments::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_shipment_issues_shipment_type")
                        .table(ShipmentIssues::Table)
                        .col(ShipmentIssues::ShipmentId)
                        .col(ShipmentIssues::IssueType)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(ShipmentIssuesArchive::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ShipmentIssuesArchive::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ShipmentIssuesArchive::ShipmentId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ShipmentIssuesArchive::IssueType)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ShipmentIssuesArchive::Description)
                                .text()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ShipmentIssuesArchive::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ShipmentIssuesArchive::ResolvedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(ColumnDef::new(ShipmentIssuesArchive::Resolution).text().null())
                        .col(
                            ColumnDef::new(ShipmentIssuesArchive::ArchivedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ShipmentIssuesArchive::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(ShipmentIssues::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(ShipmentTrackingEvents::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Shipments::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Shipments {
        Table,
        Id,
        OrderId,
        ProviderId,
        TrackingNumber,
        Status,
        RawStatus,
        EstimatedDeliveryDate,
        ActualDeliveryDate,
        ShippingRateId,
        LabelUrl,
        Weight,
        ShippingCost,
        Priority,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum ShipmentTrackingEvents {
        Table,
        Id,
        ShipmentId,
        Status,
        Timestamp,
        Location,
        Description,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    enum ShipmentIssues {
        Table,
        Id,
        ShipmentId,
        IssueType,
        Description,
        CreatedAt,
        ResolvedAt,
        Resolution,
    }

    #[derive(DeriveIden)]
    enum ShipmentIssuesArchive {
        Table,
        Id,
        ShipmentId,
        IssueType,
        Description,
        CreatedAt,
        ResolvedAt,
        Resolution,
        ArchivedAt,
    }
}

mod m20240601_000003_create_webhook_retries_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000003_create_webhook_retries_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(WebhookRetries::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(WebhookRetries::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(WebhookRetries::Endpoint).string().not_null())
                        .col(ColumnDef::new(WebhookRetries::Payload).text().not_null())
                        .col(
                            ColumnDef::new(WebhookRetries::Attempts)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .col(
                            ColumnDef::new(WebhookRetries::MaxAttempts)
                                .integer()
                                .not_null()
                                .default(5),
                        )
                        .col(
                            ColumnDef::new(WebhookRetries::NextRetry)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(ColumnDef::new(WebhookRetries::LastError).text().null())
                        .col(
                            ColumnDef::new(WebhookRetries::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_webhook_retries_next_retry")
                        .table(WebhookRetries::Table)
                        .col(WebhookRetries::NextRetry)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(WebhookRetries::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum WebhookRetries {
        Table,
        Id,
        Endpoint,
        Payload,
        Attempts,
        MaxAttempts,
        NextRetry,
        LastError,
        CreatedAt,
    }
}

mod m20240601_000004_create_batch_jobs_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000004_create_batch_jobs_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(BatchJobs::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(BatchJobs::Name)
                                .string_len(64)
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(BatchJobs::CronExpression).string().not_null())
                        .col(
                            ColumnDef::new(BatchJobs::IntervalSecs)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(BatchJobs::Enabled)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(BatchJobs::LastRun)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(ColumnDef::new(BatchJobs::LastStatus).string_len(16).null())
                        .col(ColumnDef::new(BatchJobs::LastError).text().null())
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(BatchJobs::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum BatchJobs {
        Table,
        Name,
        CronExpression,
        IntervalSecs,
        Enabled,
        LastRun,
        LastStatus,
        LastError,
    }
}
