use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240101_000001_create_inventory_records_table::Migration),
            Box::new(m20240101_000002_create_transfer_requests_table::Migration),
            Box::new(m20240101_000003_create_audit_events_table::Migration),
            Box::new(m20240101_000004_create_one_time_permissions_table::Migration),
        ]
    }
}

mod m20240101_000001_create_inventory_records_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000001_create_inventory_records_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(InventoryRecords::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(InventoryRecords::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryRecords::LocationType)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryRecords::LocationId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryRecords::ProductId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryRecords::CurrentQuantity)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(InventoryRecords::ReservedQuantity)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(InventoryRecords::MinimumStockLevel)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(InventoryRecords::MaximumStockLevel)
                                .integer()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(InventoryRecords::ReorderPoint)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(InventoryRecords::LastUpdated)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            // One ledger row per (location, product) key
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_inventory_records_location_product")
                        .table(InventoryRecords::Table)
                        .col(InventoryRecords::LocationType)
                        .col(InventoryRecords::LocationId)
                        .col(InventoryRecords::ProductId)
                        .unique()
                        .to_owned(),
                )
                .await?;

            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(InventoryRecords::Table).to_owned())
                .await
        }
    }

    #[derive(Iden)]
    enum InventoryRecords {
        Table,
        Id,
        LocationType,
        LocationId,
        ProductId,
        CurrentQuantity,
        ReservedQuantity,
        MinimumStockLevel,
        MaximumStockLevel,
        ReorderPoint,
        LastUpdated,
    }
}

mod m20240101_000002_create_transfer_requests_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000002_create_transfer_requests_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(TransferRequests::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(TransferRequests::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(TransferRequests::CompanyId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(TransferRequests::ProductId)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(TransferRequests::ProductName).string().null())
                        .col(ColumnDef::new(TransferRequests::ProductSku).string().null())
                        .col(
                            ColumnDef::new(TransferRequests::FromLocationType)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(TransferRequests::FromLocationId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(TransferRequests::ToLocationType)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(TransferRequests::ToLocationId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(TransferRequests::RequestedQuantity)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(TransferRequests::ApprovedQuantity)
                                .integer()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(TransferRequests::ReceivedQuantity)
                                .integer()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(TransferRequests::DamagedQuantity)
                                .integer()
                                .null(),
                        )
                        .col(ColumnDef::new(TransferRequests::Status).string().not_null())
                        .col(
                            ColumnDef::new(TransferRequests::Priority)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(TransferRequests::Reason).text().null())
                        .col(ColumnDef::new(TransferRequests::Notes).text().null())
                        .col(
                            ColumnDef::new(TransferRequests::RequestedByUserId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(TransferRequests::RequestedByName)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(TransferRequests::ApprovedByUserId)
                                .uuid()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(TransferRequests::ApprovedByName)
                                .string()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(TransferRequests::ReceivedByUserId)
                                .uuid()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(TransferRequests::ReceiverName)
                                .string()
                                .null(),
                        )
                        .col(ColumnDef::new(TransferRequests::CarrierName).string().null())
                        .col(
                            ColumnDef::new(TransferRequests::CarrierPhone)
                                .string()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(TransferRequests::CarrierVehicle)
                                .string()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(TransferRequests::TransportMethod)
                                .string()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(TransferRequests::ProofOfDeliveryUrl)
                                .string()
                                .null(),
                        )
                        .col(ColumnDef::new(TransferRequests::ReceiptNotes).text().null())
                        .col(
                            ColumnDef::new(TransferRequests::RequestedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(TransferRequests::ApprovedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(TransferRequests::ShippedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(TransferRequests::EstimatedDeliveryAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(TransferRequests::DeliveredAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(TransferRequests::ReceivedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(TransferRequests::CompletedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(TransferRequests::CancelledAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(TransferRequests::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(TransferRequests::UpdatedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_transfer_requests_company_status")
                        .table(TransferRequests::Table)
                        .col(TransferRequests::CompanyId)
                        .col(TransferRequests::Status)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_transfer_requests_from_location")
                        .table(TransferRequests::Table)
                        .col(TransferRequests::FromLocationType)
                        .col(TransferRequests::FromLocationId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_transfer_requests_to_location")
                        .table(TransferRequests::Table)
                        .col(TransferRequests::ToLocationType)
                        .col(TransferRequests::ToLocationId)
                        .to_owned(),
                )
                .await?;

            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(TransferRequests::Table).to_owned())
                .await
        }
    }

    #[derive(Iden)]
    enum TransferRequests {
        Table,
        Id,
        CompanyId,
        ProductId,
        ProductName,
        ProductSku,
        FromLocationType,
        FromLocationId,
        ToLocationType,
        ToLocationId,
        RequestedQuantity,
        ApprovedQuantity,
        ReceivedQuantity,
        DamagedQuantity,
        Status,
        Priority,
        Reason,
        Notes,
        RequestedByUserId,
        RequestedByName,
        ApprovedByUserId,
        ApprovedByName,
        ReceivedByUserId,
        ReceiverName,
        CarrierName,
        CarrierPhone,
        CarrierVehicle,
        TransportMethod,
        ProofOfDeliveryUrl,
        ReceiptNotes,
        RequestedAt,
        ApprovedAt,
        ShippedAt,
        EstimatedDeliveryAt,
        DeliveredAt,
        ReceivedAt,
        CompletedAt,
        CancelledAt,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240101_000003_create_audit_events_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000003_create_audit_events_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(AuditEvents::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(AuditEvents::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(AuditEvents::Sequence)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(AuditEvents::EventAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(ColumnDef::new(AuditEvents::Actor).string().not_null())
                        .col(ColumnDef::new(AuditEvents::ActorId).uuid().null())
                        .col(ColumnDef::new(AuditEvents::Action).string().not_null())
                        .col(ColumnDef::new(AuditEvents::EntityType).string().not_null())
                        .col(ColumnDef::new(AuditEvents::EntityId).string().not_null())
                        .col(ColumnDef::new(AuditEvents::CompanyId).uuid().not_null())
                        .col(ColumnDef::new(AuditEvents::DetailsJson).text().null())
                        .col(
                            ColumnDef::new(AuditEvents::PrevHash)
                                .string_len(64)
                                .not_null(),
                        )
                        .col(ColumnDef::new(AuditEvents::Hash).string_len(64).not_null())
                        .col(
                            ColumnDef::new(AuditEvents::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            // Chain order must be unambiguous per company
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_audit_events_company_sequence")
                        .table(AuditEvents::Table)
                        .col(AuditEvents::CompanyId)
                        .col(AuditEvents::Sequence)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_audit_events_entity")
                        .table(AuditEvents::Table)
                        .col(AuditEvents::EntityType)
                        .col(AuditEvents::EntityId)
                        .to_owned(),
                )
                .await?;

            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(AuditEvents::Table).to_owned())
                .await
        }
    }

    #[derive(Iden)]
    enum AuditEvents {
        Table,
        Id,
        Sequence,
        EventAt,
        Actor,
        ActorId,
        Action,
        EntityType,
        EntityId,
        CompanyId,
        DetailsJson,
        PrevHash,
        Hash,
        CreatedAt,
    }
}

mod m20240101_000004_create_one_time_permissions_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000004_create_one_time_permissions_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(OneTimePermissions::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(OneTimePermissions::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(OneTimePermissions::GrantedToUserId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(OneTimePermissions::GrantedByUserId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(OneTimePermissions::PermissionType)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(OneTimePermissions::GrantedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(OneTimePermissions::ExpiresAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(OneTimePermissions::UsedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(OneTimePermissions::IsUsed)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(OneTimePermissions::IsExpired)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(ColumnDef::new(OneTimePermissions::StoreId).uuid().null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_one_time_permissions_user_type")
                        .table(OneTimePermissions::Table)
                        .col(OneTimePermissions::GrantedToUserId)
                        .col(OneTimePermissions::PermissionType)
                        .col(OneTimePermissions::ExpiresAt)
                        .to_owned(),
                )
                .await?;

            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(OneTimePermissions::Table).to_owned())
                .await
        }
    }

    #[derive(Iden)]
    enum OneTimePermissions {
        Table,
        Id,
        GrantedToUserId,
        GrantedByUserId,
        PermissionType,
        GrantedAt,
        ExpiresAt,
        UsedAt,
        IsUsed,
        IsExpired,
        StoreId,
    }
}
