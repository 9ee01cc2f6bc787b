use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![Box::new(m20250101_000001_create_invoices_table::Migration)]
    }
}

mod m20250101_000001_create_invoices_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250101_000001_create_invoices_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Invoices::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Invoices::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Invoices::IpAddress).string_len(45).not_null())
                        .col(
                            ColumnDef::new(Invoices::CalledAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Invoices::ExpireAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Invoices::InvoiceNumber)
                                .string_len(255)
                                .not_null(),
                        )
                        .col(ColumnDef::new(Invoices::InvoiceId).string_len(255).not_null())
                        .col(
                            ColumnDef::new(Invoices::State)
                                .string_len(32)
                                .not_null()
                                .default("unpaid"),
                        )
                        .col(ColumnDef::new(Invoices::PaymentId).string_len(255).null())
                        .col(ColumnDef::new(Invoices::Request).json().not_null())
                        .col(ColumnDef::new(Invoices::Response).json().not_null())
                        .col(ColumnDef::new(Invoices::CallbackUrl).text().null())
                        .col(
                            ColumnDef::new(Invoices::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Invoices::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Invoices::DeletedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .to_owned(),
                )
                .await?;

            // Uniqueness only applies to live rows so a superseded invoice can
            // stay in the table next to its replacement.
            let db = manager.get_connection();
            db.execute_unprepared(
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_invoices_live_invoice_number \
                 ON invoices (invoice_number) WHERE deleted_at IS NULL",
            )
            .await?;
            db.execute_unprepared(
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_invoices_live_invoice_id \
                 ON invoices (invoice_id) WHERE deleted_at IS NULL",
            )
            .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_invoices_deleted_at")
                        .table(Invoices::Table)
                        .col(Invoices::DeletedAt)
                        .if_not_exists()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Invoices::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Invoices {
        Table,
        Id,
        IpAddress,
        CalledAt,
        ExpireAt,
        InvoiceNumber,
        InvoiceId,
        State,
        PaymentId,
        Request,
        Response,
        CallbackUrl,
        CreatedAt,
        UpdatedAt,
        DeletedAt,
    }
}
