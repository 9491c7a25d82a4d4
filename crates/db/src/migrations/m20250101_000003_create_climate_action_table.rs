//! Create climate action table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ClimateAction::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ClimateAction::Id)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ClimateAction::ParentId).string_len(32))
                    .col(ColumnDef::new(ClimateAction::AuthorId).string_len(32).not_null())
                    .col(ColumnDef::new(ClimateAction::Title).string_len(200))
                    .col(ColumnDef::new(ClimateAction::Body).text().not_null())
                    .col(
                        ColumnDef::new(ClimateAction::IsPublic)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(ClimateAction::ViewCount)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(ClimateAction::Category).string_len(40))
                    .col(ColumnDef::new(ClimateAction::Latitude).double())
                    .col(ColumnDef::new(ClimateAction::Longitude).double())
                    .col(
                        ColumnDef::new(ClimateAction::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Index: (is_public, created_at) for the public feed
        manager
            .create_index(
                Index::create()
                    .name("idx_climate_action_public_created_at")
                    .table(ClimateAction::Table)
                    .col(ClimateAction::IsPublic)
                    .col(ClimateAction::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ClimateAction::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum ClimateAction {
    Table,
    Id,
    ParentId,
    AuthorId,
    Title,
    Body,
    IsPublic,
    ViewCount,
    Category,
    Latitude,
    Longitude,
    CreatedAt,
}
