//! Create profile table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Profile::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Profile::Id)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Profile::DisplayName).string_len(80).not_null())
                    .col(ColumnDef::new(Profile::AvatarUrl).string_len(512))
                    .col(ColumnDef::new(Profile::IsPublic).boolean().not_null().default(true))
                    .col(ColumnDef::new(Profile::Points).big_integer().not_null().default(0))
                    .col(
                        ColumnDef::new(Profile::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Index: points (for the leaderboard)
        manager
            .create_index(
                Index::create()
                    .name("idx_profile_points")
                    .table(Profile::Table)
                    .col(Profile::Points)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Profile::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Profile {
    Table,
    Id,
    DisplayName,
    AvatarUrl,
    IsPublic,
    Points,
    CreatedAt,
}
