//! Create goal table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Goal::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Goal::Id)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Goal::ActorId).string_len(32).not_null())
                    .col(ColumnDef::new(Goal::Title).string_len(120).not_null())
                    .col(ColumnDef::new(Goal::Target).double().not_null())
                    .col(ColumnDef::new(Goal::Progress).double().not_null().default(0.0))
                    .col(ColumnDef::new(Goal::Completed).boolean().not_null().default(false))
                    .col(
                        ColumnDef::new(Goal::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_goal_actor_id")
                    .table(Goal::Table)
                    .col(Goal::ActorId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Goal::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Goal {
    Table,
    Id,
    ActorId,
    Title,
    Target,
    Progress,
    Completed,
    CreatedAt,
}
