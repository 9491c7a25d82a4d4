//! Create reaction table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Reaction::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Reaction::Id)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Reaction::ActorId).string_len(32).not_null())
                    .col(ColumnDef::new(Reaction::ParentId).string_len(32).not_null())
                    .col(ColumnDef::new(Reaction::Kind).string_len(16).not_null())
                    .col(
                        ColumnDef::new(Reaction::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Unique index: (actor_id, parent_id) - one reaction per actor per parent
        manager
            .create_index(
                Index::create()
                    .name("idx_reaction_actor_parent")
                    .table(Reaction::Table)
                    .col(Reaction::ActorId)
                    .col(Reaction::ParentId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Index: parent_id (for tallies)
        manager
            .create_index(
                Index::create()
                    .name("idx_reaction_parent_id")
                    .table(Reaction::Table)
                    .col(Reaction::ParentId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Reaction::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Reaction {
    Table,
    Id,
    ActorId,
    ParentId,
    Kind,
    CreatedAt,
}
