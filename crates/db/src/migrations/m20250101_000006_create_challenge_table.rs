//! Create challenge and challenge completion tables migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Challenge::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Challenge::Id)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Challenge::Title).string_len(120).not_null())
                    .col(ColumnDef::new(Challenge::Description).text())
                    .col(ColumnDef::new(Challenge::Points).big_integer().not_null().default(0))
                    .col(
                        ColumnDef::new(Challenge::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(ChallengeCompletion::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ChallengeCompletion::Id)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ChallengeCompletion::ActorId)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ChallengeCompletion::ChallengeId)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ChallengeCompletion::CompletedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_challenge_completion_challenge")
                            .from(ChallengeCompletion::Table, ChallengeCompletion::ChallengeId)
                            .to(Challenge::Table, Challenge::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Unique index: (actor_id, challenge_id) - each challenge completes once
        manager
            .create_index(
                Index::create()
                    .name("idx_challenge_completion_actor_challenge")
                    .table(ChallengeCompletion::Table)
                    .col(ChallengeCompletion::ActorId)
                    .col(ChallengeCompletion::ChallengeId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ChallengeCompletion::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Challenge::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Challenge {
    Table,
    Id,
    Title,
    Description,
    Points,
    CreatedAt,
}

#[derive(Iden)]
enum ChallengeCompletion {
    Table,
    Id,
    ActorId,
    ChallengeId,
    CompletedAt,
}
