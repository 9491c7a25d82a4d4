//! Create forum post table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ForumPost::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ForumPost::Id)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ForumPost::ParentId).string_len(32))
                    .col(ColumnDef::new(ForumPost::AuthorId).string_len(32).not_null())
                    .col(ColumnDef::new(ForumPost::Title).string_len(200))
                    .col(ColumnDef::new(ForumPost::Body).text().not_null())
                    .col(ColumnDef::new(ForumPost::IsPublic).boolean().not_null().default(true))
                    .col(ColumnDef::new(ForumPost::ViewCount).big_integer().not_null().default(0))
                    .col(
                        ColumnDef::new(ForumPost::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Index: parent_id (for listing a forum)
        manager
            .create_index(
                Index::create()
                    .name("idx_forum_post_parent_id")
                    .table(ForumPost::Table)
                    .col(ForumPost::ParentId)
                    .to_owned(),
            )
            .await?;

        // Index: created_at (for feed ordering)
        manager
            .create_index(
                Index::create()
                    .name("idx_forum_post_created_at")
                    .table(ForumPost::Table)
                    .col(ForumPost::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ForumPost::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum ForumPost {
    Table,
    Id,
    ParentId,
    AuthorId,
    Title,
    Body,
    IsPublic,
    ViewCount,
    CreatedAt,
}
