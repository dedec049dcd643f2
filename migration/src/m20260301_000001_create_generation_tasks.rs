// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(GenerationTasks::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(GenerationTasks::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(GenerationTasks::Kind).string().not_null())
                    .col(
                        ColumnDef::new(GenerationTasks::Priority)
                            .integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(GenerationTasks::Status).string().not_null())
                    .col(ColumnDef::new(GenerationTasks::BookId).uuid().not_null())
                    .col(ColumnDef::new(GenerationTasks::ChapterId).uuid())
                    .col(ColumnDef::new(GenerationTasks::GradeLevel).string())
                    .col(ColumnDef::new(GenerationTasks::ScopeKey).string().not_null())
                    .col(ColumnDef::new(GenerationTasks::Payload).json().not_null())
                    .col(
                        ColumnDef::new(GenerationTasks::Attempts)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(GenerationTasks::MaxAttempts)
                            .integer()
                            .not_null()
                            .default(3),
                    )
                    .col(ColumnDef::new(GenerationTasks::WorkerId).uuid())
                    .col(ColumnDef::new(GenerationTasks::ClaimedAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(GenerationTasks::ErrorMessage).text())
                    .col(
                        ColumnDef::new(GenerationTasks::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(GenerationTasks::UpdatedAt)
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
                    .name("idx_generation_tasks_status_priority")
                    .table(GenerationTasks::Table)
                    .col(GenerationTasks::Status)
                    .col(GenerationTasks::Priority)
                    .col(GenerationTasks::CreatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_generation_tasks_book_id")
                    .table(GenerationTasks::Table)
                    .col(GenerationTasks::BookId)
                    .to_owned(),
            )
            .await?;

        // 同一作用域最多只能有一个排队中或处理中的任务
        manager
            .get_connection()
            .execute_unprepared(
                "CREATE UNIQUE INDEX IF NOT EXISTS uq_generation_tasks_active_scope \
                 ON generation_tasks (scope_key) \
                 WHERE status IN ('queued', 'processing')",
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(GenerationTasks::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum GenerationTasks {
    Table,
    Id,
    Kind,
    Priority,
    Status,
    BookId,
    ChapterId,
    GradeLevel,
    ScopeKey,
    Payload,
    Attempts,
    MaxAttempts,
    WorkerId,
    ClaimedAt,
    ErrorMessage,
    CreatedAt,
    UpdatedAt,
}
