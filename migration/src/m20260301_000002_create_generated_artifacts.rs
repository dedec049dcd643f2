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
                    .table(GeneratedArtifacts::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(GeneratedArtifacts::ScopeKey)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(GeneratedArtifacts::Kind).string().not_null())
                    .col(ColumnDef::new(GeneratedArtifacts::BookId).uuid().not_null())
                    .col(ColumnDef::new(GeneratedArtifacts::ChapterId).uuid())
                    .col(ColumnDef::new(GeneratedArtifacts::GradeLevel).string())
                    .col(ColumnDef::new(GeneratedArtifacts::Content).json().not_null())
                    .col(
                        ColumnDef::new(GeneratedArtifacts::UpdatedAt)
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
                    .name("idx_generated_artifacts_chapter_grade")
                    .table(GeneratedArtifacts::Table)
                    .col(GeneratedArtifacts::ChapterId)
                    .col(GeneratedArtifacts::GradeLevel)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(GeneratedArtifacts::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum GeneratedArtifacts {
    Table,
    ScopeKey,
    Kind,
    BookId,
    ChapterId,
    GradeLevel,
    Content,
    UpdatedAt,
}
