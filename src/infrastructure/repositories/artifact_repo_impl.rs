// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::artifact::{ArtifactRemoval, GeneratedArtifact};
use crate::domain::models::task::{TaskKind, TaskScope};
use crate::domain::repositories::artifact_repository::ArtifactRepository;
use crate::domain::repositories::task_repository::RepositoryError;
use crate::infrastructure::database::entities::generated_artifact as artifact_entity;
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    sea_query::OnConflict, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait,
    QueryFilter, Set,
};
use std::sync::Arc;

/// 产物仓库实现
///
/// 以作用域键为主键，写入即覆盖
#[derive(Clone)]
pub struct ArtifactRepositoryImpl {
    db: Arc<DatabaseConnection>,
}

impl ArtifactRepositoryImpl {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ArtifactRepository for ArtifactRepositoryImpl {
    async fn persist(
        &self,
        kind: TaskKind,
        scope: &TaskScope,
        artifact: &GeneratedArtifact,
    ) -> Result<(), RepositoryError> {
        let content = serde_json::to_value(artifact)
            .map_err(|e| RepositoryError::Corrupt(format!("artifact {}: {}", kind, e)))?;

        let model = artifact_entity::ActiveModel {
            scope_key: Set(scope.key(kind)),
            kind: Set(kind.to_string()),
            book_id: Set(scope.book_id),
            chapter_id: Set(scope.chapter_id),
            grade_level: Set(scope.grade_level.map(|g| g.to_string())),
            content: Set(content),
            updated_at: Set(Utc::now().into()),
        };

        artifact_entity::Entity::insert(model)
            .on_conflict(
                OnConflict::column(artifact_entity::Column::ScopeKey)
                    .update_columns([
                        artifact_entity::Column::Content,
                        artifact_entity::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(self.db.as_ref())
            .await?;

        Ok(())
    }

    async fn remove(&self, removal: &ArtifactRemoval) -> Result<u64, RepositoryError> {
        let scope = TaskScope::chapter_grade(removal.book_id, removal.chapter_id, removal.grade);
        let result = artifact_entity::Entity::delete_by_id(scope.key(TaskKind::Questions))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected)
    }

    async fn exists(&self, kind: TaskKind, scope: &TaskScope) -> Result<bool, RepositoryError> {
        let count = artifact_entity::Entity::find()
            .filter(artifact_entity::Column::ScopeKey.eq(scope.key(kind)))
            .count(self.db.as_ref())
            .await?;
        Ok(count > 0)
    }

    async fn find(
        &self,
        kind: TaskKind,
        scope: &TaskScope,
    ) -> Result<Option<GeneratedArtifact>, RepositoryError> {
        artifact_entity::Entity::find_by_id(scope.key(kind))
            .one(self.db.as_ref())
            .await?
            .map(|model| {
                serde_json::from_value(model.content).map_err(|e| {
                    RepositoryError::Corrupt(format!("artifact {}: {}", model.scope_key, e))
                })
            })
            .transpose()
    }
}
