// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::artifact::{ArtifactRemoval, GeneratedArtifact};
use crate::domain::models::task::{TaskKind, TaskScope};
use crate::domain::repositories::task_repository::RepositoryError;
use async_trait::async_trait;

/// 产物仓库特质
///
/// 工作器成功后调用的持久化回调。写入按作用域覆盖（upsert），
/// 同一任务被重试或回收后再次写入不会产生重复产物。
#[async_trait]
pub trait ArtifactRepository: Send + Sync {
    /// 按作用域写入产物，已存在时覆盖
    async fn persist(
        &self,
        kind: TaskKind,
        scope: &TaskScope,
        artifact: &GeneratedArtifact,
    ) -> Result<(), RepositoryError>;

    /// 删除某章节某年级的题目产物，返回删除的行数
    async fn remove(&self, removal: &ArtifactRemoval) -> Result<u64, RepositoryError>;

    /// 作用域内是否已有产物
    async fn exists(&self, kind: TaskKind, scope: &TaskScope) -> Result<bool, RepositoryError>;

    /// 读取作用域内的产物
    async fn find(
        &self,
        kind: TaskKind,
        scope: &TaskScope,
    ) -> Result<Option<GeneratedArtifact>, RepositoryError>;
}
