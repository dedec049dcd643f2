// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::models::grade::Grade;
use crate::domain::models::task::{TaskKind, TaskScope, TaskStatus};
use crate::domain::repositories::artifact_repository::ArtifactRepository;
use crate::domain::repositories::task_repository::{RepositoryError, TaskRepository};

/// 对外展示的生成状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    /// 产物已存在
    Ready,
    Queued,
    Processing,
    /// 最近一次任务失败，等待人工重试
    Error,
    /// 既无产物也无任务
    Pending,
}

/// 书籍级状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BookStatus {
    pub tags: GenerationStatus,
    pub description: GenerationStatus,
}

/// 章节某年级的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChapterStatus {
    pub questions: GenerationStatus,
}

/// 状态计算器
///
/// 状态不单独存储，每次都由任务表与产物表推导：
/// 活跃任务优先，其次是已有产物，再次是失败记录。
pub struct StatusCalculator<R: ?Sized, A: ?Sized> {
    tasks: Arc<R>,
    artifacts: Arc<A>,
}

impl<R, A> StatusCalculator<R, A>
where
    R: TaskRepository + ?Sized,
    A: ArtifactRepository + ?Sized,
{
    pub fn new(tasks: Arc<R>, artifacts: Arc<A>) -> Self {
        Self { tasks, artifacts }
    }

    /// 书籍的标签与简介状态
    pub async fn book_status(&self, book_id: Uuid) -> Result<BookStatus, RepositoryError> {
        let scope = TaskScope::book(book_id);
        Ok(BookStatus {
            tags: self.status_for(TaskKind::Tags, &scope).await?,
            description: self.status_for(TaskKind::Description, &scope).await?,
        })
    }

    /// 章节某年级的题目状态
    pub async fn chapter_status(
        &self,
        book_id: Uuid,
        chapter_id: Uuid,
        grade: Grade,
    ) -> Result<ChapterStatus, RepositoryError> {
        let scope = TaskScope::chapter_grade(book_id, chapter_id, grade);
        Ok(ChapterStatus {
            questions: self.status_for(TaskKind::Questions, &scope).await?,
        })
    }

    async fn status_for(
        &self,
        kind: TaskKind,
        scope: &TaskScope,
    ) -> Result<GenerationStatus, RepositoryError> {
        let task = self.tasks.find_for_scope(kind, scope).await?;

        match task.as_ref().map(|t| t.status) {
            Some(TaskStatus::Queued) => return Ok(GenerationStatus::Queued),
            Some(TaskStatus::Processing) => return Ok(GenerationStatus::Processing),
            _ => {}
        }

        if self.artifacts.exists(kind, scope).await? {
            return Ok(GenerationStatus::Ready);
        }

        Ok(match task.map(|t| t.status) {
            Some(TaskStatus::Error) => GenerationStatus::Error,
            _ => GenerationStatus::Pending,
        })
    }
}
