// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::grade::Grade;
use crate::domain::models::task::{Task, TaskKind, TaskScope};
use async_trait::async_trait;
use sea_orm::DbErr;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// 仓库错误类型
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// 数据库错误
    #[error("Database error: {0}")]
    Database(#[from] DbErr),
    /// 同一作用域已存在排队中或处理中的任务
    #[error("Task already scheduled for scope {0}")]
    Duplicate(String),
    /// 持久化数据无法还原为领域对象
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// 各状态的任务数量
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TaskCounts {
    pub queued: u64,
    pub processing: u64,
    pub error: u64,
}

/// 失败一次后任务的去向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequeueOutcome {
    /// 仍有预算，回到队列
    Requeued,
    /// 预算耗尽，进入 error
    Exhausted,
    /// 任务已不在处理中（被清扫或已完成）
    NotClaimed,
}

/// 一轮超时清扫的结果
#[derive(Debug, Clone, Default)]
pub struct SweepOutcome {
    /// 回到 queued 的任务，需重新接纳进调度器
    pub reclaimed: Vec<Task>,
    /// 预算耗尽、直接进入 error 的任务数
    pub exhausted: u64,
}

/// 任务仓库特质
///
/// 任务的持久化记录，保证进程重启后队列不丢失。
/// 所有状态转换都是带条件的原子更新，不跨网络调用持有锁。
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// 写入新任务
    ///
    /// 同一作用域已有排队中或处理中的任务时返回 `Duplicate`，
    /// 同一作用域遗留的 error 记录会被先行删除。
    async fn enqueue(&self, task: &Task) -> Result<Task, RepositoryError>;

    /// 返回所有未完成任务，按 (priority, created_at) 排序
    ///
    /// 上次运行遗留的 processing 任务被视为已放弃，重置为 queued，attempts 不变。
    async fn load_pending(&self) -> Result<Vec<Task>, RepositoryError>;

    /// 条件转换 queued → processing，已被其他工作器领取时返回 false
    async fn mark_processing(&self, id: Uuid, worker_id: Uuid) -> Result<bool, RepositoryError>;

    /// 终态：完成，删除该行
    ///
    /// 仅当任务仍由 `worker_id` 处理中时生效，认领已失效时返回 false
    async fn mark_done(&self, id: Uuid, worker_id: Uuid) -> Result<bool, RepositoryError>;

    /// 终态：失败，条件同 `mark_done`
    async fn mark_error(
        &self,
        id: Uuid,
        worker_id: Uuid,
        reason: &str,
    ) -> Result<bool, RepositoryError>;

    /// 一次失败的执行：attempts 加一，有剩余预算时回到 queued，否则进入 error
    async fn requeue(
        &self,
        id: Uuid,
        worker_id: Uuid,
        reason: &str,
    ) -> Result<RequeueOutcome, RepositoryError>;

    /// 回收 processing 超过阈值的任务，计一次失败
    async fn sweep_timeouts(
        &self,
        threshold: chrono::Duration,
    ) -> Result<SweepOutcome, RepositoryError>;

    /// 根据ID查找任务
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Task>, RepositoryError>;

    /// 查找某作用域最近的任务（任意状态）
    async fn find_for_scope(
        &self,
        kind: TaskKind,
        scope: &TaskScope,
    ) -> Result<Option<Task>, RepositoryError>;

    /// 各状态任务数量
    async fn counts(&self) -> Result<TaskCounts, RepositoryError>;

    /// 删除所有 error 记录
    async fn clear_finished(&self) -> Result<u64, RepositoryError>;

    /// 删除某本书所有排队中的任务，返回被删除的任务ID
    async fn delete_queued_for_book(&self, book_id: Uuid) -> Result<Vec<Uuid>, RepositoryError>;

    /// 删除某本书指定年级下排队中的题目任务，返回被删除的任务ID
    async fn delete_queued_questions(
        &self,
        book_id: Uuid,
        grades: &[Grade],
    ) -> Result<Vec<Uuid>, RepositoryError>;
}

