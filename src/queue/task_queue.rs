// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::task::{DomainError, Task, TaskPayload, TaskScope, DEFAULT_MAX_ATTEMPTS};
use crate::domain::repositories::artifact_repository::ArtifactRepository;
use crate::domain::repositories::task_repository::{
    RepositoryError, RequeueOutcome, TaskCounts, TaskRepository,
};
use crate::domain::models::grade::Grade;
use crate::domain::services::grade_diff::GradePlan;
use crate::queue::scheduler::PriorityScheduler;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 队列错误类型
#[derive(Error, Debug)]
pub enum QueueError {
    /// 仓库错误
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// 领域规则错误
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),
}

/// 入队结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "task_id", rename_all = "snake_case")]
pub enum EnqueueOutcome {
    /// 新任务已创建
    Scheduled(Uuid),
    /// 同一作用域已有排队中或处理中的任务，没有创建新任务
    AlreadyScheduled,
}

/// 队列概况
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueSnapshot {
    #[serde(flatten)]
    pub counts: TaskCounts,
    /// 调度器就绪集合中的任务数
    pub ready: usize,
}

/// 应用年级计划的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct GradePlanOutcome {
    pub removed_artifacts: u64,
    /// 被撤销的排队中题目任务
    pub retired_tasks: usize,
    pub scheduled: usize,
    pub already_scheduled: usize,
}

/// 任务队列特质
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// 入队任务
    async fn enqueue(
        &self,
        scope: TaskScope,
        payload: TaskPayload,
    ) -> Result<EnqueueOutcome, QueueError>;

    /// 出队任务，阻塞直到有任务可领取；队列关闭后返回 None
    async fn dequeue(&self, worker_id: Uuid) -> Result<Option<Task>, QueueError>;

    /// 完成任务；`worker_id` 已不持有认领时返回 false，任务保持原状
    async fn complete(&self, task_id: Uuid, worker_id: Uuid) -> Result<bool, QueueError>;

    /// 失败任务，直接进入终态；认领失效时返回 false
    async fn fail(&self, task_id: Uuid, worker_id: Uuid, reason: &str)
        -> Result<bool, QueueError>;

    /// 记一次失败，预算未用尽时重新排队
    async fn retry(
        &self,
        task_id: Uuid,
        worker_id: Uuid,
        reason: &str,
    ) -> Result<RequeueOutcome, QueueError>;
}

/// 任务队列服务
///
/// 启动时构造一次，通过 `Arc` 注入给所有调用方。持久化状态在仓库中，
/// 内存中的就绪集合由服务独占。
pub struct TaskQueueService<R: TaskRepository + ?Sized> {
    /// 任务仓库
    repository: Arc<R>,
    scheduler: Arc<PriorityScheduler>,
    max_attempts: i32,
}

impl<R: TaskRepository + ?Sized> TaskQueueService<R> {
    pub fn new(repository: Arc<R>, scheduler: Arc<PriorityScheduler>) -> Self {
        Self {
            repository,
            scheduler,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn scheduler(&self) -> &Arc<PriorityScheduler> {
        &self.scheduler
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.repository
    }

    /// 启动恢复：把所有未完成任务重新接纳进调度器
    pub async fn recover(&self) -> Result<usize, QueueError> {
        let pending = self.repository.load_pending().await?;
        let admitted = pending
            .into_iter()
            .filter(|task| self.scheduler.admit(task.clone()))
            .count();
        info!("Recovered {} pending tasks", admitted);
        Ok(admitted)
    }

    /// 回收超时任务并重新接纳
    pub async fn sweep(&self, threshold: chrono::Duration) -> Result<usize, QueueError> {
        let outcome = self.repository.sweep_timeouts(threshold).await?;
        if outcome.exhausted > 0 {
            warn!("{} timed out tasks exhausted their attempt budget", outcome.exhausted);
            metrics::counter!("tasks_failed_total").increment(outcome.exhausted);
        }

        let count = outcome.reclaimed.len();
        for task in outcome.reclaimed {
            warn!(
                task_id = %task.id,
                attempts = task.attempts,
                "Reclaimed task stuck in processing"
            );
            self.scheduler.admit(task);
        }
        if count > 0 {
            metrics::counter!("tasks_reclaimed_total").increment(count as u64);
        }
        Ok(count)
    }

    /// 应用年级差异计划
    ///
    /// 先撤销移除年级排队中的题目任务，再删除这些年级的产物，最后为新增年级入队
    pub async fn apply_grade_plan<A>(
        &self,
        plan: GradePlan,
        artifacts: &A,
    ) -> Result<GradePlanOutcome, QueueError>
    where
        A: ArtifactRepository + ?Sized,
    {
        let mut outcome = GradePlanOutcome::default();

        let removed: Vec<Grade> = plan.diff.to_remove.iter().copied().collect();
        let retired = self
            .repository
            .delete_queued_questions(plan.book_id, &removed)
            .await?;
        self.scheduler.remove_ids(&retired);
        outcome.retired_tasks = retired.len();

        for removal in &plan.removals {
            outcome.removed_artifacts += artifacts.remove(removal).await?;
        }

        for (scope, payload) in plan.tasks {
            match self.enqueue(scope, payload).await? {
                EnqueueOutcome::Scheduled(_) => outcome.scheduled += 1,
                EnqueueOutcome::AlreadyScheduled => outcome.already_scheduled += 1,
            }
        }

        info!(
            retired = outcome.retired_tasks,
            to_add = plan.diff.to_add.len(),
            to_remove = plan.diff.to_remove.len(),
            "Applied grade plan: {:?}",
            outcome
        );
        Ok(outcome)
    }

    /// 清空某本书所有排队中的任务
    pub async fn delete_queued_for_book(&self, book_id: Uuid) -> Result<usize, QueueError> {
        let deleted = self.repository.delete_queued_for_book(book_id).await?;
        self.scheduler.remove_book(book_id);
        info!(%book_id, "Deleted {} queued tasks", deleted.len());
        Ok(deleted.len())
    }

    /// 队列概况
    pub async fn snapshot(&self) -> Result<QueueSnapshot, QueueError> {
        Ok(QueueSnapshot {
            counts: self.repository.counts().await?,
            ready: self.scheduler.len(),
        })
    }

    /// 删除所有 error 记录
    pub async fn clear_finished(&self) -> Result<u64, QueueError> {
        Ok(self.repository.clear_finished().await?)
    }
}

#[async_trait]
impl<R: TaskRepository + ?Sized> TaskQueue for TaskQueueService<R> {
    async fn enqueue(
        &self,
        scope: TaskScope,
        payload: TaskPayload,
    ) -> Result<EnqueueOutcome, QueueError> {
        let task = Task::new(scope, payload)?.with_max_attempts(self.max_attempts);

        match self.repository.enqueue(&task).await {
            Ok(created) => {
                let id = created.id;
                debug!(task_id = %id, kind = %created.kind(), "Enqueued task");
                self.scheduler.admit(created);
                metrics::counter!("tasks_enqueued_total").increment(1);
                Ok(EnqueueOutcome::Scheduled(id))
            }
            Err(RepositoryError::Duplicate(scope_key)) => {
                debug!(%scope_key, "Task already scheduled");
                Ok(EnqueueOutcome::AlreadyScheduled)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn dequeue(&self, worker_id: Uuid) -> Result<Option<Task>, QueueError> {
        loop {
            let Some(task) = self.scheduler.next().await else {
                return Ok(None);
            };

            match self.repository.mark_processing(task.id, worker_id).await {
                Ok(true) => return Ok(Some(task.claim(worker_id)?)),
                Ok(false) => {
                    debug!(task_id = %task.id, "Task no longer claimable, skipping");
                }
                Err(e) => {
                    // 认领失败时任务仍在库中排队，放回就绪集合
                    self.scheduler.admit(task);
                    return Err(e.into());
                }
            }
        }
    }

    async fn complete(&self, task_id: Uuid, worker_id: Uuid) -> Result<bool, QueueError> {
        let completed = self.repository.mark_done(task_id, worker_id).await?;
        if completed {
            metrics::counter!("tasks_completed_total").increment(1);
        }
        Ok(completed)
    }

    async fn fail(
        &self,
        task_id: Uuid,
        worker_id: Uuid,
        reason: &str,
    ) -> Result<bool, QueueError> {
        let failed = self
            .repository
            .mark_error(task_id, worker_id, reason)
            .await?;
        if failed {
            metrics::counter!("tasks_failed_total").increment(1);
        }
        Ok(failed)
    }

    async fn retry(
        &self,
        task_id: Uuid,
        worker_id: Uuid,
        reason: &str,
    ) -> Result<RequeueOutcome, QueueError> {
        let outcome = self.repository.requeue(task_id, worker_id, reason).await?;
        match outcome {
            RequeueOutcome::Requeued => {
                if let Some(task) = self.repository.find_by_id(task_id).await? {
                    self.scheduler.admit(task);
                }
            }
            RequeueOutcome::Exhausted => {
                metrics::counter!("tasks_failed_total").increment(1);
            }
            RequeueOutcome::NotClaimed => {}
        }
        Ok(outcome)
    }
}

#[async_trait]
impl<T: TaskQueue + ?Sized> TaskQueue for Arc<T> {
    async fn enqueue(
        &self,
        scope: TaskScope,
        payload: TaskPayload,
    ) -> Result<EnqueueOutcome, QueueError> {
        (**self).enqueue(scope, payload).await
    }

    async fn dequeue(&self, worker_id: Uuid) -> Result<Option<Task>, QueueError> {
        (**self).dequeue(worker_id).await
    }

    async fn complete(&self, task_id: Uuid, worker_id: Uuid) -> Result<bool, QueueError> {
        (**self).complete(task_id, worker_id).await
    }

    async fn fail(
        &self,
        task_id: Uuid,
        worker_id: Uuid,
        reason: &str,
    ) -> Result<bool, QueueError> {
        (**self).fail(task_id, worker_id, reason).await
    }

    async fn retry(
        &self,
        task_id: Uuid,
        worker_id: Uuid,
        reason: &str,
    ) -> Result<RequeueOutcome, QueueError> {
        (**self).retry(task_id, worker_id, reason).await
    }
}
