// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::artifact::GeneratedArtifact;
use crate::domain::models::task::Task;
use crate::domain::repositories::artifact_repository::ArtifactRepository;
use crate::domain::repositories::task_repository::RequeueOutcome;
use crate::domain::services::generation::{DispatchTable, GenerationError};
use crate::queue::task_queue::TaskQueue;
use crate::utils::errors::WorkerError;
use crate::workers::worker::Worker;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// 生成工作器
///
/// 从队列领取任务，按任务类型分发到生成例程，成功后写入产物并完成任务。
/// 调度器关闭后 `dequeue` 返回 None，工作器在处理完当前任务后退出。
pub struct GenerationWorker<Q, A>
where
    Q: TaskQueue + ?Sized,
    A: ArtifactRepository + ?Sized,
{
    worker_id: Uuid,
    name: String,
    queue: Arc<Q>,
    artifacts: Arc<A>,
    dispatch: Arc<DispatchTable>,
    use_fallbacks: bool,
    idle_poll: Duration,
}

impl<Q, A> GenerationWorker<Q, A>
where
    Q: TaskQueue + ?Sized,
    A: ArtifactRepository + ?Sized,
{
    pub fn new(queue: Arc<Q>, artifacts: Arc<A>, dispatch: Arc<DispatchTable>) -> Self {
        let worker_id = Uuid::new_v4();
        Self {
            worker_id,
            name: format!("generation-worker-{}", worker_id),
            queue,
            artifacts,
            dispatch,
            use_fallbacks: false,
            idle_poll: Duration::from_secs(1),
        }
    }

    /// 生成耗尽时是否以例程提供的通用产物代替
    pub fn with_fallbacks(mut self, use_fallbacks: bool) -> Self {
        self.use_fallbacks = use_fallbacks;
        self
    }

    /// 队列出错后的等待间隔
    pub fn with_idle_poll(mut self, idle_poll: Duration) -> Self {
        self.idle_poll = idle_poll;
        self
    }

    pub fn worker_id(&self) -> Uuid {
        self.worker_id
    }

    /// 领取并处理一个任务
    ///
    /// 返回 false 表示队列已关闭
    pub async fn process_next(&self) -> Result<bool, WorkerError> {
        let Some(task) = self.queue.dequeue(self.worker_id).await? else {
            return Ok(false);
        };
        self.process_task(task).await?;
        Ok(true)
    }

    #[instrument(
        skip(self, task),
        fields(task_id = %task.id, kind = %task.kind(), attempts = task.attempts)
    )]
    async fn process_task(&self, task: Task) -> Result<(), WorkerError> {
        info!("Processing task");

        let routine = self.dispatch.routine_for(task.kind());
        match routine.generate(&task.payload).await {
            Ok(artifact) => self.finish(&task, artifact).await,
            Err(GenerationError::Exhausted(e)) => {
                warn!("Generation exhausted: {}", e);
                if self.use_fallbacks {
                    if let Some(fallback) = routine.fallback(&task.payload) {
                        info!("Substituting fallback artifact");
                        return self.finish(&task, fallback).await;
                    }
                }
                self.fail(&task, &e.to_string()).await
            }
            Err(e @ GenerationError::PayloadMismatch { .. }) => {
                error!("Task payload rejected by routine: {}", e);
                self.fail(&task, &e.to_string()).await
            }
        }
    }

    /// 写入产物后完成任务；写入失败按一次失败尝试处理
    async fn finish(&self, task: &Task, artifact: GeneratedArtifact) -> Result<(), WorkerError> {
        if let Err(e) = self
            .artifacts
            .persist(task.kind(), &task.scope, &artifact)
            .await
        {
            warn!("Failed to persist artifact: {}", e);
            match self
                .queue
                .retry(task.id, self.worker_id, &e.to_string())
                .await?
            {
                RequeueOutcome::Requeued => info!("Task requeued after persistence failure"),
                RequeueOutcome::Exhausted => warn!("Task attempt budget exhausted"),
                RequeueOutcome::NotClaimed => debug!("Task was reclaimed by the sweeper"),
            }
            return Ok(());
        }

        if self.queue.complete(task.id, self.worker_id).await? {
            info!("Task completed");
        } else {
            warn!("Task completed after its claim was reclaimed, leaving it to the new owner");
        }
        Ok(())
    }

    async fn fail(&self, task: &Task, reason: &str) -> Result<(), WorkerError> {
        if !self.queue.fail(task.id, self.worker_id, reason).await? {
            warn!("Task failed after its claim was reclaimed, leaving it to the new owner");
        }
        Ok(())
    }
}

#[async_trait]
impl<Q, A> Worker for GenerationWorker<Q, A>
where
    Q: TaskQueue + ?Sized,
    A: ArtifactRepository + ?Sized,
{
    async fn run(&self) -> Result<(), WorkerError> {
        info!("Generation worker {} started", self.worker_id);

        loop {
            match self.process_next().await {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    error!("Error processing task: {}", e);
                    sleep(self.idle_poll).await;
                }
            }
        }

        info!("Generation worker {} stopped", self.worker_id);
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
