// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::config::settings::QueueSettings;
use crate::domain::repositories::artifact_repository::ArtifactRepository;
use crate::domain::repositories::task_repository::TaskRepository;
use crate::domain::services::generation::DispatchTable;
use crate::queue::task_queue::TaskQueueService;
use crate::workers::generation_worker::GenerationWorker;
use crate::workers::timeout_worker::TimeoutWorker;
use crate::workers::worker::Worker;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// 工作器池
///
/// 固定数量的生成工作器加一个超时清扫器
pub struct WorkerPool<R, A>
where
    R: TaskRepository + ?Sized + 'static,
    A: ArtifactRepository + ?Sized + 'static,
{
    queue: Arc<TaskQueueService<R>>,
    artifacts: Arc<A>,
    dispatch: Arc<DispatchTable>,
    settings: QueueSettings,
    use_fallbacks: bool,
    workers: Vec<JoinHandle<()>>,
    sweeper: Option<JoinHandle<()>>,
}

impl<R, A> WorkerPool<R, A>
where
    R: TaskRepository + ?Sized + 'static,
    A: ArtifactRepository + ?Sized + 'static,
{
    pub fn new(
        queue: Arc<TaskQueueService<R>>,
        artifacts: Arc<A>,
        dispatch: Arc<DispatchTable>,
        settings: QueueSettings,
    ) -> Self {
        Self {
            queue,
            artifacts,
            dispatch,
            settings,
            use_fallbacks: false,
            workers: Vec::new(),
            sweeper: None,
        }
    }

    pub fn with_fallbacks(mut self, use_fallbacks: bool) -> Self {
        self.use_fallbacks = use_fallbacks;
        self
    }

    /// 启动工作进程
    ///
    /// # 参数
    ///
    /// * `count` - 要启动的工作进程数量，至少为 1
    pub fn start_workers(&mut self, count: usize) {
        for _ in 0..count.max(1) {
            let worker = GenerationWorker::new(
                self.queue.clone(),
                self.artifacts.clone(),
                self.dispatch.clone(),
            )
            .with_fallbacks(self.use_fallbacks)
            .with_idle_poll(Duration::from_millis(self.settings.idle_poll_millis));

            let handle = tokio::spawn(async move {
                if let Err(e) = worker.run().await {
                    error!("Worker {} exited with error: {}", worker.name(), e);
                }
            });
            self.workers.push(handle);
        }
        info!("Started {} generation workers", self.workers.len());
    }

    /// 启动超时清扫器
    pub fn start_sweeper(&mut self) {
        let sweeper = TimeoutWorker::new(
            self.queue.clone(),
            chrono::Duration::minutes(self.settings.task_timeout_minutes),
            Duration::from_secs(self.settings.sweep_interval_secs.max(1)),
        );
        self.sweeper = Some(tokio::spawn(async move {
            if let Err(e) = sweeper.run().await {
                error!("Sweeper exited with error: {}", e);
            }
        }));
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// 优雅关闭
    ///
    /// 关闭调度器后不再派发新任务，等待每个工作器处理完手头的任务
    pub async fn shutdown(&mut self) {
        info!("Shutting down workers...");
        self.queue.scheduler().close();

        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }

        let results = join_all(self.workers.drain(..)).await;
        for e in results.into_iter().filter_map(Result::err) {
            error!("Worker task panicked: {}", e);
        }

        info!("Workers shut down successfully");
    }
}

/// 等待 Ctrl-C
pub async fn shutdown_signal() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(err) => error!("Unable to listen for shutdown signal: {}", err),
    }
}
