// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::repositories::task_repository::TaskRepository;
use crate::queue::task_queue::TaskQueueService;
use crate::utils::errors::WorkerError;
use crate::workers::worker::Worker;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// 超时清扫工作器
///
/// 定期回收 processing 时间超过阈值的任务
pub struct TimeoutWorker<R>
where
    R: TaskRepository + ?Sized,
{
    queue: Arc<TaskQueueService<R>>,
    threshold: chrono::Duration,
    interval: Duration,
}

impl<R> TimeoutWorker<R>
where
    R: TaskRepository + ?Sized,
{
    pub fn new(
        queue: Arc<TaskQueueService<R>>,
        threshold: chrono::Duration,
        interval: Duration,
    ) -> Self {
        Self {
            queue,
            threshold,
            interval,
        }
    }

    /// 执行一轮清扫
    pub async fn sweep_once(&self) -> Result<usize, WorkerError> {
        Ok(self.queue.sweep(self.threshold).await?)
    }
}

#[async_trait]
impl<R> Worker for TimeoutWorker<R>
where
    R: TaskRepository + ?Sized,
{
    async fn run(&self) -> Result<(), WorkerError> {
        info!(
            threshold_minutes = self.threshold.num_minutes(),
            "Timeout sweeper started"
        );

        let mut interval = tokio::time::interval(self.interval);

        loop {
            interval.tick().await;

            if self.queue.scheduler().is_closed() {
                break;
            }

            match self.sweep_once().await {
                Ok(count) => {
                    if count > 0 {
                        info!("Reclaimed {} timed out tasks", count);
                    }
                }
                Err(e) => {
                    error!("Failed to sweep timed out tasks: {}", e);
                }
            }
        }

        info!("Timeout sweeper stopped");
        Ok(())
    }

    fn name(&self) -> &str {
        "timeout-sweeper"
    }
}
