// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::grade::Grade;
use crate::domain::models::task::{TaskPayload, TaskScope};
use crate::domain::repositories::task_repository::TaskRepository;
use crate::presentation::errors::AppError;
use crate::queue::task_queue::{EnqueueOutcome, QueueSnapshot, TaskQueue, TaskQueueService};
use axum::{extract::Extension, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// 入队请求
#[derive(Debug, Deserialize)]
pub struct EnqueueTaskRequest {
    pub book_id: Uuid,
    #[serde(default)]
    pub chapter_id: Option<Uuid>,
    #[serde(default)]
    pub grade_level: Option<Grade>,
    pub payload: TaskPayload,
}

/// 队列概况
pub async fn queue_snapshot<R>(
    Extension(queue): Extension<Arc<TaskQueueService<R>>>,
) -> Result<Json<QueueSnapshot>, AppError>
where
    R: TaskRepository + ?Sized + 'static,
{
    Ok(Json(queue.snapshot().await?))
}

/// 入队任务
///
/// 同一作用域已有活跃任务时返回 `{"status":"already_scheduled"}`，不视为错误
pub async fn enqueue_task<R>(
    Extension(queue): Extension<Arc<TaskQueueService<R>>>,
    Json(request): Json<EnqueueTaskRequest>,
) -> Result<Json<EnqueueOutcome>, AppError>
where
    R: TaskRepository + ?Sized + 'static,
{
    let scope = TaskScope {
        book_id: request.book_id,
        chapter_id: request.chapter_id,
        grade_level: request.grade_level,
    };
    let outcome = queue.enqueue(scope, request.payload).await?;
    Ok(Json(outcome))
}

/// 删除所有失败记录
pub async fn clear_finished<R>(
    Extension(queue): Extension<Arc<TaskQueueService<R>>>,
) -> Result<Json<Value>, AppError>
where
    R: TaskRepository + ?Sized + 'static,
{
    let cleared = queue.clear_finished().await?;
    info!("Cleared {} failed tasks", cleared);
    Ok(Json(json!({ "cleared": cleared })))
}
