// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::config::settings::GenerationSettings;
use crate::domain::repositories::artifact_repository::ArtifactRepository;
use crate::domain::repositories::task_repository::TaskRepository;
use crate::domain::services::status_calculator::StatusCalculator;
use crate::presentation::handlers::{book_handler, queue_handler};
use crate::queue::task_queue::TaskQueueService;
use axum::{
    extract::Extension,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// 创建应用路由
///
/// # 返回值
///
/// 返回未注入依赖的路由
pub fn routes<R, A>() -> Router
where
    R: TaskRepository + ?Sized + 'static,
    A: ArtifactRepository + ?Sized + 'static,
{
    let public_routes = Router::new()
        .route("/health", get(health_check))
        .route("/v1/version", get(version));

    let admin_routes = Router::new()
        .route("/v1/queue", get(queue_handler::queue_snapshot::<R>))
        .route(
            "/v1/queue/finished",
            delete(queue_handler::clear_finished::<R>),
        )
        .route("/v1/tasks", post(queue_handler::enqueue_task::<R>))
        .route(
            "/v1/books/{book_id}/grades",
            post(book_handler::update_grades::<R, A>),
        )
        .route(
            "/v1/books/{book_id}/chapters",
            post(book_handler::add_chapter::<R, A>),
        )
        .route(
            "/v1/books/{book_id}/status",
            get(book_handler::book_status::<R, A>),
        )
        .route(
            "/v1/books/{book_id}/chapters/{chapter_id}/status",
            get(book_handler::chapter_status::<R, A>),
        )
        .route(
            "/v1/books/{book_id}/tasks",
            delete(book_handler::delete_book_tasks::<R>),
        );

    Router::new().merge(public_routes).merge(admin_routes)
}

/// 组装完整应用：路由、依赖注入与请求追踪
pub fn build_app<R, A>(
    queue: Arc<TaskQueueService<R>>,
    artifacts: Arc<A>,
    settings: Arc<GenerationSettings>,
) -> Router
where
    R: TaskRepository + ?Sized + 'static,
    A: ArtifactRepository + ?Sized + 'static,
{
    let status = Arc::new(StatusCalculator::new(
        queue.repository().clone(),
        artifacts.clone(),
    ));

    routes::<R, A>()
        .layer(Extension(queue))
        .layer(Extension(artifacts))
        .layer(Extension(status))
        .layer(Extension(settings))
        .layer(TraceLayer::new_for_http())
}

/// 健康检查端点
///
/// # 返回值
///
/// 返回"OK"字符串
pub async fn health_check() -> &'static str {
    "OK"
}

/// 版本信息端点
pub async fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
