// Copyright 2025 Kirky.X
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use chapterwise::config::settings::Settings;
use chapterwise::domain::services::generation::DispatchTable;
use chapterwise::domain::services::llm_service::{LlmBackend, OllamaClient};
use chapterwise::domain::services::model_invoker::ModelInvoker;
use chapterwise::infrastructure::database::connection;
use chapterwise::infrastructure::metrics;
use chapterwise::infrastructure::repositories::artifact_repo_impl::ArtifactRepositoryImpl;
use chapterwise::infrastructure::repositories::task_repo_impl::TaskRepositoryImpl;
use chapterwise::presentation::routes;
use chapterwise::queue::scheduler::PriorityScheduler;
use chapterwise::queue::task_queue::TaskQueueService;
use chapterwise::utils::telemetry;
use chapterwise::workers::manager::{shutdown_signal, WorkerPool};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// 主函数
///
/// 应用程序入口点，负责初始化所有组件并启动服务
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize logging
    telemetry::init_telemetry();
    info!("Starting chapterwise...");

    // 2. Load configuration
    let settings = Settings::new()?;
    info!("Configuration loaded");

    // Initialize Prometheus Metrics
    metrics::init_metrics(&settings.metrics);

    // 3. Connect to database and run migrations
    let db = Arc::new(connection::connect_and_migrate(&settings.database).await?);
    info!("Database connection established");

    // 4. Rebuild the in-memory ready set from persisted tasks
    let task_repo = Arc::new(TaskRepositoryImpl::new(db.clone()));
    let artifact_repo = Arc::new(ArtifactRepositoryImpl::new(db.clone()));
    let scheduler = Arc::new(PriorityScheduler::new());
    let queue = Arc::new(
        TaskQueueService::new(task_repo, scheduler)
            .with_max_attempts(settings.queue.max_attempts),
    );
    queue.recover().await?;

    // 5. Model backend and generation routines
    let backend: Arc<dyn LlmBackend> = Arc::new(OllamaClient::new(&settings.llm)?);
    info!(model = backend.model(), "Model backend configured");
    let invoker = ModelInvoker::new(backend);
    let dispatch = Arc::new(DispatchTable::with_defaults(invoker, &settings.generation));

    // 6. Start Workers
    let mut worker_pool = WorkerPool::new(
        queue.clone(),
        artifact_repo.clone(),
        dispatch,
        settings.queue.clone(),
    )
    .with_fallbacks(settings.generation.use_fallbacks);
    worker_pool.start_workers(settings.queue.worker_count);
    worker_pool.start_sweeper();

    // 7. Start HTTP server
    let app = routes::build_app(
        queue,
        artifact_repo,
        Arc::new(settings.generation.clone()),
    );

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 8. Let in-flight tasks finish
    worker_pool.shutdown().await;

    Ok(())
}
