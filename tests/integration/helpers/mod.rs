// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use chapterwise::config::settings::{DatabaseSettings, GenerationSettings};
use chapterwise::domain::models::grade::Grade;
use chapterwise::domain::models::task::{
    DescriptionPayload, QuestionsPayload, TagsPayload, TaskPayload, TaskScope,
};
use chapterwise::domain::services::generation::DispatchTable;
use chapterwise::domain::services::llm_service::{BackendError, LlmBackend, OutputFormat};
use chapterwise::domain::services::model_invoker::ModelInvoker;
use chapterwise::infrastructure::database::connection;
use chapterwise::infrastructure::database::entities::generation_task as task_entity;
use chapterwise::infrastructure::repositories::artifact_repo_impl::ArtifactRepositoryImpl;
use chapterwise::infrastructure::repositories::task_repo_impl::TaskRepositoryImpl;
use chapterwise::queue::scheduler::PriorityScheduler;
use chapterwise::queue::task_queue::TaskQueueService;
use chapterwise::utils::retry_policy::RetryPolicy;
use chrono::{DateTime, FixedOffset, Utc};
use parking_lot::Mutex;
use sea_orm::{sea_query::Expr, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

#[allow(dead_code)]
pub struct TestContext {
    pub db: Arc<DatabaseConnection>,
    pub task_repo: Arc<TaskRepositoryImpl>,
    pub artifact_repo: Arc<ArtifactRepositoryImpl>,
    pub queue: Arc<TaskQueueService<TaskRepositoryImpl>>,
}

/// 单连接内存数据库，连接关闭后数据即丢失，因此不设置空闲超时
pub async fn setup() -> TestContext {
    let settings = DatabaseSettings {
        url: "sqlite::memory:".to_string(),
        max_connections: Some(1),
        min_connections: Some(1),
        connect_timeout: Some(5),
        idle_timeout: None,
        log_statements: false,
    };
    let db = Arc::new(
        connection::connect_and_migrate(&settings)
            .await
            .expect("in-memory database should migrate"),
    );

    let task_repo = Arc::new(TaskRepositoryImpl::new(db.clone()));
    let artifact_repo = Arc::new(ArtifactRepositoryImpl::new(db.clone()));
    let queue = Arc::new(TaskQueueService::new(
        task_repo.clone(),
        Arc::new(PriorityScheduler::new()),
    ));

    TestContext {
        db,
        task_repo,
        artifact_repo,
        queue,
    }
}

/// 把任务的认领时间改到若干分钟之前，模拟卡住的工作器
pub async fn backdate_claim(db: &DatabaseConnection, task_id: Uuid, minutes: i64) {
    let claimed_at: DateTime<FixedOffset> = (Utc::now() - chrono::Duration::minutes(minutes)).into();
    task_entity::Entity::update_many()
        .col_expr(task_entity::Column::ClaimedAt, Expr::value(Some(claimed_at)))
        .filter(task_entity::Column::Id.eq(task_id))
        .exec(db)
        .await
        .unwrap();
}

pub fn tags_payload() -> TaskPayload {
    TaskPayload::Tags(TagsPayload {
        title: "The Wind in the Willows".to_string(),
        author: "Kenneth Grahame".to_string(),
        reading_level: "intermediate".to_string(),
        age_range: "8-12".to_string(),
    })
}

pub fn description_payload() -> TaskPayload {
    TaskPayload::Description(DescriptionPayload {
        title: "The Wind in the Willows".to_string(),
        author: "Kenneth Grahame".to_string(),
        synopsis: None,
    })
}

pub fn questions_payload(grade: Grade) -> TaskPayload {
    TaskPayload::Questions(QuestionsPayload {
        title: "The Wind in the Willows".to_string(),
        author: "Kenneth Grahame".to_string(),
        chapter_number: 1,
        chapter_title: "The River Bank".to_string(),
        chapter_text: "The Mole had been working very hard all the morning, spring-cleaning his little home.".to_string(),
        reading_level: "intermediate".to_string(),
        age_range: "8-12".to_string(),
        grade_level: grade,
        num_questions: 3,
        vocab_count: 8,
    })
}

pub fn grade(level: u8) -> Grade {
    Grade::new(level).unwrap()
}

pub fn questions_scope(book_id: Uuid, chapter_id: Uuid, level: u8) -> (TaskScope, TaskPayload) {
    (
        TaskScope::chapter_grade(book_id, chapter_id, grade(level)),
        questions_payload(grade(level)),
    )
}

pub const TAGS_RESPONSE: &str = r#"<think>Mole and Rat suit middle grades.</think>
{"tags":["adventure","animals","grade-3","grade-4"]}"#;

pub const QUESTIONS_RESPONSE: &str = r#"{"questions":[
{"text":"Why did the Mole leave his spring-cleaning?","keywords":["mole","spring"],"difficulty":"medium"},
{"text":"How does the river change the Mole's mood?","keywords":["river","mood"],"difficulty":"medium"}],
"vocabulary":[{"word":"whitewash","definition":"white paint for walls","example":"He spread whitewash on the ceiling."}]}"#;

/// 按脚本依次返回响应的模型后端，脚本用完后返回最后一条
pub struct ScriptedBackend {
    script: Mutex<VecDeque<Result<String, BackendError>>>,
    last: String,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new(script: Vec<Result<String, BackendError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            last: "no json here".to_string(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn always(response: &str) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            last: response.to_string(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmBackend for ScriptedBackend {
    async fn generate(&self, _prompt: &str, _format: OutputFormat) -> Result<String, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(self.last.clone()))
    }

    fn model(&self) -> &str {
        "scripted"
    }
}

/// 使用零退避的内置分发表
pub fn dispatch_for(backend: Arc<ScriptedBackend>) -> Arc<DispatchTable> {
    let invoker = ModelInvoker::new(backend).with_retry_policy(RetryPolicy::immediate());
    Arc::new(DispatchTable::with_defaults(
        invoker,
        &GenerationSettings::default(),
    ))
}
