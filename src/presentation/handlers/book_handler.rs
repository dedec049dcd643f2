// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::config::settings::GenerationSettings;
use crate::domain::models::grade::Grade;
use crate::domain::repositories::artifact_repository::ArtifactRepository;
use crate::domain::repositories::task_repository::TaskRepository;
use crate::domain::services::grade_diff::{BookContext, ChapterContext, GradeDiffPlanner};
use crate::domain::services::status_calculator::{BookStatus, ChapterStatus, StatusCalculator};
use crate::presentation::errors::AppError;
use crate::queue::task_queue::{GradePlanOutcome, TaskQueueService};
use axum::extract::{Extension, Path, Query};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

/// 书籍信息，由调用方提供
#[derive(Debug, Deserialize)]
pub struct BookInfo {
    pub title: String,
    pub author: String,
    #[serde(default)]
    pub reading_level: Option<String>,
    #[serde(default)]
    pub age_range: Option<String>,
}

impl BookInfo {
    fn into_context(self, book_id: Uuid, settings: &GenerationSettings) -> BookContext {
        BookContext {
            book_id,
            title: self.title,
            author: self.author,
            reading_level: self
                .reading_level
                .unwrap_or_else(|| settings.default_reading_level.clone()),
            age_range: self
                .age_range
                .unwrap_or_else(|| settings.default_age_range.clone()),
        }
    }
}

/// 标签变化请求，年级从 `grade-*` 标签中提取
#[derive(Debug, Deserialize)]
pub struct UpdateGradesRequest {
    pub book: BookInfo,
    #[serde(default)]
    pub old_tags: Vec<String>,
    #[serde(default)]
    pub new_tags: Vec<String>,
    #[serde(default)]
    pub chapters: Vec<ChapterContext>,
}

/// 新增章节请求
#[derive(Debug, Deserialize)]
pub struct AddChapterRequest {
    pub book: BookInfo,
    pub tags: Vec<String>,
    pub chapter: ChapterContext,
}

#[derive(Debug, Serialize)]
pub struct GradeUpdateResponse {
    pub added: BTreeSet<Grade>,
    pub removed: BTreeSet<Grade>,
    pub unchanged: BTreeSet<Grade>,
    #[serde(flatten)]
    pub outcome: GradePlanOutcome,
}

#[derive(Debug, Deserialize)]
pub struct GradeQuery {
    pub grade: Grade,
}

fn grades_from(tags: &[String]) -> BTreeSet<Grade> {
    Grade::from_tags(tags.iter().map(String::as_str))
}

/// 书籍分类变化：撤销移除年级排队中的题目任务并删除其产物，为新增年级入队
pub async fn update_grades<R, A>(
    Extension(queue): Extension<Arc<TaskQueueService<R>>>,
    Extension(artifacts): Extension<Arc<A>>,
    Extension(settings): Extension<Arc<GenerationSettings>>,
    Path(book_id): Path<Uuid>,
    Json(request): Json<UpdateGradesRequest>,
) -> Result<Json<GradeUpdateResponse>, AppError>
where
    R: TaskRepository + ?Sized + 'static,
    A: ArtifactRepository + ?Sized + 'static,
{
    let book = request.book.into_context(book_id, &settings);
    let old = grades_from(&request.old_tags);
    let new = grades_from(&request.new_tags);

    let plan = GradeDiffPlanner::new(&settings).plan(&book, &old, &new, &request.chapters);
    let diff = plan.diff.clone();
    let outcome = queue.apply_grade_plan(plan, artifacts.as_ref()).await?;

    Ok(Json(GradeUpdateResponse {
        added: diff.to_add,
        removed: diff.to_remove,
        unchanged: diff.unchanged,
        outcome,
    }))
}

/// 新增章节：为书籍当前的每个年级入队题目任务
pub async fn add_chapter<R, A>(
    Extension(queue): Extension<Arc<TaskQueueService<R>>>,
    Extension(artifacts): Extension<Arc<A>>,
    Extension(settings): Extension<Arc<GenerationSettings>>,
    Path(book_id): Path<Uuid>,
    Json(request): Json<AddChapterRequest>,
) -> Result<Json<GradePlanOutcome>, AppError>
where
    R: TaskRepository + ?Sized + 'static,
    A: ArtifactRepository + ?Sized + 'static,
{
    let book = request.book.into_context(book_id, &settings);
    let grades = grades_from(&request.tags);
    if grades.is_empty() {
        return Err(AppError::bad_request("book has no grade-* tags"));
    }
    let plan = GradeDiffPlanner::new(&settings).plan_for_new_chapter(&book, &grades, &request.chapter);
    Ok(Json(queue.apply_grade_plan(plan, artifacts.as_ref()).await?))
}

/// 书籍的标签与简介状态
pub async fn book_status<R, A>(
    Extension(status): Extension<Arc<StatusCalculator<R, A>>>,
    Path(book_id): Path<Uuid>,
) -> Result<Json<BookStatus>, AppError>
where
    R: TaskRepository + ?Sized + 'static,
    A: ArtifactRepository + ?Sized + 'static,
{
    Ok(Json(status.book_status(book_id).await?))
}

/// 章节某年级的题目状态
pub async fn chapter_status<R, A>(
    Extension(status): Extension<Arc<StatusCalculator<R, A>>>,
    Path((book_id, chapter_id)): Path<(Uuid, Uuid)>,
    Query(query): Query<GradeQuery>,
) -> Result<Json<ChapterStatus>, AppError>
where
    R: TaskRepository + ?Sized + 'static,
    A: ArtifactRepository + ?Sized + 'static,
{
    Ok(Json(
        status
            .chapter_status(book_id, chapter_id, query.grade)
            .await?,
    ))
}

/// 清空某本书排队中的任务
pub async fn delete_book_tasks<R>(
    Extension(queue): Extension<Arc<TaskQueueService<R>>>,
    Path(book_id): Path<Uuid>,
) -> Result<Json<Value>, AppError>
where
    R: TaskRepository + ?Sized + 'static,
{
    let deleted = queue.delete_queued_for_book(book_id).await?;
    Ok(Json(json!({ "deleted": deleted })))
}
