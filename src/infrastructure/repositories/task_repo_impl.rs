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

use crate::domain::models::grade::Grade;
use crate::domain::models::task::{Task, TaskKind, TaskPayload, TaskScope, TaskStatus};
use crate::domain::repositories::task_repository::{
    RepositoryError, RequeueOutcome, SweepOutcome, TaskCounts, TaskRepository,
};
use crate::infrastructure::database::entities::generation_task as task_entity;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use sea_orm::{
    sea_query::Expr, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, SqlErr, TransactionTrait,
};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// 任务仓库实现
///
/// 基于SeaORM实现的任务数据访问层。所有状态转换都是带 `status` 条件的
/// `UPDATE`，以受影响行数判断是否成功，不持有跨调用的锁。
#[derive(Clone)]
pub struct TaskRepositoryImpl {
    /// 数据库连接
    db: Arc<DatabaseConnection>,
}

impl TaskRepositoryImpl {
    /// 创建新的任务仓库实例
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    async fn count_status(&self, status: TaskStatus) -> Result<u64, RepositoryError> {
        Ok(task_entity::Entity::find()
            .filter(task_entity::Column::Status.eq(status.to_string()))
            .count(self.db.as_ref())
            .await?)
    }
}

fn corrupt(id: Uuid, detail: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::Corrupt(format!("task {}: {}", id, detail))
}

impl TryFrom<task_entity::Model> for Task {
    type Error = RepositoryError;

    fn try_from(model: task_entity::Model) -> Result<Self, Self::Error> {
        let id = model.id;
        let payload: TaskPayload =
            serde_json::from_value(model.payload).map_err(|e| corrupt(id, e))?;
        let status: TaskStatus = model.status.parse().map_err(|e| corrupt(id, e))?;
        let grade_level = model
            .grade_level
            .map(|g| g.parse::<Grade>())
            .transpose()
            .map_err(|e| corrupt(id, e))?;

        Ok(Self {
            id,
            priority: model.priority,
            scope: TaskScope {
                book_id: model.book_id,
                chapter_id: model.chapter_id,
                grade_level,
            },
            payload,
            status,
            attempts: model.attempts,
            max_attempts: model.max_attempts,
            worker_id: model.worker_id,
            claimed_at: model.claimed_at,
            error_message: model.error_message,
            created_at: model.created_at,
            updated_at: model.updated_at,
        })
    }
}

impl TryFrom<&Task> for task_entity::ActiveModel {
    type Error = RepositoryError;

    fn try_from(task: &Task) -> Result<Self, Self::Error> {
        let payload = serde_json::to_value(&task.payload).map_err(|e| corrupt(task.id, e))?;

        Ok(Self {
            id: Set(task.id),
            kind: Set(task.kind().to_string()),
            priority: Set(task.priority),
            status: Set(task.status.to_string()),
            book_id: Set(task.scope.book_id),
            chapter_id: Set(task.scope.chapter_id),
            grade_level: Set(task.scope.grade_level.map(|g| g.to_string())),
            scope_key: Set(task.scope_key()),
            payload: Set(payload),
            attempts: Set(task.attempts),
            max_attempts: Set(task.max_attempts),
            worker_id: Set(task.worker_id),
            claimed_at: Set(task.claimed_at),
            error_message: Set(task.error_message.clone()),
            created_at: Set(task.created_at),
            updated_at: Set(task.updated_at),
        })
    }
}

fn now() -> DateTime<FixedOffset> {
    Utc::now().into()
}

#[async_trait]
impl TaskRepository for TaskRepositoryImpl {
    async fn enqueue(&self, task: &Task) -> Result<Task, RepositoryError> {
        let scope_key = task.scope_key();
        let model = task_entity::ActiveModel::try_from(task)?;
        let txn = self.db.begin().await?;

        // 人工重试：同一作用域遗留的失败记录先删除
        task_entity::Entity::delete_many()
            .filter(task_entity::Column::ScopeKey.eq(scope_key.as_str()))
            .filter(task_entity::Column::Status.eq(TaskStatus::Error.to_string()))
            .exec(&txn)
            .await?;

        match task_entity::Entity::insert(model)
            .exec_without_returning(&txn)
            .await
        {
            Ok(_) => {
                txn.commit().await?;
                Ok(task.clone())
            }
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                txn.rollback().await?;
                Err(RepositoryError::Duplicate(scope_key))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn load_pending(&self) -> Result<Vec<Task>, RepositoryError> {
        let reset = task_entity::Entity::update_many()
            .col_expr(
                task_entity::Column::Status,
                Expr::value(TaskStatus::Queued.to_string()),
            )
            .col_expr(task_entity::Column::WorkerId, Expr::value(Option::<Uuid>::None))
            .col_expr(
                task_entity::Column::ClaimedAt,
                Expr::value(Option::<DateTime<FixedOffset>>::None),
            )
            .col_expr(task_entity::Column::UpdatedAt, Expr::value(now()))
            .filter(task_entity::Column::Status.eq(TaskStatus::Processing.to_string()))
            .exec(self.db.as_ref())
            .await?;

        if reset.rows_affected > 0 {
            debug!("Reset {} abandoned processing tasks", reset.rows_affected);
        }

        let models = task_entity::Entity::find()
            .filter(task_entity::Column::Status.eq(TaskStatus::Queued.to_string()))
            .order_by_asc(task_entity::Column::Priority)
            .order_by_asc(task_entity::Column::CreatedAt)
            .all(self.db.as_ref())
            .await?;

        models.into_iter().map(Task::try_from).collect()
    }

    async fn mark_processing(&self, id: Uuid, worker_id: Uuid) -> Result<bool, RepositoryError> {
        let claimed_at = now();
        let result = task_entity::Entity::update_many()
            .col_expr(
                task_entity::Column::Status,
                Expr::value(TaskStatus::Processing.to_string()),
            )
            .col_expr(task_entity::Column::WorkerId, Expr::value(Some(worker_id)))
            .col_expr(task_entity::Column::ClaimedAt, Expr::value(Some(claimed_at)))
            .col_expr(task_entity::Column::UpdatedAt, Expr::value(claimed_at))
            .filter(task_entity::Column::Id.eq(id))
            .filter(task_entity::Column::Status.eq(TaskStatus::Queued.to_string()))
            .exec(self.db.as_ref())
            .await?;

        Ok(result.rows_affected == 1)
    }

    async fn mark_done(&self, id: Uuid, worker_id: Uuid) -> Result<bool, RepositoryError> {
        let result = task_entity::Entity::delete_many()
            .filter(task_entity::Column::Id.eq(id))
            .filter(task_entity::Column::Status.eq(TaskStatus::Processing.to_string()))
            .filter(task_entity::Column::WorkerId.eq(worker_id))
            .exec(self.db.as_ref())
            .await?;
        if result.rows_affected == 0 {
            debug!(task_id = %id, %worker_id, "Completion ignored, claim no longer held");
        }
        Ok(result.rows_affected == 1)
    }

    async fn mark_error(
        &self,
        id: Uuid,
        worker_id: Uuid,
        reason: &str,
    ) -> Result<bool, RepositoryError> {
        let result = task_entity::Entity::update_many()
            .col_expr(
                task_entity::Column::Status,
                Expr::value(TaskStatus::Error.to_string()),
            )
            .col_expr(
                task_entity::Column::ErrorMessage,
                Expr::value(Some(reason.to_string())),
            )
            .col_expr(task_entity::Column::WorkerId, Expr::value(Option::<Uuid>::None))
            .col_expr(
                task_entity::Column::ClaimedAt,
                Expr::value(Option::<DateTime<FixedOffset>>::None),
            )
            .col_expr(task_entity::Column::UpdatedAt, Expr::value(now()))
            .filter(task_entity::Column::Id.eq(id))
            .filter(task_entity::Column::Status.eq(TaskStatus::Processing.to_string()))
            .filter(task_entity::Column::WorkerId.eq(worker_id))
            .exec(self.db.as_ref())
            .await?;

        if result.rows_affected == 0 {
            debug!(task_id = %id, %worker_id, "Failure ignored, claim no longer held");
        }
        Ok(result.rows_affected == 1)
    }

    async fn requeue(
        &self,
        id: Uuid,
        worker_id: Uuid,
        reason: &str,
    ) -> Result<RequeueOutcome, RepositoryError> {
        let Some(model) = task_entity::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?
        else {
            return Ok(RequeueOutcome::NotClaimed);
        };
        if model.status != TaskStatus::Processing.to_string() || model.worker_id != Some(worker_id)
        {
            return Ok(RequeueOutcome::NotClaimed);
        }

        let attempts = model.attempts + 1;
        let (status, outcome) = if attempts >= model.max_attempts {
            (TaskStatus::Error, RequeueOutcome::Exhausted)
        } else {
            (TaskStatus::Queued, RequeueOutcome::Requeued)
        };

        let result = task_entity::Entity::update_many()
            .col_expr(task_entity::Column::Status, Expr::value(status.to_string()))
            .col_expr(task_entity::Column::Attempts, Expr::value(attempts))
            .col_expr(
                task_entity::Column::ErrorMessage,
                Expr::value(Some(reason.to_string())),
            )
            .col_expr(task_entity::Column::WorkerId, Expr::value(Option::<Uuid>::None))
            .col_expr(
                task_entity::Column::ClaimedAt,
                Expr::value(Option::<DateTime<FixedOffset>>::None),
            )
            .col_expr(task_entity::Column::UpdatedAt, Expr::value(now()))
            .filter(task_entity::Column::Id.eq(id))
            .filter(task_entity::Column::Status.eq(TaskStatus::Processing.to_string()))
            .filter(task_entity::Column::WorkerId.eq(worker_id))
            .filter(task_entity::Column::Attempts.eq(model.attempts))
            .exec(self.db.as_ref())
            .await?;

        if result.rows_affected == 0 {
            return Ok(RequeueOutcome::NotClaimed);
        }
        Ok(outcome)
    }

    async fn sweep_timeouts(
        &self,
        threshold: chrono::Duration,
    ) -> Result<SweepOutcome, RepositoryError> {
        let cutoff = Utc::now() - threshold;

        // 时间比较放在内存中做，SQLite 以文本存储时间戳
        let stale: Vec<task_entity::Model> = task_entity::Entity::find()
            .filter(task_entity::Column::Status.eq(TaskStatus::Processing.to_string()))
            .all(self.db.as_ref())
            .await?
            .into_iter()
            .filter(|m| m.claimed_at.map_or(true, |at| at < cutoff))
            .collect();

        let mut outcome = SweepOutcome::default();
        for model in stale {
            let attempts = model.attempts + 1;
            let exhausted = attempts >= model.max_attempts;
            let status = if exhausted {
                TaskStatus::Error
            } else {
                TaskStatus::Queued
            };
            let updated_at = now();
            let message = "processing timed out".to_string();

            let result = task_entity::Entity::update_many()
                .col_expr(task_entity::Column::Status, Expr::value(status.to_string()))
                .col_expr(
                    task_entity::Column::Attempts,
                    Expr::col(task_entity::Column::Attempts).add(1),
                )
                .col_expr(
                    task_entity::Column::ErrorMessage,
                    Expr::value(Some(message.clone())),
                )
                .col_expr(task_entity::Column::WorkerId, Expr::value(Option::<Uuid>::None))
                .col_expr(
                    task_entity::Column::ClaimedAt,
                    Expr::value(Option::<DateTime<FixedOffset>>::None),
                )
                .col_expr(task_entity::Column::UpdatedAt, Expr::value(updated_at))
                .filter(task_entity::Column::Id.eq(model.id))
                .filter(task_entity::Column::Status.eq(TaskStatus::Processing.to_string()))
                .filter(task_entity::Column::Attempts.eq(model.attempts))
                .exec(self.db.as_ref())
                .await?;

            if result.rows_affected == 0 {
                continue;
            }
            if exhausted {
                outcome.exhausted += 1;
                continue;
            }

            let mut task = Task::try_from(model)?;
            task.status = TaskStatus::Queued;
            task.attempts = attempts;
            task.worker_id = None;
            task.claimed_at = None;
            task.error_message = Some(message);
            task.updated_at = updated_at;
            outcome.reclaimed.push(task);
        }

        Ok(outcome)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Task>, RepositoryError> {
        task_entity::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?
            .map(Task::try_from)
            .transpose()
    }

    async fn find_for_scope(
        &self,
        kind: TaskKind,
        scope: &TaskScope,
    ) -> Result<Option<Task>, RepositoryError> {
        task_entity::Entity::find()
            .filter(task_entity::Column::ScopeKey.eq(scope.key(kind)))
            .order_by_desc(task_entity::Column::CreatedAt)
            .limit(1)
            .one(self.db.as_ref())
            .await?
            .map(Task::try_from)
            .transpose()
    }

    async fn counts(&self) -> Result<TaskCounts, RepositoryError> {
        Ok(TaskCounts {
            queued: self.count_status(TaskStatus::Queued).await?,
            processing: self.count_status(TaskStatus::Processing).await?,
            error: self.count_status(TaskStatus::Error).await?,
        })
    }

    async fn clear_finished(&self) -> Result<u64, RepositoryError> {
        let result = task_entity::Entity::delete_many()
            .filter(task_entity::Column::Status.eq(TaskStatus::Error.to_string()))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected)
    }

    async fn delete_queued_for_book(&self, book_id: Uuid) -> Result<Vec<Uuid>, RepositoryError> {
        let ids: Vec<Uuid> = task_entity::Entity::find()
            .select_only()
            .column(task_entity::Column::Id)
            .filter(task_entity::Column::BookId.eq(book_id))
            .filter(task_entity::Column::Status.eq(TaskStatus::Queued.to_string()))
            .into_tuple()
            .all(self.db.as_ref())
            .await?;

        if ids.is_empty() {
            return Ok(ids);
        }

        task_entity::Entity::delete_many()
            .filter(task_entity::Column::Id.is_in(ids.clone()))
            .filter(task_entity::Column::Status.eq(TaskStatus::Queued.to_string()))
            .exec(self.db.as_ref())
            .await?;

        Ok(ids)
    }

    async fn delete_queued_questions(
        &self,
        book_id: Uuid,
        grades: &[Grade],
    ) -> Result<Vec<Uuid>, RepositoryError> {
        if grades.is_empty() {
            return Ok(Vec::new());
        }
        let grade_levels: Vec<String> = grades.iter().map(|g| g.to_string()).collect();
        let queued = TaskStatus::Queued.to_string();

        let ids: Vec<Uuid> = task_entity::Entity::find()
            .select_only()
            .column(task_entity::Column::Id)
            .filter(task_entity::Column::BookId.eq(book_id))
            .filter(task_entity::Column::Kind.eq(TaskKind::Questions.to_string()))
            .filter(task_entity::Column::GradeLevel.is_in(grade_levels))
            .filter(task_entity::Column::Status.eq(queued.as_str()))
            .into_tuple()
            .all(self.db.as_ref())
            .await?;

        if ids.is_empty() {
            return Ok(ids);
        }

        // 查询与删除之间被领取的任务不会被删除
        task_entity::Entity::delete_many()
            .filter(task_entity::Column::Id.is_in(ids.clone()))
            .filter(task_entity::Column::Status.eq(queued.as_str()))
            .exec(self.db.as_ref())
            .await?;

        Ok(ids)
    }
}
