// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::models::grade::Grade;

/// 默认的任务尝试预算
pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;

/// 生成任务实体
///
/// 表示一次延迟执行的内容生成工作。任务的作用域（scope）与优先级在
/// 创建后不可变；需要改变作用域时，应废弃旧任务并创建新任务。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// 任务唯一标识符
    pub id: Uuid,
    /// 任务优先级，数值越小越紧急，由任务类型决定
    pub priority: i32,
    /// 任务作用的实体
    pub scope: TaskScope,
    /// 执行生成所需的参数
    pub payload: TaskPayload,
    /// 任务状态
    pub status: TaskStatus,
    /// 已经失败的执行次数
    pub attempts: i32,
    /// 尝试预算，达到后任务进入 error 状态
    pub max_attempts: i32,
    /// 当前持有任务的工作器
    pub worker_id: Option<Uuid>,
    /// 工作器领取任务的时间，用于超时检测
    pub claimed_at: Option<DateTime<FixedOffset>>,
    /// 最后一次失败的原因
    pub error_message: Option<String>,
    /// 创建时间，同优先级内按此排序
    pub created_at: DateTime<FixedOffset>,
    /// 更新时间
    pub updated_at: DateTime<FixedOffset>,
}

/// 任务类型
///
/// 每种类型对应一个固定优先级：标签先于简介，简介先于题目。
/// 题目生成依赖年级标签，因此标签必须最先完成。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// 体裁与年级标签
    Tags,
    /// 书籍简介
    Description,
    /// 指定章节、指定年级的理解题与词汇
    Questions,
}

impl TaskKind {
    /// 全部任务类型，按优先级排列
    pub const ALL: [TaskKind; 3] = [TaskKind::Tags, TaskKind::Description, TaskKind::Questions];

    /// 固定的优先级映射
    pub fn priority(&self) -> i32 {
        match self {
            TaskKind::Tags => 1,
            TaskKind::Description => 2,
            TaskKind::Questions => 3,
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TaskKind::Tags => write!(f, "tags"),
            TaskKind::Description => write!(f, "description"),
            TaskKind::Questions => write!(f, "questions"),
        }
    }
}

impl FromStr for TaskKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tags" => Ok(TaskKind::Tags),
            "description" => Ok(TaskKind::Description),
            "questions" => Ok(TaskKind::Questions),
            other => Err(DomainError::ValidationError(format!(
                "unknown task kind: {}",
                other
            ))),
        }
    }
}

/// 任务状态
///
/// 状态转换：Queued → Processing → Done/Error，
/// 超时或失败且预算未用尽时 Processing → Queued。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// 等待执行
    #[default]
    Queued,
    /// 已被工作器领取
    Processing,
    /// 已完成（持久化层会直接删除该行）
    Done,
    /// 预算耗尽或遇到致命错误
    Error,
}

impl TaskStatus {
    /// 是否处于活跃状态（排队中或处理中）
    pub fn is_active(&self) -> bool {
        matches!(self, TaskStatus::Queued | TaskStatus::Processing)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TaskStatus::Queued => write!(f, "queued"),
            TaskStatus::Processing => write!(f, "processing"),
            TaskStatus::Done => write!(f, "done"),
            TaskStatus::Error => write!(f, "error"),
        }
    }
}

impl FromStr for TaskStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(TaskStatus::Queued),
            "processing" => Ok(TaskStatus::Processing),
            "done" => Ok(TaskStatus::Done),
            "error" => Ok(TaskStatus::Error),
            other => Err(DomainError::ValidationError(format!(
                "unknown task status: {}",
                other
            ))),
        }
    }
}

/// 任务作用域
///
/// `chapter_id` 与 `grade_level` 仅在题目任务中出现。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskScope {
    pub book_id: Uuid,
    pub chapter_id: Option<Uuid>,
    pub grade_level: Option<Grade>,
}

impl TaskScope {
    /// 书籍级作用域（标签、简介）
    pub fn book(book_id: Uuid) -> Self {
        Self {
            book_id,
            chapter_id: None,
            grade_level: None,
        }
    }

    /// 章节 + 年级作用域（题目）
    pub fn chapter_grade(book_id: Uuid, chapter_id: Uuid, grade: Grade) -> Self {
        Self {
            book_id,
            chapter_id: Some(chapter_id),
            grade_level: Some(grade),
        }
    }

    /// 去重键：`(kind, book_id, chapter_id, grade_level)` 的规范字符串形式
    pub fn key(&self, kind: TaskKind) -> String {
        let chapter = self
            .chapter_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string());
        let grade = self
            .grade_level
            .map(|g| g.to_string())
            .unwrap_or_else(|| "-".to_string());
        format!("{}:{}:{}:{}", kind, self.book_id, chapter, grade)
    }
}

/// 标签生成参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagsPayload {
    pub title: String,
    pub author: String,
    pub reading_level: String,
    pub age_range: String,
}

/// 简介生成参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptionPayload {
    pub title: String,
    pub author: String,
    #[serde(default)]
    pub synopsis: Option<String>,
}

/// 题目生成参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionsPayload {
    pub title: String,
    pub author: String,
    pub chapter_number: i32,
    pub chapter_title: String,
    pub chapter_text: String,
    pub reading_level: String,
    pub age_range: String,
    pub grade_level: Grade,
    pub num_questions: u32,
    pub vocab_count: u32,
}

/// 任务负载
///
/// 按任务类型区分的封闭和类型，工作器的分发表据此做穷尽匹配。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskPayload {
    Tags(TagsPayload),
    Description(DescriptionPayload),
    Questions(QuestionsPayload),
}

impl TaskPayload {
    /// 负载对应的任务类型
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskPayload::Tags(_) => TaskKind::Tags,
            TaskPayload::Description(_) => TaskKind::Description,
            TaskPayload::Questions(_) => TaskKind::Questions,
        }
    }
}

/// 领域错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// 无效的状态转换
    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: TaskStatus, to: TaskStatus },

    /// 输入数据不符合领域规则
    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl Task {
    /// 创建一个新的排队任务
    ///
    /// 校验作用域与负载类型一致：书籍级任务不得带章节或年级，
    /// 题目任务必须带章节与年级，且年级与负载中的年级一致。
    pub fn new(scope: TaskScope, payload: TaskPayload) -> Result<Self, DomainError> {
        match &payload {
            TaskPayload::Tags(_) | TaskPayload::Description(_) => {
                if scope.chapter_id.is_some() || scope.grade_level.is_some() {
                    return Err(DomainError::ValidationError(format!(
                        "{} tasks are book-scoped and take no chapter or grade",
                        payload.kind()
                    )));
                }
            }
            TaskPayload::Questions(questions) => {
                if scope.chapter_id.is_none() {
                    return Err(DomainError::ValidationError(
                        "questions tasks require a chapter_id".to_string(),
                    ));
                }
                match scope.grade_level {
                    Some(grade) if grade == questions.grade_level => {}
                    Some(grade) => {
                        return Err(DomainError::ValidationError(format!(
                            "scope grade {} does not match payload grade {}",
                            grade, questions.grade_level
                        )))
                    }
                    None => {
                        return Err(DomainError::ValidationError(
                            "questions tasks require a grade_level".to_string(),
                        ))
                    }
                }
            }
        }

        let now: DateTime<FixedOffset> = Utc::now().into();
        Ok(Self {
            id: Uuid::new_v4(),
            priority: payload.kind().priority(),
            scope,
            payload,
            status: TaskStatus::Queued,
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            worker_id: None,
            claimed_at: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// 设置尝试预算
    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// 任务类型
    pub fn kind(&self) -> TaskKind {
        self.payload.kind()
    }

    /// 去重键
    pub fn scope_key(&self) -> String {
        self.scope.key(self.kind())
    }

    /// 领取任务：Queued → Processing
    pub fn claim(mut self, worker_id: Uuid) -> Result<Self, DomainError> {
        match self.status {
            TaskStatus::Queued => {
                let now: DateTime<FixedOffset> = Utc::now().into();
                self.status = TaskStatus::Processing;
                self.worker_id = Some(worker_id);
                self.claimed_at = Some(now);
                self.updated_at = now;
                Ok(self)
            }
            from => Err(DomainError::InvalidStateTransition {
                from,
                to: TaskStatus::Processing,
            }),
        }
    }

    /// 记一次失败后是否还有剩余预算
    pub fn can_retry(&self) -> bool {
        self.attempts + 1 < self.max_attempts
    }
}
