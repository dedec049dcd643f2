// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::settings::GenerationSettings;
use crate::domain::models::artifact::{GeneratedArtifact, Question, QuestionSet, VocabularyItem};
use crate::domain::models::grade::{Grade, GRADE_TAG_PREFIX};
use crate::domain::models::task::{
    DescriptionPayload, QuestionsPayload, TagsPayload, TaskKind, TaskPayload,
};
use crate::domain::services::model_invoker::{InvokeError, ModelInvoker};
use crate::domain::services::response_extractor::SchemaError;

/// 标签中年级标签的上限
const MAX_GRADE_TAGS: usize = 4;
/// 简介长度范围（字符）
const MIN_DESCRIPTION_CHARS: usize = 50;
const MAX_DESCRIPTION_CHARS: usize = 500;

const GENRES: &str = "\"adventure\", \"fantasy\", \"mystery\", \"historical-fiction\", \
\"science-fiction\", \"realistic-fiction\", \"humor\", \"horror\", \"romance\", \"poetry\", \
\"biography\", \"educational\"";

/// 生成错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    /// 模型调用阶梯耗尽
    #[error(transparent)]
    Exhausted(#[from] InvokeError),
    /// 分发表把负载交给了不匹配的例程，属于致命错误
    #[error("Routine for {expected} received a {found} payload")]
    PayloadMismatch { expected: TaskKind, found: TaskKind },
}

/// 生成例程特质
///
/// 每种任务类型一个例程，负责构造提示词并把模型输出转成产物。
/// 例程必须是负载的纯函数，任务被重试或回收后可以安全地再次调用。
#[async_trait]
pub trait GenerationRoutine: Send + Sync {
    /// 执行生成
    async fn generate(&self, payload: &TaskPayload) -> Result<GeneratedArtifact, GenerationError>;

    /// 生成耗尽后可替代的通用产物
    fn fallback(&self, _payload: &TaskPayload) -> Option<GeneratedArtifact> {
        None
    }
}

/// 分发表：任务类型 → 生成例程
#[derive(Clone)]
pub struct DispatchTable {
    tags: Arc<dyn GenerationRoutine>,
    description: Arc<dyn GenerationRoutine>,
    questions: Arc<dyn GenerationRoutine>,
}

impl DispatchTable {
    pub fn new(
        tags: Arc<dyn GenerationRoutine>,
        description: Arc<dyn GenerationRoutine>,
        questions: Arc<dyn GenerationRoutine>,
    ) -> Self {
        Self {
            tags,
            description,
            questions,
        }
    }

    /// 使用内置例程构造分发表
    pub fn with_defaults(invoker: ModelInvoker, settings: &GenerationSettings) -> Self {
        Self::new(
            Arc::new(TagsRoutine::new(invoker.clone())),
            Arc::new(DescriptionRoutine::new(invoker.clone())),
            Arc::new(QuestionsRoutine::new(invoker, settings.clone())),
        )
    }

    /// 查找任务类型对应的例程
    pub fn routine_for(&self, kind: TaskKind) -> &dyn GenerationRoutine {
        match kind {
            TaskKind::Tags => self.tags.as_ref(),
            TaskKind::Description => self.description.as_ref(),
            TaskKind::Questions => self.questions.as_ref(),
        }
    }
}

fn mismatch(expected: TaskKind, payload: &TaskPayload) -> GenerationError {
    GenerationError::PayloadMismatch {
        expected,
        found: payload.kind(),
    }
}

/// 标签生成例程
pub struct TagsRoutine {
    invoker: ModelInvoker,
}

impl TagsRoutine {
    pub fn new(invoker: ModelInvoker) -> Self {
        Self { invoker }
    }

    fn prompt(payload: &TagsPayload) -> String {
        format!(
            r#"You are a librarian and educator classifying children's books.

Book: "{title}" by {author}
Reading Level: {reading_level}
Age Range: {age_range}

Provide tags for this book:
1. Genre tags (1-4), chosen from: {genres}
2. Grade tags (at most 4 consecutive grades), chosen from "grade-K", "grade-1" ... "grade-12"

Respond with ONLY valid JSON, no markdown and no explanations, in exactly this shape:
{{"tags":["adventure","fantasy","grade-3","grade-4","grade-5","grade-6"]}}"#,
            title = payload.title,
            author = payload.author,
            reading_level = payload.reading_level,
            age_range = payload.age_range,
            genres = GENRES,
        )
    }

    fn schema() -> Value {
        json!({
            "type": "object",
            "required": ["tags"],
            "properties": {
                "tags": { "type": "array", "minItems": 1, "items": { "type": "string" } }
            }
        })
    }

    /// 清理标签，年级标签最多保留 4 个
    fn decode(value: Value) -> Result<Vec<String>, SchemaError> {
        let raw = value
            .get("tags")
            .and_then(Value::as_array)
            .ok_or_else(|| SchemaError::new("$.tags", "expected array"))?;

        let mut tags = Vec::new();
        let mut grades = 0;
        for tag in raw.iter().filter_map(Value::as_str) {
            let tag = tag.trim().to_lowercase();
            if tag.is_empty() || tags.contains(&tag) {
                continue;
            }
            if tag.starts_with(GRADE_TAG_PREFIX) {
                let Ok(grade) = tag.parse::<Grade>() else {
                    debug!("Dropping unrecognised grade tag {}", tag);
                    continue;
                };
                if grades == MAX_GRADE_TAGS {
                    continue;
                }
                grades += 1;
                tags.push(grade.to_string());
            } else {
                tags.push(tag);
            }
        }

        if tags.is_empty() {
            return Err(SchemaError::new("$.tags", "no usable tags"));
        }
        Ok(tags)
    }

    /// 按阅读等级推断的通用标签
    fn fallback_tags(reading_level: &str) -> Vec<String> {
        let grades: &[&str] = match reading_level {
            "beginner" => &["grade-K", "grade-1", "grade-2"],
            "early-reader" => &["grade-1", "grade-2", "grade-3"],
            "advanced" => &["grade-7", "grade-8", "grade-9"],
            "young-adult" => &["grade-10", "grade-11", "grade-12"],
            _ => &["grade-4", "grade-5", "grade-6"],
        };
        std::iter::once("fiction")
            .chain(grades.iter().copied())
            .map(str::to_string)
            .collect()
    }
}

#[async_trait]
impl GenerationRoutine for TagsRoutine {
    async fn generate(&self, payload: &TaskPayload) -> Result<GeneratedArtifact, GenerationError> {
        let TaskPayload::Tags(tags) = payload else {
            return Err(mismatch(TaskKind::Tags, payload));
        };
        let result = self
            .invoker
            .invoke_with(&Self::prompt(tags), &Self::schema(), Self::decode)
            .await?;
        Ok(GeneratedArtifact::Tags(result))
    }

    fn fallback(&self, payload: &TaskPayload) -> Option<GeneratedArtifact> {
        match payload {
            TaskPayload::Tags(tags) => Some(GeneratedArtifact::Tags(Self::fallback_tags(
                &tags.reading_level,
            ))),
            _ => None,
        }
    }
}

/// 简介生成例程
pub struct DescriptionRoutine {
    invoker: ModelInvoker,
}

impl DescriptionRoutine {
    pub fn new(invoker: ModelInvoker) -> Self {
        Self { invoker }
    }

    fn prompt(payload: &DescriptionPayload) -> String {
        let synopsis = payload
            .synopsis
            .as_deref()
            .map(|s| format!("\nSynopsis: {}", s))
            .unwrap_or_default();

        format!(
            r#"You are a librarian writing descriptions of children's books.

Book: "{title}" by {author}{synopsis}

Write an engaging single-paragraph description of this book, 200-500 characters long,
appropriate for children and without quotation marks.

Respond with ONLY valid JSON, no markdown and no explanations, in exactly this shape:
{{"description":"..."}}"#,
            title = payload.title,
            author = payload.author,
            synopsis = synopsis,
        )
    }

    fn schema() -> Value {
        json!({
            "type": "object",
            "required": ["description"],
            "properties": { "description": { "type": "string" } }
        })
    }

    fn decode(value: Value) -> Result<String, SchemaError> {
        let raw = value
            .get("description")
            .and_then(Value::as_str)
            .ok_or_else(|| SchemaError::new("$.description", "expected string"))?;

        let cleaned = raw.trim().trim_matches(|c| c == '"' || c == '\'').trim();
        let length = cleaned.chars().count();
        if length < MIN_DESCRIPTION_CHARS {
            return Err(SchemaError::new(
                "$.description",
                format!("description too short ({} chars)", length),
            ));
        }
        Ok(truncate_at_word(cleaned, MAX_DESCRIPTION_CHARS))
    }
}

/// 超长文本在词边界处截断并追加省略号
fn truncate_at_word(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars).collect();
    let cut = head.rsplit_once(' ').map(|(h, _)| h).unwrap_or(&head);
    format!("{}...", cut)
}

#[async_trait]
impl GenerationRoutine for DescriptionRoutine {
    async fn generate(&self, payload: &TaskPayload) -> Result<GeneratedArtifact, GenerationError> {
        let TaskPayload::Description(description) = payload else {
            return Err(mismatch(TaskKind::Description, payload));
        };
        let result = self
            .invoker
            .invoke_with(&Self::prompt(description), &Self::schema(), Self::decode)
            .await?;
        Ok(GeneratedArtifact::Description(result))
    }

    fn fallback(&self, payload: &TaskPayload) -> Option<GeneratedArtifact> {
        match payload {
            TaskPayload::Description(d) => Some(GeneratedArtifact::Description(format!(
                "{} by {} is a captivating children's book that engages young readers with its compelling story and memorable characters.",
                d.title, d.author
            ))),
            _ => None,
        }
    }
}

/// 题目与词汇生成例程
pub struct QuestionsRoutine {
    invoker: ModelInvoker,
    settings: GenerationSettings,
}

impl QuestionsRoutine {
    pub fn new(invoker: ModelInvoker, settings: GenerationSettings) -> Self {
        Self { invoker, settings }
    }

    fn prompt(&self, payload: &QuestionsPayload) -> String {
        let chapter_text = truncate_words(&payload.chapter_text, self.settings.max_context_words);
        let grade = payload.grade_level;

        format!(
            r#"You are an educator writing reading comprehension questions for {grade} students.

Book: "{title}" by {author}
Chapter {number}: {chapter_title}
Reading Level: {reading_level}
Age Range: {age_range}

Chapter Text:
{chapter_text}

Everything you write must be appropriate for {grade} students (ages {age_range}).

Write exactly {num_questions} open-ended questions that:
- start with "Why" or "How" and are not multiple choice or yes/no
- need {min_words}-{max_words} word answers
- focus on themes, character motivation, cause and effect, or inference

Also pick {vocab_count} words from the chapter that a {grade} student may find difficult.
Skip character names. Give each a child-friendly definition and a short example sentence.

Respond with ONLY valid JSON, no markdown and no explanations. Keep "questions" flat.
Each question has "text", "keywords" (array) and "difficulty"; each vocabulary item has
"word", "definition" and "example":
{{"questions":[{{"text":"Why did the character...","keywords":["character","action"],"difficulty":"medium"}}],"vocabulary":[{{"word":"example","definition":"simple meaning","example":"Sample sentence."}}]}}"#,
            grade = grade,
            title = payload.title,
            author = payload.author,
            number = payload.chapter_number,
            chapter_title = payload.chapter_title,
            reading_level = payload.reading_level,
            age_range = payload.age_range,
            chapter_text = chapter_text,
            num_questions = payload.num_questions,
            min_words = self.settings.min_answer_words,
            max_words = self.settings.max_answer_words,
            vocab_count = payload.vocab_count,
        )
    }

    fn schema() -> Value {
        json!({
            "type": "object",
            "required": ["questions"],
            "properties": {
                "questions": { "type": "array", "minItems": 1 },
                "vocabulary": { "type": "array" }
            }
        })
    }

    /// 展平嵌套的 questions，兼容 `question` 字段，并按请求数量截断
    fn decode(payload: &QuestionsPayload, value: Value) -> Result<QuestionSet, SchemaError> {
        let mut raw_questions = value
            .get("questions")
            .and_then(Value::as_array)
            .cloned()
            .ok_or_else(|| SchemaError::new("$.questions", "expected array"))?;

        if let Some(nested) = raw_questions
            .first()
            .and_then(|q| q.get("questions"))
            .and_then(Value::as_array)
        {
            warn!("Flattening nested questions array");
            raw_questions = nested.clone();
        }

        let questions: Vec<Question> = raw_questions
            .iter()
            .filter_map(|q| {
                let text = q
                    .get("text")
                    .or_else(|| q.get("question"))
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|t| !t.is_empty())?;
                Some(Question {
                    text: text.to_string(),
                    keywords: q
                        .get("keywords")
                        .and_then(Value::as_array)
                        .map(|k| k.iter().filter_map(Value::as_str).map(str::to_string).collect())
                        .unwrap_or_default(),
                    difficulty: q
                        .get("difficulty")
                        .and_then(Value::as_str)
                        .unwrap_or("medium")
                        .to_string(),
                })
            })
            .take(payload.num_questions as usize)
            .collect();

        if questions.is_empty() {
            return Err(SchemaError::new("$.questions", "no usable questions"));
        }

        let vocabulary = value
            .get("vocabulary")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| {
                        let word = v.get("word").and_then(Value::as_str)?.trim();
                        let definition = v.get("definition").and_then(Value::as_str)?.trim();
                        Some(VocabularyItem {
                            word: word.to_string(),
                            definition: definition.to_string(),
                            example: v
                                .get("example")
                                .and_then(Value::as_str)
                                .map(|e| e.trim().to_string())
                                .filter(|e| !e.is_empty()),
                            grade_level: payload.grade_level,
                        })
                    })
                    .take(payload.vocab_count as usize)
                    .collect()
            })
            .unwrap_or_default();

        Ok(QuestionSet {
            questions,
            vocabulary,
        })
    }

    fn fallback_questions(payload: &QuestionsPayload) -> QuestionSet {
        let title = &payload.chapter_title;
        let templates: [(String, [&str; 4], &str); 5] = [
            (
                format!("Why do you think the events in '{}' happened the way they did?", title),
                ["reason", "cause", "because", "event"],
                "medium",
            ),
            (
                format!("How did the characters in '{}' change or grow?", title),
                ["change", "character", "development", "growth"],
                "medium",
            ),
            (
                format!("What lesson or message do you think '{}' is trying to teach?", title),
                ["lesson", "message", "theme", "moral"],
                "medium",
            ),
            (
                format!("How would you feel if you were in the situation described in '{}'?", title),
                ["feeling", "emotion", "situation", "experience"],
                "easy",
            ),
            (
                format!("Why is '{}' important to the overall story?", title),
                ["important", "significance", "story", "plot"],
                "medium",
            ),
        ];

        QuestionSet {
            questions: templates
                .into_iter()
                .take(payload.num_questions as usize)
                .map(|(text, keywords, difficulty)| Question {
                    text,
                    keywords: keywords.iter().map(|k| k.to_string()).collect(),
                    difficulty: difficulty.to_string(),
                })
                .collect(),
            vocabulary: Vec::new(),
        }
    }
}

/// 按词数截断章节正文
fn truncate_words(text: &str, max_words: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= max_words {
        return text.to_string();
    }
    debug!("Truncated chapter text to {} words", max_words);
    format!("{}...", words[..max_words].join(" "))
}

#[async_trait]
impl GenerationRoutine for QuestionsRoutine {
    async fn generate(&self, payload: &TaskPayload) -> Result<GeneratedArtifact, GenerationError> {
        let TaskPayload::Questions(questions) = payload else {
            return Err(mismatch(TaskKind::Questions, payload));
        };
        let result = self
            .invoker
            .invoke_with(&self.prompt(questions), &Self::schema(), |value| {
                Self::decode(questions, value)
            })
            .await?;
        Ok(GeneratedArtifact::Questions(result))
    }

    fn fallback(&self, payload: &TaskPayload) -> Option<GeneratedArtifact> {
        match payload {
            TaskPayload::Questions(q) => {
                Some(GeneratedArtifact::Questions(Self::fallback_questions(q)))
            }
            _ => None,
        }
    }
}
