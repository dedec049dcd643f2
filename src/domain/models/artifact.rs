// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::models::grade::Grade;
use crate::domain::models::task::TaskKind;

/// 生成产物
///
/// 工作器成功执行任务后交给持久化回调的结构化结果。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "content", rename_all = "snake_case")]
pub enum GeneratedArtifact {
    /// 体裁与年级标签，例如 `adventure`、`grade-4`
    Tags(Vec<String>),
    /// 书籍简介
    Description(String),
    /// 章节理解题与词汇
    Questions(QuestionSet),
}

impl GeneratedArtifact {
    /// 产物对应的任务类型
    pub fn kind(&self) -> TaskKind {
        match self {
            GeneratedArtifact::Tags(_) => TaskKind::Tags,
            GeneratedArtifact::Description(_) => TaskKind::Description,
            GeneratedArtifact::Questions(_) => TaskKind::Questions,
        }
    }
}

/// 某章节、某年级的一组题目与词汇
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QuestionSet {
    pub questions: Vec<Question>,
    #[serde(default)]
    pub vocabulary: Vec<VocabularyItem>,
}

/// 理解题
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub text: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default = "default_difficulty")]
    pub difficulty: String,
}

/// 词汇条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VocabularyItem {
    pub word: String,
    pub definition: String,
    #[serde(default)]
    pub example: Option<String>,
    pub grade_level: Grade,
}

fn default_difficulty() -> String {
    "medium".to_string()
}

/// 删除指令：移除某章节某年级的题目与词汇
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactRemoval {
    pub book_id: Uuid,
    pub chapter_id: Uuid,
    pub grade: Grade,
}
