// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::config::settings::GenerationSettings;
use crate::domain::models::artifact::ArtifactRemoval;
use crate::domain::models::grade::Grade;
use crate::domain::models::task::{QuestionsPayload, TaskPayload, TaskScope};

/// 书籍上下文，题目提示词需要的书籍信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookContext {
    pub book_id: Uuid,
    pub title: String,
    pub author: String,
    pub reading_level: String,
    pub age_range: String,
}

/// 章节上下文
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterContext {
    pub chapter_id: Uuid,
    pub number: i32,
    pub title: String,
    pub text: String,
}

/// 新旧年级集合的差异
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct GradeDiff {
    pub to_add: BTreeSet<Grade>,
    pub to_remove: BTreeSet<Grade>,
    pub unchanged: BTreeSet<Grade>,
}

/// 一次分类变化需要执行的全部动作
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GradePlan {
    pub book_id: Uuid,
    pub diff: GradeDiff,
    /// 直接删除的产物，不经过任务队列
    pub removals: Vec<ArtifactRemoval>,
    /// 需要入队的题目任务
    pub tasks: Vec<(TaskScope, TaskPayload)>,
}

/// 年级差异规划器
///
/// 书籍的目标年级变化时，只为新增年级生成题目，只删除被移除年级的产物，
/// 未变化的年级保持不动。
#[derive(Debug, Clone)]
pub struct GradeDiffPlanner {
    questions_per_chapter: u32,
    vocabulary_per_grade: u32,
}

impl GradeDiffPlanner {
    pub fn new(settings: &GenerationSettings) -> Self {
        Self {
            questions_per_chapter: settings.questions_per_chapter,
            vocabulary_per_grade: settings.vocabulary_per_grade,
        }
    }

    /// 计算集合差异
    pub fn diff(old: &BTreeSet<Grade>, new: &BTreeSet<Grade>) -> GradeDiff {
        GradeDiff {
            to_add: new.difference(old).copied().collect(),
            to_remove: old.difference(new).copied().collect(),
            unchanged: old.intersection(new).copied().collect(),
        }
    }

    /// 为整本书生成动作计划
    pub fn plan(
        &self,
        book: &BookContext,
        old: &BTreeSet<Grade>,
        new: &BTreeSet<Grade>,
        chapters: &[ChapterContext],
    ) -> GradePlan {
        let diff = Self::diff(old, new);

        let removals = chapters
            .iter()
            .flat_map(|chapter| {
                diff.to_remove.iter().map(move |&grade| ArtifactRemoval {
                    book_id: book.book_id,
                    chapter_id: chapter.chapter_id,
                    grade,
                })
            })
            .collect();

        let tasks = chapters
            .iter()
            .flat_map(|chapter| {
                diff.to_add
                    .iter()
                    .map(move |&grade| self.questions_task(book, chapter, grade))
            })
            .collect();

        GradePlan {
            book_id: book.book_id,
            diff,
            removals,
            tasks,
        }
    }

    /// 新增章节：为书籍当前的每个年级生成一个题目任务
    pub fn plan_for_new_chapter(
        &self,
        book: &BookContext,
        grades: &BTreeSet<Grade>,
        chapter: &ChapterContext,
    ) -> GradePlan {
        self.plan(book, &BTreeSet::new(), grades, std::slice::from_ref(chapter))
    }

    fn questions_task(
        &self,
        book: &BookContext,
        chapter: &ChapterContext,
        grade: Grade,
    ) -> (TaskScope, TaskPayload) {
        let scope = TaskScope::chapter_grade(book.book_id, chapter.chapter_id, grade);
        let payload = TaskPayload::Questions(QuestionsPayload {
            title: book.title.clone(),
            author: book.author.clone(),
            chapter_number: chapter.number,
            chapter_title: chapter.title.clone(),
            chapter_text: chapter.text.clone(),
            reading_level: book.reading_level.clone(),
            age_range: book.age_range.clone(),
            grade_level: grade,
            num_questions: self.questions_per_chapter,
            vocab_count: self.vocabulary_per_grade,
        });
        (scope, payload)
    }
}
