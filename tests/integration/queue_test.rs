// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::helpers::{
    backdate_claim, description_payload, grade, questions_payload, setup, tags_payload,
};
use chapterwise::config::settings::GenerationSettings;
use chapterwise::domain::models::artifact::{GeneratedArtifact, Question, QuestionSet};
use chapterwise::domain::models::task::{TaskKind, TaskScope, TaskStatus};
use chapterwise::domain::repositories::artifact_repository::ArtifactRepository;
use chapterwise::domain::repositories::task_repository::{RequeueOutcome, TaskRepository};
use chapterwise::domain::services::grade_diff::{BookContext, ChapterContext, GradeDiffPlanner};
use chapterwise::queue::scheduler::PriorityScheduler;
use chapterwise::queue::task_queue::{EnqueueOutcome, TaskQueue, TaskQueueService};
use futures::future::join_all;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn book(book_id: Uuid) -> BookContext {
    BookContext {
        book_id,
        title: "The Wind in the Willows".to_string(),
        author: "Kenneth Grahame".to_string(),
        reading_level: "intermediate".to_string(),
        age_range: "8-12".to_string(),
    }
}

fn chapter(number: i32) -> ChapterContext {
    ChapterContext {
        chapter_id: Uuid::new_v4(),
        number,
        title: format!("Chapter {}", number),
        text: "Spring was moving in the air above and in the earth below.".to_string(),
    }
}

fn grades(levels: &[u8]) -> BTreeSet<chapterwise::domain::models::grade::Grade> {
    levels.iter().map(|&l| grade(l)).collect()
}

#[tokio::test]
async fn test_second_enqueue_reports_already_scheduled() {
    let ctx = setup().await;
    let scope = TaskScope::book(Uuid::new_v4());

    let first = ctx.queue.enqueue(scope.clone(), tags_payload()).await.unwrap();
    let second = ctx.queue.enqueue(scope, tags_payload()).await.unwrap();

    assert!(matches!(first, EnqueueOutcome::Scheduled(_)));
    assert_eq!(second, EnqueueOutcome::AlreadyScheduled);
    assert_eq!(ctx.queue.scheduler().len(), 1);
}

#[tokio::test]
async fn test_concurrent_enqueue_race_creates_one_task() {
    let ctx = setup().await;
    let scope = TaskScope::book(Uuid::new_v4());

    let outcomes = join_all((0..8).map(|_| {
        let queue = ctx.queue.clone();
        let scope = scope.clone();
        tokio::spawn(async move { queue.enqueue(scope, tags_payload()).await.unwrap() })
    }))
    .await;

    let scheduled = outcomes
        .into_iter()
        .map(Result::unwrap)
        .filter(|outcome| matches!(outcome, EnqueueOutcome::Scheduled(_)))
        .count();
    assert_eq!(scheduled, 1);
    assert_eq!(ctx.task_repo.counts().await.unwrap().queued, 1);
}

#[tokio::test]
async fn test_mismatched_scope_is_rejected() {
    let ctx = setup().await;
    // 题目任务必须带章节与年级
    let result = ctx
        .queue
        .enqueue(TaskScope::book(Uuid::new_v4()), questions_payload(grade(3)))
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_workers_drain_by_priority() {
    let ctx = setup().await;
    let book_id = Uuid::new_v4();
    let chapter_id = Uuid::new_v4();

    ctx.queue
        .enqueue(TaskScope::book(book_id), tags_payload())
        .await
        .unwrap();
    ctx.queue
        .enqueue(
            TaskScope::chapter_grade(book_id, chapter_id, grade(4)),
            questions_payload(grade(4)),
        )
        .await
        .unwrap();
    ctx.queue
        .enqueue(TaskScope::book(book_id), description_payload())
        .await
        .unwrap();

    let worker = Uuid::new_v4();
    let mut order = Vec::new();
    for _ in 0..3 {
        let task = ctx.queue.dequeue(worker).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Processing);
        order.push(task.kind());
        assert!(ctx.queue.complete(task.id, worker).await.unwrap());
    }

    assert_eq!(
        order,
        vec![TaskKind::Tags, TaskKind::Description, TaskKind::Questions]
    );
}

#[tokio::test]
async fn test_recover_after_restart() {
    let ctx = setup().await;
    let book_id = Uuid::new_v4();
    ctx.queue
        .enqueue(TaskScope::book(book_id), description_payload())
        .await
        .unwrap();
    ctx.queue
        .enqueue(TaskScope::book(book_id), tags_payload())
        .await
        .unwrap();
    let claimed = ctx.queue.dequeue(Uuid::new_v4()).await.unwrap().unwrap();
    assert_eq!(claimed.kind(), TaskKind::Tags);

    // 新进程：同一数据库，新的调度器
    let restarted = TaskQueueService::new(ctx.task_repo.clone(), Arc::new(PriorityScheduler::new()));
    assert_eq!(restarted.recover().await.unwrap(), 2);

    let first = restarted.dequeue(Uuid::new_v4()).await.unwrap().unwrap();
    assert_eq!(first.id, claimed.id);
    assert_eq!(first.attempts, 0);
}

#[tokio::test]
async fn test_sweep_readmits_reclaimed_task() {
    let ctx = setup().await;
    ctx.queue
        .enqueue(TaskScope::book(Uuid::new_v4()), tags_payload())
        .await
        .unwrap();
    let stuck = ctx.queue.dequeue(Uuid::new_v4()).await.unwrap().unwrap();
    assert!(ctx.queue.scheduler().is_empty());

    backdate_claim(&ctx.db, stuck.id, 16).await;
    assert_eq!(
        ctx.queue.sweep(chrono::Duration::minutes(15)).await.unwrap(),
        1
    );
    assert_eq!(ctx.queue.scheduler().len(), 1);

    let again = ctx.queue.dequeue(Uuid::new_v4()).await.unwrap().unwrap();
    assert_eq!(again.id, stuck.id);
    assert_eq!(again.attempts, 1);
}

#[tokio::test]
async fn test_dequeue_skips_task_claimed_elsewhere() {
    let ctx = setup().await;
    let book_id = Uuid::new_v4();
    let EnqueueOutcome::Scheduled(tags_id) = ctx
        .queue
        .enqueue(TaskScope::book(book_id), tags_payload())
        .await
        .unwrap()
    else {
        panic!("expected a new task");
    };
    ctx.queue
        .enqueue(TaskScope::book(book_id), description_payload())
        .await
        .unwrap();

    // 另一个进程抢先认领了标签任务
    assert!(ctx
        .task_repo
        .mark_processing(tags_id, Uuid::new_v4())
        .await
        .unwrap());

    let task = ctx.queue.dequeue(Uuid::new_v4()).await.unwrap().unwrap();
    assert_eq!(task.kind(), TaskKind::Description);
}

#[tokio::test]
async fn test_dequeue_returns_none_after_close() {
    let ctx = setup().await;
    let queue = ctx.queue.clone();
    let waiter = tokio::spawn(async move { queue.dequeue(Uuid::new_v4()).await });

    tokio::time::sleep(Duration::from_millis(20)).await;
    ctx.queue.scheduler().close();

    let result = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(result.is_none());
}

#[tokio::test]
async fn test_grade_plan_applied_twice_enqueues_once() {
    let ctx = setup().await;
    let book_id = Uuid::new_v4();
    let chapters = vec![chapter(1), chapter(2)];
    let planner = GradeDiffPlanner::new(&GenerationSettings::default());

    // 旧年级 2 的产物应被删除
    for ch in &chapters {
        ctx.artifact_repo
            .persist(
                TaskKind::Questions,
                &TaskScope::chapter_grade(book_id, ch.chapter_id, grade(2)),
                &GeneratedArtifact::Questions(QuestionSet {
                    questions: vec![Question {
                        text: "Why?".to_string(),
                        keywords: vec![],
                        difficulty: "medium".to_string(),
                    }],
                    vocabulary: vec![],
                }),
            )
            .await
            .unwrap();
    }

    let old = grades(&[2, 3]);
    let new = grades(&[3, 4]);

    let first = ctx
        .queue
        .apply_grade_plan(
            planner.plan(&book(book_id), &old, &new, &chapters),
            ctx.artifact_repo.as_ref(),
        )
        .await
        .unwrap();
    assert_eq!(first.scheduled, 2);
    assert_eq!(first.removed_artifacts, 2);

    let second = ctx
        .queue
        .apply_grade_plan(
            planner.plan(&book(book_id), &old, &new, &chapters),
            ctx.artifact_repo.as_ref(),
        )
        .await
        .unwrap();
    assert_eq!(second.scheduled, 0);
    assert_eq!(second.already_scheduled, 2);
    assert_eq!(second.removed_artifacts, 0);

    assert_eq!(ctx.task_repo.counts().await.unwrap().queued, 2);
    for ch in &chapters {
        let grade_three = TaskScope::chapter_grade(book_id, ch.chapter_id, grade(3));
        assert!(ctx
            .task_repo
            .find_for_scope(TaskKind::Questions, &grade_three)
            .await
            .unwrap()
            .is_none());
    }
}

#[tokio::test]
async fn test_delete_queued_for_book_clears_ready_set() {
    let ctx = setup().await;
    let book_id = Uuid::new_v4();
    let other = Uuid::new_v4();
    ctx.queue
        .enqueue(TaskScope::book(book_id), tags_payload())
        .await
        .unwrap();
    ctx.queue
        .enqueue(TaskScope::book(book_id), description_payload())
        .await
        .unwrap();
    ctx.queue
        .enqueue(TaskScope::book(other), tags_payload())
        .await
        .unwrap();

    assert_eq!(ctx.queue.delete_queued_for_book(book_id).await.unwrap(), 2);

    let snapshot = ctx.queue.snapshot().await.unwrap();
    assert_eq!(snapshot.counts.queued, 1);
    assert_eq!(snapshot.ready, 1);
}

#[tokio::test]
async fn test_grade_change_retires_queued_questions_for_removed_grade() {
    let ctx = setup().await;
    let book_id = Uuid::new_v4();
    let chapters = vec![chapter(1), chapter(2)];
    let planner = GradeDiffPlanner::new(&GenerationSettings::default());

    let removed_scope = TaskScope::chapter_grade(book_id, chapters[0].chapter_id, grade(2));
    let kept_scope = TaskScope::chapter_grade(book_id, chapters[0].chapter_id, grade(3));
    let EnqueueOutcome::Scheduled(removed_id) = ctx
        .queue
        .enqueue(removed_scope.clone(), questions_payload(grade(2)))
        .await
        .unwrap()
    else {
        panic!("expected a new task");
    };
    ctx.queue
        .enqueue(kept_scope.clone(), questions_payload(grade(3)))
        .await
        .unwrap();
    ctx.queue
        .enqueue(TaskScope::book(book_id), tags_payload())
        .await
        .unwrap();

    let outcome = ctx
        .queue
        .apply_grade_plan(
            planner.plan(&book(book_id), &grades(&[2, 3]), &grades(&[3, 4]), &chapters),
            ctx.artifact_repo.as_ref(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.retired_tasks, 1);
    assert_eq!(outcome.scheduled, 2);
    assert!(ctx.task_repo.find_by_id(removed_id).await.unwrap().is_none());
    assert!(ctx
        .task_repo
        .find_for_scope(TaskKind::Questions, &kept_scope)
        .await
        .unwrap()
        .is_some());

    // 就绪集合里只剩标签、年级 3 和两个年级 4 任务
    assert_eq!(ctx.queue.scheduler().len(), 4);
    let worker = Uuid::new_v4();
    for _ in 0..4 {
        let task = ctx.queue.dequeue(worker).await.unwrap().unwrap();
        assert_ne!(task.id, removed_id);
        assert_ne!(task.scope.grade_level, Some(grade(2)));
    }
    assert!(ctx.queue.scheduler().is_empty());
}

#[tokio::test]
async fn test_stale_worker_cannot_finish_reclaimed_task() {
    let ctx = setup().await;
    let EnqueueOutcome::Scheduled(task_id) = ctx
        .queue
        .enqueue(TaskScope::book(Uuid::new_v4()), tags_payload())
        .await
        .unwrap()
    else {
        panic!("expected a new task");
    };

    let stale = Uuid::new_v4();
    ctx.queue.dequeue(stale).await.unwrap().unwrap();
    backdate_claim(&ctx.db, task_id, 16).await;
    assert_eq!(
        ctx.queue.sweep(chrono::Duration::minutes(15)).await.unwrap(),
        1
    );

    let current = Uuid::new_v4();
    let reclaimed = ctx.queue.dequeue(current).await.unwrap().unwrap();
    assert_eq!(reclaimed.id, task_id);

    assert!(!ctx.queue.fail(task_id, stale, "late failure").await.unwrap());
    assert!(!ctx.queue.complete(task_id, stale).await.unwrap());
    assert_eq!(
        ctx.queue.retry(task_id, stale, "late retry").await.unwrap(),
        RequeueOutcome::NotClaimed
    );

    let stored = ctx.task_repo.find_by_id(task_id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Processing);
    assert_eq!(stored.worker_id, Some(current));
    assert_eq!(stored.attempts, 1);

    assert!(ctx.queue.complete(task_id, current).await.unwrap());
    assert!(ctx.task_repo.find_by_id(task_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_sweep_with_exhausted_budget_does_not_readmit() {
    let ctx = setup().await;
    let queue = TaskQueueService::new(ctx.task_repo.clone(), Arc::new(PriorityScheduler::new()))
        .with_max_attempts(1);
    let EnqueueOutcome::Scheduled(task_id) = queue
        .enqueue(TaskScope::book(Uuid::new_v4()), tags_payload())
        .await
        .unwrap()
    else {
        panic!("expected a new task");
    };
    queue.dequeue(Uuid::new_v4()).await.unwrap().unwrap();
    backdate_claim(&ctx.db, task_id, 16).await;

    assert_eq!(queue.sweep(chrono::Duration::minutes(15)).await.unwrap(), 0);
    assert!(queue.scheduler().is_empty());
    let stored = ctx.task_repo.find_by_id(task_id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Error);
}
