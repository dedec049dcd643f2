// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::helpers::{backdate_claim, grade, questions_scope, setup, tags_payload};
use chapterwise::domain::models::task::{Task, TaskScope, TaskStatus};
use chapterwise::domain::repositories::task_repository::{
    RepositoryError, RequeueOutcome, TaskRepository,
};
use std::sync::Arc;
use uuid::Uuid;

fn tags_task(book_id: Uuid) -> Task {
    Task::new(TaskScope::book(book_id), tags_payload()).unwrap()
}

#[tokio::test]
async fn test_duplicate_enqueue_is_rejected_by_database() {
    let ctx = setup().await;
    let book_id = Uuid::new_v4();

    ctx.task_repo.enqueue(&tags_task(book_id)).await.unwrap();
    let second = ctx.task_repo.enqueue(&tags_task(book_id)).await;

    assert!(matches!(second, Err(RepositoryError::Duplicate(_))));
    assert_eq!(ctx.task_repo.counts().await.unwrap().queued, 1);
}

#[tokio::test]
async fn test_duplicate_rejected_while_processing() {
    let ctx = setup().await;
    let book_id = Uuid::new_v4();
    let first = tags_task(book_id);

    ctx.task_repo.enqueue(&first).await.unwrap();
    assert!(ctx
        .task_repo
        .mark_processing(first.id, Uuid::new_v4())
        .await
        .unwrap());

    let second = ctx.task_repo.enqueue(&tags_task(book_id)).await;
    assert!(matches!(second, Err(RepositoryError::Duplicate(_))));
}

#[tokio::test]
async fn test_only_one_worker_claims_a_task() {
    let ctx = setup().await;
    let task = tags_task(Uuid::new_v4());
    ctx.task_repo.enqueue(&task).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let repo = Arc::clone(&ctx.task_repo);
        let id = task.id;
        handles.push(tokio::spawn(async move {
            repo.mark_processing(id, Uuid::new_v4()).await.unwrap()
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);

    let stored = ctx.task_repo.find_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Processing);
    assert!(stored.worker_id.is_some());
    assert!(stored.claimed_at.is_some());
}

#[tokio::test]
async fn test_load_pending_resets_abandoned_tasks_in_priority_order() {
    let ctx = setup().await;
    let book_id = Uuid::new_v4();
    let (scope, payload) = questions_scope(book_id, Uuid::new_v4(), 4);
    let questions = Task::new(scope, payload).unwrap();
    let tags = tags_task(book_id);

    ctx.task_repo.enqueue(&questions).await.unwrap();
    ctx.task_repo.enqueue(&tags).await.unwrap();
    ctx.task_repo
        .mark_processing(tags.id, Uuid::new_v4())
        .await
        .unwrap();

    let pending = ctx.task_repo.load_pending().await.unwrap();

    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].id, tags.id);
    assert_eq!(pending[0].status, TaskStatus::Queued);
    assert_eq!(pending[0].attempts, 0);
    assert!(pending[0].claimed_at.is_none());
    assert_eq!(pending[1].id, questions.id);
}

#[tokio::test]
async fn test_sweep_reclaims_task_past_threshold_once() {
    let ctx = setup().await;
    let task = tags_task(Uuid::new_v4());
    ctx.task_repo.enqueue(&task).await.unwrap();
    ctx.task_repo
        .mark_processing(task.id, Uuid::new_v4())
        .await
        .unwrap();
    backdate_claim(&ctx.db, task.id, 16).await;

    let outcome = ctx
        .task_repo
        .sweep_timeouts(chrono::Duration::minutes(15))
        .await
        .unwrap();

    assert_eq!(outcome.reclaimed.len(), 1);
    assert_eq!(outcome.reclaimed[0].id, task.id);
    assert_eq!(outcome.reclaimed[0].attempts, 1);
    assert_eq!(outcome.exhausted, 0);

    let stored = ctx.task_repo.find_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Queued);
    assert_eq!(stored.attempts, 1);
    assert_eq!(
        stored.created_at.timestamp_millis(),
        task.created_at.timestamp_millis()
    );

    // 第二次清扫不会重复回收
    let again = ctx
        .task_repo
        .sweep_timeouts(chrono::Duration::minutes(15))
        .await
        .unwrap();
    assert!(again.reclaimed.is_empty());
    assert_eq!(ctx.task_repo.counts().await.unwrap().queued, 1);
}

#[tokio::test]
async fn test_sweep_ignores_recent_claims() {
    let ctx = setup().await;
    let task = tags_task(Uuid::new_v4());
    ctx.task_repo.enqueue(&task).await.unwrap();
    ctx.task_repo
        .mark_processing(task.id, Uuid::new_v4())
        .await
        .unwrap();
    backdate_claim(&ctx.db, task.id, 5).await;

    let outcome = ctx
        .task_repo
        .sweep_timeouts(chrono::Duration::minutes(15))
        .await
        .unwrap();

    assert!(outcome.reclaimed.is_empty());
    assert_eq!(outcome.exhausted, 0);
    let stored = ctx.task_repo.find_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Processing);
}

#[tokio::test]
async fn test_sweep_fails_task_with_exhausted_budget() {
    let ctx = setup().await;
    let task = tags_task(Uuid::new_v4()).with_max_attempts(1);
    ctx.task_repo.enqueue(&task).await.unwrap();
    ctx.task_repo
        .mark_processing(task.id, Uuid::new_v4())
        .await
        .unwrap();
    backdate_claim(&ctx.db, task.id, 30).await;

    let outcome = ctx
        .task_repo
        .sweep_timeouts(chrono::Duration::minutes(15))
        .await
        .unwrap();

    assert!(outcome.reclaimed.is_empty());
    assert_eq!(outcome.exhausted, 1);
    let stored = ctx.task_repo.find_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Error);
    assert_eq!(stored.error_message.as_deref(), Some("processing timed out"));
}

#[tokio::test]
async fn test_mark_done_deletes_row() {
    let ctx = setup().await;
    let task = tags_task(Uuid::new_v4());
    ctx.task_repo.enqueue(&task).await.unwrap();
    let worker = Uuid::new_v4();
    ctx.task_repo.mark_processing(task.id, worker).await.unwrap();

    assert!(ctx.task_repo.mark_done(task.id, worker).await.unwrap());

    assert!(ctx.task_repo.find_by_id(task.id).await.unwrap().is_none());
    // 重复完成不报错
    assert!(!ctx.task_repo.mark_done(task.id, worker).await.unwrap());
}

#[tokio::test]
async fn test_terminal_transitions_require_current_claim() {
    let ctx = setup().await;
    let task = tags_task(Uuid::new_v4());
    ctx.task_repo.enqueue(&task).await.unwrap();

    // 尚未认领的任务不能直接进入终态
    assert!(!ctx.task_repo.mark_error(task.id, Uuid::new_v4(), "boom").await.unwrap());
    assert!(!ctx.task_repo.mark_done(task.id, Uuid::new_v4()).await.unwrap());

    let owner = Uuid::new_v4();
    let intruder = Uuid::new_v4();
    ctx.task_repo.mark_processing(task.id, owner).await.unwrap();

    assert!(!ctx.task_repo.mark_error(task.id, intruder, "boom").await.unwrap());
    assert!(!ctx.task_repo.mark_done(task.id, intruder).await.unwrap());
    assert_eq!(
        ctx.task_repo.requeue(task.id, intruder, "late").await.unwrap(),
        RequeueOutcome::NotClaimed
    );

    let stored = ctx.task_repo.find_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Processing);
    assert_eq!(stored.worker_id, Some(owner));
    assert_eq!(stored.attempts, 0);
    assert!(stored.error_message.is_none());

    assert!(ctx.task_repo.mark_error(task.id, owner, "boom").await.unwrap());
    let stored = ctx.task_repo.find_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Error);
    assert_eq!(stored.error_message.as_deref(), Some("boom"));
}

#[tokio::test]
async fn test_error_row_is_replaced_by_manual_retry() {
    let ctx = setup().await;
    let book_id = Uuid::new_v4();
    let failed = tags_task(book_id);
    ctx.task_repo.enqueue(&failed).await.unwrap();
    let worker = Uuid::new_v4();
    ctx.task_repo.mark_processing(failed.id, worker).await.unwrap();
    assert!(ctx
        .task_repo
        .mark_error(failed.id, worker, "generation exhausted")
        .await
        .unwrap());

    let retry = tags_task(book_id);
    ctx.task_repo.enqueue(&retry).await.unwrap();

    assert!(ctx.task_repo.find_by_id(failed.id).await.unwrap().is_none());
    let latest = ctx
        .task_repo
        .find_for_scope(retry.kind(), &retry.scope)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.id, retry.id);
    assert_eq!(latest.status, TaskStatus::Queued);
}

#[tokio::test]
async fn test_mark_error_unknown_task() {
    let ctx = setup().await;
    let result = ctx
        .task_repo
        .mark_error(Uuid::new_v4(), Uuid::new_v4(), "boom")
        .await
        .unwrap();
    assert!(!result);
}

#[tokio::test]
async fn test_requeue_until_budget_exhausted() {
    let ctx = setup().await;
    let task = tags_task(Uuid::new_v4()).with_max_attempts(2);
    ctx.task_repo.enqueue(&task).await.unwrap();

    let first = Uuid::new_v4();
    ctx.task_repo.mark_processing(task.id, first).await.unwrap();
    assert_eq!(
        ctx.task_repo
            .requeue(task.id, first, "write failed")
            .await
            .unwrap(),
        RequeueOutcome::Requeued
    );

    let second = Uuid::new_v4();
    ctx.task_repo.mark_processing(task.id, second).await.unwrap();
    assert_eq!(
        ctx.task_repo
            .requeue(task.id, second, "write failed")
            .await
            .unwrap(),
        RequeueOutcome::Exhausted
    );

    let stored = ctx.task_repo.find_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Error);
    assert_eq!(stored.attempts, 2);

    // 已不在 processing 的任务不能再次重排
    assert_eq!(
        ctx.task_repo.requeue(task.id, second, "late").await.unwrap(),
        RequeueOutcome::NotClaimed
    );
}

#[tokio::test]
async fn test_counts_clear_and_delete_for_book() {
    let ctx = setup().await;
    let book_id = Uuid::new_v4();
    let other_book = Uuid::new_v4();

    let (scope_a, payload_a) = questions_scope(book_id, Uuid::new_v4(), 3);
    let (scope_b, payload_b) = questions_scope(book_id, Uuid::new_v4(), 4);
    let failed = tags_task(other_book);

    ctx.task_repo
        .enqueue(&Task::new(scope_a, payload_a).unwrap())
        .await
        .unwrap();
    ctx.task_repo
        .enqueue(&Task::new(scope_b, payload_b).unwrap())
        .await
        .unwrap();
    ctx.task_repo.enqueue(&failed).await.unwrap();
    let worker = Uuid::new_v4();
    ctx.task_repo.mark_processing(failed.id, worker).await.unwrap();
    ctx.task_repo.mark_error(failed.id, worker, "boom").await.unwrap();

    let counts = ctx.task_repo.counts().await.unwrap();
    assert_eq!((counts.queued, counts.processing, counts.error), (2, 0, 1));

    let deleted = ctx.task_repo.delete_queued_for_book(book_id).await.unwrap();
    assert_eq!(deleted.len(), 2);
    assert_eq!(ctx.task_repo.clear_finished().await.unwrap(), 1);

    let counts = ctx.task_repo.counts().await.unwrap();
    assert_eq!((counts.queued, counts.processing, counts.error), (0, 0, 0));
}

#[tokio::test]
async fn test_delete_queued_questions_only_touches_listed_grades() {
    let ctx = setup().await;
    let book_id = Uuid::new_v4();
    let chapter_id = Uuid::new_v4();

    let (scope, payload) = questions_scope(book_id, chapter_id, 2);
    let removed = Task::new(scope, payload).unwrap();
    let (scope, payload) = questions_scope(book_id, Uuid::new_v4(), 2);
    let running = Task::new(scope, payload).unwrap();
    let (scope, payload) = questions_scope(book_id, chapter_id, 3);
    let kept = Task::new(scope, payload).unwrap();
    let (scope, payload) = questions_scope(Uuid::new_v4(), chapter_id, 2);
    let other_book = Task::new(scope, payload).unwrap();
    let tags = tags_task(book_id);

    for task in [&removed, &running, &kept, &other_book, &tags] {
        ctx.task_repo.enqueue(task).await.unwrap();
    }
    ctx.task_repo
        .mark_processing(running.id, Uuid::new_v4())
        .await
        .unwrap();

    let deleted = ctx
        .task_repo
        .delete_queued_questions(book_id, &[grade(2)])
        .await
        .unwrap();

    assert_eq!(deleted, vec![removed.id]);
    assert!(ctx.task_repo.find_by_id(removed.id).await.unwrap().is_none());
    for survivor in [&running, &kept, &other_book, &tags] {
        assert!(ctx.task_repo.find_by_id(survivor.id).await.unwrap().is_some());
    }

    assert!(ctx
        .task_repo
        .delete_queued_questions(book_id, &[])
        .await
        .unwrap()
        .is_empty());
}
