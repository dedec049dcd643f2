// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::task::Task;
use chrono::{DateTime, FixedOffset};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use tokio::sync::Notify;
use uuid::Uuid;

/// 就绪集合中的条目
///
/// 排序键为 (priority, created_at, seq)，BinaryHeap 是大顶堆，
/// 因此比较时反转，使最小的键最先弹出。
#[derive(Debug)]
struct ReadyEntry {
    priority: i32,
    created_at: DateTime<FixedOffset>,
    seq: u64,
    task: Task,
}

impl ReadyEntry {
    fn key(&self) -> (i32, DateTime<FixedOffset>, u64) {
        (self.priority, self.created_at, self.seq)
    }
}

impl PartialEq for ReadyEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for ReadyEntry {}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other.key().cmp(&self.key())
    }
}

#[derive(Default)]
struct SchedulerState {
    ready: BinaryHeap<ReadyEntry>,
    ids: HashSet<Uuid>,
    next_seq: u64,
    closed: bool,
}

/// 优先级调度器
///
/// 内存中的就绪集合，按优先级升序、同优先级内按创建时间升序出队。
/// 重新入场的任务保留原来的 `created_at`，不会排到同优先级新任务之后。
/// 同一任务在集合中最多出现一次；真正防止重复派发的是仓库的条件认领。
#[derive(Default)]
pub struct PriorityScheduler {
    state: Mutex<SchedulerState>,
    notify: Notify,
}

impl PriorityScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// 接纳一个排队中的任务，已在集合中或调度器已关闭时返回 false
    pub fn admit(&self, task: Task) -> bool {
        {
            let mut state = self.state.lock();
            if state.closed || !state.ids.insert(task.id) {
                return false;
            }
            let seq = state.next_seq;
            state.next_seq += 1;
            state.ready.push(ReadyEntry {
                priority: task.priority,
                created_at: task.created_at,
                seq,
                task,
            });
            metrics::gauge!("scheduler_ready_tasks").set(state.ready.len() as f64);
        }
        self.notify.notify_one();
        true
    }

    /// 非阻塞地取出下一个任务
    pub fn try_next(&self) -> Option<Task> {
        let mut state = self.state.lock();
        if state.closed {
            return None;
        }
        let entry = state.ready.pop()?;
        state.ids.remove(&entry.task.id);
        metrics::gauge!("scheduler_ready_tasks").set(state.ready.len() as f64);
        Some(entry.task)
    }

    /// 阻塞等待下一个任务，调度器关闭后返回 None
    pub async fn next(&self) -> Option<Task> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // 先登记等待者再检查状态，避免错过检查与等待之间的通知
            notified.as_mut().enable();

            if self.is_closed() {
                return None;
            }
            if let Some(task) = self.try_next() {
                return Some(task);
            }

            notified.await;
        }
    }

    /// 关闭调度器，唤醒所有等待者，之后不再派发任务
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// 移除某本书的全部就绪任务，返回移除的数量
    pub fn remove_book(&self, book_id: Uuid) -> usize {
        let mut state = self.state.lock();
        let before = state.ready.len();
        let SchedulerState { ready, ids, .. } = &mut *state;
        ready.retain(|entry| {
            let keep = entry.task.scope.book_id != book_id;
            if !keep {
                ids.remove(&entry.task.id);
            }
            keep
        });
        metrics::gauge!("scheduler_ready_tasks").set(state.ready.len() as f64);
        before - state.ready.len()
    }

    /// 按ID移除就绪任务，返回移除的数量
    pub fn remove_ids(&self, task_ids: &[Uuid]) -> usize {
        if task_ids.is_empty() {
            return 0;
        }
        let mut state = self.state.lock();
        let before = state.ready.len();
        let SchedulerState { ready, ids, .. } = &mut *state;
        ready.retain(|entry| {
            let keep = !task_ids.contains(&entry.task.id);
            if !keep {
                ids.remove(&entry.task.id);
            }
            keep
        });
        metrics::gauge!("scheduler_ready_tasks").set(state.ready.len() as f64);
        before - state.ready.len()
    }

    /// 就绪任务数量
    pub fn len(&self) -> usize {
        self.state.lock().ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
