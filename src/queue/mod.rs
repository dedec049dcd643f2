// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 队列模块
///
/// 提供任务队列和调度功能
/// 负责任务的排队、优先级调度与认领
pub mod scheduler;
pub mod task_queue;
