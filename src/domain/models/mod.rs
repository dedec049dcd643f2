// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 领域模型模块
///
/// 该模块定义了系统的核心业务实体，包括：
/// - 年级（grade）：目标年级及其标签形式
/// - 任务（task）：一次延迟执行的内容生成工作
/// - 生成产物（artifact）：任务成功后交给持久化层的结构化结果
pub mod artifact;
pub mod grade;
pub mod task;
