// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 仓库接口模块
///
/// 该模块定义了领域层的仓库接口，遵循依赖倒置原则。
/// 具体实现由基础设施层提供。
///
/// 包含的仓库接口：
/// - 任务仓库（task_repository）：生成任务的持久化与原子状态转换
/// - 产物仓库（artifact_repository）：生成结果的按作用域写入与删除
pub mod artifact_repository;
pub mod task_repository;
