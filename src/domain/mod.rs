// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 领域层模块
///
/// 该模块包含系统的核心业务逻辑，包括：
/// - 领域模型（models）：任务、年级与生成产物
/// - 仓库接口（repositories）：任务存储与产物持久化的抽象接口
/// - 服务（services）：响应提取、模型调用、生成例程、年级差异与状态推导
///
/// 领域层不依赖于任何外部实现。
pub mod models;
pub mod repositories;
pub mod services;
