// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 配置模块
///
/// 处理应用程序的配置设置和环境变量
pub mod config;

/// 领域模块
///
/// 包含核心业务实体、服务和仓库接口
pub mod domain;

/// 基础设施模块
///
/// 提供数据库、仓库实现与指标导出
pub mod infrastructure;

/// 表示层模块
///
/// 管理接口的路由与处理器
pub mod presentation;

/// 队列模块
///
/// 实现任务队列和优先级调度
pub mod queue;

/// 工具模块
///
/// 提供通用的工具函数和辅助功能
pub mod utils;

/// 工作器模块
///
/// 实现生成任务处理和工作器池管理
pub mod workers;
