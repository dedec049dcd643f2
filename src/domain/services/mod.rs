// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 领域服务模块
///
/// 包含的服务：
/// - 响应提取（response_extractor）：剥离推理段落，扫描并校验 JSON
/// - 模型后端（llm_service）：后端抽象与 Ollama 客户端
/// - 模型调用（model_invoker）：三段式尝试阶梯
/// - 生成例程（generation）：各任务类型的提示词与结果规整，以及分发表
/// - 年级差异（grade_diff）：分类变化时计算最小任务集
/// - 状态计算（status_calculator）：由任务与产物推导展示状态
pub mod generation;
pub mod grade_diff;
pub mod llm_service;
pub mod model_invoker;
pub mod response_extractor;
pub mod status_calculator;
