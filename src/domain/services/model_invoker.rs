// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::domain::services::llm_service::{BackendError, LlmBackend, OutputFormat};
use crate::domain::services::response_extractor::{self, ResponseError, SchemaError};
use crate::utils::retry_policy::RetryPolicy;

/// 尝试阶梯：两次自由输出，最后一次强制 JSON
pub const STRATEGY_LADDER: [OutputFormat; 3] =
    [OutputFormat::FreeForm, OutputFormat::FreeForm, OutputFormat::Json];

/// 单次尝试的失败原因
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttemptError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Response(#[from] ResponseError),
}

/// 调用错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvokeError {
    /// 阶梯上的全部尝试均失败
    #[error("Generation exhausted after {attempts} attempts: {last_error}")]
    GenerationExhausted {
        attempts: u32,
        last_error: AttemptError,
    },
}

/// 一次模型调用（不持久化）
#[derive(Debug, Clone)]
pub struct GenerationAttempt {
    /// 第几次尝试，从 1 开始
    pub number: u32,
    pub strategy: OutputFormat,
    pub raw: Option<String>,
    pub outcome: Result<Value, AttemptError>,
}

/// 模型调用器
///
/// 对同一个提示词按 [`STRATEGY_LADDER`] 依次尝试，每次的输出都经过
/// 提取和校验。第 2、3 次尝试前按重试策略退避。
#[derive(Clone)]
pub struct ModelInvoker {
    backend: Arc<dyn LlmBackend>,
    retry_policy: RetryPolicy,
}

impl ModelInvoker {
    pub fn new(backend: Arc<dyn LlmBackend>) -> Self {
        Self {
            backend,
            retry_policy: RetryPolicy::standard(),
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// 调用模型并返回校验通过的 JSON
    pub async fn invoke(&self, prompt: &str, schema: &Value) -> Result<Value, InvokeError> {
        self.invoke_with(prompt, schema, Ok).await
    }

    /// 调用模型，并用 `decode` 把校验后的 JSON 转成领域类型
    ///
    /// `decode` 返回的 [`SchemaError`] 与结构校验失败同等对待，继续下一次尝试。
    pub async fn invoke_with<T, F>(
        &self,
        prompt: &str,
        schema: &Value,
        decode: F,
    ) -> Result<T, InvokeError>
    where
        F: Fn(Value) -> Result<T, SchemaError>,
    {
        let total = STRATEGY_LADDER.len() as u32;
        let mut attempts = 0;
        let mut last_error = None;

        for (idx, strategy) in STRATEGY_LADDER.iter().copied().enumerate() {
            let number = idx as u32 + 1;
            attempts = number;
            if number > 1 {
                let backoff = self.retry_policy.calculate_backoff(number - 1);
                if !backoff.is_zero() {
                    tokio::time::sleep(backoff).await;
                }
            }

            info!(
                model = self.backend.model(),
                "Generation attempt {}/{} using {} strategy", number, total, strategy
            );
            metrics::counter!("llm_attempts_total", "strategy" => strategy.to_string())
                .increment(1);

            let attempt = self.attempt(number, strategy, prompt, schema).await;
            let outcome = attempt
                .outcome
                .and_then(|value| decode(value).map_err(|e| ResponseError::from(e).into()));

            match outcome {
                Ok(result) => {
                    info!("Generation succeeded on attempt {} ({})", number, strategy);
                    return Ok(result);
                }
                Err(e) => {
                    warn!(
                        raw_len = attempt.raw.as_ref().map(|r| r.len()).unwrap_or(0),
                        "Attempt {} ({}) failed: {}", number, strategy, e
                    );
                    last_error = Some(e);
                }
            }

            if !self.retry_policy.should_retry(number) {
                break;
            }
        }

        Err(InvokeError::GenerationExhausted {
            attempts,
            last_error: last_error.unwrap_or(AttemptError::Response(ResponseError::Extraction(
                response_extractor::ExtractionError::NoCandidate,
            ))),
        })
    }

    async fn attempt(
        &self,
        number: u32,
        strategy: OutputFormat,
        prompt: &str,
        schema: &Value,
    ) -> GenerationAttempt {
        match self.backend.generate(prompt, strategy).await {
            Ok(raw) => {
                let outcome = response_extractor::extract(&raw, schema).map_err(AttemptError::from);
                GenerationAttempt {
                    number,
                    strategy,
                    raw: Some(raw),
                    outcome,
                }
            }
            Err(e) => GenerationAttempt {
                number,
                strategy,
                raw: None,
                outcome: Err(e.into()),
            },
        }
    }
}
