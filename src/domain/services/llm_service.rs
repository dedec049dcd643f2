// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::settings::LlmSettings;

/// 输出格式策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// 不约束输出，保留模型先推理再作答的能力
    FreeForm,
    /// 要求严格的 JSON 输出，抑制推理段落
    Json,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            OutputFormat::FreeForm => write!(f, "free-form"),
            OutputFormat::Json => write!(f, "json-format"),
        }
    }
}

/// 模型后端错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// 连接失败等传输错误
    #[error("Transport error: {0}")]
    Transport(String),
    /// 后端返回非 2xx 状态码
    #[error("Backend returned {status}: {body}")]
    Status { status: u16, body: String },
    /// 请求超时
    #[error("Backend request timed out")]
    Timeout,
    /// 响应体无法解析
    #[error("Failed to decode backend response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BackendError::Timeout
        } else if err.is_decode() {
            BackendError::Decode(err.to_string())
        } else {
            BackendError::Transport(err.to_string())
        }
    }
}

/// 文本生成后端特质
///
/// 一次调用只生成一次，重试由调用方负责。
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// 生成原始文本
    async fn generate(&self, prompt: &str, format: OutputFormat) -> Result<String, BackendError>;

    /// 模型名称，仅用于日志
    fn model(&self) -> &str;
}

/// Ollama 生成接口的响应体
#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Ollama 客户端
///
/// 调用 `POST {base_url}/api/generate`，非流式。
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    options: Value,
}

impl OllamaClient {
    pub fn new(settings: &LlmSettings) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            options: json!({
                "temperature": settings.temperature,
                "top_p": settings.top_p,
                "num_predict": settings.num_predict,
            }),
        })
    }
}

#[async_trait]
impl LlmBackend for OllamaClient {
    async fn generate(&self, prompt: &str, format: OutputFormat) -> Result<String, BackendError> {
        let mut request_body = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": self.options,
        });
        if format == OutputFormat::Json {
            request_body["format"] = json!("json");
        }

        let url = format!("{}/api/generate", self.base_url);
        let response = self.client.post(url).json(&request_body).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status { status, body });
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))?;

        debug!(
            model = %self.model,
            strategy = %format,
            response_len = body.response.len(),
            "Received model response"
        );

        Ok(body.response)
    }

    fn model(&self) -> &str {
        &self.model
    }
}
