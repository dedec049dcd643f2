// Copyright 2025 Kirky.X
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// 应用程序配置设置
///
/// 包含数据库、服务器、模型后端、队列、生成参数和指标等所有配置项
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// 数据库配置
    pub database: DatabaseSettings,
    /// 服务器配置
    pub server: ServerSettings,
    /// 模型后端配置
    pub llm: LlmSettings,
    /// 队列与工作器配置
    pub queue: QueueSettings,
    /// 生成参数配置
    pub generation: GenerationSettings,
    /// 指标导出配置
    pub metrics: MetricsSettings,
}

/// 数据库配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    /// 数据库连接URL
    pub url: String,
    /// 最大连接数
    pub max_connections: Option<u32>,
    /// 最小连接数
    pub min_connections: Option<u32>,
    /// 连接超时时间（秒）
    pub connect_timeout: Option<u64>,
    /// 空闲连接超时时间（秒）
    pub idle_timeout: Option<u64>,
    /// 是否记录每条 SQL 语句
    #[serde(default)]
    pub log_statements: bool,
}

/// 服务器配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    /// 服务器监听主机地址
    pub host: String,
    /// 服务器监听端口
    pub port: u16,
}

/// 模型后端配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSettings {
    /// Ollama 服务地址
    pub base_url: String,
    /// 模型名称
    pub model: String,
    /// 单次请求超时（秒）
    pub timeout_secs: u64,
    pub temperature: f64,
    pub top_p: f64,
    /// 生成的最大 token 数
    pub num_predict: u32,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "llama3.2".to_string(),
            timeout_secs: 120,
            temperature: 0.7,
            top_p: 0.9,
            num_predict: 4000,
        }
    }
}

/// 队列配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct QueueSettings {
    /// 并发工作器数量，受限于模型后端时设为 1
    pub worker_count: usize,
    /// processing 状态的超时阈值（分钟）
    pub task_timeout_minutes: i64,
    /// 超时清扫间隔（秒）
    pub sweep_interval_secs: u64,
    /// 每个任务的尝试预算
    pub max_attempts: i32,
    /// 认领冲突后的等待间隔（毫秒）
    pub idle_poll_millis: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            worker_count: 1,
            task_timeout_minutes: 15,
            sweep_interval_secs: 60,
            max_attempts: 3,
            idle_poll_millis: 1000,
        }
    }
}

/// 生成参数配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct GenerationSettings {
    /// 每章每个年级的题目数
    pub questions_per_chapter: u32,
    /// 每章每个年级的词汇数
    pub vocabulary_per_grade: u32,
    pub default_age_range: String,
    pub default_reading_level: String,
    /// 章节正文送入模型前截断到的词数
    pub max_context_words: usize,
    pub min_answer_words: u32,
    pub max_answer_words: u32,
    /// 生成耗尽后是否以通用产物代替
    pub use_fallbacks: bool,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            questions_per_chapter: 3,
            vocabulary_per_grade: 8,
            default_age_range: "8-12".to_string(),
            default_reading_level: "intermediate".to_string(),
            max_context_words: 2000,
            min_answer_words: 20,
            max_answer_words: 200,
            use_fallbacks: false,
        }
    }
}

/// 指标配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsSettings {
    /// 是否启用 Prometheus 导出
    pub enabled: bool,
    /// 导出端点监听地址
    pub listen_addr: String,
}

impl Settings {
    /// 创建新的配置实例
    ///
    /// 依次叠加内置默认值、`config/default`、`config/{APP_ENVIRONMENT}`
    /// 和 `CHAPTERWISE__` 前缀的环境变量
    ///
    /// # Returns
    ///
    /// * `Ok(Settings)` - 成功加载的配置
    /// * `Err(ConfigError)` - 配置加载失败
    pub fn new() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENVIRONMENT").unwrap_or_else(|_| "default".to_string());
        Self::defaults()?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(Environment::with_prefix("CHAPTERWISE").separator("__"))
            .build()?
            .try_deserialize()
    }

    fn defaults() -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        let llm = LlmSettings::default();
        let queue = QueueSettings::default();
        let generation = GenerationSettings::default();

        Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 3000)?
            // Default DB pool settings
            .set_default("database.url", "sqlite://chapterwise.db?mode=rwc")?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 1)?
            .set_default("database.connect_timeout", 10)?
            .set_default("database.idle_timeout", 300)?
            // Default model backend settings
            .set_default("llm.base_url", llm.base_url)?
            .set_default("llm.model", llm.model)?
            .set_default("llm.timeout_secs", llm.timeout_secs)?
            .set_default("llm.temperature", llm.temperature)?
            .set_default("llm.top_p", llm.top_p)?
            .set_default("llm.num_predict", llm.num_predict)?
            // Default queue settings
            .set_default("queue.worker_count", queue.worker_count as u64)?
            .set_default("queue.task_timeout_minutes", queue.task_timeout_minutes)?
            .set_default("queue.sweep_interval_secs", queue.sweep_interval_secs)?
            .set_default("queue.max_attempts", queue.max_attempts)?
            .set_default("queue.idle_poll_millis", queue.idle_poll_millis)?
            // Default generation settings
            .set_default("generation.questions_per_chapter", generation.questions_per_chapter)?
            .set_default("generation.vocabulary_per_grade", generation.vocabulary_per_grade)?
            .set_default("generation.default_age_range", generation.default_age_range)?
            .set_default(
                "generation.default_reading_level",
                generation.default_reading_level,
            )?
            .set_default("generation.max_context_words", generation.max_context_words as u64)?
            .set_default("generation.min_answer_words", generation.min_answer_words)?
            .set_default("generation.max_answer_words", generation.max_answer_words)?
            .set_default("generation.use_fallbacks", generation.use_fallbacks)?
            // Default metrics settings
            .set_default("metrics.enabled", true)?
            .set_default("metrics.listen_addr", "0.0.0.0:9000")
    }
}
