// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 模型输出解析
//!
//! 分两步：先剥离推理段落，再在剩余文本中扫描括号平衡的 JSON 对象。
//! 两步都是纯函数，可以单独测试。解析出的对象最后按调用方给出的
//! JSON Schema 子集做结构校验。

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

/// 推理段落的结束标记
static REASONING_CLOSE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)</\s*(?:think|thinking|thought)\s*>|<｜end▁of▁thinking｜>")
        .expect("reasoning close pattern is valid")
});

/// 推理段落的起始标记，仅用于清理没有闭合的残留标签
static REASONING_OPEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)<\s*(?:think|thinking|thought)(?:\s[^>]*)?>|<｜begin▁of▁thinking｜>")
        .expect("reasoning open pattern is valid")
});

/// `<answer>` 包裹标签，去掉标签保留内容
static ANSWER_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)</?\s*answer(?:\s[^>]*)?>").expect("answer tag pattern is valid")
});

/// 提取错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    /// 文本中没有括号平衡的对象
    #[error("no balanced JSON object found in model output")]
    NoCandidate,
    /// 找到候选对象但均无法解析
    #[error("JSON candidate could not be parsed: {0}")]
    InvalidJson(String),
}

/// 结构校验错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("schema mismatch at {path}: {message}")]
pub struct SchemaError {
    pub path: String,
    pub message: String,
}

impl SchemaError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// 单次响应解析失败的原因
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResponseError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// 剥离推理段落
///
/// 只有最后一个结束标记之后的文本被视为答案；找不到结束标记时保留全文，
/// 只清掉孤立的起始标记。`<answer>` 标签本身也会被去掉。
pub fn strip_reasoning(raw: &str) -> String {
    let answer = match REASONING_CLOSE.find_iter(raw).last() {
        Some(close) => &raw[close.end()..],
        None => raw,
    };

    let without_open = REASONING_OPEN.replace_all(answer, "");
    ANSWER_TAG.replace_all(&without_open, "").trim().to_string()
}

/// 括号平衡的对象候选迭代器
///
/// 依次产出文本中每一个顶层 `{...}` 片段。字符串字面量里的括号不计数；
/// 某个 `{` 到文本末尾都没有闭合时，从下一个 `{` 重新开始扫描。
pub struct JsonCandidates<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Iterator for JsonCandidates<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let start = self.pos + self.text.get(self.pos..)?.find('{')?;
            match balanced_end(&self.text[start..]) {
                Some(len) => {
                    self.pos = start + len;
                    return Some(&self.text[start..start + len]);
                }
                None => self.pos = start + 1,
            }
        }
    }
}

/// 返回从开头 `{` 起平衡片段的字节长度
fn balanced_end(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(idx + ch.len_utf8());
                }
            }
            _ => {}
        }
    }

    None
}

/// 遍历文本中的所有对象候选
pub fn json_candidates(text: &str) -> JsonCandidates<'_> {
    JsonCandidates { text, pos: 0 }
}

/// 第一个括号平衡的对象候选
pub fn find_json_candidate(text: &str) -> Option<&str> {
    json_candidates(text).next()
}

/// 解析第一个能被解析为 JSON 的候选
pub fn parse_candidate(text: &str) -> Result<Value, ExtractionError> {
    let mut last_error = None;

    for candidate in json_candidates(text) {
        match serde_json::from_str::<Value>(candidate) {
            Ok(value) => return Ok(value),
            Err(e) => last_error = Some(e.to_string()),
        }
    }

    Err(match last_error {
        Some(message) => ExtractionError::InvalidJson(message),
        None => ExtractionError::NoCandidate,
    })
}

/// 按 JSON Schema 子集校验
///
/// 支持 `type`、`properties`、`required`、`items`、`minItems`。
/// 其他关键字被忽略。
pub fn validate(value: &Value, schema: &Value) -> Result<(), SchemaError> {
    validate_at("$", value, schema)
}

fn validate_at(path: &str, value: &Value, schema: &Value) -> Result<(), SchemaError> {
    if let Some(expected) = schema.get("type").and_then(Value::as_str) {
        if !type_matches(expected, value) {
            return Err(SchemaError::new(
                path,
                format!("expected {}, found {}", expected, type_name(value)),
            ));
        }
    }

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            if value.get(key).is_none() {
                return Err(SchemaError::new(
                    path,
                    format!("missing required key '{}'", key),
                ));
            }
        }
    }

    if let (Some(properties), Some(object)) = (
        schema.get("properties").and_then(Value::as_object),
        value.as_object(),
    ) {
        for (key, sub_schema) in properties {
            if let Some(sub_value) = object.get(key) {
                validate_at(&format!("{}.{}", path, key), sub_value, sub_schema)?;
            }
        }
    }

    if let Some(items) = value.as_array() {
        if let Some(min) = schema.get("minItems").and_then(Value::as_u64) {
            if (items.len() as u64) < min {
                return Err(SchemaError::new(
                    path,
                    format!("expected at least {} items, found {}", min, items.len()),
                ));
            }
        }
        if let Some(item_schema) = schema.get("items") {
            for (idx, item) in items.iter().enumerate() {
                validate_at(&format!("{}[{}]", path, idx), item, item_schema)?;
            }
        }
    }

    Ok(())
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// 从原始模型输出中提取并校验结构化数据
pub fn extract(raw: &str, schema: &Value) -> Result<Value, ResponseError> {
    let answer = strip_reasoning(raw);
    let value = parse_candidate(&answer)?;
    validate(&value, schema)?;
    Ok(value)
}
