// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chapterwise::domain::services::response_extractor::{extract, ResponseError};
use serde_json::{json, Value};

fn questions_schema() -> Value {
    json!({
        "type": "object",
        "required": ["questions"],
        "properties": {
            "questions": {
                "type": "array",
                "minItems": 1,
                "items": {
                    "type": "object",
                    "required": ["text"],
                    "properties": { "text": { "type": "string" } }
                }
            }
        }
    })
}

const ANSWER: &str = r#"{"questions": [{"text": "Why did Heidi miss the mountains?"}, {"text": "How did Peter help the goats?"}]}"#;

#[test]
fn test_reasoning_and_plain_json_extract_identically() {
    let with_reasoning = format!(
        "<think>\nThe reader is in grade 4, so keep it simple. Maybe {{\"draft\": true}}.\n</think>\n{}",
        ANSWER
    );

    let plain = extract(ANSWER, &questions_schema()).unwrap();
    let reasoned = extract(&with_reasoning, &questions_schema()).unwrap();

    assert_eq!(plain, reasoned);
    assert_eq!(plain["questions"].as_array().unwrap().len(), 2);
}

#[test]
fn test_deepseek_markers_and_prose() {
    let raw = format!(
        "<｜begin▁of▁thinking｜>counting questions<｜end▁of▁thinking｜>Sure! Here you go:\n```json\n{}\n```\nHope this helps.",
        ANSWER
    );
    let value = extract(&raw, &questions_schema()).unwrap();
    assert_eq!(value, serde_json::from_str::<Value>(ANSWER).unwrap());
}

#[test]
fn test_unclosed_reasoning_searches_whole_text() {
    let raw = format!("<thinking>I ran out of tokens but {}", ANSWER);
    let value = extract(&raw, &questions_schema()).unwrap();
    assert_eq!(value["questions"][1]["text"], "How did Peter help the goats?");
}

#[test]
fn test_schema_mismatch_is_not_success() {
    let raw = r#"{"questions": [{"prompt": "Why?"}]}"#;
    let result = extract(raw, &questions_schema());
    assert!(matches!(result, Err(ResponseError::Schema(_))));
}

#[test]
fn test_no_object_is_extraction_error() {
    let result = extract("<think>hmm</think>I cannot answer that.", &questions_schema());
    assert!(matches!(result, Err(ResponseError::Extraction(_))));
}
