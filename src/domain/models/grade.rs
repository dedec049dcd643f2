// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// 年级标签前缀
pub const GRADE_TAG_PREFIX: &str = "grade-";

/// 最高年级
pub const MAX_GRADE: u8 = 12;

/// 年级解析错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid grade level: {0}")]
pub struct GradeParseError(pub String);

/// 目标年级
///
/// 取值范围为幼儿园（K，内部表示为 0）到 12 年级。
/// 字符串形式与书籍标签保持一致，例如 `grade-K`、`grade-4`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Grade(u8);

impl Grade {
    /// 幼儿园
    pub const KINDERGARTEN: Grade = Grade(0);

    /// 创建年级，超出范围时返回错误
    pub fn new(level: u8) -> Result<Self, GradeParseError> {
        if level > MAX_GRADE {
            return Err(GradeParseError(level.to_string()));
        }
        Ok(Self(level))
    }

    /// 数值形式（K 为 0）
    pub fn level(&self) -> u8 {
        self.0
    }

    /// 从书籍标签集合中挑出年级标签，非年级标签被忽略
    pub fn from_tags<'a, I>(tags: I) -> BTreeSet<Grade>
    where
        I: IntoIterator<Item = &'a str>,
    {
        tags.into_iter()
            .filter(|tag| tag.starts_with(GRADE_TAG_PREFIX))
            .filter_map(|tag| tag.parse().ok())
            .collect()
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.0 == 0 {
            write!(f, "{}K", GRADE_TAG_PREFIX)
        } else {
            write!(f, "{}{}", GRADE_TAG_PREFIX, self.0)
        }
    }
}

impl FromStr for Grade {
    type Err = GradeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let level = trimmed.strip_prefix(GRADE_TAG_PREFIX).unwrap_or(trimmed);

        if level.eq_ignore_ascii_case("k") {
            return Ok(Grade::KINDERGARTEN);
        }

        level
            .parse::<u8>()
            .ok()
            .and_then(|n| Grade::new(n).ok())
            .ok_or_else(|| GradeParseError(s.to_string()))
    }
}

impl TryFrom<String> for Grade {
    type Error = GradeParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Grade> for String {
    fn from(grade: Grade) -> Self {
        grade.to_string()
    }
}
