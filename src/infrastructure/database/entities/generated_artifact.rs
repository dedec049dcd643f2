// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use sea_orm::entity::prelude::*;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "generated_artifacts")]
pub struct Model {
    /// 与任务相同的作用域键，写入时按此覆盖
    #[sea_orm(primary_key, auto_increment = false)]
    pub scope_key: String,
    pub kind: String,
    pub book_id: Uuid,
    pub chapter_id: Option<Uuid>,
    pub grade_level: Option<String>,
    pub content: Json,
    pub updated_at: ChronoDateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
