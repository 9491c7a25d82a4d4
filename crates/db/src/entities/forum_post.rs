//! Forum post entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "forum_post")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// Forum the post belongs to
    #[sea_orm(nullable)]
    #[serde(default)]
    pub parent_id: Option<String>,

    pub author_id: String,

    #[sea_orm(nullable)]
    #[serde(default)]
    pub title: Option<String>,

    #[sea_orm(column_type = "Text")]
    pub body: String,

    #[sea_orm(default_value = true)]
    #[serde(default = "super::default_true")]
    pub is_public: bool,

    #[sea_orm(default_value = 0)]
    #[serde(default)]
    pub view_count: i64,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
