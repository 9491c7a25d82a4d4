//! Climate action entity (social feed and map entries).

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "climate_action")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// Always null, kept so every post table shares one row shape
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

    /// Transport, energy, food, ...
    #[sea_orm(nullable)]
    #[serde(default)]
    pub category: Option<String>,

    #[sea_orm(nullable)]
    #[serde(default)]
    pub latitude: Option<f64>,

    #[sea_orm(nullable)]
    #[serde(default)]
    pub longitude: Option<f64>,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
