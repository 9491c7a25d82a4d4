//! Goal entity (personal targets with numeric progress).

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "goal")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    pub actor_id: String,

    pub title: String,

    pub target: f64,

    #[sea_orm(default_value = 0.0)]
    #[serde(default)]
    pub progress: f64,

    #[sea_orm(default_value = false)]
    #[serde(default)]
    pub completed: bool,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
