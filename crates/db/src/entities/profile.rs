//! Profile entity (actors shown on feeds and the leaderboard).

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "profile")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    pub display_name: String,

    #[sea_orm(nullable)]
    #[serde(default)]
    pub avatar_url: Option<String>,

    /// Listed on the leaderboard
    #[sea_orm(default_value = true)]
    #[serde(default = "super::default_true")]
    pub is_public: bool,

    /// Gamification points
    #[sea_orm(default_value = 0)]
    #[serde(default)]
    pub points: i64,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
