//! Comment entity.
//!
//! `parent_id` points at a forum post or a climate action, so there is no
//! SQL foreign key. The store checks the parent and cascades deletes itself.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "comment")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    pub parent_id: String,

    pub author_id: String,

    #[sea_orm(column_type = "Text")]
    pub body: String,

    #[sea_orm(default_value = true)]
    #[serde(default = "super::default_true")]
    pub is_public: bool,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
