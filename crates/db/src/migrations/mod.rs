//! Database migrations.
//!
//! Schema migrations for the EcoLearn tables.

#![allow(missing_docs)]

use sea_orm_migration::prelude::*;

mod m20250101_000001_create_profile_table;
mod m20250101_000002_create_forum_post_table;
mod m20250101_000003_create_climate_action_table;
mod m20250101_000004_create_comment_table;
mod m20250101_000005_create_reaction_table;
mod m20250101_000006_create_challenge_table;
mod m20250101_000007_create_goal_table;
mod m20250101_000008_create_team_table;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250101_000001_create_profile_table::Migration),
            Box::new(m20250101_000002_create_forum_post_table::Migration),
            Box::new(m20250101_000003_create_climate_action_table::Migration),
            Box::new(m20250101_000004_create_comment_table::Migration),
            Box::new(m20250101_000005_create_reaction_table::Migration),
            Box::new(m20250101_000006_create_challenge_table::Migration),
            Box::new(m20250101_000007_create_goal_table::Migration),
            Box::new(m20250101_000008_create_team_table::Migration),
        ]
    }
}
