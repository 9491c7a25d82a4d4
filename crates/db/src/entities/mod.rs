//! Database entities for the EcoLearn schema.

#![allow(missing_docs)]

pub mod challenge;
pub mod challenge_completion;
pub mod climate_action;
pub mod comment;
pub mod forum_post;
pub mod goal;
pub mod profile;
pub mod reaction;
pub mod team;
pub mod team_member;

pub use challenge::Entity as Challenge;
pub use challenge_completion::Entity as ChallengeCompletion;
pub use climate_action::Entity as ClimateAction;
pub use comment::Entity as Comment;
pub use forum_post::Entity as ForumPost;
pub use goal::Entity as Goal;
pub use profile::Entity as Profile;
pub use reaction::Entity as Reaction;
pub use team::Entity as Team;
pub use team_member::Entity as TeamMember;

const fn default_true() -> bool {
    true
}
