//! Typed records decoded and validated at the fetch boundary.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

use crate::row::{Row, Table};
use crate::store::StoreError;

/// A record with a stable identifier that round-trips through [`Row`].
pub trait Record: Sized + Serialize + DeserializeOwned + Validate {
    /// Primary key.
    fn id(&self) -> &str;

    /// Decode and validate a row read from `table`.
    fn from_row(table: Table, row: Row) -> Result<Self, StoreError> {
        let record: Self =
            serde_json::from_value(Value::Object(row)).map_err(|e| StoreError::Decode {
                table,
                message: e.to_string(),
            })?;
        record.validate().map_err(|e| StoreError::Decode {
            table,
            message: e.to_string(),
        })?;
        Ok(record)
    }

    /// Encode as a row for writing.
    fn to_row(&self, table: Table) -> Result<Row, StoreError> {
        match serde_json::to_value(self) {
            Ok(Value::Object(row)) => Ok(row),
            Ok(_) => Err(StoreError::Decode {
                table,
                message: "record did not encode as an object".to_string(),
            }),
            Err(e) => Err(StoreError::Decode {
                table,
                message: e.to_string(),
            }),
        }
    }
}

/// Decode every row, dropping (and logging) the ones that fail validation.
pub fn decode_rows<T: Record>(table: Table, rows: Vec<Row>) -> Vec<T> {
    rows.into_iter()
        .filter_map(|row| match T::from_row(table, row) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(%table, error = %e, "Dropping malformed row");
                None
            }
        })
        .collect()
}

const fn default_true() -> bool {
    true
}

/// Actor profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct Profile {
    #[validate(length(min = 1))]
    pub id: String,

    #[validate(length(min = 1, max = 80))]
    pub display_name: String,

    #[serde(default)]
    #[validate(url)]
    pub avatar_url: Option<String>,

    /// Listed on the leaderboard and visible to other actors.
    #[serde(default = "default_true")]
    pub is_public: bool,

    /// Gamification points.
    #[serde(default)]
    pub points: i64,

    pub created_at: DateTime<Utc>,
}

/// Forum post, climate action, or comment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Post {
    #[validate(length(min = 1))]
    pub id: String,

    /// Forum id for forum posts, post id for comments, none for climate actions.
    #[serde(default)]
    pub parent_id: Option<String>,

    #[validate(length(min = 1))]
    pub author_id: String,

    #[serde(default)]
    #[validate(length(max = 200))]
    pub title: Option<String>,

    #[validate(length(max = 10000))]
    pub body: String,

    #[serde(default = "default_true")]
    pub is_public: bool,

    #[serde(default)]
    pub view_count: u64,

    /// Climate action category (transport, energy, food, ...).
    #[serde(default)]
    #[validate(length(max = 40))]
    pub category: Option<String>,

    #[serde(default)]
    #[validate(range(min = -90.0, max = 90.0))]
    pub latitude: Option<f64>,

    #[serde(default)]
    #[validate(range(min = -180.0, max = 180.0))]
    pub longitude: Option<f64>,

    pub created_at: DateTime<Utc>,
}

/// Reaction type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionKind {
    Like,
    Love,
    Celebrate,
    Insightful,
}

impl ReactionKind {
    /// Every reaction type.
    pub const ALL: [Self; 4] = [Self::Like, Self::Love, Self::Celebrate, Self::Insightful];

    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Love => "love",
            Self::Celebrate => "celebrate",
            Self::Insightful => "insightful",
        }
    }
}

/// An actor's reaction to a post or comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct Reaction {
    #[validate(length(min = 1))]
    pub id: String,
    #[validate(length(min = 1))]
    pub actor_id: String,
    #[validate(length(min = 1))]
    pub parent_id: String,
    pub kind: ReactionKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct Challenge {
    #[validate(length(min = 1))]
    pub id: String,

    #[validate(length(min = 1, max = 120))]
    pub title: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Points awarded on completion.
    #[validate(range(min = 0))]
    pub points: i64,

    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct ChallengeCompletion {
    #[validate(length(min = 1))]
    pub id: String,
    #[validate(length(min = 1))]
    pub actor_id: String,
    #[validate(length(min = 1))]
    pub challenge_id: String,
    pub completed_at: DateTime<Utc>,
}

/// Personal goal with numeric progress toward a target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Goal {
    #[validate(length(min = 1))]
    pub id: String,

    #[validate(length(min = 1))]
    pub actor_id: String,

    #[validate(length(min = 1, max = 120))]
    pub title: String,

    #[validate(range(min = 0.0))]
    pub target: f64,

    #[serde(default)]
    #[validate(range(min = 0.0))]
    pub progress: f64,

    #[serde(default)]
    pub completed: bool,

    pub created_at: DateTime<Utc>,
}

impl Goal {
    /// Clamp `progress` into `[0, target]` and derive the completed flag.
    pub fn set_progress(&mut self, progress: f64) {
        self.progress = progress.max(0.0).min(self.target);
        self.completed = self.progress >= self.target;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct Team {
    #[validate(length(min = 1))]
    pub id: String,

    #[validate(length(min = 1, max = 80))]
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    pub created_at: DateTime<Utc>,
}

/// Role of a team member.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TeamRole {
    /// Regular member.
    #[default]
    Member,
    /// Team lead.
    Captain,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct TeamMember {
    #[validate(length(min = 1))]
    pub id: String,
    #[validate(length(min = 1))]
    pub team_id: String,
    #[validate(length(min = 1))]
    pub actor_id: String,
    #[serde(default)]
    pub role: TeamRole,
    pub joined_at: DateTime<Utc>,
}

/// Server-computed aggregates for the impact widget and admin dashboard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct ImpactStats {
    #[serde(default)]
    pub profiles: u64,
    #[serde(default)]
    pub climate_actions: u64,
    #[serde(default)]
    pub public_climate_actions: u64,
    #[serde(default)]
    pub forum_posts: u64,
    #[serde(default)]
    pub comments: u64,
    #[serde(default)]
    pub reactions: u64,
    #[serde(default)]
    pub challenge_completions: u64,
    #[serde(default)]
    pub teams: u64,
}

macro_rules! impl_record {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl Record for $ty {
                fn id(&self) -> &str {
                    &self.id
                }
            }
        )+
    };
}

impl_record!(
    Profile,
    Post,
    Reaction,
    Challenge,
    ChallengeCompletion,
    Goal,
    Team,
    TeamMember,
);

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            _ => Row::new(),
        }
    }

    #[test]
    fn test_post_defaults() {
        let post = Post::from_row(
            Table::ClimateAction,
            row(json!({
                "id": "p1",
                "author_id": "a1",
                "body": "Biked to work",
                "created_at": "2024-05-01T10:00:00Z",
            })),
        )
        .unwrap();

        assert!(post.is_public);
        assert_eq!(post.view_count, 0);
        assert!(post.parent_id.is_none());
    }

    #[test]
    fn test_post_rejects_bad_coordinates() {
        let err = Post::from_row(
            Table::ClimateAction,
            row(json!({
                "id": "p1",
                "author_id": "a1",
                "body": "Planted trees",
                "latitude": 123.0,
                "created_at": "2024-05-01T10:00:00Z",
            })),
        )
        .unwrap_err();

        assert!(matches!(err, StoreError::Decode { table: Table::ClimateAction, .. }));
    }

    #[test]
    fn test_reaction_kind_wire_names() {
        let reaction = Reaction::from_row(
            Table::Reaction,
            row(json!({"id": "r1", "actor_id": "a", "parent_id": "p", "kind": "love"})),
        )
        .unwrap();
        assert_eq!(reaction.kind, ReactionKind::Love);
        assert_eq!(
            reaction.to_row(Table::Reaction).unwrap().get("kind"),
            Some(&json!("love"))
        );
    }

    #[test]
    fn test_decode_rows_drops_invalid() {
        let rows = vec![
            row(json!({"id": "t1", "name": "Green Team", "created_at": "2024-05-01T10:00:00Z"})),
            row(json!({"id": "t2", "name": "", "created_at": "2024-05-01T10:00:00Z"})),
            row(json!({"id": "t3"})),
        ];
        let teams: Vec<Team> = decode_rows(Table::Team, rows);
        assert_eq!(teams.len(), 1);
        assert_eq!(teams[0].id, "t1");
    }

    #[test]
    fn test_goal_set_progress_clamps() {
        let mut goal = Goal {
            id: "g1".to_string(),
            actor_id: "a1".to_string(),
            title: "Cycle 100km".to_string(),
            target: 100.0,
            progress: 0.0,
            completed: false,
            created_at: Utc::now(),
        };

        goal.set_progress(40.0);
        assert!((goal.progress - 40.0).abs() < f64::EPSILON);
        assert!(!goal.completed);

        goal.set_progress(250.0);
        assert!((goal.progress - 100.0).abs() < f64::EPSILON);
        assert!(goal.completed);

        goal.set_progress(-5.0);
        assert!(goal.progress.abs() < f64::EPSILON);
        assert!(!goal.completed);
    }
}
