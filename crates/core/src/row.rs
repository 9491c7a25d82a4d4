//! Untyped rows, table names, filters and orderings exchanged with a remote store.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A row as it crosses the store boundary.
pub type Row = serde_json::Map<String, Value>;

/// Tables the synchronization layer reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    /// Actor profiles.
    Profile,
    /// Posts inside a forum.
    ForumPost,
    /// Climate actions shown on the social feed and map.
    ClimateAction,
    /// Comments on forum posts and climate actions.
    Comment,
    /// One reaction per actor and parent.
    Reaction,
    /// Gamified challenges.
    Challenge,
    /// Completed challenges, one per actor and challenge.
    ChallengeCompletion,
    /// Personal goals with numeric progress.
    Goal,
    /// Teams.
    Team,
    /// Team memberships, one per team and actor.
    TeamMember,
}

impl Table {
    /// Every table, in schema order.
    pub const ALL: [Self; 10] = [
        Self::Profile,
        Self::ForumPost,
        Self::ClimateAction,
        Self::Comment,
        Self::Reaction,
        Self::Challenge,
        Self::ChallengeCompletion,
        Self::Goal,
        Self::Team,
        Self::TeamMember,
    ];

    /// The wire and SQL name of the table.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Profile => "profile",
            Self::ForumPost => "forum_post",
            Self::ClimateAction => "climate_action",
            Self::Comment => "comment",
            Self::Reaction => "reaction",
            Self::Challenge => "challenge",
            Self::ChallengeCompletion => "challenge_completion",
            Self::Goal => "goal",
            Self::Team => "team",
            Self::TeamMember => "team_member",
        }
    }

    /// Look a table up by its wire name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|table| table.name() == name)
    }

    /// Columns of the table's natural unique key, besides the primary key.
    #[must_use]
    pub const fn unique_key(self) -> Option<&'static [&'static str]> {
        match self {
            Self::Reaction => Some(&["actor_id", "parent_id"]),
            Self::ChallengeCompletion => Some(&["actor_id", "challenge_id"]),
            Self::TeamMember => Some(&["team_id", "actor_id"]),
            _ => None,
        }
    }

    /// Foreign key to a parent row: the referencing column and the tables it may point at.
    #[must_use]
    pub const fn parent(self) -> Option<(&'static str, &'static [Self])> {
        match self {
            Self::Comment => Some(("parent_id", &[Self::ForumPost, Self::ClimateAction])),
            Self::Reaction => Some((
                "parent_id",
                &[Self::ForumPost, Self::ClimateAction, Self::Comment],
            )),
            Self::ChallengeCompletion => Some(("challenge_id", &[Self::Challenge])),
            Self::TeamMember => Some(("team_id", &[Self::Team])),
            _ => None,
        }
    }

    /// Column holding the row's creation time.
    #[must_use]
    pub const fn timestamp_column(self) -> &'static str {
        match self {
            Self::ChallengeCompletion => "completed_at",
            Self::TeamMember => "joined_at",
            _ => "created_at",
        }
    }

    /// Whether rows of this table decode as posts.
    #[must_use]
    pub const fn is_post_like(self) -> bool {
        matches!(self, Self::ForumPost | Self::ClimateAction | Self::Comment)
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Row predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Matches every row.
    All,
    /// Column equals value. A missing column compares as `null`.
    Eq {
        /// Column name.
        column: String,
        /// Expected value.
        value: Value,
    },
    /// Column is one of the values. An empty list matches nothing.
    In {
        /// Column name.
        column: String,
        /// Accepted values.
        values: Vec<Value>,
    },
    /// Every inner filter matches.
    And(Vec<Filter>),
}

impl Filter {
    /// `column = value`.
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq {
            column: column.into(),
            value: value.into(),
        }
    }

    /// `column IN (values)`.
    pub fn is_in<I, V>(column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::In {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Conjunction of `self` and `other`.
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        match (self, other) {
            (Self::All, other) | (other, Self::All) => other,
            (Self::And(mut left), Self::And(right)) => {
                left.extend(right);
                Self::And(left)
            }
            (Self::And(mut left), other) => {
                left.push(other);
                Self::And(left)
            }
            (this, other) => Self::And(vec![this, other]),
        }
    }

    /// Evaluate the filter against a row.
    #[must_use]
    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Self::All => true,
            Self::Eq { column, value } => row.get(column).unwrap_or(&Value::Null) == value,
            Self::In { column, values } => {
                let actual = row.get(column).unwrap_or(&Value::Null);
                values.iter().any(|v| v == actual)
            }
            Self::And(filters) => filters.iter().all(|f| f.matches(row)),
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Smallest first.
    Asc,
    /// Largest first.
    Desc,
}

/// Ordering of a query result. Ties are broken by `id` in the same direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    /// Column to sort by.
    pub column: String,
    /// Sort direction.
    pub direction: Direction,
}

impl Order {
    /// Ascending by `column`.
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: Direction::Asc,
        }
    }

    /// Descending by `column`.
    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: Direction::Desc,
        }
    }

    /// Compare two rows under this ordering.
    #[must_use]
    pub fn compare(&self, a: &Row, b: &Row) -> Ordering {
        let primary = compare_values(
            a.get(&self.column).unwrap_or(&Value::Null),
            b.get(&self.column).unwrap_or(&Value::Null),
        );
        let ordering = primary.then_with(|| {
            compare_values(
                a.get("id").unwrap_or(&Value::Null),
                b.get("id").unwrap_or(&Value::Null),
            )
        });
        match self.direction {
            Direction::Asc => ordering,
            Direction::Desc => ordering.reverse(),
        }
    }
}

/// Total order over JSON scalars: null < bool < number < string.
/// Strings that both parse as RFC 3339 timestamps compare chronologically.
#[must_use]
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => match (parse_time(x), parse_time(y)) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x.cmp(y),
        },
        (x, y) => rank(x).cmp(&rank(y)),
    }
}

fn parse_time(value: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(value).ok()
}

const fn rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

#[cfg(test)]
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
    fn test_table_names_round_trip() {
        for table in Table::ALL {
            assert_eq!(Table::from_name(table.name()), Some(table));
        }
        assert_eq!(Table::from_name("note"), None);
    }

    #[test]
    fn test_filter_eq_and_in() {
        let r = row(json!({"id": "a", "parent_id": "p1", "is_public": true}));

        assert!(Filter::eq("parent_id", "p1").matches(&r));
        assert!(!Filter::eq("parent_id", "p2").matches(&r));
        assert!(Filter::is_in("parent_id", ["p0", "p1"]).matches(&r));
        assert!(!Filter::is_in("parent_id", Vec::<String>::new()).matches(&r));
        assert!(Filter::eq("missing", Value::Null).matches(&r));
    }

    #[test]
    fn test_filter_and_flattens() {
        let filter = Filter::All
            .and(Filter::eq("a", 1))
            .and(Filter::eq("b", 2))
            .and(Filter::eq("c", 3));
        match &filter {
            Filter::And(inner) => assert_eq!(inner.len(), 3),
            other => panic!("expected And, got {other:?}"),
        }
        assert!(filter.matches(&row(json!({"a": 1, "b": 2, "c": 3}))));
        assert!(!filter.matches(&row(json!({"a": 1, "b": 2, "c": 4}))));
    }

    #[test]
    fn test_order_compares_timestamps_chronologically() {
        let early = row(json!({"id": "1", "created_at": "2024-05-01T10:00:00Z"}));
        let late = row(json!({"id": "2", "created_at": "2024-05-01T10:00:00.500Z"}));

        assert_eq!(Order::asc("created_at").compare(&early, &late), Ordering::Less);
        assert_eq!(
            Order::desc("created_at").compare(&early, &late),
            Ordering::Greater
        );
    }

    #[test]
    fn test_order_breaks_ties_by_id() {
        let a = row(json!({"id": "a", "points": 10}));
        let b = row(json!({"id": "b", "points": 10}));

        assert_eq!(Order::desc("points").compare(&a, &b), Ordering::Greater);
        assert_eq!(Order::asc("points").compare(&a, &b), Ordering::Less);
    }
}
