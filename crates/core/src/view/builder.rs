//! Merges fetched pages and side-channel lookups into display records.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;

use super::synced::Keyed;
use crate::models::{Challenge, Goal, ImpactStats, Post, Profile, ReactionKind, Team};

/// Author fields shown next to a post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorSummary {
    pub id: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

impl From<&Profile> for AuthorSummary {
    fn from(profile: &Profile) -> Self {
        Self {
            id: profile.id.clone(),
            display_name: profile.display_name.clone(),
            avatar_url: profile.avatar_url.clone(),
        }
    }
}

/// Reaction counts by type. Types with no reactions are absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ReactionTally(BTreeMap<ReactionKind, u64>);

impl ReactionTally {
    /// Build a tally from `(kind, count)` pairs, skipping zero counts.
    pub fn from_counts(counts: impl IntoIterator<Item = (ReactionKind, u64)>) -> Self {
        Self(counts.into_iter().filter(|(_, count)| *count > 0).collect())
    }

    /// Count for one type.
    #[must_use]
    pub fn get(&self, kind: ReactionKind) -> u64 {
        self.0.get(&kind).copied().unwrap_or(0)
    }

    /// Add one reaction of `kind`.
    pub fn increment(&mut self, kind: ReactionKind) {
        *self.0.entry(kind).or_insert(0) += 1;
    }

    /// Remove one reaction of `kind`, dropping the entry at zero.
    pub fn decrement(&mut self, kind: ReactionKind) {
        if let Some(count) = self.0.get_mut(&kind) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.0.remove(&kind);
            }
        }
    }

    /// Sum over every type.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.0.values().sum()
    }
}

/// A post, climate action or comment with its derived fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostView {
    pub post: Post,
    pub author: Option<AuthorSummary>,
    pub comment_count: u64,
    pub reactions: ReactionTally,
    /// The viewer's own reaction.
    pub user_reaction: Option<ReactionKind>,
}

impl PostView {
    /// Move the viewer's reaction to `target`, adjusting the tally in the same step.
    ///
    /// Setting the reaction the view already shows changes nothing.
    pub fn set_reaction(&mut self, target: Option<ReactionKind>) {
        if self.user_reaction == target {
            return;
        }
        if let Some(previous) = self.user_reaction {
            self.reactions.decrement(previous);
        }
        if let Some(next) = target {
            self.reactions.increment(next);
        }
        self.user_reaction = target;
    }
}

/// Comments render with the same derived fields as posts.
pub type CommentView = PostView;

/// A challenge on the board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChallengeView {
    pub challenge: Challenge,
    /// Completed by the viewing actor.
    pub completed: bool,
}

/// Points earned across a challenge board.
#[must_use]
pub fn earned_points(board: &[ChallengeView]) -> i64 {
    board
        .iter()
        .filter(|view| view.completed)
        .map(|view| view.challenge.points)
        .sum()
}

/// A team with its member count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TeamView {
    pub team: Team,
    pub member_count: u64,
    /// The viewing actor belongs to the team.
    pub is_member: bool,
}

/// A goal with its progress ratio.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GoalView {
    pub goal: Goal,
}

impl GoalView {
    /// Progress as a fraction of the target, in `[0, 1]`.
    #[must_use]
    pub fn ratio(&self) -> f64 {
        if self.goal.target <= 0.0 {
            return if self.goal.completed { 1.0 } else { 0.0 };
        }
        (self.goal.progress / self.goal.target).clamp(0.0, 1.0)
    }
}

/// One row of the leaderboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderboardEntry {
    /// 1-based. Equal points share a rank.
    pub rank: usize,
    pub actor: AuthorSummary,
    pub points: i64,
}

/// Reaction side channel: tallies per post and the viewer's own reactions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReactionIndex {
    pub tallies: HashMap<String, ReactionTally>,
    pub viewer: HashMap<String, ReactionKind>,
}

/// A page of posts with whichever side channels resolved.
///
/// `None` marks a side-channel lookup that failed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostPage {
    pub posts: Vec<Post>,
    pub authors: Option<HashMap<String, Profile>>,
    pub comment_counts: Option<HashMap<String, u64>>,
    pub reactions: Option<ReactionIndex>,
}

/// Challenges with the viewer's completions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChallengePage {
    pub challenges: Vec<Challenge>,
    pub completed: Option<HashSet<String>>,
}

/// Teams with member counts and the viewer's memberships.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeamPage {
    pub teams: Vec<Team>,
    pub member_counts: Option<HashMap<String, u64>>,
    pub memberships: Option<HashSet<String>>,
}

/// Builds display records. Missing side channels default the derived field.
pub struct ViewBuilder;

impl ViewBuilder {
    /// Post views with author, comment count and reactions.
    #[must_use]
    pub fn posts(page: PostPage) -> Vec<PostView> {
        let PostPage {
            posts,
            authors,
            comment_counts,
            reactions,
        } = page;
        posts
            .into_iter()
            .map(|post| {
                let author = authors
                    .as_ref()
                    .and_then(|authors| authors.get(&post.author_id))
                    .map(AuthorSummary::from);
                let comment_count = comment_counts
                    .as_ref()
                    .and_then(|counts| counts.get(&post.id).copied())
                    .unwrap_or(0);
                let (tally, user_reaction) = reactions.as_ref().map_or_else(
                    || (ReactionTally::default(), None),
                    |index| {
                        (
                            index.tallies.get(&post.id).cloned().unwrap_or_default(),
                            index.viewer.get(&post.id).copied(),
                        )
                    },
                );
                PostView {
                    post,
                    author,
                    comment_count,
                    reactions: tally,
                    user_reaction,
                }
            })
            .collect()
    }

    /// Challenge views marked with the viewer's completions.
    #[must_use]
    pub fn challenges(page: ChallengePage) -> Vec<ChallengeView> {
        let completed = page.completed.unwrap_or_default();
        page.challenges
            .into_iter()
            .map(|challenge| ChallengeView {
                completed: completed.contains(&challenge.id),
                challenge,
            })
            .collect()
    }

    /// Team views with member counts and membership.
    #[must_use]
    pub fn teams(page: TeamPage) -> Vec<TeamView> {
        let counts = page.member_counts.unwrap_or_default();
        let memberships = page.memberships.unwrap_or_default();
        page.teams
            .into_iter()
            .map(|team| TeamView {
                member_count: counts.get(&team.id).copied().unwrap_or(0),
                is_member: memberships.contains(&team.id),
                team,
            })
            .collect()
    }

    /// Goal views in fetched order.
    #[must_use]
    pub fn goals(goals: Vec<Goal>) -> Vec<GoalView> {
        goals.into_iter().map(|goal| GoalView { goal }).collect()
    }

    /// Rank profiles already sorted by points, descending.
    #[must_use]
    pub fn leaderboard(profiles: &[Profile]) -> Vec<LeaderboardEntry> {
        let mut entries: Vec<LeaderboardEntry> = Vec::with_capacity(profiles.len());
        for (position, profile) in profiles.iter().enumerate() {
            let rank = match entries.last() {
                Some(previous) if previous.points == profile.points => previous.rank,
                _ => position + 1,
            };
            entries.push(LeaderboardEntry {
                rank,
                actor: AuthorSummary::from(profile),
                points: profile.points,
            });
        }
        entries
    }
}

impl Keyed for PostView {
    fn key(&self) -> &str {
        &self.post.id
    }
}

impl Keyed for ChallengeView {
    fn key(&self) -> &str {
        &self.challenge.id
    }
}

impl Keyed for TeamView {
    fn key(&self) -> &str {
        &self.team.id
    }
}

impl Keyed for GoalView {
    fn key(&self) -> &str {
        &self.goal.id
    }
}

impl Keyed for LeaderboardEntry {
    fn key(&self) -> &str {
        &self.actor.id
    }
}

/// The impact widget holds a single aggregate record.
impl Keyed for ImpactStats {
    fn key(&self) -> &str {
        "impact"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn post(id: &str, author: &str) -> Post {
        Post {
            id: id.to_string(),
            parent_id: None,
            author_id: author.to_string(),
            title: None,
            body: format!("body of {id}"),
            is_public: true,
            view_count: 0,
            category: None,
            latitude: None,
            longitude: None,
            created_at: Utc::now(),
        }
    }

    fn profile(id: &str, points: i64) -> Profile {
        Profile {
            id: id.to_string(),
            display_name: id.to_uppercase(),
            avatar_url: None,
            is_public: true,
            points,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_failed_side_channels_default_fields() {
        let views = ViewBuilder::posts(PostPage {
            posts: vec![post("p1", "alice"), post("p2", "bob")],
            authors: None,
            comment_counts: Some(HashMap::from([("p1".to_string(), 4)])),
            reactions: None,
        });

        assert_eq!(views.len(), 2);
        assert_eq!(views[0].comment_count, 4);
        assert_eq!(views[1].comment_count, 0);
        assert!(views[0].author.is_none());
        assert_eq!(views[1].reactions.total(), 0);
        assert!(views[1].user_reaction.is_none());
    }

    #[test]
    fn test_set_reaction_replaces_previous() {
        let mut view = ViewBuilder::posts(PostPage {
            posts: vec![post("p1", "alice")],
            reactions: Some(ReactionIndex {
                tallies: HashMap::from([(
                    "p1".to_string(),
                    ReactionTally::from_counts([(ReactionKind::Like, 3), (ReactionKind::Love, 1)]),
                )]),
                viewer: HashMap::from([("p1".to_string(), ReactionKind::Like)]),
            }),
            ..PostPage::default()
        })
        .remove(0);

        view.set_reaction(Some(ReactionKind::Love));
        assert_eq!(view.reactions.get(ReactionKind::Like), 2);
        assert_eq!(view.reactions.get(ReactionKind::Love), 2);

        view.set_reaction(Some(ReactionKind::Love));
        assert_eq!(view.reactions.total(), 4);

        view.set_reaction(None);
        assert_eq!(view.reactions.get(ReactionKind::Love), 1);
        assert_eq!(view.user_reaction, None);
    }

    #[test]
    fn test_tally_drops_zero_counts() {
        let mut tally = ReactionTally::from_counts([(ReactionKind::Celebrate, 1)]);
        tally.decrement(ReactionKind::Celebrate);
        tally.decrement(ReactionKind::Insightful);
        assert_eq!(tally, ReactionTally::default());
    }

    #[test]
    fn test_leaderboard_shares_rank_on_ties() {
        let entries = ViewBuilder::leaderboard(&[
            profile("a", 50),
            profile("b", 30),
            profile("c", 30),
            profile("d", 10),
        ]);
        let ranks: Vec<usize> = entries.iter().map(|entry| entry.rank).collect();
        assert_eq!(ranks, vec![1, 2, 2, 4]);
    }

    #[test]
    fn test_team_and_challenge_views() {
        let now = Utc::now();
        let teams = ViewBuilder::teams(TeamPage {
            teams: vec![Team {
                id: "t1".into(),
                name: "Green".into(),
                description: None,
                created_at: now,
            }],
            member_counts: Some(HashMap::from([("t1".to_string(), 3)])),
            memberships: Some(HashSet::from(["t1".to_string()])),
        });
        assert_eq!(teams[0].member_count, 3);
        assert!(teams[0].is_member);

        let board = ViewBuilder::challenges(ChallengePage {
            challenges: vec![
                Challenge {
                    id: "c1".into(),
                    title: "Bike week".into(),
                    description: None,
                    points: 10,
                    created_at: now,
                },
                Challenge {
                    id: "c2".into(),
                    title: "Meatless Monday".into(),
                    description: None,
                    points: 5,
                    created_at: now,
                },
            ],
            completed: Some(HashSet::from(["c1".to_string()])),
        });
        assert_eq!(earned_points(&board), 10);
    }
}
