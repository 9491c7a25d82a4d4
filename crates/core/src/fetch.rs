//! Entity fetchers.
//!
//! Each fetch loads one page of primary rows and resolves their relations
//! with one batched lookup per side channel, keyed by the set of page ids.
//! A failed side channel is logged and reported as `None`; only a failure of
//! the primary query is returned as an error.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::time::Duration;

use serde_json::{Value, json};

use crate::error::{SyncError, SyncResult};
use crate::models::{
    Challenge, ChallengeCompletion, Goal, ImpactStats, Post, Profile, Reaction, Record, Team,
    TeamMember, decode_rows,
};
use crate::row::{Filter, Order, Row, Table};
use crate::store::{StoreError, StoreHandle, procedures};
use crate::view::{ChallengePage, PostPage, ReactionIndex, ReactionTally, TeamPage};

/// Which rows of a post-like table a feed shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParentScope {
    /// Every public row.
    Public,
    /// Posts of one forum.
    Forum(String),
    /// Posts written by one actor.
    Author(String),
    /// Comments under one post, oldest first.
    Thread(String),
}

/// A page request against a post-like table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedQuery {
    /// `post`, `climate_action` or `comment`.
    pub table: Table,
    pub scope: ParentScope,
    /// Page size.
    pub limit: u64,
}

impl FeedQuery {
    /// A page of `limit` rows from `table` within `scope`.
    #[must_use]
    pub const fn new(table: Table, scope: ParentScope, limit: u64) -> Self {
        Self {
            table,
            scope,
            limit,
        }
    }

    /// Row predicate for the scope.
    #[must_use]
    pub fn filter(&self) -> Filter {
        match &self.scope {
            ParentScope::Public => Filter::eq("is_public", true),
            ParentScope::Forum(id) | ParentScope::Thread(id) => Filter::eq("parent_id", id.as_str()),
            ParentScope::Author(id) => Filter::eq("author_id", id.as_str()),
        }
    }

    /// Threads read top to bottom; everything else newest first.
    #[must_use]
    pub fn order(&self) -> Order {
        match self.scope {
            ParentScope::Thread(_) => Order::asc("created_at"),
            _ => Order::desc("created_at"),
        }
    }
}

/// Read-only loader for every view the core maintains.
#[derive(Clone)]
pub struct EntityFetcher {
    store: StoreHandle,
    timeout: Duration,
}

impl EntityFetcher {
    /// Create a fetcher whose every store call is bounded by `timeout`.
    #[must_use]
    pub fn new(store: StoreHandle, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    async fn call<T>(&self, request: impl Future<Output = Result<T, StoreError>>) -> SyncResult<T> {
        match tokio::time::timeout(self.timeout, request).await {
            Ok(result) => result.map_err(SyncError::from),
            Err(_) => Err(SyncError::Timeout(self.timeout)),
        }
    }

    /// Query rows; a missing parent reads as an empty page.
    async fn rows(
        &self,
        table: Table,
        filter: &Filter,
        order: Option<&Order>,
        limit: Option<u64>,
    ) -> SyncResult<Vec<Row>> {
        match self.call(self.store.query(table, filter, order, limit)).await {
            Err(SyncError::NotFound { .. }) => Ok(Vec::new()),
            other => other,
        }
    }

    /// A page of posts with authors, comment counts and reactions resolved.
    pub async fn fetch_posts(&self, query: &FeedQuery, viewer: Option<&str>) -> SyncResult<PostPage> {
        let rows = self
            .rows(
                query.table,
                &query.filter(),
                Some(&query.order()),
                Some(query.limit),
            )
            .await?;
        let posts: Vec<Post> = decode_rows(query.table, rows);
        tracing::debug!(table = %query.table, scope = ?query.scope, count = posts.len(), "Fetched posts");

        if posts.is_empty() {
            return Ok(PostPage {
                posts,
                authors: Some(HashMap::new()),
                comment_counts: Some(HashMap::new()),
                reactions: Some(ReactionIndex::default()),
            });
        }

        let post_ids: Vec<&str> = posts.iter().map(|post| post.id.as_str()).collect();
        let author_ids: Vec<&str> = posts
            .iter()
            .map(|post| post.author_id.as_str())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        let (authors, comment_counts, reactions) = tokio::join!(
            self.authors(&author_ids),
            self.comment_counts(query.table, &post_ids),
            self.reactions(&post_ids, viewer),
        );

        Ok(PostPage {
            authors: side_channel("authors", authors),
            comment_counts: side_channel("comment_counts", comment_counts),
            reactions: side_channel("reactions", reactions),
            posts,
        })
    }

    async fn authors(&self, ids: &[&str]) -> SyncResult<HashMap<String, Profile>> {
        let rows = self
            .rows(Table::Profile, &Filter::is_in("id", ids.iter().copied()), None, None)
            .await?;
        Ok(decode_rows::<Profile>(Table::Profile, rows)
            .into_iter()
            .map(|profile| (profile.id.clone(), profile))
            .collect())
    }

    async fn comment_counts(
        &self,
        table: Table,
        post_ids: &[&str],
    ) -> SyncResult<HashMap<String, u64>> {
        if table == Table::Comment {
            return Ok(HashMap::new());
        }
        let rows = self
            .rows(
                Table::Comment,
                &Filter::is_in("parent_id", post_ids.iter().copied()),
                None,
                None,
            )
            .await?;
        let mut counts = HashMap::new();
        for row in &rows {
            if let Some(parent_id) = row.get("parent_id").and_then(Value::as_str) {
                *counts.entry(parent_id.to_string()).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    async fn reactions(&self, post_ids: &[&str], viewer: Option<&str>) -> SyncResult<ReactionIndex> {
        let rows = self
            .rows(
                Table::Reaction,
                &Filter::is_in("parent_id", post_ids.iter().copied()),
                None,
                None,
            )
            .await?;
        let mut index = ReactionIndex::default();
        for reaction in decode_rows::<Reaction>(Table::Reaction, rows) {
            index
                .tallies
                .entry(reaction.parent_id.clone())
                .or_insert_with(ReactionTally::default)
                .increment(reaction.kind);
            if viewer == Some(reaction.actor_id.as_str()) {
                index.viewer.insert(reaction.parent_id, reaction.kind);
            }
        }
        Ok(index)
    }

    /// Public profiles by points, highest first.
    pub async fn fetch_leaderboard(&self, limit: u64) -> SyncResult<Vec<Profile>> {
        let rows = self
            .rows(
                Table::Profile,
                &Filter::eq("is_public", true),
                Some(&Order::desc("points")),
                Some(limit),
            )
            .await?;
        Ok(decode_rows(Table::Profile, rows))
    }

    /// Challenges, newest first, with the actor's completions.
    pub async fn fetch_challenges(
        &self,
        actor: Option<&str>,
        limit: u64,
    ) -> SyncResult<ChallengePage> {
        let rows = self
            .rows(
                Table::Challenge,
                &Filter::All,
                Some(&Order::desc("created_at")),
                Some(limit),
            )
            .await?;
        let challenges: Vec<Challenge> = decode_rows(Table::Challenge, rows);

        let completed = match actor {
            Some(actor) if !challenges.is_empty() => {
                let ids = challenges.iter().map(|challenge| challenge.id.as_str());
                let filter = Filter::eq("actor_id", actor).and(Filter::is_in("challenge_id", ids));
                let result = self
                    .rows(Table::ChallengeCompletion, &filter, None, None)
                    .await
                    .map(|rows| {
                        decode_rows::<ChallengeCompletion>(Table::ChallengeCompletion, rows)
                            .into_iter()
                            .map(|completion| completion.challenge_id)
                            .collect::<HashSet<String>>()
                    });
                side_channel("completions", result)
            }
            _ => Some(HashSet::new()),
        };

        Ok(ChallengePage {
            challenges,
            completed,
        })
    }

    /// Teams by name with member counts and the actor's memberships.
    pub async fn fetch_teams(&self, actor: Option<&str>, limit: u64) -> SyncResult<TeamPage> {
        let rows = self
            .rows(Table::Team, &Filter::All, Some(&Order::asc("name")), Some(limit))
            .await?;
        let teams: Vec<Team> = decode_rows(Table::Team, rows);
        if teams.is_empty() {
            return Ok(TeamPage {
                teams,
                member_counts: Some(HashMap::new()),
                memberships: Some(HashSet::new()),
            });
        }

        let ids = teams.iter().map(|team| team.id.as_str());
        let members = self
            .rows(Table::TeamMember, &Filter::is_in("team_id", ids), None, None)
            .await
            .map(|rows| decode_rows::<TeamMember>(Table::TeamMember, rows));

        let (member_counts, memberships) = match side_channel("members", members) {
            Some(members) => {
                let mut counts: HashMap<String, u64> = HashMap::new();
                let mut joined = HashSet::new();
                for member in members {
                    *counts.entry(member.team_id.clone()).or_insert(0) += 1;
                    if actor == Some(member.actor_id.as_str()) {
                        joined.insert(member.team_id);
                    }
                }
                (Some(counts), Some(joined))
            }
            None => (None, None),
        };

        Ok(TeamPage {
            teams,
            member_counts,
            memberships,
        })
    }

    /// The actor's goals, newest first.
    pub async fn fetch_goals(&self, actor: &str, limit: u64) -> SyncResult<Vec<Goal>> {
        let rows = self
            .rows(
                Table::Goal,
                &Filter::eq("actor_id", actor),
                Some(&Order::desc("created_at")),
                Some(limit),
            )
            .await?;
        Ok(decode_rows(Table::Goal, rows))
    }

    /// Server-computed impact aggregates.
    pub async fn fetch_impact(&self) -> SyncResult<ImpactStats> {
        let value = self
            .call(self.store.invoke(procedures::ADMIN_STATS, json!({})))
            .await?;
        serde_json::from_value(value).map_err(|e| SyncError::Invalid(e.to_string()))
    }

    /// Full-text search over public posts and climate actions.
    pub async fn search_posts(&self, query: &str, limit: u64) -> SyncResult<Vec<Post>> {
        let value = self
            .call(self.store.invoke(
                procedures::SEARCH_POSTS,
                json!({ "query": query, "limit": limit }),
            ))
            .await?;
        let Value::Array(hits) = value else {
            return Err(SyncError::Invalid("search returned a non-list".to_string()));
        };
        Ok(hits
            .into_iter()
            .filter_map(|hit| match hit {
                Value::Object(row) => Post::from_row(Table::ClimateAction, row).ok(),
                _ => None,
            })
            .collect())
    }
}

fn side_channel<T>(name: &'static str, result: SyncResult<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(side_channel = name, error = %e, "Side-channel lookup failed");
            None
        }
    }
}
