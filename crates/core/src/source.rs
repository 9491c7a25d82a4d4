//! Loaders that turn fetcher output into display records for a live view.

use async_trait::async_trait;

use crate::error::SyncResult;
use crate::fetch::{EntityFetcher, FeedQuery};
use crate::models::ImpactStats;
use crate::view::{ChallengeView, GoalView, LeaderboardEntry, PostView, TeamView, ViewBuilder};

/// Produces the full item list of a view.
#[async_trait]
pub trait ViewSource<T>: Send + Sync {
    /// Fetch and build every item.
    async fn load(&self) -> SyncResult<Vec<T>>;
}

/// Posts, climate actions or a comment thread.
pub struct PostFeedSource {
    /// Fetcher the source reads through.
    pub fetcher: EntityFetcher,
    /// Table, parent scope and page size.
    pub query: FeedQuery,
    /// Actor whose own reactions are marked.
    pub viewer: Option<String>,
}

#[async_trait]
impl ViewSource<PostView> for PostFeedSource {
    async fn load(&self) -> SyncResult<Vec<PostView>> {
        let page = self
            .fetcher
            .fetch_posts(&self.query, self.viewer.as_deref())
            .await?;
        Ok(ViewBuilder::posts(page))
    }
}

/// Public profiles ranked by points.
pub struct LeaderboardSource {
    /// Fetcher the source reads through.
    pub fetcher: EntityFetcher,
    /// Page size.
    pub limit: u64,
}

#[async_trait]
impl ViewSource<LeaderboardEntry> for LeaderboardSource {
    async fn load(&self) -> SyncResult<Vec<LeaderboardEntry>> {
        let profiles = self.fetcher.fetch_leaderboard(self.limit).await?;
        Ok(ViewBuilder::leaderboard(&profiles))
    }
}

/// Challenge board, marking what `actor` has completed.
pub struct ChallengeSource {
    /// Fetcher the source reads through.
    pub fetcher: EntityFetcher,
    /// Viewing actor, if signed in.
    pub actor: Option<String>,
    /// Page size.
    pub limit: u64,
}

#[async_trait]
impl ViewSource<ChallengeView> for ChallengeSource {
    async fn load(&self) -> SyncResult<Vec<ChallengeView>> {
        let page = self
            .fetcher
            .fetch_challenges(self.actor.as_deref(), self.limit)
            .await?;
        Ok(ViewBuilder::challenges(page))
    }
}

/// Teams with member counts and `actor`'s memberships.
pub struct TeamSource {
    /// Fetcher the source reads through.
    pub fetcher: EntityFetcher,
    /// Viewing actor, if signed in.
    pub actor: Option<String>,
    /// Page size.
    pub limit: u64,
}

#[async_trait]
impl ViewSource<TeamView> for TeamSource {
    async fn load(&self) -> SyncResult<Vec<TeamView>> {
        let page = self
            .fetcher
            .fetch_teams(self.actor.as_deref(), self.limit)
            .await?;
        Ok(ViewBuilder::teams(page))
    }
}

/// One actor's goals.
pub struct GoalSource {
    /// Fetcher the source reads through.
    pub fetcher: EntityFetcher,
    /// Owner of the goals.
    pub actor: String,
    /// Page size.
    pub limit: u64,
}

#[async_trait]
impl ViewSource<GoalView> for GoalSource {
    async fn load(&self) -> SyncResult<Vec<GoalView>> {
        let goals = self.fetcher.fetch_goals(&self.actor, self.limit).await?;
        Ok(ViewBuilder::goals(goals))
    }
}

/// The impact widget: one server-computed aggregate.
pub struct ImpactSource {
    /// Fetcher the source reads through.
    pub fetcher: EntityFetcher,
}

#[async_trait]
impl ViewSource<ImpactStats> for ImpactSource {
    async fn load(&self) -> SyncResult<Vec<ImpactStats>> {
        Ok(vec![self.fetcher.fetch_impact().await?])
    }
}
