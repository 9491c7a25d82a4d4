//! Explicit session and the context object every view and mutation is built from.

use std::sync::Arc;

use ecolearn_common::SyncConfig;

use crate::error::{SyncError, SyncResult};
use crate::fetch::{EntityFetcher, FeedQuery, ParentScope};
use crate::listener::{LiveOptions, LiveView};
use crate::models::ImpactStats;
use crate::mutator::OptimisticMutator;
use crate::notice::Notifier;
use crate::row::{Filter, Table};
use crate::source::{
    ChallengeSource, GoalSource, ImpactSource, LeaderboardSource, PostFeedSource, TeamSource,
    ViewSource,
};
use crate::store::StoreHandle;
use crate::view::{ChallengeView, CommentView, GoalView, LeaderboardEntry, PostView, TeamView};

/// The signed-in actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    actor_id: String,
}

impl Session {
    /// Session acting as `actor_id`.
    #[must_use]
    pub fn new(actor_id: impl Into<String>) -> Self {
        Self {
            actor_id: actor_id.into(),
        }
    }

    /// The stable actor id every write is attributed to.
    #[must_use]
    pub fn actor_id(&self) -> &str {
        &self.actor_id
    }
}

/// Store, session, settings and notice channel shared by every view of one client.
#[derive(Clone)]
pub struct SyncContext {
    store: StoreHandle,
    session: Option<Session>,
    settings: SyncConfig,
    notifier: Notifier,
}

impl SyncContext {
    /// Anonymous context.
    #[must_use]
    pub fn new(store: StoreHandle, settings: SyncConfig) -> Self {
        let notifier = Notifier::new(settings.notice_capacity);
        Self {
            store,
            session: None,
            settings,
            notifier,
        }
    }

    /// Act as `session`'s actor.
    #[must_use]
    pub fn with_session(mut self, session: Session) -> Self {
        self.session = Some(session);
        self
    }

    /// The remote store every view and write goes through.
    #[must_use]
    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    /// The signed-in actor, if any.
    #[must_use]
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    #[must_use]
    pub fn settings(&self) -> &SyncConfig {
        &self.settings
    }

    /// Where mutation outcomes are announced.
    #[must_use]
    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    fn viewer(&self) -> Option<String> {
        self.session.as_ref().map(|session| session.actor_id.clone())
    }

    /// A fetcher bound to the configured request timeout.
    #[must_use]
    pub fn fetcher(&self) -> EntityFetcher {
        EntityFetcher::new(Arc::clone(&self.store), self.settings.request_timeout())
    }

    /// A mutator acting as the signed-in actor.
    #[must_use]
    pub fn mutator(&self) -> OptimisticMutator {
        OptimisticMutator::new(
            Arc::clone(&self.store),
            self.session.clone(),
            self.settings.request_timeout(),
            self.notifier.clone(),
        )
    }

    /// Mount a post feed with explicit invalidation options.
    pub async fn feed(&self, query: FeedQuery, options: LiveOptions) -> SyncResult<LiveView<PostView>> {
        let label = format!("{}:{:?}", query.table, query.scope);
        let source: Arc<dyn ViewSource<PostView>> = Arc::new(PostFeedSource {
            fetcher: self.fetcher(),
            query,
            viewer: self.viewer(),
        });
        LiveView::mount(
            label,
            Arc::clone(&self.store),
            source,
            options,
            self.notifier.clone(),
        )
        .await
    }

    /// Every public row of a post table, newest first.
    pub async fn public_feed(&self, table: Table) -> SyncResult<LiveView<PostView>> {
        let query = FeedQuery::new(table, ParentScope::Public, self.settings.feed_page_size);
        let options = LiveOptions::default()
            .subscribe(table, Filter::eq("is_public", true))
            .subscribe(Table::Comment, Filter::All)
            .subscribe(Table::Reaction, Filter::All);
        self.feed(query, options).await
    }

    /// Posts of one forum, newest first.
    pub async fn forum_feed(&self, forum_id: &str) -> SyncResult<LiveView<PostView>> {
        let query = FeedQuery::new(
            Table::ForumPost,
            ParentScope::Forum(forum_id.to_string()),
            self.settings.feed_page_size,
        );
        let options = LiveOptions::default()
            .subscribe(Table::ForumPost, Filter::eq("parent_id", forum_id))
            .subscribe(Table::Comment, Filter::All);
        self.feed(query, options).await
    }

    /// Comments under one post, oldest first.
    pub async fn thread(&self, parent_id: &str) -> SyncResult<LiveView<CommentView>> {
        let query = FeedQuery::new(
            Table::Comment,
            ParentScope::Thread(parent_id.to_string()),
            self.settings.thread_page_size,
        );
        let options = LiveOptions::default()
            .subscribe(Table::Comment, Filter::eq("parent_id", parent_id))
            .subscribe(Table::Reaction, Filter::All);
        self.feed(query, options).await
    }

    /// Points ranking. Point changes are updates, so it also polls.
    pub async fn leaderboard(&self) -> SyncResult<LiveView<LeaderboardEntry>> {
        let source: Arc<dyn ViewSource<LeaderboardEntry>> = Arc::new(LeaderboardSource {
            fetcher: self.fetcher(),
            limit: self.settings.leaderboard_page_size,
        });
        let options = LiveOptions::default()
            .subscribe(Table::ChallengeCompletion, Filter::All)
            .subscribe(Table::Profile, Filter::All)
            .poll(self.settings.poll_interval());
        LiveView::mount(
            "leaderboard",
            Arc::clone(&self.store),
            source,
            options,
            self.notifier.clone(),
        )
        .await
    }

    /// Challenge board with the signed-in actor's completions.
    pub async fn challenges(&self) -> SyncResult<LiveView<ChallengeView>> {
        let mut options = LiveOptions::default().subscribe(Table::Challenge, Filter::All);
        if let Some(actor) = self.viewer() {
            options = options.subscribe(Table::ChallengeCompletion, Filter::eq("actor_id", actor));
        }
        let source: Arc<dyn ViewSource<ChallengeView>> = Arc::new(ChallengeSource {
            fetcher: self.fetcher(),
            actor: self.viewer(),
            limit: self.settings.list_page_size,
        });
        LiveView::mount(
            "challenges",
            Arc::clone(&self.store),
            source,
            options,
            self.notifier.clone(),
        )
        .await
    }

    /// Teams with member counts and the signed-in actor's memberships.
    pub async fn teams(&self) -> SyncResult<LiveView<TeamView>> {
        let source: Arc<dyn ViewSource<TeamView>> = Arc::new(TeamSource {
            fetcher: self.fetcher(),
            actor: self.viewer(),
            limit: self.settings.list_page_size,
        });
        let options = LiveOptions::default()
            .subscribe(Table::Team, Filter::All)
            .subscribe(Table::TeamMember, Filter::All);
        LiveView::mount(
            "teams",
            Arc::clone(&self.store),
            source,
            options,
            self.notifier.clone(),
        )
        .await
    }

    /// The signed-in actor's goals.
    pub async fn goals(&self) -> SyncResult<LiveView<GoalView>> {
        let actor = self.viewer().ok_or(SyncError::SessionExpired)?;
        let options =
            LiveOptions::default().subscribe(Table::Goal, Filter::eq("actor_id", actor.as_str()));
        let source: Arc<dyn ViewSource<GoalView>> = Arc::new(GoalSource {
            fetcher: self.fetcher(),
            actor,
            limit: self.settings.list_page_size,
        });
        LiveView::mount(
            "goals",
            Arc::clone(&self.store),
            source,
            options,
            self.notifier.clone(),
        )
        .await
    }

    /// Impact widget: server aggregates, polled only.
    pub async fn impact_widget(&self) -> SyncResult<LiveView<ImpactStats>> {
        let source: Arc<dyn ViewSource<ImpactStats>> = Arc::new(ImpactSource {
            fetcher: self.fetcher(),
        });
        LiveView::mount(
            "impact",
            Arc::clone(&self.store),
            source,
            LiveOptions::default().poll(self.settings.poll_interval()),
            self.notifier.clone(),
        )
        .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    #[tokio::test]
    async fn test_goals_require_session() {
        let context = SyncContext::new(Arc::new(MemoryStore::new()), SyncConfig::default());
        assert_eq!(
            context.goals().await.err(),
            Some(SyncError::SessionExpired)
        );
    }

    #[tokio::test]
    async fn test_public_feed_holds_one_channel_per_subscription() {
        let store = Arc::new(MemoryStore::new());
        let context = SyncContext::new(store.clone(), SyncConfig::default())
            .with_session(Session::new("alice"));

        let feed = context.public_feed(Table::ClimateAction).await.unwrap();
        assert_eq!(store.active_channels(), 3);
        assert!(feed.is_loaded());

        feed.unmount().await;
        assert_eq!(store.active_channels(), 0);
    }

    #[tokio::test]
    async fn test_impact_widget_is_poll_only() {
        let store = Arc::new(MemoryStore::new());
        let context = SyncContext::new(store.clone(), SyncConfig::default());

        let widget = context.impact_widget().await.unwrap();
        assert_eq!(store.active_channels(), 0);
        assert_eq!(widget.snapshot().len(), 1);
        widget.unmount().await;
    }
}
