//! Optimistic mutations.
//!
//! Every mutation checks what the view already knows, applies a delta to the
//! view, issues the remote write and then commits or rolls the delta back.
//! A second mutation of the same target by the same actor is ignored while
//! the first is in flight.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use ecolearn_common::IdGenerator;
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use validator::Validate;

use crate::error::{ErrorClass, SyncError, SyncResult};
use crate::listener::LiveView;
use crate::models::{Goal, Post, ReactionKind, Record};
use crate::notice::{Notice, Notifier};
use crate::row::{Filter, Row, Table};
use crate::session::Session;
use crate::store::{StoreError, StoreHandle, procedures};
use crate::view::{
    ChallengeView, CommentView, Delta, GoalView, Keyed, MutationId, PostView, TeamView,
};

/// Longest accepted comment, in characters.
pub const MAX_COMMENT_CHARS: u64 = 2000;

/// How a mutation ended, when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    /// The write was confirmed.
    Applied,
    /// The server already had it; nothing changed.
    AlreadyDone,
    /// The same mutation was still in flight, or there was nothing to do.
    Ignored,
    /// The target no longer exists.
    ParentMissing,
}

/// Where an inserted item goes when the view does not hold it yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    /// Newest-first lists.
    Front,
    /// Oldest-first lists such as comment threads.
    Back,
}

/// Insert `item`, or replace the item with its key.
#[derive(Debug, Clone)]
pub struct InsertDelta<T> {
    /// The item as it should be displayed.
    pub item: T,
    /// Where a new item is placed.
    pub position: Position,
}

impl<T> Delta<T> for InsertDelta<T>
where
    T: Keyed + Clone + Send + Sync + fmt::Debug,
{
    fn apply(&self, items: &mut Vec<T>) {
        if let Some(existing) = items.iter_mut().find(|item| item.key() == self.item.key()) {
            *existing = self.item.clone();
            return;
        }
        match self.position {
            Position::Front => items.insert(0, self.item.clone()),
            Position::Back => items.push(self.item.clone()),
        }
    }
}

/// Hide the item with `key`.
#[derive(Debug, Clone)]
pub struct RemoveDelta {
    /// Key of the hidden item.
    pub key: String,
}

impl<T: Keyed> Delta<T> for RemoveDelta {
    fn apply(&self, items: &mut Vec<T>) {
        items.retain(|item| item.key() != self.key);
    }
}

#[derive(Debug)]
struct ReactionDelta {
    post_id: String,
    target: Option<ReactionKind>,
}

impl Delta<PostView> for ReactionDelta {
    fn apply(&self, items: &mut Vec<PostView>) {
        if let Some(view) = items.iter_mut().find(|view| view.post.id == self.post_id) {
            view.set_reaction(self.target);
        }
    }
}

#[derive(Debug)]
struct CompletionDelta {
    challenge_id: String,
}

impl Delta<ChallengeView> for CompletionDelta {
    fn apply(&self, items: &mut Vec<ChallengeView>) {
        if let Some(view) = items
            .iter_mut()
            .find(|view| view.challenge.id == self.challenge_id)
        {
            view.completed = true;
        }
    }
}

#[derive(Debug)]
struct MembershipDelta {
    team_id: String,
    member: bool,
}

impl Delta<TeamView> for MembershipDelta {
    fn apply(&self, items: &mut Vec<TeamView>) {
        let Some(view) = items.iter_mut().find(|view| view.team.id == self.team_id) else {
            return;
        };
        if view.is_member == self.member {
            return;
        }
        view.is_member = self.member;
        view.member_count = if self.member {
            view.member_count + 1
        } else {
            view.member_count.saturating_sub(1)
        };
    }
}

#[derive(Debug)]
struct GoalDelta {
    goal: Goal,
}

impl Delta<GoalView> for GoalDelta {
    fn apply(&self, items: &mut Vec<GoalView>) {
        if let Some(view) = items.iter_mut().find(|view| view.goal.id == self.goal.id) {
            view.goal = self.goal.clone();
        }
    }
}

#[derive(Validate)]
struct CommentInput {
    #[validate(length(min = 1, max = 2000))]
    body: String,
}

/// Holds an in-flight key until dropped.
struct InFlight {
    keys: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

/// Applies user mutations optimistically and reconciles them with the store.
#[derive(Clone)]
pub struct OptimisticMutator {
    store: StoreHandle,
    session: Option<Session>,
    timeout: Duration,
    notifier: Notifier,
    in_flight: Arc<Mutex<HashSet<String>>>,
    id_gen: IdGenerator,
}

impl OptimisticMutator {
    /// Create a mutator acting as `session`'s actor.
    #[must_use]
    pub fn new(
        store: StoreHandle,
        session: Option<Session>,
        timeout: Duration,
        notifier: Notifier,
    ) -> Self {
        Self {
            store,
            session,
            timeout,
            notifier,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            id_gen: IdGenerator::new(),
        }
    }

    fn actor(&self) -> SyncResult<String> {
        match &self.session {
            Some(session) => Ok(session.actor_id().to_string()),
            None => {
                let err = SyncError::SessionExpired;
                self.notifier.notify_error(&err);
                Err(err)
            }
        }
    }

    fn claim(&self, actor: &str, target: &str) -> Option<InFlight> {
        let key = format!("{actor}:{target}");
        let mut keys = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !keys.insert(key.clone()) {
            tracing::debug!(key = %key, "Mutation already in flight");
            return None;
        }
        Some(InFlight {
            keys: Arc::clone(&self.in_flight),
            key,
        })
    }

    async fn remote<T>(&self, request: impl Future<Output = Result<T, StoreError>>) -> SyncResult<T> {
        match tokio::time::timeout(self.timeout, request).await {
            Ok(result) => result.map_err(SyncError::from),
            Err(_) => Err(SyncError::Timeout(self.timeout)),
        }
    }

    fn unavailable(&self) -> MutationOutcome {
        self.notifier
            .notify(Notice::warning("unavailable", "This item is no longer available."));
        MutationOutcome::ParentMissing
    }

    fn already_done(&self, message: &str) -> MutationOutcome {
        self.notifier.notify(Notice::info("already_done", message));
        MutationOutcome::AlreadyDone
    }

    /// Roll back and classify a failed write.
    fn reject<T>(
        &self,
        view: &LiveView<T>,
        id: MutationId,
        err: SyncError,
        duplicate: &str,
    ) -> SyncResult<MutationOutcome>
    where
        T: Keyed + Clone + Send + Sync + 'static,
    {
        view.rollback(id);
        match err.class() {
            ErrorClass::Constraint => Ok(self.already_done(duplicate)),
            ErrorClass::NotFound => Ok(self.unavailable()),
            _ => {
                tracing::warn!(error = %err, "Mutation rolled back");
                self.notifier.notify_error(&err);
                Err(err)
            }
        }
    }

    /// React with `kind`, or remove the reaction when `kind` is already active.
    pub async fn toggle_reaction(
        &self,
        feed: &LiveView<PostView>,
        post_id: &str,
        kind: ReactionKind,
    ) -> SyncResult<MutationOutcome> {
        let actor = self.actor()?;
        let Some(_guard) = self.claim(&actor, &format!("reaction:{post_id}")) else {
            return Ok(MutationOutcome::Ignored);
        };
        let Some(current) = feed.get(post_id) else {
            return Ok(self.unavailable());
        };

        let target = if current.user_reaction == Some(kind) {
            None
        } else {
            Some(kind)
        };
        let id = feed.apply_delta(Arc::new(ReactionDelta {
            post_id: post_id.to_string(),
            target,
        }));

        let result = match target {
            Some(kind) => self
                .remote(self.store.upsert(
                    Table::Reaction,
                    object(json!({
                        "actor_id": actor,
                        "parent_id": post_id,
                        "kind": kind.as_str(),
                    })),
                    &["actor_id", "parent_id"],
                ))
                .await
                .map(drop),
            None => {
                self.remote(self.delete_where(
                    Table::Reaction,
                    Filter::eq("actor_id", actor.as_str()).and(Filter::eq("parent_id", post_id)),
                ))
                .await
            }
        };

        match result {
            Ok(()) => {
                feed.commit(id);
                tracing::debug!(post_id = %post_id, reaction = ?target, "Reaction saved");
                Ok(MutationOutcome::Applied)
            }
            Err(e) => self.reject(feed, id, e, "Already reacted."),
        }
    }

    /// Complete a challenge. The completion and its points are stored together.
    pub async fn complete_challenge(
        &self,
        board: &LiveView<ChallengeView>,
        challenge_id: &str,
    ) -> SyncResult<MutationOutcome> {
        let actor = self.actor()?;
        let Some(_guard) = self.claim(&actor, &format!("challenge:{challenge_id}")) else {
            return Ok(MutationOutcome::Ignored);
        };
        let Some(current) = board.get(challenge_id) else {
            return Ok(self.unavailable());
        };
        if current.completed {
            return Ok(self.already_done("Already completed"));
        }

        let id = board.apply_delta(Arc::new(CompletionDelta {
            challenge_id: challenge_id.to_string(),
        }));
        let result = self
            .remote(self.store.invoke(
                procedures::COMPLETE_CHALLENGE,
                json!({ "actor_id": actor, "challenge_id": challenge_id }),
            ))
            .await;

        match result {
            Ok(confirmed) => {
                board.commit(id);
                tracing::info!(
                    challenge_id = %challenge_id,
                    points = current.challenge.points,
                    total = ?confirmed.get("points"),
                    "Challenge completed"
                );
                Ok(MutationOutcome::Applied)
            }
            Err(e) => self.reject(board, id, e, "Already completed"),
        }
    }

    /// Join a team.
    pub async fn join_team(
        &self,
        teams: &LiveView<TeamView>,
        team_id: &str,
    ) -> SyncResult<MutationOutcome> {
        let actor = self.actor()?;
        let Some(_guard) = self.claim(&actor, &format!("team:{team_id}")) else {
            return Ok(MutationOutcome::Ignored);
        };
        let Some(current) = teams.get(team_id) else {
            return Ok(self.unavailable());
        };
        if current.is_member {
            return Ok(self.already_done("Already a member"));
        }

        let id = teams.apply_delta(Arc::new(MembershipDelta {
            team_id: team_id.to_string(),
            member: true,
        }));
        let result = self
            .remote(self.store.insert(
                Table::TeamMember,
                object(json!({ "team_id": team_id, "actor_id": actor, "role": "member" })),
            ))
            .await;

        match result {
            Ok(_) => {
                teams.commit(id);
                Ok(MutationOutcome::Applied)
            }
            Err(e) => self.reject(teams, id, e, "Already a member"),
        }
    }

    /// Leave a team. Leaving a team the actor is not in does nothing.
    pub async fn leave_team(
        &self,
        teams: &LiveView<TeamView>,
        team_id: &str,
    ) -> SyncResult<MutationOutcome> {
        let actor = self.actor()?;
        let Some(_guard) = self.claim(&actor, &format!("team:{team_id}")) else {
            return Ok(MutationOutcome::Ignored);
        };
        match teams.get(team_id) {
            None => return Ok(self.unavailable()),
            Some(current) if !current.is_member => return Ok(MutationOutcome::Ignored),
            Some(_) => {}
        }

        let id = teams.apply_delta(Arc::new(MembershipDelta {
            team_id: team_id.to_string(),
            member: false,
        }));
        let result = self
            .remote(self.delete_where(
                Table::TeamMember,
                Filter::eq("team_id", team_id).and(Filter::eq("actor_id", actor.as_str())),
            ))
            .await;

        match result {
            Ok(()) => {
                teams.commit(id);
                Ok(MutationOutcome::Applied)
            }
            Err(e) => self.reject(teams, id, e, "Already left"),
        }
    }

    /// Post a comment under `parent_id`, showing it at the end of the thread
    /// until the server assigns its id.
    pub async fn submit_comment(
        &self,
        thread: &LiveView<CommentView>,
        parent_id: &str,
        body: &str,
    ) -> SyncResult<MutationOutcome> {
        let actor = self.actor()?;
        let body = body.trim();
        let input = CommentInput {
            body: body.to_string(),
        };
        if let Err(e) = input.validate() {
            let err = SyncError::from(e);
            self.notifier.notify(Notice::warning(
                "invalid",
                format!("Comments must be between 1 and {MAX_COMMENT_CHARS} characters."),
            ));
            return Err(err);
        }
        let Some(_guard) = self.claim(&actor, &format!("comment:{parent_id}")) else {
            return Ok(MutationOutcome::Ignored);
        };

        let pending = CommentView {
            post: Post {
                id: self.id_gen.generate_temp(),
                parent_id: Some(parent_id.to_string()),
                author_id: actor.clone(),
                title: None,
                body: body.to_string(),
                is_public: true,
                view_count: 0,
                category: None,
                latitude: None,
                longitude: None,
                created_at: Utc::now(),
            },
            author: None,
            comment_count: 0,
            reactions: Default::default(),
            user_reaction: None,
        };
        let id = thread.apply_delta(Arc::new(InsertDelta {
            item: pending.clone(),
            position: Position::Back,
        }));

        let result = self
            .remote(self.store.insert(
                Table::Comment,
                object(json!({
                    "parent_id": parent_id,
                    "author_id": actor,
                    "body": body,
                    "is_public": true,
                })),
            ))
            .await;

        match result {
            Ok(row) => {
                match Post::from_row(Table::Comment, row) {
                    Ok(post) => {
                        tracing::debug!(comment_id = %post.id, parent_id = %parent_id, "Comment saved");
                        let confirmed = CommentView { post, ..pending };
                        thread.commit_with(
                            id,
                            Arc::new(InsertDelta {
                                item: confirmed,
                                position: Position::Back,
                            }),
                        );
                    }
                    Err(e) => {
                        // Saved but unreadable; the next refetch brings the stored row.
                        tracing::warn!(error = %e, "Could not decode saved comment");
                        thread.rollback(id);
                    }
                }
                Ok(MutationOutcome::Applied)
            }
            Err(e) => self.reject(thread, id, e, "Already posted"),
        }
    }

    /// Set a goal's progress, clamped to its target.
    pub async fn update_goal_progress(
        &self,
        goals: &LiveView<GoalView>,
        goal_id: &str,
        progress: f64,
    ) -> SyncResult<MutationOutcome> {
        let actor = self.actor()?;
        let Some(_guard) = self.claim(&actor, &format!("goal:{goal_id}")) else {
            return Ok(MutationOutcome::Ignored);
        };
        let Some(current) = goals.get(goal_id) else {
            return Ok(self.unavailable());
        };

        let mut goal = current.goal;
        let previous = goal.progress;
        goal.set_progress(progress);
        if (goal.progress - previous).abs() < f64::EPSILON {
            return Ok(MutationOutcome::Ignored);
        }

        let fields = object(json!({ "progress": goal.progress, "completed": goal.completed }));
        let id = goals.apply_delta(Arc::new(GoalDelta { goal }));
        let result = self
            .remote(self.store.update(Table::Goal, goal_id, fields))
            .await;

        match result {
            Ok(row) => {
                match Goal::from_row(Table::Goal, row) {
                    Ok(goal) => goals.commit_with(id, Arc::new(GoalDelta { goal })),
                    Err(_) => goals.commit(id),
                }
                Ok(MutationOutcome::Applied)
            }
            Err(e) => self.reject(goals, id, e, "Already saved"),
        }
    }

    /// Moderation: delete a post, hiding it until the delete is confirmed.
    pub async fn remove_post(
        &self,
        feed: &LiveView<PostView>,
        table: Table,
        post_id: &str,
    ) -> SyncResult<MutationOutcome> {
        let actor = self.actor()?;
        let Some(_guard) = self.claim(&actor, &format!("remove:{post_id}")) else {
            return Ok(MutationOutcome::Ignored);
        };
        if feed.get(post_id).is_none() {
            return Ok(MutationOutcome::Ignored);
        }

        let id = feed.apply_delta(Arc::new(RemoveDelta {
            key: post_id.to_string(),
        }));
        match self.remote(self.store.delete(table, post_id)).await {
            Ok(()) => {
                feed.commit(id);
                tracing::info!(%table, post_id = %post_id, "Post removed");
                Ok(MutationOutcome::Applied)
            }
            Err(e) => self.reject(feed, id, e, "Already removed"),
        }
    }

    /// Count a view of a post in the background. Failures are only logged.
    pub fn record_view(&self, table: Table, post_id: &str) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let timeout = self.timeout;
        let post_id = post_id.to_string();
        tokio::spawn(async move {
            let request = store.invoke(
                procedures::INCREMENT_VIEW_COUNT,
                json!({ "table": table.name(), "id": post_id }),
            );
            match tokio::time::timeout(timeout, request).await {
                Ok(Ok(_)) => tracing::trace!(post_id = %post_id, "View recorded"),
                Ok(Err(e)) => tracing::warn!(post_id = %post_id, error = %e, "Failed to record view"),
                Err(_) => tracing::warn!(post_id = %post_id, "Recording view timed out"),
            }
        })
    }

    /// Delete every row matching `filter`.
    async fn delete_where(&self, table: Table, filter: Filter) -> Result<(), StoreError> {
        let rows = self.store.query(table, &filter, None, None).await?;
        for row in rows {
            if let Some(id) = row.get("id").and_then(Value::as_str) {
                self.store.delete(table, id).await?;
            }
        }
        Ok(())
    }
}

fn object(value: Value) -> Row {
    match value {
        Value::Object(row) => row,
        _ => Row::new(),
    }
}
