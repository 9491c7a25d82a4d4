//! Remote store client abstraction.
//!
//! The synchronization core only talks to storage through [`RemoteStore`].
//! Implementations decide the transport: [`crate::MemoryStore`] keeps
//! everything in-process, `ecolearn-db` provides a `PostgreSQL` backend.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::row::{Filter, Order, Row, Table};

/// Buffered insert events per subscription. A full buffer already guarantees
/// a pending refetch, so further events may be dropped.
pub const SUBSCRIPTION_BUFFER: usize = 256;

/// Low-level store failure, before classification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The store could not be reached.
    #[error("network error: {0}")]
    Network(String),

    /// A unique key already holds a row.
    #[error("unique constraint violated on {table} ({key})")]
    Constraint {
        /// Table the insert targeted.
        table: Table,
        /// Comma-separated key columns.
        key: String,
    },

    /// The caller's identity was rejected.
    #[error("unauthorized")]
    Unauthorized,

    /// The row, or the parent it references, does not exist.
    #[error("{table} row not found: {id}")]
    NotFound {
        /// Table that was looked up.
        table: Table,
        /// Missing id.
        id: String,
    },

    /// A returned row did not have the expected shape.
    #[error("malformed row in {table}: {message}")]
    Decode {
        /// Table the row came from.
        table: Table,
        /// Decoder message.
        message: String,
    },

    /// No remote procedure with this name.
    #[error("unknown procedure: {0}")]
    UnknownProcedure(String),

    /// Any other backend failure.
    #[error("backend error: {0}")]
    Backend(String),
}

/// A row inserted into a subscribed table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertEvent {
    /// Table the row was inserted into.
    pub table: Table,
    /// The inserted row.
    pub row: Row,
}

/// Process-local identifier of a live subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelHandle(pub u64);

/// A live subscription: its handle plus the stream of matching insert events.
///
/// The stream ends when the store releases the channel.
#[derive(Debug)]
pub struct Subscription {
    handle: ChannelHandle,
    events: mpsc::Receiver<InsertEvent>,
}

impl Subscription {
    /// Wrap a receiver fed by the store.
    #[must_use]
    pub const fn new(handle: ChannelHandle, events: mpsc::Receiver<InsertEvent>) -> Self {
        Self { handle, events }
    }

    /// Handle to pass to [`RemoteStore::unsubscribe`].
    #[must_use]
    pub const fn handle(&self) -> ChannelHandle {
        self.handle
    }
}

impl Stream for Subscription {
    type Item = InsertEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_recv(cx)
    }
}

/// Row storage with realtime insert notifications.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Rows of `table` matching `filter`, sorted by `order`, at most `limit`.
    async fn query(
        &self,
        table: Table,
        filter: &Filter,
        order: Option<&Order>,
        limit: Option<u64>,
    ) -> Result<Vec<Row>, StoreError>;

    /// Insert a row and return it as stored.
    async fn insert(&self, table: Table, row: Row) -> Result<Row, StoreError>;

    /// Overwrite `fields` of the row with `id`.
    async fn update(&self, table: Table, id: &str, fields: Row) -> Result<Row, StoreError>;

    /// Delete the row with `id`. Deleting a missing row succeeds.
    async fn delete(&self, table: Table, id: &str) -> Result<(), StoreError>;

    /// Insert, or update the row already holding `conflict_key`.
    async fn upsert(
        &self,
        table: Table,
        row: Row,
        conflict_key: &[&str],
    ) -> Result<Row, StoreError>;

    /// Register for inserts into `table` that match `filter`.
    async fn subscribe(&self, table: Table, filter: Filter) -> Result<Subscription, StoreError>;

    /// Release a subscription channel.
    async fn unsubscribe(&self, handle: ChannelHandle) -> Result<(), StoreError>;

    /// Run a server-side procedure.
    async fn invoke(&self, procedure: &str, args: Value) -> Result<Value, StoreError>;
}

/// Shared store handle passed to every component.
pub type StoreHandle = Arc<dyn RemoteStore>;

/// Names of the procedures every backend provides.
pub mod procedures {
    /// `{actor_id, points}` -> `{points}`: add points to a profile.
    pub const AWARD_POINTS: &str = "award_points";
    /// `{actor_id, challenge_id}` -> `{completion, points}`: record a completion
    /// and award the challenge's points in one transaction.
    pub const COMPLETE_CHALLENGE: &str = "complete_challenge";
    /// `{}` -> `ImpactStats`: aggregate counts.
    pub const ADMIN_STATS: &str = "admin_stats";
    /// `{query, limit?}` -> rows: public posts whose title or body matches.
    pub const SEARCH_POSTS: &str = "search_posts";
    /// `{table, id}` -> `{view_count}`: count a view of a post.
    pub const INCREMENT_VIEW_COUNT: &str = "increment_view_count";
}
