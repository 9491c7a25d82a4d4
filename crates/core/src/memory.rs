//! In-process [`RemoteStore`].
//!
//! Enforces the same unique keys and foreign keys as the relational schema,
//! fans inserts out to matching subscriptions, and exposes hooks for
//! scripting failures and latency.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use ecolearn_common::IdGenerator;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::models::{ImpactStats, Record};
use crate::row::{Filter, Order, Row, Table};
use crate::store::{
    ChannelHandle, InsertEvent, RemoteStore, SUBSCRIPTION_BUFFER, StoreError, Subscription,
    procedures,
};

/// Store operations that can be scripted to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Query,
    Insert,
    Update,
    Delete,
    Upsert,
    Subscribe,
    Invoke,
}

/// Custom remote procedure.
pub type Procedure = Arc<dyn Fn(Value) -> Result<Value, StoreError> + Send + Sync>;

struct Channel {
    table: Table,
    filter: Filter,
    tx: mpsc::Sender<InsertEvent>,
}

struct ScriptedFailure {
    op: Operation,
    table: Option<Table>,
    error: StoreError,
}

#[derive(Default)]
struct Inner {
    tables: HashMap<Table, Vec<Row>>,
    channels: HashMap<ChannelHandle, Channel>,
    next_channel: u64,
    failures: VecDeque<ScriptedFailure>,
    query_delays: VecDeque<(Option<Table>, Duration)>,
    write_delays: VecDeque<Duration>,
    procedures: HashMap<String, Procedure>,
    queries: u64,
    writes: u64,
}

/// In-memory relational store with realtime insert notifications.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    id_gen: IdGenerator,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Put rows in place without notifying subscribers.
    pub fn seed(&self, table: Table, rows: impl IntoIterator<Item = Row>) {
        let mut inner = self.lock();
        for row in rows {
            let row = prepare(table, row, &self.id_gen);
            inner.tables.entry(table).or_default().push(row);
        }
    }

    /// Seed typed records.
    pub fn seed_records<'a, T: Record + 'a>(
        &self,
        table: Table,
        records: impl IntoIterator<Item = &'a T>,
    ) -> Result<(), StoreError> {
        let rows = records
            .into_iter()
            .map(|record| record.to_row(table))
            .collect::<Result<Vec<_>, _>>()?;
        self.seed(table, rows);
        Ok(())
    }

    /// Every row of `table`, in insertion order.
    #[must_use]
    pub fn rows(&self, table: Table) -> Vec<Row> {
        self.lock().tables.get(&table).cloned().unwrap_or_default()
    }

    /// Number of rows in `table` matching `filter`.
    #[must_use]
    pub fn count(&self, table: Table, filter: &Filter) -> usize {
        self.lock()
            .tables
            .get(&table)
            .map_or(0, |rows| rows.iter().filter(|row| filter.matches(row)).count())
    }

    /// Fail the next `op` on any table.
    pub fn fail_next(&self, op: Operation, error: StoreError) {
        self.lock().failures.push_back(ScriptedFailure {
            op,
            table: None,
            error,
        });
    }

    /// Fail the next `op` on `table`.
    pub fn fail_next_on(&self, op: Operation, table: Table, error: StoreError) {
        self.lock().failures.push_back(ScriptedFailure {
            op,
            table: Some(table),
            error,
        });
    }

    /// Deliver the result of the next query only after `delay`.
    ///
    /// The result reflects the data at the time the query was issued.
    pub fn delay_next_query(&self, delay: Duration) {
        self.lock().query_delays.push_back((None, delay));
    }

    /// Deliver the result of the next query on `table` only after `delay`.
    pub fn delay_next_query_on(&self, table: Table, delay: Duration) {
        self.lock().query_delays.push_back((Some(table), delay));
    }

    /// Apply the next write only after `delay`.
    pub fn delay_next_write(&self, delay: Duration) {
        self.lock().write_delays.push_back(delay);
    }

    /// Register a custom procedure, shadowing built-ins with the same name.
    pub fn register_procedure<F>(&self, name: impl Into<String>, procedure: F)
    where
        F: Fn(Value) -> Result<Value, StoreError> + Send + Sync + 'static,
    {
        self.lock()
            .procedures
            .insert(name.into(), Arc::new(procedure));
    }

    /// Queries served so far.
    #[must_use]
    pub fn query_count(&self) -> u64 {
        self.lock().queries
    }

    /// Writes attempted so far.
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.lock().writes
    }

    /// Subscription channels not yet released.
    #[must_use]
    pub fn active_channels(&self) -> usize {
        self.lock().channels.len()
    }

    async fn write_delay(&self) {
        let delay = self.lock().write_delays.pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn begin_write(&self, op: Operation, table: Table) -> Result<MutexGuard<'_, Inner>, StoreError> {
        let mut inner = self.lock();
        inner.writes += 1;
        match inner.take_failure(op, Some(table)) {
            Some(error) => Err(error),
            None => Ok(inner),
        }
    }
}

impl Inner {
    fn take_failure(&mut self, op: Operation, table: Option<Table>) -> Option<StoreError> {
        let position = self.failures.iter().position(|failure| {
            failure.op == op && (failure.table.is_none() || failure.table == table)
        })?;
        self.failures.remove(position).map(|failure| failure.error)
    }

    fn take_query_delay(&mut self, table: Table) -> Option<Duration> {
        let position = self
            .query_delays
            .iter()
            .position(|(scope, _)| scope.is_none_or(|scope| scope == table))?;
        self.query_delays.remove(position).map(|(_, delay)| delay)
    }

    fn select(
        &self,
        table: Table,
        filter: &Filter,
        order: Option<&Order>,
        limit: Option<u64>,
    ) -> Vec<Row> {
        let mut rows: Vec<Row> = self
            .tables
            .get(&table)
            .map(|rows| rows.iter().filter(|row| filter.matches(row)).cloned().collect())
            .unwrap_or_default();
        if let Some(order) = order {
            rows.sort_by(|a, b| order.compare(a, b));
        }
        if let Some(limit) = limit {
            rows.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        }
        rows
    }

    fn find_mut(&mut self, table: Table, id: &str) -> Option<&mut Row> {
        self.tables
            .get_mut(&table)?
            .iter_mut()
            .find(|row| row_id(row) == Some(id))
    }

    fn contains(&self, table: Table, id: &str) -> bool {
        self.tables
            .get(&table)
            .is_some_and(|rows| rows.iter().any(|row| row_id(row) == Some(id)))
    }

    fn find_by_key(&self, table: Table, row: &Row, key: &[&str]) -> Option<String> {
        self.tables.get(&table)?.iter().find_map(|existing| {
            key.iter()
                .all(|column| existing.get(*column) == row.get(*column))
                .then(|| row_id(existing).map(str::to_string))
                .flatten()
        })
    }

    fn check_parent(&self, table: Table, row: &Row) -> Result<(), StoreError> {
        let Some((column, parents)) = table.parent() else {
            return Ok(());
        };
        let parent_id = row.get(column).and_then(Value::as_str).unwrap_or_default();
        if parents.iter().any(|parent| self.contains(*parent, parent_id)) {
            return Ok(());
        }
        Err(StoreError::NotFound {
            table: parents.first().copied().unwrap_or(table),
            id: parent_id.to_string(),
        })
    }

    fn insert_row(&mut self, table: Table, row: Row) -> Result<Row, StoreError> {
        let id = row_id(&row).unwrap_or_default().to_string();
        if self.contains(table, &id) {
            return Err(StoreError::Constraint {
                table,
                key: "id".to_string(),
            });
        }
        self.check_parent(table, &row)?;
        if let Some(key) = table.unique_key() {
            if self.find_by_key(table, &row, key).is_some() {
                return Err(StoreError::Constraint {
                    table,
                    key: key.join(","),
                });
            }
        }
        self.tables.entry(table).or_default().push(row.clone());
        Ok(row)
    }

    fn remove_cascade(&mut self, table: Table, id: &str) {
        if let Some(rows) = self.tables.get_mut(&table) {
            rows.retain(|row| row_id(row) != Some(id));
        }
        for child in Table::ALL {
            let Some((column, parents)) = child.parent() else {
                continue;
            };
            if !parents.contains(&table) {
                continue;
            }
            let orphans: Vec<String> = self
                .tables
                .get(&child)
                .map(|rows| {
                    rows.iter()
                        .filter(|row| row.get(column).and_then(Value::as_str) == Some(id))
                        .filter_map(|row| row_id(row).map(str::to_string))
                        .collect()
                })
                .unwrap_or_default();
            for orphan in orphans {
                self.remove_cascade(child, &orphan);
            }
        }
    }

    fn publish(&self, table: Table, row: &Row) {
        for (handle, channel) in &self.channels {
            if channel.table != table || !channel.filter.matches(row) {
                continue;
            }
            let event = InsertEvent {
                table,
                row: row.clone(),
            };
            if channel.tx.try_send(event).is_err() {
                tracing::trace!(?handle, %table, "Subscriber queue full or closed");
            }
        }
    }

    fn count_where(&self, table: Table, filter: &Filter) -> u64 {
        self.tables.get(&table).map_or(0, |rows| {
            rows.iter().filter(|row| filter.matches(row)).count() as u64
        })
    }

    fn impact_stats(&self) -> ImpactStats {
        ImpactStats {
            profiles: self.count_where(Table::Profile, &Filter::All),
            climate_actions: self.count_where(Table::ClimateAction, &Filter::All),
            public_climate_actions: self
                .count_where(Table::ClimateAction, &Filter::eq("is_public", true)),
            forum_posts: self.count_where(Table::ForumPost, &Filter::All),
            comments: self.count_where(Table::Comment, &Filter::All),
            reactions: self.count_where(Table::Reaction, &Filter::All),
            challenge_completions: self.count_where(Table::ChallengeCompletion, &Filter::All),
            teams: self.count_where(Table::Team, &Filter::All),
        }
    }

    fn add_points(&mut self, actor_id: &str, points: i64) -> Result<i64, StoreError> {
        let profile = self
            .find_mut(Table::Profile, actor_id)
            .ok_or_else(|| StoreError::NotFound {
                table: Table::Profile,
                id: actor_id.to_string(),
            })?;
        let total = profile.get("points").and_then(Value::as_i64).unwrap_or(0) + points;
        profile.insert("points".to_string(), json!(total));
        Ok(total)
    }

    fn run_builtin(
        &mut self,
        procedure: &str,
        args: &Value,
        id_gen: &IdGenerator,
    ) -> Result<Value, StoreError> {
        match procedure {
            procedures::AWARD_POINTS => {
                let actor_id = str_arg(args, "actor_id")?;
                let points = args.get("points").and_then(Value::as_i64).unwrap_or(0);
                let total = self.add_points(&actor_id, points)?;
                Ok(json!({ "points": total }))
            }
            procedures::COMPLETE_CHALLENGE => {
                self.writes += 1;
                let actor_id = str_arg(args, "actor_id")?;
                let challenge_id = str_arg(args, "challenge_id")?;
                if !self.contains(Table::Profile, &actor_id) {
                    return Err(StoreError::NotFound {
                        table: Table::Profile,
                        id: actor_id,
                    });
                }
                let points = self
                    .tables
                    .get(&Table::Challenge)
                    .and_then(|rows| rows.iter().find(|row| row_id(row) == Some(challenge_id.as_str())))
                    .map(|row| row.get("points").and_then(Value::as_i64).unwrap_or(0))
                    .ok_or_else(|| StoreError::NotFound {
                        table: Table::Challenge,
                        id: challenge_id.clone(),
                    })?;

                let table = Table::ChallengeCompletion;
                let mut row = Row::new();
                row.insert("actor_id".to_string(), json!(actor_id));
                row.insert("challenge_id".to_string(), json!(challenge_id));
                let completion = self.insert_row(table, prepare(table, row, id_gen))?;
                let total = self.add_points(&actor_id, points)?;
                self.publish(table, &completion);
                Ok(json!({ "completion": completion, "points": total }))
            }
            procedures::ADMIN_STATS => serde_json::to_value(self.impact_stats())
                .map_err(|e| StoreError::Backend(e.to_string())),
            procedures::INCREMENT_VIEW_COUNT => {
                let table = str_arg(args, "table")?;
                let table = Table::from_name(&table)
                    .filter(|table| table.is_post_like())
                    .ok_or_else(|| StoreError::Backend(format!("not a post table: {table}")))?;
                let id = str_arg(args, "id")?;
                let row = self
                    .find_mut(table, &id)
                    .ok_or(StoreError::NotFound { table, id })?;
                let views = row.get("view_count").and_then(Value::as_u64).unwrap_or(0) + 1;
                row.insert("view_count".to_string(), json!(views));
                Ok(json!({ "view_count": views }))
            }
            procedures::SEARCH_POSTS => {
                let needle = str_arg(args, "query")?.to_lowercase();
                let limit = args.get("limit").and_then(Value::as_u64).unwrap_or(20);
                let mut hits: Vec<Row> = [Table::ClimateAction, Table::ForumPost]
                    .into_iter()
                    .flat_map(|table| self.select(table, &Filter::eq("is_public", true), None, None))
                    .filter(|row| {
                        ["title", "body"].iter().any(|column| {
                            row.get(*column)
                                .and_then(Value::as_str)
                                .is_some_and(|text| text.to_lowercase().contains(&needle))
                        })
                    })
                    .collect();
                let order = Order::desc("created_at");
                hits.sort_by(|a, b| order.compare(a, b));
                hits.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
                Ok(Value::Array(hits.into_iter().map(Value::Object).collect()))
            }
            other => Err(StoreError::UnknownProcedure(other.to_string())),
        }
    }
}

fn row_id(row: &Row) -> Option<&str> {
    row.get("id").and_then(Value::as_str)
}

fn str_arg(args: &Value, name: &str) -> Result<String, StoreError> {
    args.get(name)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| StoreError::Backend(format!("missing argument {name}")))
}

/// Fill in the id and creation timestamp the way column defaults would.
fn prepare(table: Table, mut row: Row, id_gen: &IdGenerator) -> Row {
    if row_id(&row).is_none_or(str::is_empty) {
        row.insert("id".to_string(), Value::String(id_gen.generate()));
    }
    row.entry(table.timestamp_column().to_string())
        .or_insert_with(|| Value::String(Utc::now().to_rfc3339()));
    row
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn query(
        &self,
        table: Table,
        filter: &Filter,
        order: Option<&Order>,
        limit: Option<u64>,
    ) -> Result<Vec<Row>, StoreError> {
        let (result, delay) = {
            let mut inner = self.lock();
            inner.queries += 1;
            let delay = inner.take_query_delay(table);
            let result = match inner.take_failure(Operation::Query, Some(table)) {
                Some(error) => Err(error),
                None => Ok(inner.select(table, filter, order, limit)),
            };
            (result, delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        result
    }

    async fn insert(&self, table: Table, row: Row) -> Result<Row, StoreError> {
        self.write_delay().await;
        let mut inner = self.begin_write(Operation::Insert, table)?;
        let row = inner.insert_row(table, prepare(table, row, &self.id_gen))?;
        inner.publish(table, &row);
        Ok(row)
    }

    async fn update(&self, table: Table, id: &str, fields: Row) -> Result<Row, StoreError> {
        self.write_delay().await;
        let mut inner = self.begin_write(Operation::Update, table)?;
        let row = inner.find_mut(table, id).ok_or_else(|| StoreError::NotFound {
            table,
            id: id.to_string(),
        })?;
        for (column, value) in fields {
            if column != "id" {
                row.insert(column, value);
            }
        }
        Ok(row.clone())
    }

    async fn delete(&self, table: Table, id: &str) -> Result<(), StoreError> {
        self.write_delay().await;
        let mut inner = self.begin_write(Operation::Delete, table)?;
        inner.remove_cascade(table, id);
        Ok(())
    }

    async fn upsert(
        &self,
        table: Table,
        row: Row,
        conflict_key: &[&str],
    ) -> Result<Row, StoreError> {
        self.write_delay().await;
        let mut inner = self.begin_write(Operation::Upsert, table)?;
        let row = prepare(table, row, &self.id_gen);
        if let Some(existing_id) = inner.find_by_key(table, &row, conflict_key) {
            let existing = inner
                .find_mut(table, &existing_id)
                .ok_or(StoreError::NotFound {
                    table,
                    id: existing_id.clone(),
                })?;
            for (column, value) in row {
                if column != "id" && !conflict_key.contains(&column.as_str()) {
                    existing.insert(column, value);
                }
            }
            return Ok(existing.clone());
        }
        let row = inner.insert_row(table, row)?;
        inner.publish(table, &row);
        Ok(row)
    }

    async fn subscribe(&self, table: Table, filter: Filter) -> Result<Subscription, StoreError> {
        let mut inner = self.lock();
        if let Some(error) = inner.take_failure(Operation::Subscribe, Some(table)) {
            return Err(error);
        }
        inner.next_channel += 1;
        let handle = ChannelHandle(inner.next_channel);
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        inner.channels.insert(handle, Channel { table, filter, tx });
        tracing::trace!(?handle, %table, "Channel opened");
        Ok(Subscription::new(handle, rx))
    }

    async fn unsubscribe(&self, handle: ChannelHandle) -> Result<(), StoreError> {
        if self.lock().channels.remove(&handle).is_some() {
            tracing::trace!(?handle, "Channel released");
        }
        Ok(())
    }

    async fn invoke(&self, procedure: &str, args: Value) -> Result<Value, StoreError> {
        let custom = {
            let mut inner = self.lock();
            if let Some(error) = inner.take_failure(Operation::Invoke, None) {
                return Err(error);
            }
            inner.procedures.get(procedure).cloned()
        };
        match custom {
            Some(procedure) => procedure(args),
            None => self.lock().run_builtin(procedure, &args, &self.id_gen),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            _ => Row::new(),
        }
    }

    fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store.seed(
            Table::Profile,
            [row(json!({"id": "alice", "display_name": "Alice", "points": 5}))],
        );
        store.seed(
            Table::ClimateAction,
            [row(json!({"id": "p1", "author_id": "alice", "body": "Planted a tree", "is_public": true}))],
        );
        store
    }

    #[tokio::test]
    async fn test_insert_enforces_unique_key() {
        let store = seeded();
        let reaction = row(json!({"actor_id": "alice", "parent_id": "p1", "kind": "like"}));

        store.insert(Table::Reaction, reaction.clone()).await.unwrap();
        let err = store.insert(Table::Reaction, reaction).await.unwrap_err();

        assert_eq!(
            err,
            StoreError::Constraint {
                table: Table::Reaction,
                key: "actor_id,parent_id".to_string(),
            }
        );
        assert_eq!(store.rows(Table::Reaction).len(), 1);
    }

    #[tokio::test]
    async fn test_insert_requires_parent() {
        let store = seeded();
        let err = store
            .insert(
                Table::Comment,
                row(json!({"parent_id": "missing", "author_id": "alice", "body": "hi"})),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::NotFound { id, .. } if id == "missing"));
    }

    #[tokio::test]
    async fn test_upsert_replaces_on_conflict() {
        let store = seeded();
        let key = ["actor_id", "parent_id"];

        let first = store
            .upsert(
                Table::Reaction,
                row(json!({"actor_id": "alice", "parent_id": "p1", "kind": "like"})),
                &key,
            )
            .await
            .unwrap();
        let second = store
            .upsert(
                Table::Reaction,
                row(json!({"actor_id": "alice", "parent_id": "p1", "kind": "love"})),
                &key,
            )
            .await
            .unwrap();

        assert_eq!(first.get("id"), second.get("id"));
        assert_eq!(second.get("kind"), Some(&json!("love")));
        assert_eq!(store.rows(Table::Reaction).len(), 1);
    }

    #[tokio::test]
    async fn test_delete_cascades_to_children() {
        let store = seeded();
        let comment = store
            .insert(
                Table::Comment,
                row(json!({"parent_id": "p1", "author_id": "alice", "body": "Nice"})),
            )
            .await
            .unwrap();
        let comment_id = comment.get("id").and_then(Value::as_str).unwrap().to_string();
        store
            .insert(
                Table::Reaction,
                row(json!({"actor_id": "alice", "parent_id": comment_id, "kind": "like"})),
            )
            .await
            .unwrap();

        store.delete(Table::ClimateAction, "p1").await.unwrap();

        assert!(store.rows(Table::ClimateAction).is_empty());
        assert!(store.rows(Table::Comment).is_empty());
        assert!(store.rows(Table::Reaction).is_empty());
    }

    #[tokio::test]
    async fn test_subscription_receives_matching_inserts_only() {
        let store = seeded();
        let mut sub = store
            .subscribe(Table::ClimateAction, Filter::eq("is_public", true))
            .await
            .unwrap();

        store
            .insert(
                Table::ClimateAction,
                row(json!({"id": "hidden", "author_id": "alice", "body": "x", "is_public": false})),
            )
            .await
            .unwrap();
        store
            .insert(
                Table::ClimateAction,
                row(json!({"id": "shown", "author_id": "alice", "body": "y", "is_public": true})),
            )
            .await
            .unwrap();

        let event = sub.next().await.unwrap();
        assert_eq!(event.row.get("id"), Some(&json!("shown")));
        assert_eq!(store.active_channels(), 1);

        store.unsubscribe(sub.handle()).await.unwrap();
        assert_eq!(store.active_channels(), 0);
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn test_scripted_failure_is_consumed_once() {
        let store = seeded();
        store.fail_next_on(
            Operation::Query,
            Table::Comment,
            StoreError::Network("reset".to_string()),
        );

        assert!(store
            .query(Table::ClimateAction, &Filter::All, None, None)
            .await
            .is_ok());
        assert!(store
            .query(Table::Comment, &Filter::All, None, None)
            .await
            .is_err());
        assert!(store
            .query(Table::Comment, &Filter::All, None, None)
            .await
            .is_ok());
        assert_eq!(store.query_count(), 3);
    }

    #[tokio::test]
    async fn test_builtin_procedures() {
        let store = seeded();

        let awarded = store
            .invoke(
                procedures::AWARD_POINTS,
                json!({"actor_id": "alice", "points": 10}),
            )
            .await
            .unwrap();
        assert_eq!(awarded, json!({"points": 15}));

        let views = store
            .invoke(
                procedures::INCREMENT_VIEW_COUNT,
                json!({"table": "climate_action", "id": "p1"}),
            )
            .await
            .unwrap();
        assert_eq!(views, json!({"view_count": 1}));

        let stats: ImpactStats =
            serde_json::from_value(store.invoke(procedures::ADMIN_STATS, json!({})).await.unwrap())
                .unwrap();
        assert_eq!(stats.profiles, 1);
        assert_eq!(stats.public_climate_actions, 1);

        let hits = store
            .invoke(procedures::SEARCH_POSTS, json!({"query": "TREE"}))
            .await
            .unwrap();
        assert_eq!(hits.as_array().map(Vec::len), Some(1));

        let err = store.invoke("nope", json!({})).await.unwrap_err();
        assert_eq!(err, StoreError::UnknownProcedure("nope".to_string()));
    }
}
