//! `PostgreSQL` remote store.
//!
//! Rows cross the store boundary as JSON objects. Every operation picks the
//! sea-orm entity for its [`Table`] and round-trips rows through the entity
//! model, so column names and types are checked by serde before SQL runs.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use ecolearn_common::IdGenerator;
use ecolearn_core::{
    ChannelHandle, Direction, Filter, ImpactStats, InsertEvent, Order, RemoteStore, Row,
    StoreError, Subscription, Table, procedures,
};
use sea_orm::sea_query::{Expr, Func, OnConflict};
use sea_orm::{
    ActiveModelBehavior, ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait,
    DatabaseConnection, DbErr, EntityTrait, IdenStatic, IntoActiveModel, Iterable,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, SqlErr, TransactionTrait,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::hub::{InsertHub, InsertRelay};

/// Default result size of `search_posts`.
const SEARCH_LIMIT: u64 = 20;

/// Run `$body` with `$m` bound to the entity module of `$table`.
macro_rules! with_entity {
    ($table:expr, $m:ident => $body:expr) => {
        match $table {
            Table::Profile => {
                use crate::entities::profile as $m;
                $body
            }
            Table::ForumPost => {
                use crate::entities::forum_post as $m;
                $body
            }
            Table::ClimateAction => {
                use crate::entities::climate_action as $m;
                $body
            }
            Table::Comment => {
                use crate::entities::comment as $m;
                $body
            }
            Table::Reaction => {
                use crate::entities::reaction as $m;
                $body
            }
            Table::Challenge => {
                use crate::entities::challenge as $m;
                $body
            }
            Table::ChallengeCompletion => {
                use crate::entities::challenge_completion as $m;
                $body
            }
            Table::Goal => {
                use crate::entities::goal as $m;
                $body
            }
            Table::Team => {
                use crate::entities::team as $m;
                $body
            }
            Table::TeamMember => {
                use crate::entities::team_member as $m;
                $body
            }
        }
    };
}

/// Remote store backed by `PostgreSQL`.
#[derive(Clone)]
pub struct PgStore {
    db: Arc<DatabaseConnection>,
    hub: Arc<InsertHub>,
    relay: Option<Arc<dyn InsertRelay>>,
    id_gen: IdGenerator,
}

impl PgStore {
    /// Create a store over an open connection pool.
    #[must_use]
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            db,
            hub: Arc::new(InsertHub::default()),
            relay: None,
            id_gen: IdGenerator::new(),
        }
    }

    /// Also announce every insert through `relay`.
    #[must_use]
    pub fn with_relay(mut self, relay: Arc<dyn InsertRelay>) -> Self {
        self.relay = Some(relay);
        self
    }

    /// Hub feeding this store's subscriptions. Relays publish foreign inserts here.
    #[must_use]
    pub fn hub(&self) -> Arc<InsertHub> {
        Arc::clone(&self.hub)
    }

    /// Number of open subscriptions.
    #[must_use]
    pub fn active_channels(&self) -> usize {
        self.hub.active()
    }

    fn prepare(&self, table: Table, mut row: Row) -> Row {
        if row.get("id").and_then(Value::as_str).is_none_or(str::is_empty) {
            row.insert("id".to_string(), Value::String(self.id_gen.generate()));
        }
        row.entry(table.timestamp_column().to_string())
            .or_insert_with(|| Value::String(Utc::now().to_rfc3339()));
        row
    }

    async fn announce(&self, table: Table, row: &Row) {
        let event = InsertEvent {
            table,
            row: row.clone(),
        };
        if let Some(relay) = &self.relay {
            if let Err(e) = relay.relay(&event).await {
                warn!(%table, error = %e, "Failed to relay insert");
            }
        }
        self.hub.publish(event);
    }

    /// Reject rows whose parent post, challenge or team does not exist.
    async fn ensure_parent<C: ConnectionTrait>(
        db: &C,
        table: Table,
        row: &Row,
    ) -> Result<(), StoreError> {
        let Some((column, parents)) = table.parent() else {
            return Ok(());
        };
        let parent_id = row.get(column).and_then(Value::as_str).unwrap_or_default();
        let first = parents.first().copied().unwrap_or(table);
        if parent_id.is_empty() {
            return Err(StoreError::NotFound {
                table: first,
                id: String::new(),
            });
        }
        for parent in parents {
            let filter = Filter::eq("id", parent_id);
            let found = with_entity!(*parent, m => count_rows::<m::Entity, _>(db, *parent, &filter).await)?;
            if found > 0 {
                return Ok(());
            }
        }
        Err(StoreError::NotFound {
            table: first,
            id: parent_id.to_string(),
        })
    }

    async fn award_points(&self, args: &Value) -> Result<Value, StoreError> {
        let actor_id = str_arg(args, "actor_id")?;
        let points = args.get("points").and_then(Value::as_i64).unwrap_or(0);
        let total = add_points(self.db.as_ref(), &actor_id, points).await?;
        debug!(actor_id = %actor_id, points, total, "Points awarded");
        Ok(json!({ "points": total }))
    }

    async fn complete_challenge(&self, args: &Value) -> Result<Value, StoreError> {
        use crate::entities::{challenge, challenge_completion};

        let actor_id = str_arg(args, "actor_id")?;
        let challenge_id = str_arg(args, "challenge_id")?;
        let table = Table::ChallengeCompletion;
        let txn = self
            .db
            .begin()
            .await
            .map_err(|e| map_db_err(table, None, e))?;

        let points = challenge::Entity::find_by_id(challenge_id.as_str())
            .one(&txn)
            .await
            .map_err(|e| map_db_err(Table::Challenge, None, e))?
            .ok_or_else(|| StoreError::NotFound {
                table: Table::Challenge,
                id: challenge_id.clone(),
            })?
            .points;

        let mut row = Row::new();
        row.insert("actor_id".to_string(), json!(actor_id));
        row.insert("challenge_id".to_string(), json!(challenge_id));
        let row = self.prepare(table, row);
        let completion =
            insert_model::<challenge_completion::ActiveModel, _>(&txn, table, row).await?;
        let total = add_points(&txn, &actor_id, points).await?;

        // Dropping the transaction on any error above rolls the completion back.
        txn.commit()
            .await
            .map_err(|e| map_db_err(table, None, e))?;
        debug!(actor_id = %actor_id, challenge_id = %challenge_id, points, total, "Challenge completed");
        self.announce(table, &completion).await;
        Ok(json!({ "completion": completion, "points": total }))
    }

    async fn admin_stats(&self) -> Result<Value, StoreError> {
        let db = self.db.as_ref();
        let count = |table: Table, filter: Filter| async move {
            with_entity!(table, m => count_rows::<m::Entity, _>(db, table, &filter).await)
        };

        let stats = ImpactStats {
            profiles: count(Table::Profile, Filter::All).await?,
            climate_actions: count(Table::ClimateAction, Filter::All).await?,
            public_climate_actions: count(Table::ClimateAction, Filter::eq("is_public", true))
                .await?,
            forum_posts: count(Table::ForumPost, Filter::All).await?,
            comments: count(Table::Comment, Filter::All).await?,
            reactions: count(Table::Reaction, Filter::All).await?,
            challenge_completions: count(Table::ChallengeCompletion, Filter::All).await?,
            teams: count(Table::Team, Filter::All).await?,
        };
        serde_json::to_value(stats).map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn increment_view_count(&self, args: &Value) -> Result<Value, StoreError> {
        let name = str_arg(args, "table")?;
        let table = Table::from_name(&name)
            .filter(|table| table.is_post_like())
            .ok_or_else(|| StoreError::Backend(format!("not a post table: {name}")))?;
        let id = str_arg(args, "id")?;
        let db = self.db.as_ref();
        with_entity!(table, m => bump_view_count::<m::Entity, _>(db, table, &id).await)
    }

    async fn search_posts(&self, args: &Value) -> Result<Value, StoreError> {
        let query = str_arg(args, "query")?;
        let limit = args
            .get("limit")
            .and_then(Value::as_u64)
            .unwrap_or(SEARCH_LIMIT);
        let pattern = format!(
            "%{}%",
            query
                .to_lowercase()
                .replace('\\', "\\\\")
                .replace('%', "\\%")
                .replace('_', "\\_")
        );
        let db = self.db.as_ref();

        let mut hits = Vec::new();
        for table in [Table::ClimateAction, Table::ForumPost] {
            let rows = with_entity!(table, m => search_rows::<m::Entity, _>(db, table, &pattern, limit).await)?;
            hits.extend(rows);
        }
        let order = Order::desc("created_at");
        hits.sort_by(|a, b| order.compare(a, b));
        hits.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(Value::Array(hits.into_iter().map(Value::Object).collect()))
    }
}

#[async_trait]
impl RemoteStore for PgStore {
    async fn query(
        &self,
        table: Table,
        filter: &Filter,
        order: Option<&Order>,
        limit: Option<u64>,
    ) -> Result<Vec<Row>, StoreError> {
        let db = self.db.as_ref();
        with_entity!(table, m => select_rows::<m::Entity, _>(db, table, filter, order, limit).await)
    }

    async fn insert(&self, table: Table, row: Row) -> Result<Row, StoreError> {
        let row = self.prepare(table, row);
        let db = self.db.as_ref();
        Self::ensure_parent(db, table, &row).await?;

        let stored =
            with_entity!(table, m => insert_model::<m::ActiveModel, _>(db, table, row).await)?;
        debug!(%table, id = ?stored.get("id"), "Row inserted");
        self.announce(table, &stored).await;
        Ok(stored)
    }

    async fn update(&self, table: Table, id: &str, fields: Row) -> Result<Row, StoreError> {
        let db = self.db.as_ref();
        with_entity!(table, m => update_model::<m::ActiveModel, _>(db, table, id, fields).await)
    }

    async fn delete(&self, table: Table, id: &str) -> Result<(), StoreError> {
        let txn = self
            .db
            .begin()
            .await
            .map_err(|e| map_db_err(table, None, e))?;

        // Comments and reactions reference several parent tables, so their
        // cascade cannot be a SQL foreign key.
        let mut doomed = vec![(table, vec![id.to_string()])];
        let mut frontier = doomed.clone();
        while let Some((parent, ids)) = frontier.pop() {
            for child in Table::ALL {
                let Some((column, parents)) = child.parent() else {
                    continue;
                };
                if !parents.contains(&parent) {
                    continue;
                }
                let filter = Filter::is_in(column, ids.clone());
                let rows = with_entity!(child, m => select_rows::<m::Entity, _>(&txn, child, &filter, None, None).await)?;
                let child_ids: Vec<String> = rows
                    .iter()
                    .filter_map(|row| row.get("id").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect();
                if !child_ids.is_empty() {
                    doomed.push((child, child_ids.clone()));
                    frontier.push((child, child_ids));
                }
            }
        }

        for (table, ids) in doomed.into_iter().rev() {
            let filter = Filter::is_in("id", ids);
            with_entity!(table, m => delete_rows::<m::Entity, _>(&txn, table, &filter).await)?;
        }

        txn.commit()
            .await
            .map_err(|e| map_db_err(table, None, e))?;
        debug!(%table, id, "Row deleted");
        Ok(())
    }

    async fn upsert(
        &self,
        table: Table,
        row: Row,
        conflict_key: &[&str],
    ) -> Result<Row, StoreError> {
        let row = self.prepare(table, row);
        let requested = row.get("id").cloned();
        let db = self.db.as_ref();
        Self::ensure_parent(db, table, &row).await?;

        let stored = with_entity!(table, m => upsert_model::<m::ActiveModel, _>(db, table, row, conflict_key).await)?;
        // The conflict path keeps the existing id.
        if stored.get("id") == requested.as_ref() {
            self.announce(table, &stored).await;
        }
        Ok(stored)
    }

    async fn subscribe(&self, table: Table, filter: Filter) -> Result<Subscription, StoreError> {
        Ok(self.hub.subscribe(table, filter))
    }

    async fn unsubscribe(&self, handle: ChannelHandle) -> Result<(), StoreError> {
        self.hub.release(handle);
        Ok(())
    }

    async fn invoke(&self, procedure: &str, args: Value) -> Result<Value, StoreError> {
        match procedure {
            procedures::AWARD_POINTS => self.award_points(&args).await,
            procedures::COMPLETE_CHALLENGE => self.complete_challenge(&args).await,
            procedures::ADMIN_STATS => self.admin_stats().await,
            procedures::INCREMENT_VIEW_COUNT => self.increment_view_count(&args).await,
            procedures::SEARCH_POSTS => self.search_posts(&args).await,
            other => Err(StoreError::UnknownProcedure(other.to_string())),
        }
    }
}

fn str_arg(args: &Value, name: &str) -> Result<String, StoreError> {
    args.get(name)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| StoreError::Backend(format!("missing argument {name}")))
}

/// Translate a database error into the store taxonomy.
pub(crate) fn map_db_err(table: Table, row: Option<&Row>, err: DbErr) -> StoreError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => {
            return StoreError::Constraint {
                table,
                key: table
                    .unique_key()
                    .map_or_else(|| "id".to_string(), |key| key.join(",")),
            };
        }
        Some(SqlErr::ForeignKeyConstraintViolation(_)) => {
            let (parent, id) = table.parent().map_or((table, String::new()), |(column, parents)| {
                let id = row
                    .and_then(|row| row.get(column))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                (parents.first().copied().unwrap_or(table), id)
            });
            return StoreError::NotFound { table: parent, id };
        }
        _ => {}
    }
    match err {
        DbErr::Conn(_) | DbErr::ConnectionAcquire(_) => StoreError::Network(err.to_string()),
        DbErr::RecordNotFound(id) => StoreError::NotFound { table, id },
        other => StoreError::Backend(other.to_string()),
    }
}

fn column<E: EntityTrait>(table: Table, name: &str) -> Result<E::Column, StoreError> {
    E::Column::from_str(name)
        .map_err(|_| StoreError::Backend(format!("unknown column {table}.{name}")))
}

fn sql_value(table: Table, column: &str, value: &Value) -> Result<sea_orm::Value, StoreError> {
    match value {
        Value::Bool(b) => Ok((*b).into()),
        Value::Number(n) => n
            .as_i64()
            .map(Into::into)
            .or_else(|| n.as_f64().map(Into::into))
            .ok_or_else(|| StoreError::Backend(format!("bad number for {table}.{column}"))),
        Value::String(s) => Ok(s.clone().into()),
        _ => Err(StoreError::Backend(format!(
            "unsupported filter value for {table}.{column}"
        ))),
    }
}

/// Translate a [`Filter`] into a SQL condition on `E`.
pub(crate) fn condition<E: EntityTrait>(
    table: Table,
    filter: &Filter,
) -> Result<Condition, StoreError> {
    Ok(match filter {
        Filter::All => Condition::all(),
        Filter::Eq { column: name, value } => {
            let col = column::<E>(table, name)?;
            if value.is_null() {
                Condition::all().add(col.is_null())
            } else {
                Condition::all().add(col.eq(sql_value(table, name, value)?))
            }
        }
        Filter::In {
            column: name,
            values,
        } => {
            let col = column::<E>(table, name)?;
            let values = values
                .iter()
                .map(|value| sql_value(table, name, value))
                .collect::<Result<Vec<_>, _>>()?;
            Condition::all().add(col.is_in(values))
        }
        Filter::And(filters) => {
            let mut all = Condition::all();
            for inner in filters {
                all = all.add(condition::<E>(table, inner)?);
            }
            all
        }
    })
}

const fn sort(direction: Direction) -> sea_orm::Order {
    match direction {
        Direction::Asc => sea_orm::Order::Asc,
        Direction::Desc => sea_orm::Order::Desc,
    }
}

fn to_row<M: Serialize>(table: Table, model: &M) -> Result<Row, StoreError> {
    match serde_json::to_value(model) {
        Ok(Value::Object(row)) => Ok(row),
        Ok(_) => Err(StoreError::Decode {
            table,
            message: "model did not encode as an object".to_string(),
        }),
        Err(e) => Err(StoreError::Decode {
            table,
            message: e.to_string(),
        }),
    }
}

fn from_row<M: DeserializeOwned>(table: Table, row: Row) -> Result<M, StoreError> {
    serde_json::from_value(Value::Object(row)).map_err(|e| StoreError::Decode {
        table,
        message: e.to_string(),
    })
}

async fn select_rows<E, C>(
    db: &C,
    table: Table,
    filter: &Filter,
    order: Option<&Order>,
    limit: Option<u64>,
) -> Result<Vec<Row>, StoreError>
where
    E: EntityTrait,
    E::Model: Serialize,
    C: ConnectionTrait,
{
    let mut select = E::find().filter(condition::<E>(table, filter)?);
    if let Some(order) = order {
        let direction = sort(order.direction);
        select = select
            .order_by(column::<E>(table, &order.column)?, direction.clone())
            .order_by(column::<E>(table, "id")?, direction);
    }
    if let Some(limit) = limit {
        select = select.limit(limit);
    }

    let models = select
        .all(db)
        .await
        .map_err(|e| map_db_err(table, None, e))?;
    models.iter().map(|model| to_row(table, model)).collect()
}

async fn count_rows<E, C>(db: &C, table: Table, filter: &Filter) -> Result<u64, StoreError>
where
    E: EntityTrait,
    E::Model: Sync,
    C: ConnectionTrait,
{
    E::find()
        .filter(condition::<E>(table, filter)?)
        .count(db)
        .await
        .map_err(|e| map_db_err(table, None, e))
}

async fn delete_rows<E, C>(db: &C, table: Table, filter: &Filter) -> Result<u64, StoreError>
where
    E: EntityTrait,
    C: ConnectionTrait,
{
    E::delete_many()
        .filter(condition::<E>(table, filter)?)
        .exec(db)
        .await
        .map(|result| result.rows_affected)
        .map_err(|e| map_db_err(table, None, e))
}

async fn insert_model<A, C>(db: &C, table: Table, row: Row) -> Result<Row, StoreError>
where
    A: ActiveModelTrait + ActiveModelBehavior + Send,
    <A::Entity as EntityTrait>::Model: IntoActiveModel<A> + Serialize + DeserializeOwned,
    C: ConnectionTrait,
{
    let model: <A::Entity as EntityTrait>::Model = from_row(table, row.clone())?;
    let stored = model
        .into_active_model()
        .reset_all()
        .insert(db)
        .await
        .map_err(|e| map_db_err(table, Some(&row), e))?;
    to_row(table, &stored)
}

async fn update_model<A, C>(db: &C, table: Table, id: &str, fields: Row) -> Result<Row, StoreError>
where
    A: ActiveModelTrait + ActiveModelBehavior + Send,
    <A::Entity as EntityTrait>::Model: IntoActiveModel<A> + Serialize + DeserializeOwned,
    C: ConnectionTrait,
{
    let existing = <A::Entity as EntityTrait>::find()
        .filter(condition::<A::Entity>(table, &Filter::eq("id", id))?)
        .one(db)
        .await
        .map_err(|e| map_db_err(table, None, e))?
        .ok_or_else(|| StoreError::NotFound {
            table,
            id: id.to_string(),
        })?;

    let mut row = to_row(table, &existing)?;
    for (name, value) in fields {
        if name != "id" {
            row.insert(name, value);
        }
    }
    let model: <A::Entity as EntityTrait>::Model = from_row(table, row)?;
    let stored = model
        .into_active_model()
        .reset_all()
        .update(db)
        .await
        .map_err(|e| map_db_err(table, None, e))?;
    to_row(table, &stored)
}

async fn upsert_model<A, C>(
    db: &C,
    table: Table,
    row: Row,
    conflict_key: &[&str],
) -> Result<Row, StoreError>
where
    A: ActiveModelTrait + ActiveModelBehavior + Send,
    <A::Entity as EntityTrait>::Model: IntoActiveModel<A> + Serialize + DeserializeOwned,
    C: ConnectionTrait,
{
    let keys = conflict_key
        .iter()
        .map(|name| column::<A::Entity>(table, name))
        .collect::<Result<Vec<_>, _>>()?;
    let stamp = table.timestamp_column();
    let mut updates: Vec<_> = <A::Entity as EntityTrait>::Column::iter()
        .filter(|col| {
            let name = col.as_str();
            name != "id" && name != stamp && !conflict_key.contains(&name)
        })
        .collect();
    if updates.is_empty() {
        // Rewrite the key onto itself so the existing row is still returned.
        updates.clone_from(&keys);
    }
    let on_conflict = OnConflict::columns(keys)
        .update_columns(updates)
        .to_owned();

    let model: <A::Entity as EntityTrait>::Model = from_row(table, row.clone())?;
    let stored = <A::Entity as EntityTrait>::insert(model.into_active_model().reset_all())
        .on_conflict(on_conflict)
        .exec_with_returning(db)
        .await
        .map_err(|e| map_db_err(table, Some(&row), e))?;
    to_row(table, &stored)
}

/// Add `points` to a profile and return its new total.
async fn add_points<C: ConnectionTrait>(db: &C, actor_id: &str, points: i64) -> Result<i64, StoreError> {
    use crate::entities::profile;

    let result = profile::Entity::update_many()
        .col_expr(
            profile::Column::Points,
            Expr::col(profile::Column::Points).add(points),
        )
        .filter(profile::Column::Id.eq(actor_id))
        .exec(db)
        .await
        .map_err(|e| map_db_err(Table::Profile, None, e))?;
    if result.rows_affected == 0 {
        return Err(StoreError::NotFound {
            table: Table::Profile,
            id: actor_id.to_string(),
        });
    }

    Ok(profile::Entity::find_by_id(actor_id)
        .one(db)
        .await
        .map_err(|e| map_db_err(Table::Profile, None, e))?
        .map_or(0, |profile| profile.points))
}

async fn bump_view_count<E, C>(db: &C, table: Table, id: &str) -> Result<Value, StoreError>
where
    E: EntityTrait,
    E::Model: Serialize,
    C: ConnectionTrait,
{
    let views = column::<E>(table, "view_count")?;
    let result = E::update_many()
        .col_expr(views, Expr::col(views).add(1))
        .filter(condition::<E>(table, &Filter::eq("id", id))?)
        .exec(db)
        .await
        .map_err(|e| map_db_err(table, None, e))?;
    if result.rows_affected == 0 {
        return Err(StoreError::NotFound {
            table,
            id: id.to_string(),
        });
    }

    let rows = select_rows::<E, _>(db, table, &Filter::eq("id", id), None, Some(1)).await?;
    let count = rows
        .first()
        .and_then(|row| row.get("view_count"))
        .cloned()
        .unwrap_or_else(|| json!(0));
    Ok(json!({ "view_count": count }))
}

/// Public rows whose lowercased title or body matches the LIKE `pattern`.
async fn search_rows<E, C>(
    db: &C,
    table: Table,
    pattern: &str,
    limit: u64,
) -> Result<Vec<Row>, StoreError>
where
    E: EntityTrait,
    E::Model: Serialize,
    C: ConnectionTrait,
{
    let mut matches = Condition::any();
    for name in ["title", "body"] {
        let col = column::<E>(table, name)?;
        matches = matches.add(Expr::expr(Func::lower(Expr::col(col))).like(pattern));
    }
    let public = condition::<E>(table, &Filter::eq("is_public", true))?;

    let models = E::find()
        .filter(public.add(matches))
        .order_by_desc(column::<E>(table, "created_at")?)
        .limit(limit)
        .all(db)
        .await
        .map_err(|e| map_db_err(table, None, e))?;
    models.iter().map(|model| to_row(table, model)).collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::entities::{challenge, challenge_completion, profile, reaction};
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult, QueryTrait, RuntimeErr};

    fn at(text: &str) -> sea_orm::prelude::DateTimeWithTimeZone {
        chrono::DateTime::parse_from_rfc3339(text).unwrap()
    }

    fn alice(points: i64) -> profile::Model {
        profile::Model {
            id: "alice".to_string(),
            display_name: "Alice".to_string(),
            avatar_url: None,
            is_public: true,
            points,
            created_at: at("2024-05-01T10:00:00+00:00"),
        }
    }

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            _ => Row::new(),
        }
    }

    #[test]
    fn test_filter_translates_to_sql() {
        let filter = Filter::eq("parent_id", "p1").and(Filter::is_in("kind", ["like", "love"]));
        let sql = reaction::Entity::find()
            .filter(condition::<reaction::Entity>(Table::Reaction, &filter).unwrap())
            .build(DatabaseBackend::Postgres)
            .to_string();

        assert!(sql.contains(r#""reaction"."parent_id" = 'p1'"#), "{sql}");
        assert!(sql.contains(r#""reaction"."kind" IN ('like', 'love')"#), "{sql}");
    }

    #[test]
    fn test_filter_rejects_unknown_column() {
        let err = condition::<reaction::Entity>(Table::Reaction, &Filter::eq("note_id", "n1"))
            .unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
    }

    #[test]
    fn test_connection_errors_are_network() {
        let err = map_db_err(
            Table::Profile,
            None,
            DbErr::Conn(RuntimeErr::Internal("refused".to_string())),
        );
        assert!(matches!(err, StoreError::Network(_)));

        let err = map_db_err(Table::Profile, None, DbErr::Custom("boom".to_string()));
        assert!(matches!(err, StoreError::Backend(_)));
    }

    #[tokio::test]
    async fn test_query_decodes_models_into_rows() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([[alice(12)]])
            .into_connection();
        let store = PgStore::new(Arc::new(db));

        let rows = store
            .query(
                Table::Profile,
                &Filter::eq("is_public", true),
                Some(&Order::desc("points")),
                Some(10),
            )
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("points"), Some(&json!(12)));
        assert_eq!(rows[0].get("display_name"), Some(&json!("Alice")));
    }

    #[tokio::test]
    async fn test_award_points_returns_new_total() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 1,
            }])
            .append_query_results([[alice(20)]])
            .into_connection();
        let store = PgStore::new(Arc::new(db));

        let result = store
            .invoke(
                procedures::AWARD_POINTS,
                json!({"actor_id": "alice", "points": 10}),
            )
            .await
            .unwrap();
        assert_eq!(result, json!({"points": 20}));
    }

    #[tokio::test]
    async fn test_award_points_to_missing_profile() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 0,
            }])
            .into_connection();
        let store = PgStore::new(Arc::new(db));

        let err = store
            .invoke(
                procedures::AWARD_POINTS,
                json!({"actor_id": "ghost", "points": 10}),
            )
            .await
            .unwrap_err();
        assert_eq!(
            err,
            StoreError::NotFound {
                table: Table::Profile,
                id: "ghost".to_string()
            }
        );
    }

    fn car_free_week() -> challenge::Model {
        challenge::Model {
            id: "c1".to_string(),
            title: "Car-free week".to_string(),
            description: None,
            points: 10,
            created_at: at("2024-05-01T10:00:00+00:00"),
        }
    }

    fn completion() -> challenge_completion::Model {
        challenge_completion::Model {
            id: "cc1".to_string(),
            actor_id: "alice".to_string(),
            challenge_id: "c1".to_string(),
            completed_at: at("2024-05-02T10:00:00+00:00"),
        }
    }

    #[tokio::test]
    async fn test_complete_challenge_awards_points_and_announces() {
        use futures::StreamExt;

        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([[car_free_week()]])
            .append_query_results([[completion()]])
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 1,
            }])
            .append_query_results([[alice(10)]])
            .into_connection();
        let store = PgStore::new(Arc::new(db));
        let mut sub = store
            .subscribe(Table::ChallengeCompletion, Filter::eq("actor_id", "alice"))
            .await
            .unwrap();

        let result = store
            .invoke(
                procedures::COMPLETE_CHALLENGE,
                json!({"actor_id": "alice", "challenge_id": "c1"}),
            )
            .await
            .unwrap();
        assert_eq!(result["points"], json!(10));
        assert_eq!(result["completion"]["challenge_id"], json!("c1"));

        let event = sub.next().await.unwrap();
        assert_eq!(event.table, Table::ChallengeCompletion);
        assert_eq!(event.row.get("id"), Some(&json!("cc1")));
    }

    #[tokio::test]
    async fn test_complete_challenge_fails_whole_when_award_fails() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([[car_free_week()]])
            .append_query_results([[completion()]])
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 0,
            }])
            .into_connection();
        let store = PgStore::new(Arc::new(db));

        let err = store
            .invoke(
                procedures::COMPLETE_CHALLENGE,
                json!({"actor_id": "ghost", "challenge_id": "c1"}),
            )
            .await
            .unwrap_err();
        assert_eq!(
            err,
            StoreError::NotFound {
                table: Table::Profile,
                id: "ghost".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_unknown_procedure() {
        let store = PgStore::new(Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres).into_connection(),
        ));
        let err = store.invoke("drop_everything", json!({})).await.unwrap_err();
        assert_eq!(err, StoreError::UnknownProcedure("drop_everything".to_string()));
    }

    #[tokio::test]
    async fn test_insert_publishes_to_subscribers() {
        use futures::StreamExt;

        let stored = profile::Model {
            id: "bob".to_string(),
            display_name: "Bob".to_string(),
            ..alice(0)
        };
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([[stored]])
            .into_connection();
        let store = PgStore::new(Arc::new(db));
        let mut sub = store
            .subscribe(Table::Profile, Filter::All)
            .await
            .unwrap();

        let row = store
            .insert(
                Table::Profile,
                row(json!({"id": "bob", "display_name": "Bob"})),
            )
            .await
            .unwrap();
        assert_eq!(row.get("id"), Some(&json!("bob")));

        let event = sub.next().await.unwrap();
        assert_eq!(event.table, Table::Profile);
        assert_eq!(event.row.get("id"), Some(&json!("bob")));

        store.unsubscribe(sub.handle()).await.unwrap();
        assert_eq!(store.active_channels(), 0);
    }

    #[tokio::test]
    async fn test_reaction_insert_checks_parent() {
        // Every parent table comes back empty.
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([
                [count_row(0)],
                [count_row(0)],
                [count_row(0)],
            ])
            .into_connection();
        let store = PgStore::new(Arc::new(db));

        let err = store
            .insert(
                Table::Reaction,
                row(json!({"actor_id": "alice", "parent_id": "gone", "kind": "like"})),
            )
            .await
            .unwrap_err();
        assert_eq!(
            err,
            StoreError::NotFound {
                table: Table::ForumPost,
                id: "gone".to_string()
            }
        );
    }

    fn count_row(n: i64) -> std::collections::BTreeMap<&'static str, sea_orm::Value> {
        std::collections::BTreeMap::from([("num_items", n.into())])
    }
}
