//! `PgStore` integration tests.
//!
//! These tests require a running `PostgreSQL` instance.
//! Run with: `cargo test -p ecolearn-db --test pg_store_integration -- --ignored --test-threads=1`
//!
//! Environment variables:
//!   `TEST_DB_HOST` (default: localhost)
//!   `TEST_DB_PORT` (default: 5433)
//!   `TEST_DB_USER` (default: `ecolearn_test`)
//!   `TEST_DB_PASSWORD` (default: `ecolearn_test`)
//!   `TEST_DB_NAME` (default: `ecolearn_test`)

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use ecolearn_common::SyncConfig;
use ecolearn_core::{
    Filter, MutationOutcome, Order, ReactionKind, RemoteStore, Row, Session, StoreError,
    SyncContext, Table, procedures,
};
use ecolearn_db::test_utils::TestDatabase;
use serde_json::{Value, json};

fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        _ => Row::new(),
    }
}

async fn seed(store: &dyn RemoteStore) {
    store
        .insert(
            Table::Profile,
            row(json!({"id": "alice", "display_name": "Alice"})),
        )
        .await
        .unwrap();
    store
        .insert(
            Table::ClimateAction,
            row(json!({"id": "p1", "author_id": "alice", "body": "Cycled to work", "is_public": true})),
        )
        .await
        .unwrap();
}

#[tokio::test]
#[ignore = "requires running PostgreSQL instance"]
async fn test_duplicate_reaction_is_a_constraint_violation() {
    let db = TestDatabase::new().await.unwrap();
    let store = db.store();
    seed(&store).await;

    let reaction = row(json!({"actor_id": "alice", "parent_id": "p1", "kind": "like"}));
    store.insert(Table::Reaction, reaction.clone()).await.unwrap();
    let err = store.insert(Table::Reaction, reaction).await.unwrap_err();

    assert_eq!(
        err,
        StoreError::Constraint {
            table: Table::Reaction,
            key: "actor_id,parent_id".to_string()
        }
    );
}

#[tokio::test]
#[ignore = "requires running PostgreSQL instance"]
async fn test_upsert_replaces_reaction_kind() {
    let db = TestDatabase::new().await.unwrap();
    let store = db.store();
    seed(&store).await;
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
    let rows = store
        .query(Table::Reaction, &Filter::All, None, None)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
#[ignore = "requires running PostgreSQL instance"]
async fn test_comment_on_missing_post_is_not_found() {
    let db = TestDatabase::new().await.unwrap();
    let store = db.store();
    seed(&store).await;

    let err = store
        .insert(
            Table::Comment,
            row(json!({"parent_id": "gone", "author_id": "alice", "body": "hello"})),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound { .. }));
}

#[tokio::test]
#[ignore = "requires running PostgreSQL instance"]
async fn test_delete_cascades_to_comments_and_reactions() {
    let db = TestDatabase::new().await.unwrap();
    let store = db.store();
    seed(&store).await;

    let comment = store
        .insert(
            Table::Comment,
            row(json!({"parent_id": "p1", "author_id": "alice", "body": "Nice"})),
        )
        .await
        .unwrap();
    store
        .insert(
            Table::Reaction,
            row(json!({"actor_id": "alice", "parent_id": comment["id"], "kind": "like"})),
        )
        .await
        .unwrap();

    store.delete(Table::ClimateAction, "p1").await.unwrap();
    store.delete(Table::ClimateAction, "p1").await.unwrap();

    for table in [Table::Comment, Table::Reaction] {
        let rows = store.query(table, &Filter::All, None, None).await.unwrap();
        assert!(rows.is_empty(), "{table} rows survived the delete");
    }
}

#[tokio::test]
#[ignore = "requires running PostgreSQL instance"]
async fn test_procedures() {
    let db = TestDatabase::new().await.unwrap();
    let store = db.store();
    seed(&store).await;

    let points = store
        .invoke(
            procedures::AWARD_POINTS,
            json!({"actor_id": "alice", "points": 10}),
        )
        .await
        .unwrap();
    assert_eq!(points, json!({"points": 10}));

    let views = store
        .invoke(
            procedures::INCREMENT_VIEW_COUNT,
            json!({"table": "climate_action", "id": "p1"}),
        )
        .await
        .unwrap();
    assert_eq!(views, json!({"view_count": 1}));

    let hits = store
        .invoke(procedures::SEARCH_POSTS, json!({"query": "CYCLED"}))
        .await
        .unwrap();
    assert_eq!(hits.as_array().map(Vec::len), Some(1));

    let stats = store
        .invoke(procedures::ADMIN_STATS, json!({}))
        .await
        .unwrap();
    assert_eq!(stats["profiles"], json!(1));
    assert_eq!(stats["public_climate_actions"], json!(1));
}

#[tokio::test]
#[ignore = "requires running PostgreSQL instance"]
async fn test_query_orders_and_limits() {
    let db = TestDatabase::new().await.unwrap();
    let store = db.store();
    for (id, points) in [("a", 5), ("b", 30), ("c", 20)] {
        store
            .insert(
                Table::Profile,
                row(json!({"id": id, "display_name": id, "points": points})),
            )
            .await
            .unwrap();
    }

    let rows = store
        .query(Table::Profile, &Filter::All, Some(&Order::desc("points")), Some(2))
        .await
        .unwrap();
    let ids: Vec<_> = rows.iter().map(|r| r["id"].clone()).collect();
    assert_eq!(ids, vec![json!("b"), json!("c")]);
}

#[tokio::test]
#[ignore = "requires running PostgreSQL instance"]
async fn test_reaction_toggle_against_postgres() {
    let db = TestDatabase::new().await.unwrap();
    let store = Arc::new(db.store());
    seed(store.as_ref()).await;

    let context = SyncContext::new(store.clone(), SyncConfig::default())
        .with_session(Session::new("alice"));
    let feed = context.public_feed(Table::ClimateAction).await.unwrap();
    let mutator = context.mutator();

    let outcome = mutator
        .toggle_reaction(&feed, "p1", ReactionKind::Like)
        .await
        .unwrap();
    assert_eq!(outcome, MutationOutcome::Applied);

    let post = feed.get("p1").unwrap();
    assert_eq!(post.reactions.get(ReactionKind::Like), 1);
    assert_eq!(post.user_reaction, Some(ReactionKind::Like));

    feed.unmount().await;
    assert_eq!(store.active_channels(), 0);
}
