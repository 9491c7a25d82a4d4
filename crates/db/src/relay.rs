//! Redis Pub/Sub relay for insert events across processes.
//!
//! Each process publishes its own inserts to one Redis channel and feeds
//! inserts published by other processes into its local [`InsertHub`].

use std::sync::Arc;

use async_trait::async_trait;
use ecolearn_common::{AppError, AppResult, IdGenerator, RedisConfig};
use ecolearn_core::InsertEvent;
use fred::clients::{Client, SubscriberClient};
use fred::error::Error as RedisError;
use fred::interfaces::{ClientLike, EventInterface, PubsubInterface};
use fred::types::config::Config as FredConfig;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::hub::{InsertHub, InsertRelay};

/// Suffix of the channel carrying insert events.
const INSERTS_CHANNEL: &str = "inserts";

/// Wire format of a relayed insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Envelope {
    /// Process that performed the insert.
    origin: String,
    event: InsertEvent,
}

fn redis_error(err: RedisError) -> AppError {
    AppError::Redis(err.to_string())
}

/// Relays insert events through Redis.
#[derive(Clone)]
pub struct RedisRelay {
    publisher: Client,
    subscriber: SubscriberClient,
    channel: String,
    origin: String,
}

impl RedisRelay {
    /// Connect the publishing and subscribing clients.
    pub async fn connect(config: &RedisConfig) -> AppResult<Self> {
        let redis_config = FredConfig::from_url(&config.url).map_err(redis_error)?;

        let publisher = Client::new(redis_config.clone(), None, None, None);
        publisher.init().await.map_err(redis_error)?;

        let subscriber = SubscriberClient::new(redis_config, None, None, None);
        subscriber.init().await.map_err(redis_error)?;

        let relay = Self {
            publisher,
            subscriber,
            channel: channel_name(&config.prefix),
            origin: IdGenerator::new().generate(),
        };
        info!(channel = %relay.channel, origin = %relay.origin, "Redis insert relay connected");
        Ok(relay)
    }

    /// Subscribe to the insert channel and forward foreign inserts into `hub`.
    pub async fn start(&self, hub: Arc<InsertHub>) -> AppResult<JoinHandle<()>> {
        self.subscriber
            .subscribe(self.channel.as_str())
            .await
            .map_err(redis_error)?;

        let messages = self.subscriber.message_rx();
        Ok(tokio::spawn(pump(
            messages,
            |message| message.value.as_string(),
            hub,
            self.origin.clone(),
        )))
    }

    /// Close both clients.
    pub async fn shutdown(&self) -> AppResult<()> {
        self.subscriber.quit().await.map_err(redis_error)?;
        self.publisher.quit().await.map_err(redis_error)?;
        info!("Redis insert relay shutdown");
        Ok(())
    }
}

#[async_trait]
impl InsertRelay for RedisRelay {
    async fn relay(&self, event: &InsertEvent) -> AppResult<()> {
        let payload = encode(&self.origin, event)?;
        let _: () = self
            .publisher
            .publish(self.channel.as_str(), payload)
            .await
            .map_err(redis_error)?;
        debug!(channel = %self.channel, table = %event.table, "Relayed insert");
        Ok(())
    }
}

/// Feed relayed inserts into `hub` until the message stream closes.
async fn pump<M, F>(
    mut messages: broadcast::Receiver<M>,
    payload: F,
    hub: Arc<InsertHub>,
    origin: String,
) where
    M: Clone + Send + 'static,
    F: Fn(&M) -> Option<String> + Send + 'static,
{
    loop {
        match messages.recv().await {
            Ok(message) => {
                let Some(payload) = payload(&message) else {
                    continue;
                };
                match decode(&payload, &origin) {
                    Ok(Some(event)) => {
                        debug!(table = %event.table, "Received relayed insert");
                        hub.publish(event);
                    }
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "Failed to parse relayed insert"),
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Redis insert relay lagged");
            }
            Err(RecvError::Closed) => {
                info!("Redis insert relay stream ended");
                break;
            }
        }
    }
}

fn channel_name(prefix: &str) -> String {
    format!("{prefix}:{INSERTS_CHANNEL}")
}

fn encode(origin: &str, event: &InsertEvent) -> AppResult<String> {
    serde_json::to_string(&Envelope {
        origin: origin.to_string(),
        event: event.clone(),
    })
    .map_err(|e| AppError::Internal(format!("Serialization error: {e}")))
}

/// Decode a payload, skipping events this process published itself.
fn decode(payload: &str, origin: &str) -> Result<Option<InsertEvent>, serde_json::Error> {
    let envelope: Envelope = serde_json::from_str(payload)?;
    Ok((envelope.origin != origin).then_some(envelope.event))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use ecolearn_core::{Row, Table};
    use serde_json::json;

    fn insert() -> InsertEvent {
        let mut row = Row::new();
        row.insert("id".to_string(), json!("p1"));
        InsertEvent {
            table: Table::ClimateAction,
            row,
        }
    }

    #[test]
    fn test_channel_name_uses_prefix() {
        assert_eq!(channel_name("ecolearn"), "ecolearn:inserts");
    }

    #[test]
    fn test_own_inserts_are_skipped() {
        let payload = encode("proc-a", &insert()).unwrap();

        assert!(decode(&payload, "proc-a").unwrap().is_none());
        assert_eq!(decode(&payload, "proc-b").unwrap(), Some(insert()));
    }

    #[tokio::test]
    async fn test_relay_keeps_forwarding_after_lag() {
        use ecolearn_core::Filter;
        use futures::StreamExt;

        let hub = Arc::new(InsertHub::default());
        let mut sub = hub.subscribe(Table::ClimateAction, Filter::All);
        let (tx, rx) = broadcast::channel::<String>(1);
        for id in ["p1", "p2", "p3"] {
            let mut event = insert();
            event.row.insert("id".to_string(), json!(id));
            tx.send(encode("proc-b", &event).unwrap()).unwrap();
        }
        drop(tx);

        pump(rx, |payload: &String| Some(payload.clone()), Arc::clone(&hub), "proc-a".to_string()).await;

        let event = sub.next().await.unwrap();
        assert_eq!(event.row.get("id"), Some(&json!("p3")));
    }

    #[test]
    fn test_malformed_payload_is_an_error() {
        assert!(decode("{\"origin\": 1}", "proc-a").is_err());
    }
}
