use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use futures::stream::{self, BoxStream, StreamExt};
use redis::AsyncCommands;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::error::RealtimeError;

/// Shared channel that lets every process see events produced by any other.
#[async_trait]
pub trait PubSubBackbone: Send + Sync {
    async fn publish(&self, channel: &str, payload: String) -> Result<(), RealtimeError>;

    /// Resolves once the subscription is live.
    async fn subscribe(&self, channel: &str) -> Result<BoxStream<'static, String>, RealtimeError>;
}

pub struct RedisBackbone {
    pool: Pool,
    client: redis::Client,
}

impl RedisBackbone {
    /// Builds the publish pool and checks the server answers PING.
    pub async fn connect(redis_url: &str) -> Result<Self, RealtimeError> {
        let pool = Config::from_url(redis_url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| RealtimeError::Backbone(format!("Pool creation error: {}", e)))?;

        let mut conn = pool.get().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;

        let client = redis::Client::open(redis_url)?;
        info!("Redis pub/sub backbone connected");

        Ok(Self { pool, client })
    }
}

#[async_trait]
impl PubSubBackbone for RedisBackbone {
    async fn publish(&self, channel: &str, payload: String) -> Result<(), RealtimeError> {
        let mut conn = self.pool.get().await?;
        let receivers: i64 = conn.publish(channel, payload).await?;
        debug!("Published to {} ({} subscribers)", channel, receivers);
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<BoxStream<'static, String>, RealtimeError> {
        let mut pubsub = self.client.get_async_connection().await?.into_pubsub();
        pubsub.subscribe(channel).await?;

        let messages = pubsub.into_on_message().filter_map(|msg| async move {
            match msg.get_payload::<String>() {
                Ok(payload) => Some(payload),
                Err(e) => {
                    warn!("Discarding non-text backbone message: {}", e);
                    None
                }
            }
        });

        Ok(messages.boxed())
    }
}

/// Process-local stand-in for Redis. Several buses sharing one instance
/// behave like processes sharing one Redis server.
#[derive(Default)]
pub struct InMemoryBackbone {
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
}

impl InMemoryBackbone {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, channel: &str) -> Result<broadcast::Sender<String>, RealtimeError> {
        let mut channels = self
            .channels
            .lock()
            .map_err(|_| RealtimeError::Backbone("channel table poisoned".to_string()))?;

        Ok(channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(1024).0)
            .clone())
    }
}

#[async_trait]
impl PubSubBackbone for InMemoryBackbone {
    async fn publish(&self, channel: &str, payload: String) -> Result<(), RealtimeError> {
        // No subscribers is not an error for pub/sub.
        let _ = self.sender(channel)?.send(payload);
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<BoxStream<'static, String>, RealtimeError> {
        let receiver = self.sender(channel)?.subscribe();

        let messages = stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(payload) => return Some((payload, receiver)),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("In-memory backbone subscriber lagged, {} messages skipped", skipped);
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        });

        Ok(messages.boxed())
    }
}
