use std::sync::Arc;
use std::time::Duration;

use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use shared_config::{AppConfig, RealtimeSettings};
use shared_utils::{Clock, SystemClock};

use crate::models::{DomainEvent, Envelope, EventInput};
use crate::services::backbone::{PubSubBackbone, RedisBackbone};
use crate::services::rooms::RoomRegistry;

/// Fans domain events out to live connections on this process and, through
/// the backbone, on every other process. Built once at startup and shared.
pub struct EventBus {
    process_id: Uuid,
    registry: Arc<RoomRegistry>,
    backbone: Option<Arc<dyn PubSubBackbone>>,
    channel: String,
    publish_timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl EventBus {
    /// Same-process delivery only.
    pub fn local(settings: &RealtimeSettings) -> Self {
        Self {
            process_id: Uuid::new_v4(),
            registry: Arc::new(RoomRegistry::new()),
            backbone: None,
            channel: String::new(),
            publish_timeout: Duration::from_millis(settings.publish_timeout_ms),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_backbone(backbone: Arc<dyn PubSubBackbone>, channel: impl Into<String>, settings: &RealtimeSettings) -> Self {
        Self {
            backbone: Some(backbone),
            channel: channel.into(),
            ..Self::local(settings)
        }
    }

    /// Connects to Redis when configured. An unreachable backbone is not
    /// fatal; the bus falls back to same-process delivery.
    pub async fn connect(config: &AppConfig) -> Self {
        let Some(redis_url) = config.redis_url.as_deref() else {
            info!("REDIS_URL not set, event bus will deliver within this process only");
            return Self::local(&config.realtime);
        };

        match RedisBackbone::connect(redis_url).await {
            Ok(backbone) => Self::with_backbone(Arc::new(backbone), config.event_channel.clone(), &config.realtime),
            Err(e) => {
                warn!("Pub/sub backbone unavailable ({}), event bus degraded to this process only", e);
                Self::local(&config.realtime)
            }
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn registry(&self) -> Arc<RoomRegistry> {
        self.registry.clone()
    }

    pub fn process_id(&self) -> Uuid {
        self.process_id
    }

    pub fn is_distributed(&self) -> bool {
        self.backbone.is_some()
    }

    /// Subscribes to the backbone and spawns the task that delivers events
    /// produced by other processes. Returns `None` when running local-only
    /// or when the first subscription could not be made. A subscription that
    /// ends later is re-established with exponential backoff.
    pub async fn start(&self) -> Option<JoinHandle<()>> {
        let backbone = self.backbone.clone()?;

        let first = match backbone.subscribe(&self.channel).await {
            Ok(messages) => messages,
            Err(e) => {
                warn!("Failed to subscribe to {} ({}), remote events will not be delivered", self.channel, e);
                return None;
            }
        };

        let registry = self.registry.clone();
        let process_id = self.process_id;
        let channel = self.channel.clone();
        info!("Event bus {} listening on {}", process_id, channel);

        Some(tokio::spawn(async move {
            let mut messages = first;
            loop {
                drain(&mut messages, &registry, process_id).await;
                warn!("Backbone subscription on {} dropped, resubscribing", channel);
                messages = resubscribe(backbone.as_ref(), &channel).await;
                info!("Event bus {} listening on {} again", process_id, channel);
            }
        }))
    }

    /// Stamps and fans out one event. Never fails the caller: an empty
    /// audience drops the event, and backbone failures are only logged.
    /// Returns the stamped event when it had an audience.
    #[instrument(skip(self, input), fields(event_type = ?input.event_type))]
    pub async fn publish(&self, input: EventInput) -> Option<Arc<DomainEvent>> {
        let rooms = input.audience.resolve_rooms();
        if rooms.is_empty() {
            debug!("Dropping {:?} event with empty audience", input.event_type);
            return None;
        }

        let event = Arc::new(DomainEvent::stamp(input, self.clock.now()));
        let delivered = self.registry.deliver(&rooms, event.clone()).await;
        debug!("Event {} delivered to {} local connections", event.id, delivered);

        if let Some(backbone) = &self.backbone {
            self.forward(backbone.as_ref(), rooms, &event).await;
        }

        Some(event)
    }

    async fn forward(&self, backbone: &dyn PubSubBackbone, rooms: Vec<String>, event: &DomainEvent) {
        let envelope = Envelope {
            origin: self.process_id,
            rooms,
            event: event.clone(),
        };

        let payload = match serde_json::to_string(&envelope) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to serialize event {}: {}", event.id, e);
                return;
            }
        };

        match timeout(self.publish_timeout, backbone.publish(&self.channel, payload)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Backbone publish failed for event {}: {}", event.id, e),
            Err(_) => warn!("Backbone publish timed out for event {}", event.id),
        }
    }
}

const RESUBSCRIBE_INITIAL_BACKOFF: Duration = Duration::from_millis(250);
const RESUBSCRIBE_MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Delivers remote envelopes until the subscription stream ends.
async fn drain(messages: &mut BoxStream<'static, String>, registry: &RoomRegistry, process_id: Uuid) {
    while let Some(payload) = messages.next().await {
        let envelope: Envelope = match serde_json::from_str(&payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Ignoring malformed backbone envelope: {}", e);
                continue;
            }
        };

        // Already delivered locally when it was published.
        if envelope.origin == process_id {
            continue;
        }

        let event = Arc::new(envelope.event);
        let delivered = registry.deliver(&envelope.rooms, event.clone()).await;
        debug!("Remote event {} delivered to {} local connections", event.id, delivered);
    }
}

async fn resubscribe(backbone: &dyn PubSubBackbone, channel: &str) -> BoxStream<'static, String> {
    let mut backoff = RESUBSCRIBE_INITIAL_BACKOFF;
    loop {
        sleep(backoff).await;
        match backbone.subscribe(channel).await {
            Ok(messages) => return messages,
            Err(e) => {
                backoff = (backoff * 2).min(RESUBSCRIBE_MAX_BACKOFF);
                warn!("Resubscribe to {} failed ({}), retrying in {:?}", channel, e, backoff);
            }
        }
    }
}
