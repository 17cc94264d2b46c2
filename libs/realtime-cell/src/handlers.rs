use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::{IntoResponse, Response},
};
use axum_extra::typed_header::{TypedHeader, TypedHeaderRejection};
use headers::{authorization::Bearer, Authorization};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use shared_config::RealtimeSettings;
use shared_models::error::AppError;

use crate::models::{ClientMessage, ServerMessage};
use crate::services::{Admission, EventBus, Gatekeeper};

#[derive(Clone)]
pub struct RealtimeState {
    pub bus: Arc<EventBus>,
    pub gatekeeper: Arc<Gatekeeper>,
    pub settings: RealtimeSettings,
}

#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    pub token: Option<String>,
}

/// `GET /realtime`. The token comes from `?token=` or a bearer header and is
/// checked before the upgrade is accepted.
pub async fn realtime_connect(
    State(state): State<RealtimeState>,
    Query(query): Query<ConnectQuery>,
    bearer: Result<TypedHeader<Authorization<Bearer>>, TypedHeaderRejection>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, AppError> {
    let header_token = bearer.ok().map(|TypedHeader(auth)| auth.token().to_string());
    let token = query.token.or(header_token).unwrap_or_default();

    let admission = state.gatekeeper.admit(&token).await?;

    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => return Ok(rejection.into_response()),
    };

    Ok(upgrade.on_upgrade(move |socket| run_connection(socket, admission, state)))
}

async fn run_connection(socket: WebSocket, admission: Admission, state: RealtimeState) {
    let RealtimeSettings {
        ping_interval_secs,
        ping_timeout_secs,
        connection_buffer,
        ..
    } = state.settings;

    let registry = state.bus.registry();
    let (tx, mut events) = mpsc::channel(connection_buffer.max(1));
    let connection_id = registry.join(admission.identity.clone(), &admission.rooms, tx).await;
    let uid = admission.identity.uid.as_str();

    let (mut sink, mut incoming) = socket.split();

    let greeting = ServerMessage::Connected {
        uid,
        role: admission.identity.role,
        rooms: &admission.rooms,
    };
    if send_json(&mut sink, &greeting).await.is_err() {
        registry.leave(connection_id).await;
        return;
    }

    let liveness_timeout = Duration::from_secs(ping_timeout_secs);
    let mut ping = interval(Duration::from_secs(ping_interval_secs.max(1)));
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ping.tick().await;
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            Some(event) = events.recv() => {
                if send_json(&mut sink, &ServerMessage::DomainEvent { event: event.as_ref() }).await.is_err() {
                    break;
                }
            }
            frame = incoming.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    last_seen = Instant::now();
                    match serde_json::from_str::<ClientMessage>(text.as_str()) {
                        Ok(ClientMessage::Ping) => {
                            if send_json(&mut sink, &ServerMessage::Pong).await.is_err() {
                                break;
                            }
                        }
                        Err(_) => debug!("Ignoring unknown client message from {}", uid),
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => last_seen = Instant::now(),
                Some(Err(e)) => {
                    debug!("Socket error for {}: {}", uid, e);
                    break;
                }
            },
            _ = ping.tick() => {
                if last_seen.elapsed() > liveness_timeout {
                    info!("Closing connection for {}: no traffic for {:?}", uid, liveness_timeout);
                    break;
                }
                if sink.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    registry.leave(connection_id).await;
    debug!("Connection for {} closed", uid);
}

async fn send_json(sink: &mut SplitSink<WebSocket, Message>, message: &ServerMessage<'_>) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(message) {
        Ok(text) => text,
        Err(e) => {
            warn!("Failed to serialize server message: {}", e);
            return Ok(());
        }
    };
    sink.send(Message::Text(text.into())).await
}
