use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{DomainEvent, Identity};

pub type ConnectionId = Uuid;
pub type EventSender = mpsc::Sender<Arc<DomainEvent>>;

struct Member {
    identity: Identity,
    rooms: Vec<String>,
    sender: EventSender,
}

#[derive(Default)]
struct RegistryState {
    members: HashMap<ConnectionId, Member>,
    rooms: HashMap<String, HashSet<ConnectionId>>,
}

/// Live connections of this process and the rooms they joined.
#[derive(Default)]
pub struct RoomRegistry {
    state: RwLock<RegistryState>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn join(&self, identity: Identity, rooms: &[String], sender: EventSender) -> ConnectionId {
        let id = Uuid::new_v4();
        let mut state = self.state.write().await;

        for room in rooms {
            state.rooms.entry(room.clone()).or_default().insert(id);
        }
        debug!("Connection {} ({}) joined {:?}", id, identity.uid, rooms);
        state.members.insert(id, Member {
            identity,
            rooms: rooms.to_vec(),
            sender,
        });

        id
    }

    /// Drops every membership of `id` in one step.
    pub async fn leave(&self, id: ConnectionId) {
        let mut state = self.state.write().await;

        let Some(member) = state.members.remove(&id) else {
            return;
        };
        for room in &member.rooms {
            if let Some(ids) = state.rooms.get_mut(room) {
                ids.remove(&id);
                if ids.is_empty() {
                    state.rooms.remove(room);
                }
            }
        }
        debug!("Connection {} ({}) left", id, member.identity.uid);
    }

    /// Pushes `event` to every connection in any of `rooms`, once per
    /// connection. Full or closed buffers are skipped. Returns the number of
    /// connections the event was handed to.
    pub async fn deliver(&self, rooms: &[String], event: Arc<DomainEvent>) -> usize {
        let state = self.state.read().await;

        let mut targets = HashSet::new();
        for room in rooms {
            if let Some(ids) = state.rooms.get(room) {
                targets.extend(ids.iter().copied());
            }
        }

        let mut delivered = 0;
        for id in targets {
            let Some(member) = state.members.get(&id) else {
                continue;
            };
            match member.sender.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!("Outbound buffer full for connection {}, dropping event {}", id, event.id);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("Connection {} already closed, skipping event {}", id, event.id);
                }
            }
        }

        delivered
    }

    pub async fn room_size(&self, room: &str) -> usize {
        let state = self.state.read().await;
        state.rooms.get(room).map_or(0, HashSet::len)
    }

    pub async fn connection_count(&self) -> usize {
        self.state.read().await.members.len()
    }
}
