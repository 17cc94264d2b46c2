use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

pub const SCHEMA_VERSION: u32 = 1;

// ==============================================================================
// IDENTITY & ROOMS
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Doctor,
    Patient,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Doctor => "doctor",
            Role::Patient => "patient",
            Role::Admin => "admin",
        }
    }

    /// Parses the `role` claim of an HTTP caller.
    pub fn from_claim(value: &str) -> Option<Self> {
        match value {
            "doctor" => Some(Role::Doctor),
            "patient" => Some(Role::Patient),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn user_room(uid: &str) -> String {
    format!("user:{}", uid)
}

pub fn role_room(role: Role) -> String {
    format!("role:{}", role)
}

pub fn appointment_room(appointment_id: &str) -> String {
    format!("appointment:{}", appointment_id)
}

/// Who a live connection was admitted as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub uid: String,
    pub role: Role,
}

impl Identity {
    pub fn new(uid: impl Into<String>, role: Role) -> Self {
        Self { uid: uid.into(), role }
    }

    /// `user:<uid>`, `role:<role>` and the role-qualified room `<role>:<uid>`.
    pub fn rooms(&self) -> Vec<String> {
        vec![
            user_room(&self.uid),
            role_room(self.role),
            format!("{}:{}", self.role, self.uid),
        ]
    }
}

// ==============================================================================
// DOMAIN EVENTS
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "appointment.updated")]
    AppointmentUpdated,
    #[serde(rename = "availability.updated")]
    AvailabilityUpdated,
    #[serde(rename = "document.shared")]
    DocumentShared,
}

/// Declarative description of who should receive an event. Resolved to rooms
/// at publish time, never to connections.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Audience {
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub rooms: Vec<String>,
}

impl Audience {
    pub fn users<I, S>(users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            users: users.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_roles(mut self, roles: impl IntoIterator<Item = Role>) -> Self {
        self.roles.extend(roles);
        self
    }

    pub fn with_rooms<I, S>(mut self, rooms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rooms.extend(rooms.into_iter().map(Into::into));
        self
    }

    /// Rooms in first-seen order with duplicates removed.
    pub fn resolve_rooms(&self) -> Vec<String> {
        let candidates = self
            .users
            .iter()
            .map(|uid| user_room(uid))
            .chain(self.roles.iter().map(|role| role_room(*role)))
            .chain(self.rooms.iter().cloned());

        let mut seen = HashSet::new();
        candidates.filter(|room| seen.insert(room.clone())).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventActor {
    pub uid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

impl EventActor {
    pub fn new(uid: impl Into<String>, role: Role) -> Self {
        Self { uid: uid.into(), role: Some(role) }
    }

    pub fn system() -> Self {
        Self { uid: "system".to_string(), role: None }
    }
}

impl From<&Identity> for EventActor {
    fn from(identity: &Identity) -> Self {
        Self::new(identity.uid.clone(), identity.role)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: String,
    pub id: String,
}

impl EntityRef {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self { kind: kind.into(), id: id.into() }
    }
}

/// What a producer hands to the bus before it is stamped.
#[derive(Debug, Clone, PartialEq)]
pub struct EventInput {
    pub event_type: EventType,
    pub correlation_id: Option<String>,
    pub actor: EventActor,
    pub entity: EntityRef,
    pub audience: Audience,
    pub payload: Value,
}

impl EventInput {
    pub fn new(event_type: EventType, actor: EventActor, entity: EntityRef, audience: Audience, payload: Value) -> Self {
        Self {
            event_type,
            correlation_id: None,
            actor,
            entity,
            audience,
            payload,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Appointment created or moved to a new status. Goes to both parties and
    /// to anyone watching the appointment itself.
    pub fn appointment_updated(
        actor: EventActor,
        appointment_id: &str,
        patient_uid: &str,
        doctor_uid: &str,
        action: &str,
        appointment: Value,
    ) -> Self {
        Self::new(
            EventType::AppointmentUpdated,
            actor,
            EntityRef::new("appointment", appointment_id),
            Audience::users([patient_uid, doctor_uid]).with_rooms([appointment_room(appointment_id)]),
            json!({ "action": action, "appointment": appointment }),
        )
    }

    pub fn availability_updated(actor: EventActor, doctor_uid: &str, date: NaiveDate, window: Value) -> Self {
        Self::new(
            EventType::AvailabilityUpdated,
            actor,
            EntityRef::new("availability", format!("{}:{}", doctor_uid, date)),
            Audience::users([doctor_uid]).with_roles([Role::Patient]),
            json!({ "doctor_id": doctor_uid, "date": date, "window": window }),
        )
    }

    pub fn document_shared(
        actor: EventActor,
        document_id: &str,
        patient_uid: &str,
        doctor_uid: &str,
        document: Value,
    ) -> Self {
        Self::new(
            EventType::DocumentShared,
            actor,
            EntityRef::new("document", document_id),
            Audience::users([patient_uid, doctor_uid]),
            document,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainEvent {
    pub id: Uuid,
    pub schema_version: u32,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub occurred_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    pub actor: EventActor,
    pub entity: EntityRef,
    pub audience: Audience,
    pub payload: Value,
}

impl DomainEvent {
    pub fn stamp(input: EventInput, occurred_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            schema_version: SCHEMA_VERSION,
            event_type: input.event_type,
            occurred_at,
            correlation_id: input.correlation_id,
            actor: input.actor,
            entity: input.entity,
            audience: input.audience,
            payload: input.payload,
        }
    }
}

/// What travels over the pub/sub backbone between processes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub origin: Uuid,
    pub rooms: Vec<String>,
    pub event: DomainEvent,
}

// ==============================================================================
// WIRE MESSAGES
// ==============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage<'a> {
    #[serde(rename = "connected")]
    Connected { uid: &'a str, role: Role, rooms: &'a [String] },
    #[serde(rename = "domain.event")]
    DomainEvent { event: &'a DomainEvent },
    #[serde(rename = "pong")]
    Pong,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Ping,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audience_resolves_users_and_roles_exactly() {
        let audience = Audience::users(["p1", "p1"]).with_roles([Role::Admin, Role::Admin]);
        assert_eq!(audience.resolve_rooms(), vec!["user:p1", "role:admin"]);
    }

    #[test]
    fn explicit_rooms_pass_through_and_dedupe_against_users() {
        let audience = Audience::users(["d1"]).with_rooms(["appointment:42", "user:d1"]);
        assert_eq!(audience.resolve_rooms(), vec!["user:d1", "appointment:42"]);
        assert!(Audience::default().resolve_rooms().is_empty());
    }

    #[test]
    fn identity_joins_three_rooms() {
        let identity = Identity::new("abc", Role::Doctor);
        assert_eq!(identity.rooms(), vec!["user:abc", "role:doctor", "doctor:abc"]);
    }

    #[test]
    fn domain_event_wire_shape() {
        let input = EventInput::appointment_updated(
            EventActor::system(),
            "a1",
            "p1",
            "d1",
            "created",
            json!({ "id": "a1" }),
        );
        let event = DomainEvent::stamp(input, Utc::now());
        let wire = serde_json::to_value(&event).unwrap();

        assert_eq!(wire["type"], "appointment.updated");
        assert_eq!(wire["schemaVersion"], SCHEMA_VERSION);
        assert_eq!(wire["payload"]["action"], "created");
        assert_eq!(wire["audience"]["rooms"][0], "appointment:a1");
        assert!(wire.get("correlationId").is_none());
        assert!(wire["actor"].get("role").is_none());
    }

    #[test]
    fn client_ping_parses() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Ping);
    }
}
