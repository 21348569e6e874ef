//! The wire-level message unit.
//!
//! A [`Packet`] is immutable once built. Every outgoing packet carries a
//! freshly generated `utterance_id`; packets belonging to one logical turn
//! share an `interaction_id`. JSON field names follow the service's
//! camelCase wire format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Capabilities;

/// Identity of one packet plus the turn/utterance it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PacketId {
    pub packet_id: String,
    pub interaction_id: String,
    pub utterance_id: String,
    pub correlation_id: String,
}

/// Who produced a packet and who it is addressed to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct Routing {
    pub source: Actor,
    pub targets: Vec<Actor>,
}

/// A conversation participant on either side of the socket.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct Actor {
    pub name: String,
    #[serde(rename = "type")]
    pub actor_type: ActorType,
}

impl Actor {
    pub fn player() -> Self {
        Self {
            name: String::new(),
            actor_type: ActorType::Player,
        }
    }

    pub fn agent(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            actor_type: ActorType::Agent,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActorType {
    #[default]
    Unknown,
    Player,
    Agent,
}

/// Streamed or final text for one utterance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextEvent {
    pub text: String,
    /// `false` while the utterance is still streaming.
    pub r#final: bool,
}

/// One base64-encoded chunk of 16-bit PCM audio.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioChunkEvent {
    pub chunk: String,
}

/// In-band control signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlEvent {
    pub action: ControlAction,
    /// Present only for `CancelResponse`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancellation: Option<Cancellation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlAction {
    Unknown,
    TtsPlaybackMute,
    TtsPlaybackUnmute,
    CancelResponse,
    InteractionEnd,
}

/// Identifies the in-flight character response being cancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cancellation {
    pub interaction_id: String,
    pub utterance_id: Vec<String>,
}

/// Session-scoped control, sent once during session open.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionControlEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Capabilities>,
}

/// Payload variants. Externally tagged so the wire shape matches the
/// service's oneof-style JSON (`{"text": {...}}`, `{"audioChunk": {...}}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PacketPayload {
    Text(TextEvent),
    AudioChunk(AudioChunkEvent),
    Control(ControlEvent),
    SessionControl(SessionControlEvent),
}

/// An immutable message unit travelling in either direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Packet {
    pub packet_id: PacketId,
    pub routing: Routing,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: PacketPayload,
}

impl Packet {
    pub fn is_text(&self) -> bool {
        matches!(self.payload, PacketPayload::Text(_))
    }

    pub fn is_audio(&self) -> bool {
        matches!(self.payload, PacketPayload::AudioChunk(_))
    }

    pub fn is_control(&self) -> bool {
        matches!(self.payload, PacketPayload::Control(_))
    }

    /// Whether the packet originates from the player side (local input or a
    /// collaborative player echo from the service).
    pub fn is_player_source(&self) -> bool {
        self.routing.source.actor_type == ActorType::Player
    }

    pub fn is_character_source(&self) -> bool {
        self.routing.source.actor_type == ActorType::Agent
    }

    pub fn text(&self) -> Option<&TextEvent> {
        match &self.payload {
            PacketPayload::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn control(&self) -> Option<&ControlEvent> {
        match &self.payload {
            PacketPayload::Control(control) => Some(control),
            _ => None,
        }
    }
}
