//! Outgoing packet construction.
//!
//! The factory owns the character roster and the id discipline: every packet
//! gets a fresh `utterance_id`, while packets of one logical turn share the
//! current `interaction_id`. New player text starts a new turn.

use chrono::Utc;
use uuid::Uuid;

use crate::config::Capabilities;
use crate::entity::{
    Actor, AudioChunkEvent, Cancellation, Character, ControlAction, ControlEvent, Packet,
    PacketId, PacketPayload, Routing, SessionControlEvent, TextEvent,
};

pub struct EventFactory {
    characters: Vec<Character>,
    current_character: Option<Character>,
    current_interaction_id: String,
}

impl Default for EventFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl EventFactory {
    pub fn new() -> Self {
        Self {
            characters: Vec::new(),
            current_character: None,
            current_interaction_id: Uuid::new_v4().to_string(),
        }
    }

    // ── Character roster ─────────────────────────────────────────────────

    pub fn set_characters(&mut self, characters: Vec<Character>) {
        if self.current_character.is_none() {
            self.current_character = characters.first().cloned();
        }
        self.characters = characters;
    }

    pub fn characters(&self) -> &[Character] {
        &self.characters
    }

    pub fn current_character(&self) -> Option<&Character> {
        self.current_character.as_ref()
    }

    /// Select the character that outgoing packets are routed to.
    pub fn set_current_character(&mut self, id: &str) -> bool {
        match self.characters.iter().find(|c| c.id == id) {
            Some(character) => {
                self.current_character = Some(character.clone());
                true
            }
            None => false,
        }
    }

    /// Interaction id shared by packets of the current turn.
    pub fn current_interaction_id(&self) -> &str {
        &self.current_interaction_id
    }

    // ── Packet builders ──────────────────────────────────────────────────

    /// Player text input. Starts a new interaction: text supersedes whatever
    /// turn was in flight.
    pub fn text(&mut self, text: impl Into<String>) -> Packet {
        self.current_interaction_id = Uuid::new_v4().to_string();
        self.build(PacketPayload::Text(TextEvent {
            text: text.into(),
            r#final: true,
        }))
    }

    /// One base64 PCM16 audio chunk belonging to the current turn.
    pub fn audio_chunk(&mut self, chunk: impl Into<String>) -> Packet {
        self.build(PacketPayload::AudioChunk(AudioChunkEvent {
            chunk: chunk.into(),
        }))
    }

    /// Cancellation of an in-flight character response.
    pub fn cancel_response(
        &mut self,
        interaction_id: impl Into<String>,
        utterance_ids: Vec<String>,
    ) -> Packet {
        self.build(PacketPayload::Control(ControlEvent {
            action: ControlAction::CancelResponse,
            cancellation: Some(Cancellation {
                interaction_id: interaction_id.into(),
                utterance_id: utterance_ids,
            }),
        }))
    }

    /// TTS playback mute/unmute control.
    pub fn tts_playback_control(&mut self, mute: bool) -> Packet {
        let action = if mute {
            ControlAction::TtsPlaybackMute
        } else {
            ControlAction::TtsPlaybackUnmute
        };
        self.build(PacketPayload::Control(ControlEvent {
            action,
            cancellation: None,
        }))
    }

    /// Capability negotiation, sent once during session open.
    pub fn session_control(&mut self, capabilities: Capabilities) -> Packet {
        self.build(PacketPayload::SessionControl(SessionControlEvent {
            capabilities: Some(capabilities),
        }))
    }

    fn build(&self, payload: PacketPayload) -> Packet {
        let targets = self
            .current_character
            .iter()
            .map(|c| Actor::agent(c.id.clone()))
            .collect();

        Packet {
            packet_id: PacketId {
                packet_id: Uuid::new_v4().to_string(),
                interaction_id: self.current_interaction_id.clone(),
                utterance_id: Uuid::new_v4().to_string(),
                correlation_id: Uuid::new_v4().to_string(),
            },
            routing: Routing {
                source: Actor::player(),
                targets,
            },
            timestamp: Utc::now(),
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::ActorType;

    fn character(id: &str) -> Character {
        Character {
            id: id.into(),
            resource_name: format!("characters/{id}"),
            display_name: id.to_ascii_uppercase(),
        }
    }

    #[test]
    fn text_starts_a_new_interaction_with_fresh_utterance() {
        let mut factory = EventFactory::new();
        let first = factory.text("one");
        let second = factory.text("two");

        assert_ne!(
            first.packet_id.interaction_id,
            second.packet_id.interaction_id
        );
        assert_ne!(first.packet_id.utterance_id, second.packet_id.utterance_id);
        assert!(first.is_player_source());
    }

    #[test]
    fn audio_chunks_share_the_current_interaction() {
        let mut factory = EventFactory::new();
        let text = factory.text("start");
        let chunk_a = factory.audio_chunk("AAAA");
        let chunk_b = factory.audio_chunk("BBBB");

        assert_eq!(
            text.packet_id.interaction_id,
            chunk_a.packet_id.interaction_id
        );
        assert_eq!(
            chunk_a.packet_id.interaction_id,
            chunk_b.packet_id.interaction_id
        );
        assert_ne!(chunk_a.packet_id.utterance_id, chunk_b.packet_id.utterance_id);
    }

    #[test]
    fn packets_target_the_current_character() {
        let mut factory = EventFactory::new();
        factory.set_characters(vec![character("a"), character("b")]);
        assert!(factory.set_current_character("b"));

        let packet = factory.text("hi");
        assert_eq!(packet.routing.targets.len(), 1);
        assert_eq!(packet.routing.targets[0].name, "b");
        assert_eq!(packet.routing.targets[0].actor_type, ActorType::Agent);
    }

    #[test]
    fn first_character_becomes_current_by_default() {
        let mut factory = EventFactory::new();
        factory.set_characters(vec![character("a"), character("b")]);
        assert_eq!(factory.current_character().map(|c| c.id.as_str()), Some("a"));
    }

    #[test]
    fn unknown_character_selection_is_rejected() {
        let mut factory = EventFactory::new();
        factory.set_characters(vec![character("a")]);
        assert!(!factory.set_current_character("missing"));
        assert_eq!(factory.current_character().map(|c| c.id.as_str()), Some("a"));
    }

    #[test]
    fn cancel_response_is_scoped_to_the_interaction() {
        let mut factory = EventFactory::new();
        let packet = factory.cancel_response("i-9", vec!["u-1".into(), "u-2".into()]);

        let control = packet.control().expect("control payload");
        assert_eq!(control.action, ControlAction::CancelResponse);
        let cancellation = control.cancellation.as_ref().expect("cancellation");
        assert_eq!(cancellation.interaction_id, "i-9");
        assert_eq!(cancellation.utterance_id, vec!["u-1", "u-2"]);
    }
}
