//! Read-only conversation projection for display.
//!
//! Every outbound and inbound packet is projected into a [`HistoryItem`] and
//! merged by `utterance_id`: a later packet for the same utterance updates
//! the existing item in place (streaming partial text keeps refining one row
//! until `final = true`) instead of appending a duplicate.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::{Character, ControlAction, Packet, PacketPayload};

/// Display classification of a history row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatHistoryType {
    /// Spoken/typed line from a player or character.
    Actor,
    /// Marker closing a logical turn.
    InteractionEnd,
}

/// Who produced a history row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistorySource {
    pub is_player: bool,
    pub is_character: bool,
    pub name: Option<String>,
}

/// Derived, read-only projection of one utterance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryItem {
    /// Keyed by the packet's `utterance_id`.
    pub id: String,
    #[serde(rename = "type")]
    pub item_type: ChatHistoryType,
    pub text: String,
    pub source: HistorySource,
    pub date: DateTime<Utc>,
    pub interaction_id: String,
    pub correlation_id: String,
    /// Still streaming — text may change on the next merge.
    pub is_recognizing: bool,
}

/// Ordered projection state. Mutated only through merge/append.
#[derive(Default)]
pub struct ConversationHistory {
    items: Vec<HistoryItem>,
    /// Character routing id → roster display name.
    display_names: HashMap<String, String>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the roster so character rows carry display names instead of
    /// routing ids. Already-projected items keep their original name.
    pub fn set_display_names(&mut self, characters: &[Character]) {
        self.display_names = characters
            .iter()
            .map(|character| (character.id.clone(), character.display_name.clone()))
            .collect();
    }

    /// Project one packet and merge it in. Returns the resulting item when
    /// the packet is displayable, `None` otherwise (audio chunks and most
    /// control packets have no visible row).
    pub fn add_or_update(&mut self, packet: &Packet) -> Option<HistoryItem> {
        let item = self.project(packet)?;

        match self.items.iter_mut().find(|existing| existing.id == item.id) {
            Some(existing) => {
                *existing = item.clone();
            }
            None => self.items.push(item.clone()),
        }
        Some(item)
    }

    /// Merge a batch of packets (previous-state replay), returning the diff
    /// in merge order.
    pub fn add_packets(&mut self, packets: &[Packet]) -> Vec<HistoryItem> {
        packets
            .iter()
            .filter_map(|packet| self.add_or_update(packet))
            .collect()
    }

    pub fn get(&self) -> Vec<HistoryItem> {
        self.items.clone()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Plain-text transcript of all actor rows.
    pub fn transcript(&self) -> String {
        let mut lines = Vec::new();
        for item in &self.items {
            if item.item_type != ChatHistoryType::Actor {
                continue;
            }
            let speaker = if item.source.is_player {
                "Player"
            } else {
                item.source.name.as_deref().unwrap_or("Character")
            };
            lines.push(format!("{speaker}: {}", item.text));
        }
        lines.join("\n")
    }

    fn project(&self, packet: &Packet) -> Option<HistoryItem> {
        let (item_type, text, is_recognizing) = match &packet.payload {
            PacketPayload::Text(text) => {
                (ChatHistoryType::Actor, text.text.clone(), !text.r#final)
            }
            PacketPayload::Control(control) if control.action == ControlAction::InteractionEnd => {
                (ChatHistoryType::InteractionEnd, String::new(), false)
            }
            _ => return None,
        };

        let source = &packet.routing.source;
        Some(HistoryItem {
            id: packet.packet_id.utterance_id.clone(),
            item_type,
            text,
            source: HistorySource {
                is_player: packet.is_player_source(),
                is_character: packet.is_character_source(),
                name: if source.name.is_empty() {
                    None
                } else {
                    Some(
                        self.display_names
                            .get(&source.name)
                            .cloned()
                            .unwrap_or_else(|| source.name.clone()),
                    )
                },
            },
            date: packet.timestamp,
            interaction_id: packet.packet_id.interaction_id.clone(),
            correlation_id: packet.packet_id.correlation_id.clone(),
            is_recognizing,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Actor, AudioChunkEvent, PacketId, Routing, TextEvent};

    fn text_packet(utterance_id: &str, text: &str, r#final: bool) -> Packet {
        Packet {
            packet_id: PacketId {
                packet_id: "p".into(),
                interaction_id: "i-1".into(),
                utterance_id: utterance_id.into(),
                correlation_id: "c-1".into(),
            },
            routing: Routing {
                source: Actor::agent("npc"),
                targets: vec![Actor::player()],
            },
            timestamp: Utc::now(),
            payload: PacketPayload::Text(TextEvent {
                text: text.into(),
                r#final,
            }),
        }
    }

    #[test]
    fn streaming_text_updates_one_item() {
        let mut history = ConversationHistory::new();

        history.add_or_update(&text_packet("u-1", "hel", false));
        history.add_or_update(&text_packet("u-1", "hello there", true));

        let items = history.get();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].text, "hello there");
        assert!(!items[0].is_recognizing);
    }

    #[test]
    fn distinct_utterances_append() {
        let mut history = ConversationHistory::new();
        history.add_or_update(&text_packet("u-1", "one", true));
        history.add_or_update(&text_packet("u-2", "two", true));
        assert_eq!(history.get().len(), 2);
    }

    #[test]
    fn audio_chunks_have_no_visible_row() {
        let mut history = ConversationHistory::new();
        let mut packet = text_packet("u-1", "", true);
        packet.payload = PacketPayload::AudioChunk(AudioChunkEvent { chunk: "AA==".into() });

        assert!(history.add_or_update(&packet).is_none());
        assert!(history.is_empty());
    }

    #[test]
    fn transcript_names_speakers() {
        let mut history = ConversationHistory::new();
        let mut player_line = text_packet("u-1", "hi", true);
        player_line.routing.source = Actor::player();
        history.add_or_update(&player_line);
        history.add_or_update(&text_packet("u-2", "greetings", true));

        assert_eq!(history.transcript(), "Player: hi\nnpc: greetings");
    }

    #[test]
    fn roster_display_names_resolve_in_projection() {
        let mut history = ConversationHistory::new();
        history.set_display_names(&[Character {
            id: "npc".into(),
            resource_name: "characters/npc".into(),
            display_name: "The Innkeeper".into(),
        }]);

        history.add_or_update(&text_packet("u-1", "greetings", true));

        let items = history.get();
        assert_eq!(items[0].source.name.as_deref(), Some("The Innkeeper"));
        assert_eq!(history.transcript(), "The Innkeeper: greetings");
    }

    #[test]
    fn clear_empties_the_projection() {
        let mut history = ConversationHistory::new();
        history.add_or_update(&text_packet("u-1", "one", true));
        history.clear();
        assert!(history.is_empty());
    }
}
