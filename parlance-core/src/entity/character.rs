//! Character roster returned by the scene loader collaborator.

use serde::{Deserialize, Serialize};

use super::packet::Packet;

/// One addressable character in the loaded scene.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Character {
    /// Routing id used in packet targets.
    pub id: String,
    /// Fully qualified resource name.
    pub resource_name: String,
    pub display_name: String,
}

/// Result of loading a scene with a session token.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct Scene {
    pub characters: Vec<Character>,
    /// Packets from a previous session, replayed into history on open when
    /// `history.previous_state` is configured.
    pub previous_state: Vec<Packet>,
}
