//! Transport and collaborator seams.
//!
//! The session manager owns the protocol; everything that touches the
//! network or the host platform sits behind one of these traits so scripted
//! implementations can drive the manager in tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::config::ClientConfig;
use crate::entity::{Packet, Scene, SessionToken};
use crate::error::Result;

/// Every inbound frame from the service wraps one packet under `result`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundFrame {
    pub result: Packet,
}

/// Parameters for establishing one socket.
#[derive(Debug, Clone)]
pub struct OpenSessionParams {
    pub token: SessionToken,
    /// Scene resource name, qualifying the session path.
    pub scene: String,
    pub config: ClientConfig,
}

/// Events the transport pushes back to the session manager.
#[derive(Debug)]
pub enum TransportEvent {
    Packet(Packet),
    /// The socket dropped; the manager decides whether to reconnect.
    Disconnected,
}

/// Socket factory. One call per (re)connection attempt.
#[async_trait]
pub trait SessionTransport: Send + Sync {
    async fn open(
        &self,
        params: OpenSessionParams,
        inbound: mpsc::Sender<TransportEvent>,
    ) -> Result<Box<dyn SessionSocket>>;
}

/// Write half of an established session. A frame is an ordered packet list;
/// the transport preserves list order on the wire.
#[async_trait]
pub trait SessionSocket: Send + Sync {
    async fn write(&self, packets: &[Packet]) -> Result<()>;
    async fn close(&self) -> Result<()>;
}

/// Scene/character roster loading, external to the core.
#[async_trait]
pub trait LoadScene: Send + Sync {
    async fn load_scene(&self, scene: &str, token: &SessionToken) -> Result<Scene>;
}

/// Serialized session snapshot for continuation across processes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    /// Opaque service-defined state blob.
    pub state: Option<String>,
    pub creation_time: DateTime<Utc>,
}

#[async_trait]
pub trait SerializeSessionState: Send + Sync {
    async fn serialize_session_state(
        &self,
        token: &SessionToken,
        scene: &str,
    ) -> Result<SessionState>;
}

/// Playback sink queries the interruption protocol depends on. Synchronous:
/// the playback queue lives on the host side and answers immediately.
pub trait AudioPlayback: Send + Sync {
    /// Remove and return the queued, not-yet-played packets belonging to
    /// `interaction_id`. An empty result means nothing was in flight.
    fn exclude_current_interaction_packets(&self, interaction_id: &str) -> Vec<Packet>;

    fn set_mute(&self, mute: bool);
}
