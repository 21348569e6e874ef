//! Session lifecycle, send path, and interruption protocol.
//!
//! The manager owns the socket, the current token, and all interaction
//! tracking. Public async entry points never return errors to the caller;
//! failures route through the `on_error` callback so the host decides
//! whether to retry (usage errors included).

pub mod transport;
pub mod ws;

use std::collections::{HashSet, VecDeque};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::entity::{Character, Packet};
use crate::error::{ParlanceError, Result};
use crate::events::{InterruptionRecord, SessionHandlers};
use crate::factory::EventFactory;
use crate::history::{ConversationHistory, HistoryItem};
use crate::token::{GenerateSessionToken, SessionTokenManager};
use transport::{
    AudioPlayback, LoadScene, OpenSessionParams, SerializeSessionState, SessionSocket,
    SessionState, SessionTransport, TransportEvent,
};

/// Socket lifecycle states. `Activating` collapses concurrent `open()` calls
/// into one in-flight attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Activating,
    Active,
    Closed,
}

/// Everything the manager needs, injected by the host.
pub struct SessionOptions {
    pub config: ClientConfig,
    /// Scene resource name for this session.
    pub scene: String,
    pub transport: Arc<dyn SessionTransport>,
    pub token_generator: Arc<dyn GenerateSessionToken>,
    pub scene_loader: Arc<dyn LoadScene>,
    pub playback: Arc<dyn AudioPlayback>,
    pub state_serializer: Option<Arc<dyn SerializeSessionState>>,
    pub handlers: SessionHandlers,
}

/// Cheaply cloneable handle; all clones share one session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: ClientConfig,
    scene: String,
    transport: Arc<dyn SessionTransport>,
    token_manager: SessionTokenManager,
    scene_loader: Arc<dyn LoadScene>,
    playback: Arc<dyn AudioPlayback>,
    state_serializer: Option<Arc<dyn SerializeSessionState>>,
    handlers: SessionHandlers,

    state: Mutex<ConnectionState>,
    /// Single-flight guard for `open()`.
    open_lock: tokio::sync::Mutex<()>,
    socket: tokio::sync::Mutex<Option<Box<dyn SessionSocket>>>,
    dispatch: Mutex<Option<JoinHandle<()>>>,

    factory: Mutex<EventFactory>,
    history: Mutex<ConversationHistory>,
    /// FIFO of packets queued while the socket is down, drained on reopen.
    queue: Mutex<VecDeque<Packet>>,
    /// Interaction id of the most recent outbound or echoed player packet.
    last_interaction: Mutex<Option<String>>,
    /// Interactions for which `on_interruption` already fired.
    interrupted: Mutex<HashSet<String>>,
    tts_muted: AtomicBool,
}

impl SessionManager {
    pub fn new(options: SessionOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                config: options.config,
                scene: options.scene,
                transport: options.transport,
                token_manager: SessionTokenManager::new(options.token_generator),
                scene_loader: options.scene_loader,
                playback: options.playback,
                state_serializer: options.state_serializer,
                handlers: options.handlers,
                state: Mutex::new(ConnectionState::Idle),
                open_lock: tokio::sync::Mutex::new(()),
                socket: tokio::sync::Mutex::new(None),
                dispatch: Mutex::new(None),
                factory: Mutex::new(EventFactory::new()),
                history: Mutex::new(ConversationHistory::new()),
                queue: Mutex::new(VecDeque::new()),
                last_interaction: Mutex::new(None),
                interrupted: Mutex::new(HashSet::new()),
                tts_muted: AtomicBool::new(false),
            }),
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    pub fn connection_state(&self) -> ConnectionState {
        *self.inner.state.lock()
    }

    pub fn is_active(&self) -> bool {
        self.connection_state() == ConnectionState::Active
    }

    /// Establish the session: token, scene roster, socket, previous-state
    /// replay, queued sends. Concurrent calls coalesce into one attempt;
    /// calls arriving while already active return immediately. Failures go
    /// to `on_error` and leave the state `Idle` so a later call retries.
    pub async fn open(&self) {
        if self.is_active() {
            self.inner.drain_queue().await;
            return;
        }
        let _guard = self.inner.open_lock.lock().await;
        if self.is_active() {
            // A send that queued while the previous open() was finishing its
            // activation leaves residue here; flush it now so nothing is
            // stranded until the next reconnect.
            self.inner.drain_queue().await;
            return;
        }

        self.inner.set_state(ConnectionState::Activating);
        match Arc::clone(&self.inner).do_open().await {
            Ok(()) => {
                info!(scene = %self.inner.scene, "session active");
                self.inner.handlers.ready();
            }
            Err(e) => {
                warn!(scene = %self.inner.scene, error = %e, "session open failed");
                self.inner.set_state(ConnectionState::Idle);
                self.inner.handlers.error(e);
            }
        }
    }

    /// Guarded entry point for hosts that manage the connection themselves.
    /// Usable only with auto-reconnect disabled and no session active.
    pub async fn open_manually(&self) {
        if self.inner.config.connection.auto_reconnect {
            self.inner
                .handlers
                .error(ParlanceError::ManualOpenWithAutoReconnect);
            return;
        }
        if self.is_active() {
            self.inner.handlers.error(ParlanceError::ConnectionAlreadyOpen);
            return;
        }
        self.open().await;
    }

    /// Close the socket and stop accepting sends. Does not fire
    /// `on_disconnect`; that callback is reserved for remote drops.
    pub async fn close(&self) {
        if let Some(dispatch) = self.inner.dispatch.lock().take() {
            dispatch.abort();
        }
        let socket = self.inner.socket.lock().await.take();
        if let Some(socket) = socket {
            if let Err(e) = socket.close().await {
                debug!("error closing session socket: {e}");
            }
        }
        self.inner.set_state(ConnectionState::Closed);
        info!(scene = %self.inner.scene, "session closed");
    }

    // ── Send path ────────────────────────────────────────────────────────

    /// Player text input. Supersedes the in-flight turn: triggers the
    /// interruption protocol before the packet hits the wire.
    pub async fn send_text(&self, text: impl Into<String>) {
        let text = text.into();
        self.send_with(move |factory| factory.text(text)).await;
    }

    /// One base64 PCM16 chunk belonging to the current turn.
    pub async fn send_audio(&self, chunk: impl Into<String>) {
        let chunk = chunk.into();
        self.send_with(move |factory| factory.audio_chunk(chunk))
            .await;
    }

    async fn send_with(&self, build: impl FnOnce(&mut EventFactory) -> Packet) {
        let inner = &self.inner;

        if !self.is_active() && !inner.config.connection.auto_reconnect {
            inner.handlers.error(ParlanceError::InactiveConnection);
            return;
        }

        let packet = {
            let mut factory = inner.factory.lock();
            build(&mut factory)
        };

        let mut frame: Vec<Packet> = Vec::new();

        // Outbound barge-in: new player input superseding an in-flight turn
        // cancels that turn before the new packet is transmitted.
        if packet.is_text() && packet.is_player_source() {
            let previous = inner.last_interaction.lock().clone();
            if let Some(previous) = previous {
                if previous != packet.packet_id.interaction_id {
                    if let Some(cancel) = inner.build_interruption(&previous) {
                        frame.push(cancel);
                    }
                }
            }
        }
        *inner.last_interaction.lock() = Some(packet.packet_id.interaction_id.clone());

        let history_update = {
            let mut history = inner.history.lock();
            history
                .add_or_update(&packet)
                .map(|item| (history.get(), vec![item]))
        };
        if let Some((current, diff)) = history_update {
            inner.handlers.history_change(&current, &diff);
        }
        frame.push(packet);

        if self.is_active() {
            // Anything still queued from a racing activation goes out first,
            // keeping wire order FIFO.
            inner.drain_queue().await;
            if let Err(e) = inner.write(&frame).await {
                inner.handlers.error(e);
            }
            return;
        }

        // Reconnect path: queue in FIFO order; `open()` drains the queue
        // before the session goes active. A mute control packet leads the
        // queued payload when TTS playback is muted, so the reopened session
        // starts silent. Never added on a manual, already-open connection.
        {
            let muted = inner.tts_muted.load(Ordering::SeqCst);
            let mute_packet = if muted {
                Some(inner.factory.lock().tts_playback_control(true))
            } else {
                None
            };
            let mut queue = inner.queue.lock();
            if let Some(mute_packet) = mute_packet {
                let already_queued = queue
                    .iter()
                    .any(|queued| queued.control().is_some_and(|c| c.cancellation.is_none()));
                if !already_queued {
                    queue.push_front(mute_packet);
                }
            }
            queue.extend(frame);
        }
        self.open().await;
    }

    /// Forwarded to the playback sink, remembered for reconnects, and sent
    /// to the service immediately when a session is active.
    pub async fn set_tts_playback_mute(&self, mute: bool) {
        self.inner.tts_muted.store(mute, Ordering::SeqCst);
        self.inner.playback.set_mute(mute);
        if self.is_active() {
            let packet = self.inner.factory.lock().tts_playback_control(mute);
            if let Err(e) = self.inner.write(&[packet]).await {
                self.inner.handlers.error(e);
            }
        }
    }

    pub fn is_tts_playback_muted(&self) -> bool {
        self.inner.tts_muted.load(Ordering::SeqCst)
    }

    // ── Roster & history ─────────────────────────────────────────────────

    /// Character roster, loading the scene on demand when empty.
    pub async fn load_characters(&self) -> Vec<Character> {
        if self.inner.factory.lock().characters().is_empty() {
            match self.inner.fetch_scene().await {
                Ok(scene) => {
                    self.inner
                        .history
                        .lock()
                        .set_display_names(&scene.characters);
                    self.inner.factory.lock().set_characters(scene.characters);
                }
                Err(e) => self.inner.handlers.error(e),
            }
        }
        self.inner.factory.lock().characters().to_vec()
    }

    pub fn current_character(&self) -> Option<Character> {
        self.inner.factory.lock().current_character().cloned()
    }

    /// Route subsequent outgoing packets to this character. Returns false
    /// for an id missing from the roster.
    pub fn set_current_character(&self, id: &str) -> bool {
        self.inner.factory.lock().set_current_character(id)
    }

    pub fn get_history(&self) -> Vec<HistoryItem> {
        self.inner.history.lock().get()
    }

    pub fn clear_history(&self) {
        self.inner.history.lock().clear();
        self.inner.handlers.history_change(&[], &[]);
    }

    pub fn get_transcript(&self) -> String {
        self.inner.history.lock().transcript()
    }

    // ── Session-state export ─────────────────────────────────────────────

    /// Serialized snapshot of the session from the service. `None` on
    /// failure (routed to `on_error`) or when no serializer is configured.
    pub async fn get_session_state(&self) -> Option<SessionState> {
        let serializer = self.inner.state_serializer.as_ref()?;
        let result = async {
            let token = self.inner.token_manager.get_token().await?;
            serializer
                .serialize_session_state(&token, &self.inner.scene)
                .await
        }
        .await;

        match result {
            Ok(state) => Some(state),
            Err(e) => {
                self.inner.handlers.error(e);
                None
            }
        }
    }
}

impl Inner {
    fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }

    fn is_active(&self) -> bool {
        *self.state.lock() == ConnectionState::Active
    }

    async fn fetch_scene(&self) -> Result<crate::entity::Scene> {
        let token = self.token_manager.get_token().await?;
        self.scene_loader.load_scene(&self.scene, &token).await
    }

    /// The open sequence proper; runs with the open lock held.
    async fn do_open(self: Arc<Self>) -> Result<()> {
        let token = self.token_manager.get_token().await?;
        let scene = self.scene_loader.load_scene(&self.scene, &token).await?;
        self.history.lock().set_display_names(&scene.characters);
        self.factory.lock().set_characters(scene.characters.clone());

        let (inbound_tx, inbound_rx) = mpsc::channel::<TransportEvent>(64);
        let params = OpenSessionParams {
            token,
            scene: self.scene.clone(),
            config: self.config.clone(),
        };
        let socket = self.transport.open(params, inbound_tx).await?;
        *self.socket.lock().await = Some(socket);

        let dispatch = tokio::spawn(dispatch_inbound(Arc::clone(&self), inbound_rx));
        if let Some(stale) = self.dispatch.lock().replace(dispatch) {
            stale.abort();
        }

        if self.config.history.previous_state && !scene.previous_state.is_empty() {
            let (current, diff) = {
                let mut history = self.history.lock();
                let diff = history.add_packets(&scene.previous_state);
                (history.get(), diff)
            };
            if !diff.is_empty() {
                debug!(items = diff.len(), "replayed previous session history");
                self.handlers.history_change(&current, &diff);
            }
        }

        // Capability negotiation opens the conversation.
        let open_frame = vec![self
            .factory
            .lock()
            .session_control(self.config.capabilities.clone())];
        self.write(&open_frame).await?;

        let queued: Vec<Packet> = self.queue.lock().drain(..).collect();
        if !queued.is_empty() {
            debug!(packets = queued.len(), "draining queued sends");
            self.write(&queued).await?;
        }

        self.set_state(ConnectionState::Active);
        Ok(())
    }

    /// Flush packets that queued after the activation drain. Only meaningful
    /// while a socket is up; write failures route to `on_error`.
    async fn drain_queue(&self) {
        let queued: Vec<Packet> = self.queue.lock().drain(..).collect();
        if queued.is_empty() {
            return;
        }
        debug!(packets = queued.len(), "draining late-queued sends");
        if let Err(e) = self.write(&queued).await {
            self.handlers.error(e);
        }
    }

    async fn write(&self, packets: &[Packet]) -> Result<()> {
        let socket = self.socket.lock().await;
        match socket.as_ref() {
            Some(socket) => socket.write(packets).await,
            None => Err(ParlanceError::InactiveConnection),
        }
    }

    /// Cancel whatever of `interaction_id` is still unplayed. Returns the
    /// cancellation packet to put on the wire, or `None` when nothing was in
    /// flight (idempotent no-op). `on_interruption` fires at most once per
    /// interaction, however many triggers arrive.
    fn build_interruption(&self, interaction_id: &str) -> Option<Packet> {
        let excluded = self
            .playback
            .exclude_current_interaction_packets(interaction_id);
        if excluded.is_empty() {
            return None;
        }

        let utterance_ids: Vec<String> = excluded
            .iter()
            .map(|packet| packet.packet_id.utterance_id.clone())
            .collect();

        if self.interrupted.lock().insert(interaction_id.to_string()) {
            let record = InterruptionRecord {
                interaction_id: interaction_id.to_string(),
                utterance_id: utterance_ids.clone(),
            };
            self.handlers.interruption(&record);
        }

        Some(
            self.factory
                .lock()
                .cancel_response(interaction_id, utterance_ids),
        )
    }

    async fn handle_inbound(&self, packet: Packet) {
        self.handlers.message(&packet);

        let history_update = {
            let mut history = self.history.lock();
            history
                .add_or_update(&packet)
                .map(|item| (history.get(), vec![item]))
        };
        if let Some((current, diff)) = history_update {
            self.handlers.history_change(&current, &diff);
        }

        // Inbound barge-in: player input echoed from another surface for a
        // newer interaction interrupts the turn tracked here.
        if packet.is_text() && packet.is_player_source() {
            let previous = self.last_interaction.lock().clone();
            let inbound_interaction = packet.packet_id.interaction_id.clone();
            if previous.as_deref() != Some(inbound_interaction.as_str()) {
                if let Some(previous) = previous {
                    if let Some(cancel) = self.build_interruption(&previous) {
                        if let Err(e) = self.write(&[cancel]).await {
                            self.handlers.error(e);
                        }
                    }
                }
                *self.last_interaction.lock() = Some(inbound_interaction);
            }
        }
    }
}

async fn dispatch_inbound(inner: Arc<Inner>, mut inbound: mpsc::Receiver<TransportEvent>) {
    while let Some(event) = inbound.recv().await {
        match event {
            TransportEvent::Packet(packet) => inner.handle_inbound(packet).await,
            TransportEvent::Disconnected => {
                warn!(scene = %inner.scene, "session socket dropped");
                *inner.socket.lock().await = None;
                inner.set_state(ConnectionState::Idle);
                inner.handlers.disconnect();
                break;
            }
        }
    }
}
