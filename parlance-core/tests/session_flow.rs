//! End-to-end session behavior against scripted collaborators: an in-memory
//! transport capturing wire frames, counting token/scene providers, and a
//! playback sink with a configurable in-flight queue.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use parlance_core::entity::{
    Actor, AudioChunkEvent, ControlAction, PacketId, PacketPayload, Routing, TextEvent,
};
use parlance_core::session::transport::{
    AudioPlayback, LoadScene, OpenSessionParams, SerializeSessionState, SessionSocket,
    SessionState, SessionTransport, TransportEvent,
};
use parlance_core::{
    Character, ChatHistoryType, ClientConfig, ConnectionState, GenerateSessionToken, HistoryItem,
    InterruptionRecord, Packet, ParlanceError, Result, Scene, SessionHandlers, SessionManager,
    SessionOptions, SessionToken,
};

// ── Scripted collaborators ──────────────────────────────────────────────

struct CountingGenerator {
    calls: AtomicUsize,
    ttl_secs: i64,
}

impl CountingGenerator {
    fn new(ttl_secs: i64) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            ttl_secs,
        }
    }
}

#[async_trait]
impl GenerateSessionToken for CountingGenerator {
    async fn generate_session_token(&self) -> Result<SessionToken> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(SessionToken {
            session_id: format!("session-{call}"),
            token: format!("token-{call}"),
            token_type: "Bearer".into(),
            expiration_time: Utc::now() + chrono::Duration::seconds(self.ttl_secs),
        })
    }
}

struct ScriptedScene {
    characters: Vec<Character>,
    previous_state: Vec<Packet>,
    calls: AtomicUsize,
}

impl ScriptedScene {
    fn new(characters: Vec<Character>) -> Self {
        Self {
            characters,
            previous_state: Vec::new(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl LoadScene for ScriptedScene {
    async fn load_scene(&self, _scene: &str, _token: &SessionToken) -> Result<Scene> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Scene {
            characters: self.characters.clone(),
            previous_state: self.previous_state.clone(),
        })
    }
}

#[derive(Default)]
struct ScriptedPlayback {
    in_flight: Mutex<HashMap<String, Vec<Packet>>>,
    exclude_calls: Mutex<Vec<String>>,
    mute_calls: Mutex<Vec<bool>>,
}

impl AudioPlayback for ScriptedPlayback {
    fn exclude_current_interaction_packets(&self, interaction_id: &str) -> Vec<Packet> {
        self.exclude_calls.lock().push(interaction_id.to_string());
        self.in_flight
            .lock()
            .get(interaction_id)
            .cloned()
            .unwrap_or_default()
    }

    fn set_mute(&self, mute: bool) {
        self.mute_calls.lock().push(mute);
    }
}

struct ScriptedTransport {
    opens: AtomicUsize,
    fail_next: AtomicBool,
    frames: Arc<Mutex<Vec<Vec<Packet>>>>,
    inbound: Mutex<Vec<mpsc::Sender<TransportEvent>>>,
    /// Applied to every socket write, to widen the activation window.
    write_delay: Arc<Mutex<Duration>>,
}

impl ScriptedTransport {
    fn new() -> Self {
        Self {
            opens: AtomicUsize::new(0),
            fail_next: AtomicBool::new(false),
            frames: Arc::new(Mutex::new(Vec::new())),
            inbound: Mutex::new(Vec::new()),
            write_delay: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    async fn inject(&self, event: TransportEvent) {
        let sender = self
            .inbound
            .lock()
            .last()
            .cloned()
            .expect("no socket opened yet");
        sender.send(event).await.expect("dispatch task gone");
        // Let the dispatch task process the event.
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    fn written_frames(&self) -> Vec<Vec<Packet>> {
        self.frames.lock().clone()
    }
}

#[async_trait]
impl SessionTransport for ScriptedTransport {
    async fn open(
        &self,
        _params: OpenSessionParams,
        inbound: mpsc::Sender<TransportEvent>,
    ) -> Result<Box<dyn SessionSocket>> {
        // Simulated connect latency so concurrent open() calls overlap.
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(ParlanceError::Transport("scripted connect failure".into()));
        }
        self.inbound.lock().push(inbound);
        Ok(Box::new(MemorySocket {
            frames: Arc::clone(&self.frames),
            write_delay: Arc::clone(&self.write_delay),
        }))
    }
}

struct MemorySocket {
    frames: Arc<Mutex<Vec<Vec<Packet>>>>,
    write_delay: Arc<Mutex<Duration>>,
}

#[async_trait]
impl SessionSocket for MemorySocket {
    async fn write(&self, packets: &[Packet]) -> Result<()> {
        let delay = *self.write_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.frames.lock().push(packets.to_vec());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

struct ScriptedStateSerializer {
    fail: bool,
}

#[async_trait]
impl SerializeSessionState for ScriptedStateSerializer {
    async fn serialize_session_state(
        &self,
        _token: &SessionToken,
        _scene: &str,
    ) -> Result<SessionState> {
        if self.fail {
            return Err(ParlanceError::Transport("snapshot unavailable".into()));
        }
        Ok(SessionState {
            state: Some("c2VyaWFsaXplZA==".into()),
            creation_time: Utc::now(),
        })
    }
}

// ── Callback capture ────────────────────────────────────────────────────

#[derive(Default)]
struct Captured {
    errors: Mutex<Vec<String>>,
    messages: Mutex<Vec<Packet>>,
    interruptions: Mutex<Vec<InterruptionRecord>>,
    history_batches: Mutex<Vec<Vec<HistoryItem>>>,
    history_snapshots: Mutex<Vec<Vec<HistoryItem>>>,
    ready: AtomicUsize,
    disconnects: AtomicUsize,
}

fn capturing_handlers() -> (SessionHandlers, Arc<Captured>) {
    let captured = Arc::new(Captured::default());

    let errors = Arc::clone(&captured);
    let messages = Arc::clone(&captured);
    let interruptions = Arc::clone(&captured);
    let history = Arc::clone(&captured);
    let ready = Arc::clone(&captured);
    let disconnects = Arc::clone(&captured);

    let handlers = SessionHandlers {
        on_ready: Some(Box::new(move || {
            ready.ready.fetch_add(1, Ordering::SeqCst);
        })),
        on_error: Some(Box::new(move |e| {
            errors.errors.lock().push(e.to_string());
        })),
        on_message: Some(Box::new(move |packet| {
            messages.messages.lock().push(packet.clone());
        })),
        on_disconnect: Some(Box::new(move || {
            disconnects.disconnects.fetch_add(1, Ordering::SeqCst);
        })),
        on_interruption: Some(Box::new(move |record| {
            interruptions.interruptions.lock().push(record.clone());
        })),
        on_history_change: Some(Box::new(move |current, diff| {
            history.history_snapshots.lock().push(current.to_vec());
            history.history_batches.lock().push(diff.to_vec());
        })),
    };

    (handlers, captured)
}

// ── Harness ─────────────────────────────────────────────────────────────

struct Harness {
    manager: SessionManager,
    transport: Arc<ScriptedTransport>,
    generator: Arc<CountingGenerator>,
    scene: Arc<ScriptedScene>,
    playback: Arc<ScriptedPlayback>,
    captured: Arc<Captured>,
}

fn character(id: &str) -> Character {
    Character {
        id: id.into(),
        resource_name: format!("characters/{id}"),
        display_name: id.to_ascii_uppercase(),
    }
}

fn harness_with(config: ClientConfig, scene: ScriptedScene, token_ttl_secs: i64) -> Harness {
    let transport = Arc::new(ScriptedTransport::new());
    let generator = Arc::new(CountingGenerator::new(token_ttl_secs));
    let scene = Arc::new(scene);
    let playback = Arc::new(ScriptedPlayback::default());
    let (handlers, captured) = capturing_handlers();

    let manager = SessionManager::new(SessionOptions {
        config,
        scene: "workspaces/w/scenes/tavern".into(),
        transport: transport.clone(),
        token_generator: generator.clone(),
        scene_loader: scene.clone(),
        playback: playback.clone(),
        state_serializer: None,
        handlers,
    });

    Harness {
        manager,
        transport,
        generator,
        scene,
        playback,
        captured,
    }
}

fn harness(auto_reconnect: bool) -> Harness {
    let mut config = ClientConfig::default();
    config.connection.auto_reconnect = auto_reconnect;
    harness_with(
        config,
        ScriptedScene::new(vec![character("innkeeper"), character("bard")]),
        3600,
    )
}

// ── Packet builders for inbound traffic ─────────────────────────────────

fn inbound_packet(source: Actor, interaction: &str, utterance: &str, payload: PacketPayload) -> Packet {
    Packet {
        packet_id: PacketId {
            packet_id: format!("p-{utterance}"),
            interaction_id: interaction.into(),
            utterance_id: utterance.into(),
            correlation_id: format!("c-{interaction}"),
        },
        routing: Routing {
            source,
            targets: vec![Actor::agent("innkeeper")],
        },
        timestamp: Utc::now(),
        payload,
    }
}

fn player_text(interaction: &str, utterance: &str, text: &str) -> Packet {
    inbound_packet(
        Actor::player(),
        interaction,
        utterance,
        PacketPayload::Text(TextEvent {
            text: text.into(),
            r#final: true,
        }),
    )
}

fn agent_audio(interaction: &str, utterance: &str) -> Packet {
    inbound_packet(
        Actor::agent("innkeeper"),
        interaction,
        utterance,
        PacketPayload::AudioChunk(AudioChunkEvent {
            chunk: "AAAA".into(),
        }),
    )
}

fn cancel_packets(frames: &[Vec<Packet>]) -> Vec<Packet> {
    frames
        .iter()
        .flatten()
        .filter(|p| {
            p.control()
                .is_some_and(|c| c.action == ControlAction::CancelResponse)
        })
        .cloned()
        .collect()
}

fn outbound_text_packets(frames: &[Vec<Packet>]) -> Vec<Packet> {
    frames.iter().flatten().filter(|p| p.is_text()).cloned().collect()
}

// ── Lifecycle ───────────────────────────────────────────────────────────

#[tokio::test]
async fn concurrent_opens_are_single_flight() {
    let h = harness(true);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let manager = h.manager.clone();
        handles.push(tokio::spawn(async move { manager.open().await }));
    }
    for handle in handles {
        handle.await.expect("task");
    }

    assert!(h.manager.is_active());
    assert_eq!(h.generator.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.scene.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.transport.opens.load(Ordering::SeqCst), 1);
    assert_eq!(h.captured.ready.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn fresh_token_is_reused_across_reconnects() {
    let h = harness(true);
    h.manager.open().await;
    h.manager.close().await;
    h.manager.open().await;

    assert_eq!(h.transport.opens.load(Ordering::SeqCst), 2);
    assert_eq!(h.generator.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn expired_token_is_regenerated_on_reopen() {
    let h = harness_with(
        ClientConfig::default(),
        ScriptedScene::new(vec![character("innkeeper")]),
        0,
    );
    h.manager.open().await;
    h.manager.close().await;
    h.manager.open().await;

    assert_eq!(h.generator.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn failed_open_leaves_state_idle_and_retries() {
    let h = harness(true);
    h.transport.fail_next.store(true, Ordering::SeqCst);

    h.manager.open().await;
    assert_eq!(h.manager.connection_state(), ConnectionState::Idle);
    assert_eq!(
        h.captured.errors.lock().as_slice(),
        ["transport error: scripted connect failure"]
    );

    h.manager.open().await;
    assert!(h.manager.is_active());
}

#[tokio::test]
async fn open_manually_is_rejected_with_auto_reconnect() {
    let h = harness(true);
    h.manager.open_manually().await;

    assert!(!h.manager.is_active());
    assert_eq!(h.transport.opens.load(Ordering::SeqCst), 0);
    assert_eq!(
        h.captured.errors.lock().as_slice(),
        ["Impossible to open connection manually with `autoReconnect` enabled"]
    );
}

#[tokio::test]
async fn open_manually_is_rejected_when_already_open() {
    let h = harness(false);
    h.manager.open_manually().await;
    assert!(h.manager.is_active());

    h.manager.open_manually().await;
    assert_eq!(
        h.captured.errors.lock().as_slice(),
        ["Connection is already open"]
    );
}

#[tokio::test]
async fn remote_drop_fires_disconnect_and_resets_state() {
    let h = harness(true);
    h.manager.open().await;

    h.transport.inject(TransportEvent::Disconnected).await;

    assert_eq!(h.captured.disconnects.load(Ordering::SeqCst), 1);
    assert_eq!(h.manager.connection_state(), ConnectionState::Idle);
}

// ── Send path ───────────────────────────────────────────────────────────

#[tokio::test]
async fn send_while_inactive_without_auto_reconnect_never_opens() {
    let h = harness(false);
    h.manager.send_text("hello?").await;

    assert_eq!(h.transport.opens.load(Ordering::SeqCst), 0);
    assert_eq!(
        h.captured.errors.lock().as_slice(),
        ["Unable to send data due inactive connection"]
    );
}

#[tokio::test]
async fn send_with_auto_reconnect_opens_and_drains_the_queue() {
    let h = harness(true);
    h.manager.send_text("wake up").await;

    assert!(h.manager.is_active());
    let frames = h.transport.written_frames();
    // Open frame carries the capability negotiation; the queued payload
    // follows as its own frame.
    assert!(matches!(
        frames[0][0].payload,
        PacketPayload::SessionControl(_)
    ));
    let texts = outbound_text_packets(&frames);
    assert_eq!(texts.len(), 1);
    assert_eq!(texts[0].text().expect("text payload").text, "wake up");
}

#[tokio::test]
async fn a_send_racing_activation_still_reaches_the_wire() {
    let h = harness(true);
    // Slow socket writes keep the first open() inside its activation window
    // (queue already drained, state not yet Active) long enough for a second
    // send to land there.
    *h.transport.write_delay.lock() = Duration::from_millis(100);

    let manager = h.manager.clone();
    let first = tokio::spawn(async move { manager.send_text("first").await });
    tokio::time::sleep(Duration::from_millis(150)).await;
    h.manager.send_text("second").await;
    first.await.expect("task");

    assert!(h.manager.is_active());
    let bodies: Vec<String> = outbound_text_packets(&h.transport.written_frames())
        .iter()
        .map(|p| p.text().expect("text payload").text.clone())
        .collect();
    assert_eq!(bodies, ["first", "second"]);
}

#[tokio::test]
async fn mute_control_leads_the_payload_only_on_auto_reopen() {
    let h = harness(true);
    h.manager.set_tts_playback_mute(true).await;
    assert_eq!(h.playback.mute_calls.lock().as_slice(), [true]);

    h.manager.send_text("quietly now").await;

    let frames = h.transport.written_frames();
    // Frame 0: session control. Frame 1: queued [mute, text] in order.
    let queued = &frames[1];
    assert_eq!(
        queued[0].control().expect("control").action,
        ControlAction::TtsPlaybackMute
    );
    assert!(queued[1].is_text());
}

#[tokio::test]
async fn no_mute_control_on_a_manual_already_open_connection() {
    let h = harness(false);
    h.manager.open_manually().await;
    h.manager.set_tts_playback_mute(true).await;
    h.manager.send_text("still here").await;

    let frames = h.transport.written_frames();
    // The explicit mute toggle goes out once while active; the later send
    // must not prepend another mute control.
    let mutes: Vec<&Packet> = frames
        .iter()
        .flatten()
        .filter(|p| {
            p.control()
                .is_some_and(|c| c.action == ControlAction::TtsPlaybackMute)
        })
        .collect();
    assert_eq!(mutes.len(), 1);
    let last_frame = frames.last().expect("frames written");
    assert_eq!(last_frame.len(), 1);
    assert!(last_frame[0].is_text());
}

// ── Interruption protocol ───────────────────────────────────────────────

#[tokio::test]
async fn new_player_text_cancels_the_in_flight_response_once() {
    let h = harness(true);
    h.manager.open().await;
    h.manager.send_text("tell me a story").await;

    let first_interaction = {
        let frames = h.transport.written_frames();
        outbound_text_packets(&frames)[0].packet_id.interaction_id.clone()
    };

    // Character response for that turn is still queued for playback.
    h.playback.in_flight.lock().insert(
        first_interaction.clone(),
        vec![
            agent_audio(&first_interaction, "u-a"),
            agent_audio(&first_interaction, "u-b"),
        ],
    );

    h.manager.send_text("actually, stop").await;

    let frames = h.transport.written_frames();
    let cancels = cancel_packets(&frames);
    assert_eq!(cancels.len(), 1);
    let cancellation = cancels[0]
        .control()
        .and_then(|c| c.cancellation.as_ref())
        .expect("cancellation payload");
    assert_eq!(cancellation.interaction_id, first_interaction);
    assert_eq!(cancellation.utterance_id, vec!["u-a", "u-b"]);

    // Cancellation is ordered before the new text on the wire.
    let frame_with_cancel = frames
        .iter()
        .find(|frame| frame.iter().any(|p| p.packet_id == cancels[0].packet_id))
        .expect("cancel frame");
    let cancel_pos = frame_with_cancel
        .iter()
        .position(|p| p.packet_id == cancels[0].packet_id)
        .expect("position");
    let text_pos = frame_with_cancel.iter().position(|p| p.is_text());
    assert!(text_pos.is_some_and(|t| cancel_pos < t));

    let interruptions = h.captured.interruptions.lock();
    assert_eq!(interruptions.len(), 1);
    assert_eq!(interruptions[0].interaction_id, first_interaction);
    assert_eq!(interruptions[0].utterance_id, vec!["u-a", "u-b"]);
}

#[tokio::test]
async fn cancelling_with_nothing_in_flight_is_a_no_op() {
    let h = harness(true);
    h.manager.open().await;
    h.manager.send_text("one").await;
    h.manager.send_text("two").await;

    // Playback had nothing queued, so no cancel hits the wire and no
    // interruption is raised.
    assert_eq!(cancel_packets(&h.transport.written_frames()).len(), 0);
    assert!(h.captured.interruptions.lock().is_empty());
    // The playback collaborator was still consulted exactly once.
    assert_eq!(h.playback.exclude_calls.lock().len(), 1);
}

#[tokio::test]
async fn repeated_interruption_of_one_interaction_raises_once() {
    let h = harness(true);
    h.manager.open().await;
    h.manager.send_text("first turn").await;

    let first_interaction = {
        let frames = h.transport.written_frames();
        outbound_text_packets(&frames)[0].packet_id.interaction_id.clone()
    };
    h.playback.in_flight.lock().insert(
        first_interaction.clone(),
        vec![agent_audio(&first_interaction, "u-a")],
    );

    // Local barge-in: cancel + onInterruption.
    h.manager.send_text("second turn").await;
    assert_eq!(h.captured.interruptions.lock().len(), 1);

    // A late echo of the first turn's player input arrives from the service.
    // It makes the first interaction current again without anything new in
    // flight for the second turn.
    h.transport
        .inject(TransportEvent::Packet(player_text(
            &first_interaction,
            "u-echo",
            "first turn",
        )))
        .await;

    // A third local turn supersedes the first interaction again: the stale
    // playback packets are cancelled on the wire, but onInterruption does
    // not fire a second time for the same interaction.
    h.manager.send_text("third turn").await;

    assert_eq!(cancel_packets(&h.transport.written_frames()).len(), 2);
    assert_eq!(h.captured.interruptions.lock().len(), 1);
}

#[tokio::test]
async fn inbound_player_text_for_a_new_interaction_interrupts() {
    let h = harness(true);
    h.manager.open().await;
    h.manager.send_text("tell me a story").await;

    let first_interaction = {
        let frames = h.transport.written_frames();
        outbound_text_packets(&frames)[0].packet_id.interaction_id.clone()
    };
    h.playback.in_flight.lock().insert(
        first_interaction.clone(),
        vec![agent_audio(&first_interaction, "u-a")],
    );

    // Player input from another surface starts a new interaction.
    h.transport
        .inject(TransportEvent::Packet(player_text(
            "remote-interaction",
            "u-remote",
            "never mind",
        )))
        .await;

    let cancels = cancel_packets(&h.transport.written_frames());
    assert_eq!(cancels.len(), 1);
    assert_eq!(
        cancels[0]
            .control()
            .and_then(|c| c.cancellation.as_ref())
            .expect("cancellation")
            .interaction_id,
        first_interaction
    );
    assert_eq!(h.captured.interruptions.lock().len(), 1);
}

// ── History ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn one_sent_text_yields_one_player_history_item() {
    let h = harness(true);
    h.manager.open().await;
    h.manager.send_text("hello there").await;

    let history = h.manager.get_history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].text, "hello there");
    assert_eq!(history[0].item_type, ChatHistoryType::Actor);
    assert!(history[0].source.is_player);
}

#[tokio::test]
async fn streaming_inbound_text_merges_into_one_item() {
    let h = harness(true);
    h.manager.open().await;

    let mut partial = inbound_packet(
        Actor::agent("innkeeper"),
        "i-1",
        "u-1",
        PacketPayload::Text(TextEvent {
            text: "wel".into(),
            r#final: false,
        }),
    );
    h.transport
        .inject(TransportEvent::Packet(partial.clone()))
        .await;

    partial.payload = PacketPayload::Text(TextEvent {
        text: "welcome, traveler".into(),
        r#final: true,
    });
    h.transport.inject(TransportEvent::Packet(partial)).await;

    let history = h.manager.get_history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].text, "welcome, traveler");
    assert!(!history[0].is_recognizing);

    // Each merge fired one single-item batch alongside the full list.
    let batches = h.captured.history_batches.lock();
    assert_eq!(batches.len(), 2);
    assert!(batches.iter().all(|batch| batch.len() == 1));
    let snapshots = h.captured.history_snapshots.lock();
    assert_eq!(snapshots.len(), 2);
    assert_eq!(snapshots[1], history);
    assert_eq!(h.captured.messages.lock().len(), 2);
}

#[tokio::test]
async fn previous_state_is_replayed_as_one_batch() {
    let mut config = ClientConfig::default();
    config.history.previous_state = true;

    let mut scene = ScriptedScene::new(vec![character("innkeeper")]);
    scene.previous_state = vec![
        inbound_packet(
            Actor::player(),
            "i-old",
            "u-1",
            PacketPayload::Text(TextEvent {
                text: "any rooms left?".into(),
                r#final: true,
            }),
        ),
        inbound_packet(
            Actor::agent("innkeeper"),
            "i-old",
            "u-2",
            PacketPayload::Text(TextEvent {
                text: "just the one".into(),
                r#final: true,
            }),
        ),
    ];

    let h = harness_with(config, scene, 3600);
    h.manager.open().await;

    assert_eq!(h.manager.get_history().len(), 2);
    let batches = h.captured.history_batches.lock();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 2);
    assert_eq!(h.captured.history_snapshots.lock()[0].len(), 2);
    assert_eq!(
        h.manager.get_transcript(),
        "Player: any rooms left?\nINNKEEPER: just the one"
    );
}

#[tokio::test]
async fn clear_history_empties_and_notifies() {
    let h = harness(true);
    h.manager.open().await;
    h.manager.send_text("hi").await;

    h.manager.clear_history();
    assert!(h.manager.get_history().is_empty());
    assert!(h
        .captured
        .history_batches
        .lock()
        .last()
        .expect("batches")
        .is_empty());
}

// ── Roster & session state ──────────────────────────────────────────────

#[tokio::test]
async fn characters_load_on_demand_and_only_once() {
    let h = harness(true);

    let roster = h.manager.load_characters().await;
    assert_eq!(roster.len(), 2);
    assert_eq!(
        h.manager.current_character().map(|c| c.id),
        Some("innkeeper".into())
    );

    h.manager.load_characters().await;
    assert_eq!(h.scene.calls.load(Ordering::SeqCst), 1);

    assert!(h.manager.set_current_character("bard"));
    assert!(!h.manager.set_current_character("stranger"));
}

#[tokio::test]
async fn session_state_round_trips_through_the_serializer() {
    let (handlers, captured) = capturing_handlers();
    let manager = SessionManager::new(SessionOptions {
        config: ClientConfig::default(),
        scene: "demo".into(),
        transport: Arc::new(ScriptedTransport::new()),
        token_generator: Arc::new(CountingGenerator::new(3600)),
        scene_loader: Arc::new(ScriptedScene::new(vec![character("innkeeper")])),
        playback: Arc::new(ScriptedPlayback::default()),
        state_serializer: Some(Arc::new(ScriptedStateSerializer { fail: false })),
        handlers,
    });

    let state = manager.get_session_state().await.expect("state");
    assert_eq!(state.state.as_deref(), Some("c2VyaWFsaXplZA=="));
    assert!(captured.errors.lock().is_empty());
}

#[tokio::test]
async fn session_state_failure_routes_to_on_error() {
    let transport = Arc::new(ScriptedTransport::new());
    let (handlers, captured) = capturing_handlers();
    let manager = SessionManager::new(SessionOptions {
        config: ClientConfig::default(),
        scene: "demo".into(),
        transport,
        token_generator: Arc::new(CountingGenerator::new(3600)),
        scene_loader: Arc::new(ScriptedScene::new(vec![])),
        playback: Arc::new(ScriptedPlayback::default()),
        state_serializer: Some(Arc::new(ScriptedStateSerializer { fail: true })),
        handlers,
    });

    assert!(manager.get_session_state().await.is_none());
    assert_eq!(
        captured.errors.lock().as_slice(),
        ["transport error: snapshot unavailable"]
    );
}
