//! Interactive command-line host for a live character session.
//!
//! Wires the SDK to a real gateway: stdin lines become player text, the
//! microphone (with `--mic`) streams segmented audio chunks, and inbound
//! character text prints to stdout. Demonstrates the embedding contract:
//! collaborators injected, all failures arriving via `on_error`.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use parlance_core::session::transport::{AudioPlayback, LoadScene};
use parlance_core::{
    CaptureBridge, Character, ChunkMessage, ClientConfig, GenerateSessionToken, Packet, Scene,
    SegmenterConfig, SessionHandlers, SessionManager, SessionOptions, SessionToken, WsTransport,
};

#[derive(Parser, Debug)]
#[command(name = "parlance", version, about = "Converse with a character scene over a live session")]
struct Args {
    /// Gateway hostname, e.g. api.example.com
    #[arg(long)]
    hostname: String,

    /// Scene resource name, e.g. workspaces/w/scenes/tavern
    #[arg(long)]
    scene: String,

    /// Bearer token for the session (falls back to $PARLANCE_TOKEN)
    #[arg(long)]
    token: Option<String>,

    /// Character ids in the scene; the first becomes the current target
    #[arg(long = "character", required = true)]
    characters: Vec<String>,

    /// Connect without TLS (ws:// instead of wss://)
    #[arg(long)]
    insecure: bool,

    /// Disable automatic reconnection on send
    #[arg(long)]
    no_reconnect: bool,

    /// Stream microphone audio in addition to typed text
    #[arg(long)]
    mic: bool,
}

/// Static bearer token supplied on the command line; a real host would call
/// its backend here.
struct StaticToken {
    token: String,
}

#[async_trait]
impl GenerateSessionToken for StaticToken {
    async fn generate_session_token(&self) -> parlance_core::Result<SessionToken> {
        Ok(SessionToken {
            session_id: Uuid::new_v4().to_string(),
            token: self.token.clone(),
            token_type: "Bearer".into(),
            expiration_time: Utc::now() + chrono::Duration::hours(1),
        })
    }
}

/// Roster assembled from `--character` flags; a real host would query the
/// scene service.
struct StaticScene {
    characters: Vec<Character>,
}

#[async_trait]
impl LoadScene for StaticScene {
    async fn load_scene(
        &self,
        _scene: &str,
        _token: &SessionToken,
    ) -> parlance_core::Result<Scene> {
        Ok(Scene {
            characters: self.characters.clone(),
            previous_state: Vec::new(),
        })
    }
}

/// The CLI has no local audio playback, so nothing is ever in flight and
/// barge-in cancellations resolve as no-ops.
struct NoPlayback;

impl AudioPlayback for NoPlayback {
    fn exclude_current_interaction_packets(&self, _interaction_id: &str) -> Vec<Packet> {
        Vec::new()
    }

    fn set_mute(&self, mute: bool) {
        info!(mute, "tts playback mute toggled");
    }
}

fn handlers() -> SessionHandlers {
    SessionHandlers {
        on_ready: Some(Box::new(|| println!("* session ready"))),
        on_error: Some(Box::new(|e| error!("session error: {e}"))),
        on_message: Some(Box::new(|packet| {
            if let Some(text) = packet.text() {
                if text.r#final && packet.is_character_source() {
                    println!("{}: {}", packet.routing.source.name, text.text);
                }
            }
        })),
        on_disconnect: Some(Box::new(|| warn!("session disconnected"))),
        on_interruption: Some(Box::new(|record| {
            info!(
                interaction = %record.interaction_id,
                utterances = record.utterance_id.len(),
                "response interrupted"
            );
        })),
        on_history_change: None,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let token = match args.token {
        Some(token) => token,
        None => std::env::var("PARLANCE_TOKEN")
            .context("pass --token or set PARLANCE_TOKEN")?,
    };

    let mut config = ClientConfig::default();
    config.connection.auto_reconnect = !args.no_reconnect;
    config.connection.gateway.hostname = args.hostname;
    config.connection.gateway.ssl = !args.insecure;

    let characters: Vec<Character> = args
        .characters
        .iter()
        .map(|id| Character {
            id: id.clone(),
            resource_name: format!("characters/{id}"),
            display_name: id.clone(),
        })
        .collect();

    let manager = SessionManager::new(SessionOptions {
        config,
        scene: args.scene,
        transport: Arc::new(WsTransport),
        token_generator: Arc::new(StaticToken { token }),
        scene_loader: Arc::new(StaticScene { characters }),
        playback: Arc::new(NoPlayback),
        state_serializer: None,
        handlers: handlers(),
    });

    manager.open().await;
    let roster = manager.load_characters().await;
    info!(characters = roster.len(), "scene loaded");

    let mut bridge = CaptureBridge::new();
    if args.mic {
        // Chunks cross from the capture threads into the async world over a
        // channel; a forwarding task owns the sends.
        let (chunk_tx, mut chunk_rx) = mpsc::unbounded_channel::<ChunkMessage>();
        bridge.start_conversion(
            SegmenterConfig::default(),
            Box::new(move |message| {
                let _ = chunk_tx.send(message);
            }),
        )?;

        let audio_session = manager.clone();
        tokio::spawn(async move {
            while let Some(message) = chunk_rx.recv().await {
                match message {
                    ChunkMessage::Chunk(chunk) => audio_session.send_audio(chunk).await,
                    ChunkMessage::Error(e) => error!("audio pipeline error: {e}"),
                }
            }
        });
        info!("microphone streaming enabled");
    }

    println!("type to talk; /mute, /unmute, /history, /quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "" => continue,
            "/quit" => break,
            "/mute" => manager.set_tts_playback_mute(true).await,
            "/unmute" => manager.set_tts_playback_mute(false).await,
            "/history" => println!("{}", manager.get_transcript()),
            text => manager.send_text(text).await,
        }
    }

    bridge.stop_conversion();
    manager.close().await;
    Ok(())
}
