//! # parlance-core
//!
//! Client SDK for live, interruptible conversations with a remote
//! character-simulation service over a persistent socket.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → CaptureBridge → AudioSegmenter → base64 chunks
//!                                                   │
//!                        SessionManager::send_audio / send_text
//!                                                   │
//!                               WebSocket ⇄ character service
//!                                                   │
//!                    history merge · interruption · SessionHandlers
//! ```
//!
//! The audio callback is zero-alloc; segmentation and encoding run on a
//! worker thread. All session state lives in [`session::SessionManager`];
//! failures surface through the `on_error` callback, never as panics or
//! errors thrown across the public async API.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod config;
pub mod entity;
pub mod error;
pub mod events;
pub mod factory;
pub mod history;
pub mod session;
pub mod token;

// Convenience re-exports for downstream crates
pub use audio::segmenter::{AudioSegmenter, SegmenterConfig};
pub use audio::{CaptureBridge, ChunkListener, ChunkMessage};
pub use config::{Capabilities, ClientConfig, ConnectionConfig, Gateway, HistoryConfig};
pub use entity::{Character, Packet, Scene, SessionToken};
pub use error::{ParlanceError, Result};
pub use events::{InterruptionRecord, SessionHandlers};
pub use factory::EventFactory;
pub use history::{ChatHistoryType, ConversationHistory, HistoryItem};
pub use session::transport::{
    AudioPlayback, LoadScene, SerializeSessionState, SessionSocket, SessionState, SessionTransport,
};
pub use session::ws::WsTransport;
pub use session::{ConnectionState, SessionManager, SessionOptions};
pub use token::{GenerateSessionToken, SessionTokenManager};
