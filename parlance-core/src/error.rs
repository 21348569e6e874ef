use thiserror::Error;

/// All errors produced by parlance-core.
#[derive(Debug, Error)]
pub enum ParlanceError {
    #[error("Impossible to open connection manually with `autoReconnect` enabled")]
    ManualOpenWithAutoReconnect,

    #[error("Connection is already open")]
    ConnectionAlreadyOpen,

    #[error("Unable to send data due inactive connection")]
    InactiveConnection,

    #[error("token generation error: {0}")]
    TokenGeneration(String),

    #[error("scene load error: {0}")]
    SceneLoad(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("capture is already running")]
    AlreadyRecording,

    #[error("invalid packet: {0}")]
    InvalidPacket(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ParlanceError>;
