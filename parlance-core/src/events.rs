//! Host-facing callback surface.
//!
//! Everything the session reports flows through these callbacks; the public
//! API never throws runtime failures at the caller. Unset callbacks are
//! silently skipped.

use crate::entity::Packet;
use crate::error::ParlanceError;
use crate::history::HistoryItem;

/// An in-flight character response that got interrupted, either by new
/// player input or by a newer interaction arriving from the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterruptionRecord {
    pub interaction_id: String,
    /// Utterances of that interaction still queued for playback when the
    /// interruption fired.
    pub utterance_id: Vec<String>,
}

type Callback<T> = Option<Box<dyn Fn(&T) + Send + Sync>>;

/// Callbacks registered by the host application. All of them are invoked
/// from the session's dispatch task.
#[derive(Default)]
pub struct SessionHandlers {
    pub on_ready: Option<Box<dyn Fn() + Send + Sync>>,
    pub on_error: Callback<ParlanceError>,
    pub on_message: Callback<Packet>,
    pub on_disconnect: Option<Box<dyn Fn() + Send + Sync>>,
    pub on_interruption: Callback<InterruptionRecord>,
    /// Invoked with the full current history plus the items that changed.
    #[allow(clippy::type_complexity)]
    pub on_history_change: Option<Box<dyn Fn(&[HistoryItem], &[HistoryItem]) + Send + Sync>>,
}

impl SessionHandlers {
    pub(crate) fn ready(&self) {
        if let Some(handler) = &self.on_ready {
            handler();
        }
    }

    pub(crate) fn error(&self, error: ParlanceError) {
        if let Some(handler) = &self.on_error {
            handler(&error);
        }
    }

    pub(crate) fn message(&self, packet: &Packet) {
        if let Some(handler) = &self.on_message {
            handler(packet);
        }
    }

    pub(crate) fn disconnect(&self) {
        if let Some(handler) = &self.on_disconnect {
            handler();
        }
    }

    pub(crate) fn interruption(&self, record: &InterruptionRecord) {
        if let Some(handler) = &self.on_interruption {
            handler(record);
        }
    }

    pub(crate) fn history_change(&self, current: &[HistoryItem], diff: &[HistoryItem]) {
        if let Some(handler) = &self.on_history_change {
            handler(current, diff);
        }
    }
}
