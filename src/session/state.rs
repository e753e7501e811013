use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tracing::info;

use crate::recording::RecordingArtifact;

/// Lifecycle of one call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    Ringing,
    Connecting,
    Talking,
    Ending,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Ringing => "ringing",
            SessionState::Connecting => "connecting",
            SessionState::Talking => "talking",
            SessionState::Ending => "ending",
        };
        f.write_str(name)
    }
}

/// Why a call ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum EndReason {
    UserStop,
    RemoteClosed,
    TransportFault(String),
}

/// Notifications for the embedding application
#[derive(Debug, Clone)]
pub enum CallEvent {
    StateChanged(SessionState),
    /// `error` control message from the remote party
    RemoteError(String),
    /// Finished recording, ready for upload
    RecordingReady(RecordingArtifact),
    Ended(EndReason),
}

/// Publishes state changes to watchers and the event stream
#[derive(Clone)]
pub(crate) struct StateHandle {
    tx: Arc<watch::Sender<SessionState>>,
    events: mpsc::UnboundedSender<CallEvent>,
}

impl StateHandle {
    pub(crate) fn new(events: mpsc::UnboundedSender<CallEvent>) -> Self {
        let (tx, _) = watch::channel(SessionState::Idle);
        Self {
            tx: Arc::new(tx),
            events,
        }
    }

    pub(crate) fn get(&self) -> SessionState {
        *self.tx.borrow()
    }

    pub(crate) fn set(&self, state: SessionState) {
        let previous = self.tx.send_replace(state);
        if previous == state {
            return;
        }
        info!("Call state: {} -> {}", previous, state);
        self.emit(CallEvent::StateChanged(state));
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }

    pub(crate) fn emit(&self, event: CallEvent) {
        // Nobody listening is fine
        let _ = self.events.send(event);
    }
}
