use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tracing::{error, info, warn};

use crate::session::{CallEvent, CallSession, EndReason, SessionState};

/// What happened on the last call, for status queries
#[derive(Debug, Clone, Default, Serialize)]
pub struct CallActivity {
    /// Where the last recording was written
    pub last_recording: Option<PathBuf>,
    /// Last `error` message from the remote party
    pub last_error: Option<String>,
    pub last_end: Option<EndReason>,
}

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// The one call this process can hold
    pub session: Arc<Mutex<CallSession>>,

    /// Readable while `session` is locked by a starting call
    pub state_rx: watch::Receiver<SessionState>,

    /// Used when a start request names no endpoint
    pub default_endpoint: Option<String>,

    pub activity: Arc<RwLock<CallActivity>>,
}

impl AppState {
    /// Wrap `session` and spawn the task that saves finished recordings
    /// into `recordings_dir`.
    pub fn new(
        session: CallSession,
        events: mpsc::UnboundedReceiver<CallEvent>,
        default_endpoint: Option<String>,
        recordings_dir: PathBuf,
    ) -> Self {
        let state_rx = session.subscribe_state();
        let activity = Arc::new(RwLock::new(CallActivity::default()));

        tokio::spawn(track_events(events, activity.clone(), recordings_dir));

        Self {
            session: Arc::new(Mutex::new(session)),
            state_rx,
            default_endpoint,
            activity,
        }
    }
}

async fn track_events(
    mut events: mpsc::UnboundedReceiver<CallEvent>,
    activity: Arc<RwLock<CallActivity>>,
    recordings_dir: PathBuf,
) {
    while let Some(event) = events.recv().await {
        match event {
            CallEvent::StateChanged(_) => {}
            CallEvent::RemoteError(content) => {
                activity.write().await.last_error = Some(content);
            }
            CallEvent::RecordingReady(artifact) => {
                let dir = recordings_dir.clone();
                let saved = tokio::task::spawn_blocking(move || artifact.save(&dir)).await;
                match saved {
                    Ok(Ok(path)) => activity.write().await.last_recording = Some(path),
                    Ok(Err(e)) => error!("Failed to save recording: {}", e),
                    Err(e) => error!("Recording save task failed: {}", e),
                }
            }
            CallEvent::Ended(reason) => {
                if let EndReason::TransportFault(fault) = &reason {
                    warn!("Call ended by transport fault: {}", fault);
                }
                activity.write().await.last_end = Some(reason);
            }
        }
    }
    info!("Call event stream closed");
}
