use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Statistics about the current (or last) call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionStats {
    /// Mic frames sent to the remote party
    pub frames_sent: u64,

    /// Voice frames received
    pub frames_received: u64,

    /// Odd-length payloads dropped
    pub malformed_frames: u64,

    /// When the call reached Talking
    pub started_at: Option<DateTime<Utc>>,

    /// Talking time in seconds
    pub duration_secs: f64,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    frames_sent: AtomicU64,
    frames_received: AtomicU64,
    malformed_frames: AtomicU64,
    window: Mutex<(Option<DateTime<Utc>>, Option<DateTime<Utc>>)>,
}

impl StatsCounters {
    pub(crate) fn reset(&self) {
        self.frames_sent.store(0, Ordering::Relaxed);
        self.frames_received.store(0, Ordering::Relaxed);
        self.malformed_frames.store(0, Ordering::Relaxed);
        *self.window.lock().unwrap_or_else(PoisonError::into_inner) = (None, None);
    }

    pub(crate) fn frame_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_malformed(&self, count: u64) {
        self.malformed_frames.store(count, Ordering::Relaxed);
    }

    pub(crate) fn mark_started(&self) {
        self.window.lock().unwrap_or_else(PoisonError::into_inner).0 = Some(Utc::now());
    }

    pub(crate) fn mark_ended(&self) {
        let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        if window.0.is_some() {
            window.1 = Some(Utc::now());
        }
    }

    pub(crate) fn snapshot(&self) -> SessionStats {
        let (started_at, ended_at) = *self.window.lock().unwrap_or_else(PoisonError::into_inner);
        let duration_secs = started_at
            .map(|start| {
                let end = ended_at.unwrap_or_else(Utc::now);
                (end - start).num_milliseconds().max(0) as f64 / 1000.0
            })
            .unwrap_or(0.0);

        SessionStats {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            malformed_frames: self.malformed_frames.load(Ordering::Relaxed),
            started_at,
            duration_secs,
        }
    }
}
