//! Call session management
//!
//! `CallSession` owns one call at a time and sequences it:
//! - Ringing: speaker up, ringtone looping, mic acquired, transport opening
//! - Connecting: `ready_for_streaming` sent, connect cue playing
//! - Talking: mic frames flow out, voice frames flow into playback and the
//!   recording mix, playback transitions are reported back
//! - Ending: `audio_cleanup`, graph disconnected, devices released,
//!   recording finalized, transport closed

mod config;
mod session;
mod state;
mod stats;

pub use config::SessionConfig;
pub use session::CallSession;
pub use state::{CallEvent, EndReason, SessionState};
pub use stats::SessionStats;
