//! HTTP API for the embedding application's "start call" / "end call" controls
//!
//! - POST /call/start - Start a call (`{identity, endpoint?}`)
//! - POST /call/stop - End the current call
//! - GET /call/status - State, stats and last recording
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::{AppState, CallActivity};
