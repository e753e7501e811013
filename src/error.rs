use thiserror::Error;

/// Errors surfaced by the call pipeline.
///
/// Fatal variants (`Permission`, `Connection`, `TransportFault`) end the call
/// and return the session to Idle. `MalformedFrame` never leaves the
/// transport layer: it is logged and the frame is dropped.
#[derive(Debug, Error)]
pub enum CallError {
    /// Microphone access was denied or no input device is available
    #[error("microphone permission denied: {0}")]
    Permission(String),

    /// Transport endpoint unreachable or handshake rejected
    #[error("connection failed: {0}")]
    Connection(String),

    /// Transport failed or closed while the call was running
    #[error("transport fault: {0}")]
    TransportFault(String),

    /// Binary payload that is not a whole number of PCM16 samples
    #[error("malformed audio frame: {len} bytes")]
    MalformedFrame { len: usize },

    /// Invalid conversion parameters, such as a zero sample rate in config
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Operation not allowed in the current session state
    #[error("invalid session state: {0}")]
    InvalidState(String),

    /// Audio device failure unrelated to permissions
    #[error("audio device error: {0}")]
    Device(String),

    /// Recording artifact could not be encoded
    #[error("recording error: {0}")]
    Recording(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CallError>;
