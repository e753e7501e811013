use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::messages::ControlMessage;
use crate::audio::AudioFrame;
use crate::error::{CallError, Result};

/// Items queued for the wire. A single queue per channel keeps control
/// messages in order relative to the audio sent before them.
#[derive(Debug)]
pub enum Outbound {
    Audio(AudioFrame),
    Control(ControlMessage),
    Close,
}

/// Raw events from the link task, before validation
#[derive(Debug)]
pub enum LinkEvent {
    Binary(Vec<u8>),
    Text(String),
    Closed(Option<String>),
    Error(String),
}

/// Validated inbound events
#[derive(Debug)]
pub enum TransportEvent {
    Audio(AudioFrame),
    Control(ControlMessage),
    /// Remote side closed the channel
    Closed(Option<String>),
    /// Transport-level failure
    Fault(String),
}

/// Opens call channels. The session only talks to this trait.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    /// Open a channel to `endpoint` on behalf of `identity`.
    ///
    /// Unreachable endpoints and rejected handshakes fail with
    /// [`CallError::Connection`]; nothing is retried.
    async fn open(&self, endpoint: &str, identity: &str) -> Result<TransportChannel>;
}

/// Full-duplex, message-framed audio channel.
pub struct TransportChannel {
    outbound: mpsc::UnboundedSender<Outbound>,
    inbound: mpsc::UnboundedReceiver<LinkEvent>,
    inbound_rate: u32,
    closed: bool,
    remote_closed: bool,
    malformed: u64,
    task: Option<JoinHandle<()>>,
}

impl TransportChannel {
    /// Wrap the two halves of a link. Inbound binary payloads are tagged
    /// with `inbound_rate`.
    pub fn new(
        outbound: mpsc::UnboundedSender<Outbound>,
        inbound: mpsc::UnboundedReceiver<LinkEvent>,
        inbound_rate: u32,
    ) -> Self {
        Self {
            outbound,
            inbound,
            inbound_rate,
            closed: false,
            remote_closed: false,
            malformed: 0,
            task: None,
        }
    }

    /// Attach the task driving the link so it is detached, not leaked, on close
    pub fn with_task(mut self, task: JoinHandle<()>) -> Self {
        self.task = Some(task);
        self
    }

    pub fn send_audio(&self, frame: AudioFrame) -> Result<()> {
        self.send(Outbound::Audio(frame))
    }

    pub fn send_control(&self, message: ControlMessage) -> Result<()> {
        debug!("Sending control message: {}", message.kind());
        self.send(Outbound::Control(message))
    }

    fn send(&self, item: Outbound) -> Result<()> {
        if !self.is_open() {
            return Err(CallError::TransportFault("channel is closed".to_string()));
        }
        self.outbound
            .send(item)
            .map_err(|_| CallError::TransportFault("link task has exited".to_string()))
    }

    /// Next inbound event, in wire order.
    ///
    /// Odd-length binary payloads are transport fragments, not audio: they
    /// are counted and dropped. Text that is not a control message is
    /// ignored. Returns `None` once the link is gone.
    pub async fn recv(&mut self) -> Option<TransportEvent> {
        loop {
            match self.inbound.recv().await {
                Some(LinkEvent::Binary(data)) => match AudioFrame::from_bytes(data, self.inbound_rate) {
                    Ok(frame) => return Some(TransportEvent::Audio(frame)),
                    Err(e) => {
                        self.malformed += 1;
                        debug!("Dropping inbound frame: {}", e);
                    }
                },
                Some(LinkEvent::Text(text)) => match ControlMessage::parse(&text) {
                    Some(message) => return Some(TransportEvent::Control(message)),
                    None => debug!("Ignoring non-control text frame: {}", text),
                },
                Some(LinkEvent::Closed(reason)) => {
                    self.remote_closed = true;
                    return Some(TransportEvent::Closed(reason));
                }
                Some(LinkEvent::Error(error)) => {
                    self.remote_closed = true;
                    return Some(TransportEvent::Fault(error));
                }
                None => {
                    self.remote_closed = true;
                    return None;
                }
            }
        }
    }

    /// Close the channel. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if !self.remote_closed {
            let _ = self.outbound.send(Outbound::Close);
        }
        // The link task finishes on its own after flushing the close frame
        self.task.take();
        info!("Transport channel closed");
    }

    pub fn is_open(&self) -> bool {
        !self.closed && !self.remote_closed && !self.outbound.is_closed()
    }

    /// Binary payloads dropped for not being whole PCM16 samples
    pub fn malformed_frames(&self) -> u64 {
        self.malformed
    }
}

impl Drop for TransportChannel {
    fn drop(&mut self) {
        self.close();
    }
}
