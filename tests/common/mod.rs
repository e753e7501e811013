// Test doubles for driving a CallSession without devices or a network.
//
// - LoopbackConnector hands the test the far end of every channel it opens
// - TestDevices gives out a scripted microphone (blocks pushed by the test)
//   and a speaker whose mix the test pulls by hand

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use voice_call::audio::{AudioBackend, AudioDevices, AudioOutput, CapturedBlock, OutputMix};
use voice_call::transport::{Connector, LinkEvent, Outbound, TransportChannel};
use voice_call::{CallError, CallEvent, CallSession, ControlMessage, SessionConfig, SessionState};

pub const WAIT: Duration = Duration::from_secs(5);

// ============================================================================
// Transport
// ============================================================================

/// Far end of a loopback channel
pub struct Remote {
    pub identity: String,
    pub endpoint: String,
    /// Everything the session put on the wire, in order
    pub sent: mpsc::UnboundedReceiver<Outbound>,
    /// Inject inbound traffic
    pub link: mpsc::UnboundedSender<LinkEvent>,
}

impl Remote {
    pub fn send_binary(&self, bytes: usize) {
        let _ = self.link.send(LinkEvent::Binary(vec![0x40; bytes]));
    }

    pub fn send_text(&self, text: &str) {
        let _ = self.link.send(LinkEvent::Text(text.to_string()));
    }

    /// Next outbound control message, skipping audio
    pub async fn next_control(&mut self) -> Result<ControlMessage> {
        loop {
            match timeout(WAIT, self.sent.recv()).await? {
                Some(Outbound::Control(message)) => return Ok(message),
                Some(Outbound::Audio(_)) => continue,
                Some(Outbound::Close) => return Err(anyhow!("channel closed")),
                None => return Err(anyhow!("channel dropped")),
            }
        }
    }

    /// Next `n` outbound audio payload sizes, skipping control messages
    pub async fn next_audio(&mut self, n: usize) -> Result<Vec<usize>> {
        let mut sizes = Vec::new();
        while sizes.len() < n {
            match timeout(WAIT, self.sent.recv()).await? {
                Some(Outbound::Audio(frame)) => sizes.push(frame.byte_len()),
                Some(Outbound::Control(_)) => continue,
                other => return Err(anyhow!("expected audio, got {:?}", other)),
            }
        }
        Ok(sizes)
    }

    /// Everything queued so far
    pub fn drain(&mut self) -> Vec<Outbound> {
        let mut items = Vec::new();
        while let Ok(item) = self.sent.try_recv() {
            items.push(item);
        }
        items
    }
}

pub struct LoopbackConnector {
    remotes: mpsc::UnboundedSender<Remote>,
    fail: bool,
}

impl LoopbackConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Remote>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { remotes: tx, fail: false }, rx)
    }

    /// Connector whose endpoint always refuses
    pub fn refusing() -> Self {
        let (tx, _) = mpsc::unbounded_channel();
        Self { remotes: tx, fail: true }
    }
}

#[async_trait::async_trait]
impl Connector for LoopbackConnector {
    async fn open(&self, endpoint: &str, identity: &str) -> voice_call::Result<TransportChannel> {
        if self.fail {
            return Err(CallError::Connection(format!("{} refused the connection", endpoint)));
        }

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let _ = self.remotes.send(Remote {
            identity: identity.to_string(),
            endpoint: endpoint.to_string(),
            sent: out_rx,
            link: in_tx,
        });
        Ok(TransportChannel::new(out_tx, in_rx, 16000))
    }
}

// ============================================================================
// Devices
// ============================================================================

/// Test side of the scripted microphone and speaker
#[derive(Clone)]
pub struct DeviceProbe {
    mic_tx: Arc<Mutex<Option<mpsc::Sender<CapturedBlock>>>>,
    pub mic_starts: Arc<AtomicUsize>,
    pub mic_stops: Arc<AtomicUsize>,
    mix: Arc<Mutex<Option<OutputMix>>>,
    pub speaker_stops: Arc<AtomicUsize>,
}

impl DeviceProbe {
    /// Push one mic block at 16kHz
    pub async fn feed(&self, samples: Vec<f32>) -> Result<()> {
        let tx = self
            .mic_tx
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| anyhow!("microphone not started"))?;
        tx.send(CapturedBlock::new(samples, 16000)).await?;
        Ok(())
    }

    /// Pull one quantum from the speaker mix, as the device would
    pub fn render(&self, quantum: usize) -> Vec<f32> {
        let mut out = vec![0.0; quantum];
        if let Some(mix) = self.mix.lock().unwrap().as_ref() {
            mix.render(&mut out);
        }
        out
    }

    pub fn mic_stops(&self) -> usize {
        self.mic_stops.load(Ordering::SeqCst)
    }

    pub fn speaker_stops(&self) -> usize {
        self.speaker_stops.load(Ordering::SeqCst)
    }
}

pub struct TestDevices {
    probe: DeviceProbe,
    deny_mic: bool,
}

impl TestDevices {
    pub fn new() -> (Arc<Self>, DeviceProbe) {
        Self::build(false)
    }

    /// Devices whose microphone access is denied
    pub fn denying() -> (Arc<Self>, DeviceProbe) {
        Self::build(true)
    }

    fn build(deny_mic: bool) -> (Arc<Self>, DeviceProbe) {
        let probe = DeviceProbe {
            mic_tx: Arc::new(Mutex::new(None)),
            mic_starts: Arc::new(AtomicUsize::new(0)),
            mic_stops: Arc::new(AtomicUsize::new(0)),
            mix: Arc::new(Mutex::new(None)),
            speaker_stops: Arc::new(AtomicUsize::new(0)),
        };
        (
            Arc::new(Self {
                probe: probe.clone(),
                deny_mic,
            }),
            probe,
        )
    }
}

impl AudioDevices for TestDevices {
    fn microphone(&self) -> voice_call::Result<Box<dyn AudioBackend>> {
        if self.deny_mic {
            return Err(CallError::Permission("microphone access denied".to_string()));
        }
        Ok(Box::new(ScriptedMic {
            probe: self.probe.clone(),
            capturing: false,
        }))
    }

    fn speaker(&self) -> voice_call::Result<Box<dyn AudioOutput>> {
        Ok(Box::new(ManualSpeaker {
            probe: self.probe.clone(),
        }))
    }
}

struct ScriptedMic {
    probe: DeviceProbe,
    capturing: bool,
}

#[async_trait::async_trait]
impl AudioBackend for ScriptedMic {
    async fn start(&mut self) -> voice_call::Result<mpsc::Receiver<CapturedBlock>> {
        let (tx, rx) = mpsc::channel(64);
        *self.probe.mic_tx.lock().unwrap() = Some(tx);
        self.probe.mic_starts.fetch_add(1, Ordering::SeqCst);
        self.capturing = true;
        Ok(rx)
    }

    async fn stop(&mut self) -> voice_call::Result<()> {
        self.probe.mic_tx.lock().unwrap().take();
        self.probe.mic_stops.fetch_add(1, Ordering::SeqCst);
        self.capturing = false;
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

struct ManualSpeaker {
    probe: DeviceProbe,
}

#[async_trait::async_trait]
impl AudioOutput for ManualSpeaker {
    async fn start(&mut self, mix: OutputMix) -> voice_call::Result<()> {
        *self.probe.mix.lock().unwrap() = Some(mix);
        Ok(())
    }

    fn stop(&mut self) {
        if self.probe.mix.lock().unwrap().take().is_some() {
            self.probe.speaker_stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn sample_rate(&self) -> u32 {
        16000
    }

    fn name(&self) -> &str {
        "manual"
    }
}

// ============================================================================
// Session helpers
// ============================================================================

pub fn fast_config() -> SessionConfig {
    SessionConfig {
        connect_delay: Duration::from_millis(10),
        ..SessionConfig::default()
    }
}

pub async fn wait_for_state(rx: &mut watch::Receiver<SessionState>, want: SessionState) -> Result<()> {
    timeout(WAIT, async {
        loop {
            if *rx.borrow_and_update() == want {
                return Ok::<_, anyhow::Error>(());
            }
            rx.changed().await?;
        }
    })
    .await?
}

/// Wait until `check` holds for the session, polling
pub async fn wait_until(session: &CallSession, check: impl Fn(&CallSession) -> bool) -> Result<()> {
    timeout(WAIT, async {
        while !check(session) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await?;
    Ok(())
}

/// Next event that is not a state change
pub async fn next_event(events: &mut mpsc::UnboundedReceiver<CallEvent>) -> Result<CallEvent> {
    loop {
        match timeout(WAIT, events.recv()).await? {
            Some(CallEvent::StateChanged(_)) => continue,
            Some(event) => return Ok(event),
            None => return Err(anyhow!("event stream closed")),
        }
    }
}
