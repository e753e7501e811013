use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant, Sleep};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::config::SessionConfig;
use super::state::{CallEvent, EndReason, SessionState, StateHandle};
use super::stats::{SessionStats, StatsCounters};
use crate::audio::{
    AudioDevices, AudioFrame, AudioOutput, CaptureEncoder, CapturedBlock, ChunkPlaybackBuffer, Cue,
    OutputMix, PlaybackConfig, PlaybackEvent,
};
use crate::error::{CallError, Result};
use crate::recording::{RecordingArtifact, RecordingComposer};
use crate::transport::{Connector, ControlMessage, TransportChannel, TransportEvent};

/// One voice call at a time: mic out, synthesized voice in, recording on the side.
///
/// `start` brings up the speaker, the microphone and the transport in that
/// order; any failure on the way releases what was acquired and returns
/// to Idle. Once running, a driver task owns every resource of the call and
/// all exits (user stop, remote close, transport fault) go through its
/// single teardown.
pub struct CallSession {
    config: SessionConfig,
    devices: Arc<dyn AudioDevices>,
    connector: Arc<dyn Connector>,
    state: StateHandle,
    stats: Arc<StatsCounters>,
    active: Option<ActiveCall>,
}

struct ActiveCall {
    session_id: String,
    stop_tx: Option<oneshot::Sender<()>>,
    driver: JoinHandle<()>,
}

impl CallSession {
    pub fn new(
        config: SessionConfig,
        devices: Arc<dyn AudioDevices>,
        connector: Arc<dyn Connector>,
    ) -> (Self, mpsc::UnboundedReceiver<CallEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let session = Self {
            config,
            devices,
            connector,
            state: StateHandle::new(events_tx),
            stats: Arc::new(StatsCounters::default()),
            active: None,
        };
        (session, events_rx)
    }

    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn stats(&self) -> SessionStats {
        self.stats.snapshot()
    }

    /// Id of the running call, if any
    pub fn session_id(&self) -> Option<&str> {
        self.active
            .as_ref()
            .filter(|call| !call.driver.is_finished())
            .map(|call| call.session_id.as_str())
    }

    /// Start a call to `endpoint` as `identity`.
    ///
    /// Suspends while the microphone is acquired and while the transport
    /// handshakes. Fails with `InvalidState` if a call is already running.
    pub async fn start(&mut self, endpoint: &str, identity: &str) -> Result<()> {
        self.reap();

        if identity.trim().is_empty() {
            return Err(CallError::InvalidState("an identity is required to start a call".to_string()));
        }
        if self.active.is_some() || self.state() != SessionState::Idle {
            return Err(CallError::InvalidState(format!("call already {}", self.state())));
        }

        let session_id = format!("call-{}", Uuid::new_v4().simple());
        info!("Starting call {} to {}", session_id, endpoint);
        self.stats.reset();
        self.state.set(SessionState::Ringing);

        let mut graph = match self.bring_up_local(&session_id).await {
            Ok(graph) => graph,
            Err(e) => {
                self.state.set(SessionState::Idle);
                return Err(e);
            }
        };

        // Microphone
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (mic_tx, mic_rx) = mpsc::unbounded_channel();
        match self.open_microphone(frames_tx, mic_tx).await {
            Ok(encoder) => graph.encoder = Some(encoder),
            Err(e) => {
                warn!("Microphone unavailable: {}", e);
                graph.release().await;
                self.state.set(SessionState::Idle);
                return Err(e);
            }
        }

        // Transport
        let channel = match self.connector.open(endpoint, identity).await {
            Ok(channel) => channel,
            Err(e) => {
                warn!("Could not open call channel: {}", e);
                graph.release().await;
                self.state.set(SessionState::Idle);
                return Err(e);
            }
        };
        self.state.set(SessionState::Connecting);

        let connect_cue = self.load_cue(self.config.connect_cue.as_deref(), graph.output_rate);
        let (stop_tx, stop_rx) = oneshot::channel();
        let driver = CallDriver {
            graph,
            channel,
            state: self.state.clone(),
            stats: self.stats.clone(),
            connect_delay: self.config.connect_delay,
            connect_cue,
        };
        let inputs = DriverInputs {
            stop: stop_rx,
            frames: frames_rx,
            mic: mic_rx,
        };

        self.active = Some(ActiveCall {
            session_id,
            stop_tx: Some(stop_tx),
            driver: tokio::spawn(driver.run(inputs)),
        });
        Ok(())
    }

    /// End the call and wait until every resource is released.
    ///
    /// Safe from any state; a second call is a no-op.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(mut call) = self.active.take() else {
            debug!("Stop requested with no active call");
            return Ok(());
        };

        info!("Stopping call {}", call.session_id);
        if let Some(stop_tx) = call.stop_tx.take() {
            // Already gone if the remote side ended the call first
            let _ = stop_tx.send(());
        }

        if let Err(e) = call.driver.await {
            error!("Call driver for {} failed: {}", call.session_id, e);
            self.state.set(SessionState::Idle);
        }
        Ok(())
    }

    // Speaker, output mix, playback buffers, ringtone and the composer.
    async fn bring_up_local(&self, session_id: &str) -> Result<CallGraph> {
        let mut speaker = self.devices.speaker()?;
        let mix = OutputMix::new();
        speaker.start(mix.clone()).await?;
        let output_rate = speaker.sample_rate();

        let cue_buffer = ChunkPlaybackBuffer::new(PlaybackConfig::at(output_rate));
        mix.connect(cue_buffer.clone());

        let (voice, voice_events) = ChunkPlaybackBuffer::with_signaling(PlaybackConfig::at(output_rate));

        let ringer = self
            .load_cue(self.config.ring_cue.as_deref(), output_rate)
            .map(|ring| Arc::new(ring).spawn_loop(cue_buffer.clone()));

        Ok(CallGraph {
            speaker,
            mix,
            output_rate,
            cue_buffer,
            voice,
            voice_events: Some(voice_events),
            ringer,
            encoder: None,
            composer: RecordingComposer::new(session_id, self.config.recording.clone()),
        })
    }

    async fn open_microphone(
        &self,
        frames: mpsc::UnboundedSender<AudioFrame>,
        monitor: mpsc::UnboundedSender<CapturedBlock>,
    ) -> Result<CaptureEncoder> {
        let backend = self.devices.microphone()?;
        let mut encoder = CaptureEncoder::new(backend, self.config.transcription_rate);
        encoder.start(frames, Some(monitor)).await?;
        Ok(encoder)
    }

    fn load_cue(&self, path: Option<&Path>, rate: u32) -> Option<Cue> {
        let path = path?;
        match Cue::load(path, rate) {
            Ok(cue) => Some(cue),
            Err(e) => {
                warn!("Skipping cue {}: {:#}", path.display(), e);
                None
            }
        }
    }

    // Forget a call whose driver already finished on its own
    fn reap(&mut self) {
        if self.active.as_ref().is_some_and(|call| call.driver.is_finished()) {
            self.active = None;
        }
    }
}

impl Drop for CallSession {
    fn drop(&mut self) {
        // The driver tears the call down in the background
        if let Some(stop_tx) = self.active.as_mut().and_then(|call| call.stop_tx.take()) {
            let _ = stop_tx.send(());
        }
    }
}

/// Everything local to one call besides the transport
struct CallGraph {
    speaker: Box<dyn AudioOutput>,
    mix: OutputMix,
    output_rate: u32,
    cue_buffer: ChunkPlaybackBuffer,
    voice: ChunkPlaybackBuffer,
    voice_events: Option<mpsc::UnboundedReceiver<PlaybackEvent>>,
    ringer: Option<JoinHandle<()>>,
    encoder: Option<CaptureEncoder>,
    composer: RecordingComposer,
}

impl CallGraph {
    fn stop_ringing(&mut self) {
        if let Some(ringer) = self.ringer.take() {
            ringer.abort();
        }
        self.cue_buffer.reset();
    }

    /// Disconnect the output graph, release the devices and finalize the
    /// recording.
    async fn release(&mut self) -> Option<RecordingArtifact> {
        self.stop_ringing();
        self.mix.disconnect_all();
        self.speaker.stop();

        if let Some(mut encoder) = self.encoder.take() {
            if let Err(e) = encoder.stop().await {
                warn!("Failed to release microphone: {}", e);
            }
        }

        match self.composer.stop() {
            Ok(artifact) => artifact,
            Err(e) => {
                error!("Failed to finalize recording: {}", e);
                None
            }
        }
    }
}

struct DriverInputs {
    stop: oneshot::Receiver<()>,
    frames: mpsc::UnboundedReceiver<AudioFrame>,
    mic: mpsc::UnboundedReceiver<CapturedBlock>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Handshake {
    /// Ringing before `ready_for_streaming`
    Delay,
    /// Connect cue playing
    Cue,
    Done,
}

struct CallDriver {
    graph: CallGraph,
    channel: TransportChannel,
    state: StateHandle,
    stats: Arc<StatsCounters>,
    connect_delay: Duration,
    connect_cue: Option<Cue>,
}

impl CallDriver {
    async fn run(mut self, mut inputs: DriverInputs) {
        let Some(mut voice_events) = self.graph.voice_events.take() else {
            return;
        };

        let handshake = sleep(self.connect_delay);
        tokio::pin!(handshake);
        let mut phase = Handshake::Delay;

        let reason = loop {
            tokio::select! {
                _ = &mut inputs.stop => break EndReason::UserStop,

                _ = &mut handshake, if phase != Handshake::Done => {
                    phase = self.advance_handshake(phase, handshake.as_mut());
                }

                event = self.channel.recv() => {
                    self.stats.set_malformed(self.channel.malformed_frames());
                    match event {
                        Some(TransportEvent::Audio(frame)) => self.on_voice(frame),
                        Some(TransportEvent::Control(message)) => self.on_control(message),
                        Some(TransportEvent::Closed(reason)) => {
                            info!("Remote closed the call: {:?}", reason);
                            break EndReason::RemoteClosed;
                        }
                        Some(TransportEvent::Fault(fault)) => {
                            warn!("Transport fault: {}", fault);
                            break EndReason::TransportFault(fault);
                        }
                        None => break EndReason::RemoteClosed,
                    }
                }

                Some(frame) = inputs.frames.recv() => {
                    if self.state.get() != SessionState::Talking {
                        continue;
                    }
                    if let Err(e) = self.channel.send_audio(frame) {
                        break EndReason::TransportFault(e.to_string());
                    }
                    self.stats.frame_sent();
                }

                Some(block) = inputs.mic.recv() => {
                    if self.state.get() == SessionState::Talking {
                        self.graph.composer.ingest_mic(&block);
                    }
                }

                Some(event) = voice_events.recv() => {
                    let message = ControlMessage::from(event);
                    if let Err(e) = self.channel.send_control(message) {
                        debug!("Could not report playback event: {}", e);
                    }
                }
            }
        };

        self.teardown(reason).await;
    }

    fn advance_handshake(&mut self, phase: Handshake, timer: std::pin::Pin<&mut Sleep>) -> Handshake {
        match phase {
            Handshake::Delay => {
                self.graph.stop_ringing();
                if let Err(e) = self.channel.send_control(ControlMessage::ReadyForStreaming) {
                    warn!("Failed to send ready_for_streaming: {}", e);
                }

                match self.connect_cue.take() {
                    Some(cue) => {
                        cue.play(&self.graph.cue_buffer);
                        timer.reset(Instant::now() + cue.duration());
                        Handshake::Cue
                    }
                    None => {
                        self.enter_talking();
                        Handshake::Done
                    }
                }
            }
            Handshake::Cue => {
                self.enter_talking();
                Handshake::Done
            }
            Handshake::Done => Handshake::Done,
        }
    }

    fn enter_talking(&mut self) {
        self.graph.mix.connect(self.graph.voice.clone());
        self.stats.mark_started();
        self.state.set(SessionState::Talking);
    }

    fn on_voice(&mut self, frame: AudioFrame) {
        debug!("Voice frame: {} bytes", frame.byte_len());

        if self.graph.composer.ingest_voice(frame.duplicate()).is_some() {
            debug!("First voice frame started the recording");
        }
        self.graph.voice.enqueue(frame);
        self.stats.frame_received();
    }

    fn on_control(&mut self, message: ControlMessage) {
        match message {
            ControlMessage::StopAudio => {
                info!("Remote requested stop_audio, flushing playback");
                self.graph.voice.reset();
                self.graph.composer.reset_voice();
            }
            ControlMessage::Error { content } => {
                warn!("Remote error: {}", content);
                self.state.emit(CallEvent::RemoteError(content));
            }
            other => debug!("Ignoring inbound {} message", other.kind()),
        }
    }

    async fn teardown(mut self, reason: EndReason) {
        self.state.set(SessionState::Ending);

        if self.channel.is_open() {
            if let Err(e) = self.channel.send_control(ControlMessage::AudioCleanup) {
                debug!("Could not send audio_cleanup: {}", e);
            }
        }

        let artifact = self.graph.release().await;
        self.channel.close();
        self.stats.set_malformed(self.channel.malformed_frames());
        self.stats.mark_ended();

        self.state.set(SessionState::Idle);
        if let Some(artifact) = artifact {
            self.state.emit(CallEvent::RecordingReady(artifact));
        }
        info!("Call ended: {:?}", reason);
        self.state.emit(CallEvent::Ended(reason));
    }
}
