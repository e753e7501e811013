use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::time::sleep;
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;
use voice_call::{
    create_router, AppState, AudioSink, AudioSource, CallEvent, CallSession, Config, DeviceSet,
    WebSocketConnector,
};

#[derive(Parser)]
#[command(name = "voice-call")]
#[command(about = "Real-time voice calls with a speech agent")]
struct Cli {
    /// Config file (extension optional)
    #[arg(short, long, default_value = "config/voice-call")]
    config: String,

    /// Log level filter, overrides RUST_LOG
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP call-control API
    Serve {
        #[command(flatten)]
        devices: DeviceArgs,
    },

    /// Place one call and save its recording
    Call {
        /// Caller identity (sent as a bearer token)
        #[arg(long)]
        identity: String,

        /// Call endpoint, e.g. ws://localhost:8000/ws/speech/alice/default/
        #[arg(long)]
        endpoint: Option<String>,

        /// Hang up after this many seconds (default: Ctrl-C)
        #[arg(short, long)]
        duration: Option<u64>,

        #[command(flatten)]
        devices: DeviceArgs,
    },
}

#[derive(Args)]
struct DeviceArgs {
    /// Stream this audio file instead of the microphone
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Play nothing audibly
    #[arg(long)]
    headless: bool,
}

impl DeviceArgs {
    fn device_set(&self, cfg: &Config) -> DeviceSet {
        let source = match &self.input {
            Some(path) => AudioSource::File(path.clone()),
            None => AudioSource::Microphone,
        };
        let sink = if self.headless {
            AudioSink::Headless
        } else {
            AudioSink::Speaker
        };

        DeviceSet {
            source,
            sink,
            backend: cfg.backend_config(),
            playback_rate: cfg.playback.device_rate,
            quantum: cfg.playback.quantum,
        }
    }
}

fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn new_session(cfg: &Config, devices: DeviceSet) -> (CallSession, tokio::sync::mpsc::UnboundedReceiver<CallEvent>) {
    let connector = WebSocketConnector::new(cfg.connect_timeout(), cfg.playback.voice_rate);
    CallSession::new(cfg.session_config(), Arc::new(devices), Arc::new(connector))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    let cfg = Config::load(&cli.config).with_context(|| format!("Failed to load config {}", cli.config))?;
    info!("{} v{}", cfg.service.name, env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Serve { devices } => serve(cfg, devices).await,
        Command::Call {
            identity,
            endpoint,
            duration,
            devices,
        } => call(cfg, identity, endpoint, duration, devices).await,
    }
}

async fn serve(cfg: Config, devices: DeviceArgs) -> Result<()> {
    let (session, events) = new_session(&cfg, devices.device_set(&cfg));
    let state = AppState::new(
        session,
        events,
        cfg.call.endpoint.clone(),
        cfg.recording.output_dir.clone(),
    );

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("HTTP API listening on {}", addr);

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;
    Ok(())
}

async fn call(
    cfg: Config,
    identity: String,
    endpoint: Option<String>,
    duration: Option<u64>,
    devices: DeviceArgs,
) -> Result<()> {
    let endpoint = endpoint
        .or_else(|| cfg.call.endpoint.clone())
        .context("No endpoint given and none configured")?;

    let (mut session, mut events) = new_session(&cfg, devices.device_set(&cfg));
    session.start(&endpoint, &identity).await?;
    println!("Calling {} (Ctrl-C to hang up)", endpoint);

    let hang_up = async move {
        match duration {
            Some(secs) => sleep(Duration::from_secs(secs)).await,
            None => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    };
    tokio::pin!(hang_up);
    let mut hanging_up = false;

    loop {
        tokio::select! {
            _ = &mut hang_up, if !hanging_up => {
                hanging_up = true;
                session.stop().await?;
            }
            event = events.recv() => match event {
                Some(CallEvent::StateChanged(state)) => println!("State: {}", state),
                Some(CallEvent::RemoteError(content)) => eprintln!("Remote error: {}", content),
                Some(CallEvent::RecordingReady(artifact)) => {
                    let path = artifact.save(&cfg.recording.output_dir)?;
                    println!("Recording saved to {} ({:.1}s)", path.display(), artifact.duration_secs());
                }
                Some(CallEvent::Ended(reason)) => {
                    println!("Call ended: {:?}", reason);
                    break;
                }
                None => break,
            }
        }
    }

    session.stop().await?;
    Ok(())
}
