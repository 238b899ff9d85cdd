//! Wurlitzer
//!
//! Modem jukebox daemon.
//!
//! - Opens the modem over a serial device or TCP (ser2net)
//! - Answers SMS requests: a known playlist word calls the sender back and
//!   plays the matching audio; anything else gets the playlist as a reply
//! - Logs incoming calls without answering them

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use wurlitzer::{
    AtSession, CallController, EventWorker, PduCodec, Playlist, ProcessPlayer, SessionOptions,
};

/// SMS-triggered call playback over a cellular modem.
#[derive(Parser, Debug)]
#[command(name = "wurlitzer", about = "Plays audio to whoever texts the modem")]
struct Cli {
    /// Modem serial device.
    #[arg(long, conflicts_with = "tcp", required_unless_present = "tcp")]
    device: Option<PathBuf>,

    /// Modem exposed over TCP, as host:port.
    #[arg(long)]
    tcp: Option<String>,

    /// Playlist file of `word /path/to/audio` lines.
    #[arg(long, default_value = "playlist.txt")]
    playlist: PathBuf,

    /// Audio player program; the resource path is passed as its last argument.
    #[arg(long, default_value = "mpg123")]
    player: PathBuf,

    /// Extra player argument, placed before the resource path. Repeatable.
    #[arg(long = "player-arg", allow_hyphen_values = true)]
    player_args: Vec<String>,

    /// Per-line command response timeout in seconds.
    #[arg(long, default_value_t = 10)]
    command_timeout_secs: u64,

    /// Call report wait window in seconds.
    #[arg(long, default_value_t = 10)]
    call_timeout_secs: u64,

    /// Pause between `AT+CMGS` and the PDU payload in milliseconds.
    #[arg(long, default_value_t = 1000)]
    sms_prompt_delay_ms: u64,

    /// Do not send the modem initialization sequence.
    #[arg(long, default_value_t = false)]
    skip_init: bool,
}

impl Cli {
    fn session_options(&self) -> SessionOptions {
        SessionOptions {
            command_timeout: Duration::from_secs(self.command_timeout_secs),
            call_report_timeout: Duration::from_secs(self.call_timeout_secs),
            sms_prompt_delay: Duration::from_millis(self.sms_prompt_delay_ms),
            ..SessionOptions::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let options = cli.session_options();

    let playlist = Playlist::load(&cli.playlist)
        .with_context(|| format!("loading playlist {}", cli.playlist.display()))?;
    if playlist.is_empty() {
        tracing::warn!("playlist is empty, every request will get an empty reply");
    }

    let (session, streams) = match (&cli.device, &cli.tcp) {
        (Some(device), _) => AtSession::open_device(device, options)
            .await
            .with_context(|| format!("opening {}", device.display()))?,
        (None, Some(addr)) => AtSession::connect_tcp(addr, options)
            .await
            .with_context(|| format!("connecting to {addr}"))?,
        (None, None) => anyhow::bail!("either --device or --tcp is required"),
    };

    if !cli.skip_init {
        session
            .init_module()
            .await
            .context("modem initialization")?;
    }
    session
        .probe()
        .await
        .context("modem probe")?;
    tracing::info!(entries = playlist.len(), "wurlitzer ready");

    let player = Arc::new(
        ProcessPlayer::new(&cli.player).args(
            cli.player_args
                .iter()
                .cloned(),
        ),
    );
    let calls = CallController::new(session.clone(), streams.outgoing_calls, player);
    let worker = EventWorker::new(
        session.clone(),
        Arc::new(playlist),
        Arc::new(PduCodec::new()),
        calls,
    );
    let mut worker_handle = tokio::spawn(worker.run(streams.events));

    let mut incoming = streams.incoming_calls;
    let incoming_handle = tokio::spawn(async move {
        while let Some(report) = incoming
            .recv()
            .await
        {
            tracing::info!(number = %report.number, state = %report.state, "incoming call");
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received SIGINT, shutting down");
        }
        result = &mut worker_handle => {
            if let Err(e) = result {
                tracing::error!("event worker failed: {e}");
            }
            tracing::warn!("event worker ended: {:?}", session.connection_status());
        }
    }

    session
        .stop()
        .await
        .context("stopping session")?;
    if !worker_handle.is_finished() {
        let _ = worker_handle.await;
    }
    let _ = incoming_handle.await;

    tracing::info!("wurlitzer stopped");
    Ok(())
}
