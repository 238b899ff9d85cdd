//! Outgoing call state machine.
//!
//! A call is placed with `ATD<number>;` and then driven entirely by the
//! `+CLCC` reports for outgoing calls:
//!
//! ```text
//!            +CLCC stat=2/3                 +CLCC stat=6
//!           ┌──────────┐                 ┌──────────────────┐
//!           ▼          │                 │                  ▼
//! ATD ──▶ Calling ─────┴─ stat=0 ──▶ Playing ──────────▶ Disconnected
//!           │                            │                  ▲
//!           └── 3 silent windows ── ATH ─┴─ player exited ──┘
//! ```
//!
//! Every exit path ends with an `ATH` attempt and no running player.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::{
    audio::{AudioHandle, AudioPlayer},
    clcc::{ClccReport, ClccState},
    connection::{AtSession, CallReports, ReportWait},
    error::{AtError, AtResult},
};

/// Phase of the call controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallState {
    /// Dialed, not yet answered. Dialing and alerting reports keep the call here.
    Calling,
    /// Answered; audio is playing.
    Playing,
    /// Terminal.
    Disconnected,
}

impl std::fmt::Display for CallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Calling => "calling",
            Self::Playing => "playing",
            Self::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// Why the call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallEnd {
    /// The network reported the call disconnected.
    RemoteHangup,
    /// No report arrived for the whole dial budget.
    DialTimeout,
    /// The player finished before the remote side hung up.
    PlaybackFinished,
}

/// Result of one placed call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallOutcome {
    /// Number dialed.
    pub number: String,
    /// How the call ended.
    pub end: CallEnd,
    /// State after each processed report, in order.
    pub transitions: Vec<CallState>,
}

/// Working state of one call.
struct CallSession {
    number: String,
    audio: PathBuf,
    state: CallState,
    /// Last progress seen while calling (dialing / alerting).
    progress: Option<ClccState>,
    timeouts_left: u32,
    player: Option<Box<dyn AudioHandle>>,
    transitions: Vec<CallState>,
}

impl CallSession {
    fn stop_player(&mut self) {
        if let Some(mut player) = self.player.take() {
            player.kill();
        }
    }
}

/// Places outgoing calls and plays audio once they are answered.
///
/// Runs one call at a time: [`place_call`](Self::place_call) returns only
/// once the call is over.
pub struct CallController {
    session: AtSession,
    reports: CallReports,
    player: Arc<dyn AudioPlayer>,
    report_timeout: Duration,
    dial_timeout_windows: u32,
}

impl std::fmt::Debug for CallController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallController")
            .field("report_timeout", &self.report_timeout)
            .field("dial_timeout_windows", &self.dial_timeout_windows)
            .finish()
    }
}

impl CallController {
    /// Controller consuming `reports`, the outgoing-call queue of `session`.
    pub fn new(session: AtSession, reports: CallReports, player: Arc<dyn AudioPlayer>) -> Self {
        let options = session.options();
        let report_timeout = options.call_report_timeout;
        let dial_timeout_windows = options.dial_timeout_windows;
        Self {
            session,
            reports,
            player,
            report_timeout,
            dial_timeout_windows,
        }
    }

    /// Call `number`, play `audio` once answered, and return when the call is over.
    ///
    /// Fails if the dial command fails, the player cannot be started or the
    /// session stops mid-call; a hangup has been attempted in every case.
    pub async fn place_call(&mut self, number: &str, audio: &Path) -> AtResult<CallOutcome> {
        let stale = self
            .reports
            .drain();
        if stale > 0 {
            debug!("[CALL] dropped {} stale reports", stale);
        }

        let mut call = CallSession {
            number: number.to_string(),
            audio: audio.to_path_buf(),
            state: CallState::Calling,
            progress: None,
            timeouts_left: self.dial_timeout_windows,
            player: None,
            transitions: Vec::new(),
        };

        info!("[CALL] dialing {} for {}", number, audio.display());
        if let Err(e) = self
            .session
            .dial(number)
            .await
        {
            warn!("[CALL] dial {} failed: {}", number, e);
            self.hangup().await;
            return Err(e);
        }

        let end = loop {
            match self
                .reports
                .recv_timeout(self.report_timeout)
                .await
            {
                ReportWait::Report(report) => match self.on_report(&mut call, &report) {
                    Ok(next) => {
                        call.transitions
                            .push(next);
                        call.state = next;
                        if next == CallState::Disconnected {
                            break CallEnd::RemoteHangup;
                        }
                    }
                    Err(e) => {
                        warn!("[CALL] cannot play {}: {}", call.audio.display(), e);
                        call.stop_player();
                        self.hangup().await;
                        return Err(e);
                    }
                },
                ReportWait::TimedOut => {
                    if let Some(end) = self.on_timeout(&mut call) {
                        break end;
                    }
                }
                ReportWait::Closed => {
                    warn!("[CALL] session closed during call to {}", number);
                    call.stop_player();
                    self.hangup().await;
                    return Err(AtError::ConnectionClosed);
                }
            }
        };

        call.stop_player();
        self.hangup().await;
        info!("[CALL] call to {} ended: {:?}", number, end);
        Ok(CallOutcome {
            number: call.number,
            end,
            transitions: call.transitions,
        })
    }

    /// Next state for `report`.
    fn on_report(&self, call: &mut CallSession, report: &ClccReport) -> AtResult<CallState> {
        debug!(
            "[CALL] {} report {} in state {}",
            call.number, report.state, call.state
        );
        match (call.state, report.state) {
            (_, ClccState::Disconnect) => {
                call.stop_player();
                Ok(CallState::Disconnected)
            }
            (CallState::Calling, ClccState::Active) => {
                info!("[CALL] {} answered, playing {}", call.number, call.audio.display());
                call.player = Some(
                    self.player
                        .spawn(&call.audio)?,
                );
                Ok(CallState::Playing)
            }
            (CallState::Calling, progress @ (ClccState::Dialing | ClccState::Alerting)) => {
                call.progress = Some(progress);
                Ok(CallState::Calling)
            }
            (state, other) => {
                debug!("[CALL] ignoring {} while {}", other, state);
                Ok(state)
            }
        }
    }

    /// Handle a silent report window; `Some` ends the call.
    fn on_timeout(&self, call: &mut CallSession) -> Option<CallEnd> {
        match call.state {
            CallState::Calling => {
                call.timeouts_left = call
                    .timeouts_left
                    .saturating_sub(1);
                debug!(
                    "[CALL] no report for {} ({:?}), {} windows left",
                    call.number, call.progress, call.timeouts_left
                );
                (call.timeouts_left == 0).then_some(CallEnd::DialTimeout)
            }
            CallState::Playing => {
                let exited = call
                    .player
                    .as_mut()
                    .map_or(true, |p| p.has_exited());
                exited.then_some(CallEnd::PlaybackFinished)
            }
            CallState::Disconnected => Some(CallEnd::RemoteHangup),
        }
    }

    async fn hangup(&self) {
        if let Err(e) = self
            .session
            .hangup()
            .await
        {
            warn!("[CALL] hangup failed: {}", e);
        }
    }
}
