//! Event worker: consumes generic events, decodes SMS bodies and acts on them.
//!
//! The worker is the only place the session leaves
//! [`SessionStatus::AwaitingSmsBody`]. A call triggered by an SMS runs to
//! completion inside the worker loop, so events arriving meanwhile queue up
//! and are handled once the call is over.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::{
    call::{CallController, CallOutcome},
    connection::{AtSession, EventStream},
    error::{AtError, AtResult},
    pdu::{Sms, SmsCodec},
    playlist::Playlist,
    status::SessionStatus,
};

/// What handling one event led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    /// Unsolicited notification with no action attached.
    Ignored,
    /// The SMS named a playlist entry and a call was placed.
    Called(CallOutcome),
    /// The SMS named nothing known; the playlist was sent back.
    Replied {
        /// Message references of the reply fragments.
        references: Vec<u8>,
    },
}

/// Consumer of the generic event queue.
pub struct EventWorker {
    session: AtSession,
    playlist: Arc<Playlist>,
    codec: Arc<dyn SmsCodec>,
    calls: CallController,
}

impl std::fmt::Debug for EventWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventWorker")
            .field("playlist_entries", &self.playlist.len())
            .field("calls", &self.calls)
            .finish()
    }
}

impl EventWorker {
    pub fn new(
        session: AtSession,
        playlist: Arc<Playlist>,
        codec: Arc<dyn SmsCodec>,
        calls: CallController,
    ) -> Self {
        Self {
            session,
            playlist,
            codec,
            calls,
        }
    }

    /// Handle events until the session stops.
    ///
    /// A failing or panicking handler is logged and the loop moves on to
    /// the next event.
    pub async fn run(mut self, mut events: EventStream) {
        info!("Event worker started");
        while let Some(line) = events
            .recv()
            .await
        {
            let handled = AssertUnwindSafe(self.handle_event(&line));
            match futures_util::FutureExt::catch_unwind(handled).await {
                Ok(Ok(outcome)) => debug!("[EVENT] {:?} -> {:?}", line, outcome),
                Ok(Err(e)) if e.is_fatal() => {
                    error!("[EVENT] session lost while handling {:?}: {}", line, e)
                }
                Ok(Err(e)) => warn!("[EVENT] failed to handle {:?}: {}", line, e),
                Err(_) => error!("[EVENT] handler panicked on {:?}", line),
            }
        }
        info!("Event worker stopped: {:?}", events.status());
    }

    /// Handle one line popped from the event queue.
    pub async fn handle_event(&mut self, line: &str) -> AtResult<EventOutcome> {
        if !self
            .session
            .take_sms_body()
        {
            debug!("[EVENT] unsolicited {:?}", line);
            return Ok(EventOutcome::Ignored);
        }

        let sms = self
            .codec
            .decode(line)
            .map_err(|e| AtError::malformed(format!("SMS PDU {:?}: {}", line, e)))?;
        info!("[SMS] from {} at {}: {:?}", sms.sender, sms.timestamp, sms.text);
        self.dispatch_sms(&sms)
            .await
    }

    /// Act on a decoded message: call with the matching audio, or reply
    /// with the playlist.
    pub async fn dispatch_sms(&mut self, sms: &Sms) -> AtResult<EventOutcome> {
        let word = sms
            .text
            .split_whitespace()
            .next()
            .unwrap_or_default();

        if let Some(audio) = self
            .playlist
            .get(word)
            .map(|p| p.to_path_buf())
        {
            info!("[SMS] {} requested {:?}", sms.sender, word);
            self.session
                .transition_status(SessionStatus::Idle, SessionStatus::ActiveCall);
            let result = self
                .calls
                .place_call(&sms.sender, &audio)
                .await;
            self.session
                .transition_status(SessionStatus::ActiveCall, SessionStatus::Idle);
            return result.map(EventOutcome::Called);
        }

        info!("[SMS] unknown request {:?} from {}, sending playlist", word, sms.sender);
        let references = self
            .session
            .send_sms(
                self.codec
                    .as_ref(),
                &sms.sender,
                &self
                    .playlist
                    .reply_text(),
            )
            .await?;
        Ok(EventOutcome::Replied { references })
    }
}
