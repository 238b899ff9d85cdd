//! SMS-triggered call playback over a cellular modem's AT command channel
//!
//! A session owns the modem's line channel. A background reader task frames
//! incoming bytes into lines, classifies each one and routes it to one of
//! four queues: command responses, generic events (including SMS bodies),
//! and `+CLCC` reports for outgoing and incoming calls.
//!
//! # Architecture
//!
//! - [`AtSession`] (Clone + Send): issue commands from any task; one command
//!   is in flight at a time
//! - [`SessionStreams`]: receivers for the unsolicited queues
//! - [`EventWorker`]: decodes incoming SMS and either places a call through
//!   the [`CallController`] or replies with the [`Playlist`]
//!
//! # Examples
//!
//! ## Issuing commands
//!
//! ```rust,no_run
//! use wurlitzer::{AtCommand, AtError, AtSession, SessionOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), AtError> {
//!     let (session, _streams) =
//!         AtSession::open_device("/dev/ttyUSB2", SessionOptions::default()).await?;
//!
//!     session.init_module().await?;
//!     session.probe().await?;
//!     // unprefixed information lines come back with the response
//!     let response = session.execute(AtCommand::new("AT+CGSN")?).await?;
//!     println!("IMEI: {}", response.lines().first().map(String::as_str).unwrap_or("?"));
//!
//!     session.stop().await
//! }
//! ```
//!
//! ## Running the jukebox
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use wurlitzer::{
//!     AtSession, CallController, EventWorker, PduCodec, Playlist, ProcessPlayer, SessionOptions,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let playlist = Arc::new(Playlist::load("playlist.txt")?);
//!     let (session, streams) = AtSession::connect_tcp("127.0.0.1:7000", SessionOptions::default()).await?;
//!     session.init_module().await?;
//!
//!     let player = Arc::new(ProcessPlayer::new("mpg123").args(["-q"]));
//!     let calls = CallController::new(session.clone(), streams.outgoing_calls, player);
//!     let worker = EventWorker::new(session.clone(), playlist, Arc::new(PduCodec::new()), calls);
//!     worker.run(streams.events).await;
//!     Ok(())
//! }
//! ```

#[macro_use]
mod macros;

pub mod audio;
pub mod call;
pub mod classify;
pub mod clcc;
pub mod command;
pub mod connection;
pub mod constants;
pub mod error;
pub mod pdu;
pub mod playlist;
pub mod status;
pub mod worker;

pub(crate) mod protocol;

pub use audio::{AudioHandle, AudioPlayer, ProcessPlayer};
pub use call::{CallController, CallEnd, CallOutcome, CallState};
pub use classify::{classify, IdleKeyword, ParseIdleKeywordError, Route};
pub use clcc::{CallDirection, ClccReport, ClccState};
pub use command::{AtCommand, AtResponse};
pub use connection::{
    AtSession, CallReports, ConnectionStatus, DisconnectReason, EventStream, ReportWait,
    SessionOptions, SessionStreams,
};
pub use error::{AtError, AtResult};
pub use pdu::{PduCodec, PduError, Sms, SmsCodec, SubmitPdu};
pub use playlist::Playlist;
pub use status::{SessionStatus, StatusCell};
pub use worker::{EventOutcome, EventWorker};
