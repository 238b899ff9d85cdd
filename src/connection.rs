//! Session management for the modem channel

use std::path::Path;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex, Notify};
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::{
    classify::{classify, Route},
    clcc::{ClccReport, ClccState},
    command::{AtCommand, AtResponse},
    constants::{
        DEFAULT_CALL_REPORT_TIMEOUT_MS, DEFAULT_COMMAND_TIMEOUT_MS, DEFAULT_DIAL_TIMEOUT_WINDOWS,
        DEFAULT_SMS_PROMPT_DELAY_MS, INIT_SEQUENCE, LINE_TERMINATOR, PREFIX_CME_ERROR,
        PREFIX_CMS_ERROR, READ_BUF_SIZE, RESULT_ERROR,
    },
    error::{AtError, AtResult},
    pdu::SmsCodec,
    protocol::LineParser,
    status::{SessionStatus, StatusCell},
};

/// TCP connect timeout for network-attached modems (ser2net and friends)
const CONNECT_TIMEOUT_MS: u64 = 2000;

/// Connection status for the AT session
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnectionStatus {
    /// Reader task is running.
    Connected,
    /// Reader task ended; all queues are closed.
    Disconnected(DisconnectReason),
}

/// Reason for disconnection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// I/O or framing error (io::Error is not Clone, so we store the message)
    IoError(String),
    /// Clean EOF on the transport
    ConnectionClosed,
    /// [`AtSession::stop`] was called
    ClientRequested,
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisconnectReason::IoError(msg) => write!(f, "I/O error: {}", msg),
            DisconnectReason::ConnectionClosed => write!(f, "connection closed"),
            DisconnectReason::ClientRequested => write!(f, "client requested stop"),
        }
    }
}

/// Session timing parameters.
///
/// Use [`Default::default()`] for the values the modem firmware was tuned against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Per-line wait for command responses. Default: 10s.
    pub command_timeout: Duration,
    /// Window the call controller waits for each `+CLCC` report. Default: 10s.
    pub call_report_timeout: Duration,
    /// Silent windows tolerated while dialing before hanging up. Default: 3.
    pub dial_timeout_windows: u32,
    /// Pause between `AT+CMGS=<len>` and the PDU payload. Default: 1s.
    pub sms_prompt_delay: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_millis(DEFAULT_COMMAND_TIMEOUT_MS),
            call_report_timeout: Duration::from_millis(DEFAULT_CALL_REPORT_TIMEOUT_MS),
            dial_timeout_windows: DEFAULT_DIAL_TIMEOUT_WINDOWS,
            sms_prompt_delay: Duration::from_millis(DEFAULT_SMS_PROMPT_DELAY_MS),
        }
    }
}

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Everything only the current command issuer may touch.
///
/// Holding the lock on this struct is what makes a command "in flight":
/// the response queue is unreachable without it.
struct CommandChannel {
    writer: BoxedWriter,
    responses: mpsc::UnboundedReceiver<String>,
}

/// Shared state between AtSession and the reader task
struct SharedState {
    status: StatusCell,
    stop: Notify,
    /// Command response timeout in milliseconds
    command_timeout_ms: AtomicU64,
    options: SessionOptions,
}

/// Producer ends of the session queues, owned by the reader task.
///
/// Dropping this struct closes every queue, which unblocks all consumers.
struct Queues {
    responses: mpsc::UnboundedSender<String>,
    events: mpsc::UnboundedSender<String>,
    outgoing_calls: mpsc::UnboundedSender<ClccReport>,
    incoming_calls: mpsc::UnboundedSender<ClccReport>,
}

/// AT session handle (Clone + Send)
///
/// Commands are serialized through the channel mutex. The reader task
/// routes classified lines into the response queue and the three
/// unsolicited queues handed out as [`SessionStreams`].
#[derive(Clone)]
pub struct AtSession {
    channel: Arc<Mutex<CommandChannel>>,
    shared: Arc<SharedState>,
    status_rx: watch::Receiver<ConnectionStatus>,
}

impl std::fmt::Debug for AtSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtSession")
            .field("connected", &self.is_connected())
            .field("status", &self.status())
            .finish()
    }
}

/// Receiver ends of the unsolicited queues.
#[derive(Debug)]
pub struct SessionStreams {
    /// Generic notifications and SMS PDUs, for the event worker.
    pub events: EventStream,
    /// `+CLCC` reports for calls we placed, for the call controller.
    pub outgoing_calls: CallReports,
    /// `+CLCC` reports for calls we receive.
    pub incoming_calls: CallReports,
}

/// Generic event receiver (!Clone)
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<String>,
    status_rx: watch::Receiver<ConnectionStatus>,
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Outcome of waiting for a call report with a deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportWait {
    /// A report arrived within the window.
    Report(ClccReport),
    /// The window passed without a report.
    TimedOut,
    /// The session stopped; no report will ever arrive.
    Closed,
}

/// Call report receiver (!Clone)
#[derive(Debug)]
pub struct CallReports {
    rx: mpsc::UnboundedReceiver<ClccReport>,
}

impl CallReports {
    /// Receive the next report, or None once the session has stopped.
    pub async fn recv(&mut self) -> Option<ClccReport> {
        self.rx
            .recv()
            .await
    }

    /// Receive the next report, waiting at most `window`.
    pub async fn recv_timeout(&mut self, window: Duration) -> ReportWait {
        match timeout(window, self.rx.recv()).await {
            Ok(Some(report)) => ReportWait::Report(report),
            Ok(None) => ReportWait::Closed,
            Err(_) => ReportWait::TimedOut,
        }
    }

    /// Discard reports that were queued before now, returning how many.
    pub fn drain(&mut self) -> usize {
        let mut dropped = 0;
        while self
            .rx
            .try_recv()
            .is_ok()
        {
            dropped += 1;
        }
        dropped
    }
}

/// Establish a TCP connection with a timeout.
async fn tcp_connect_with_timeout(addr: &str) -> AtResult<TcpStream> {
    match timeout(
        Duration::from_millis(CONNECT_TIMEOUT_MS),
        TcpStream::connect(addr),
    )
    .await
    {
        Ok(Ok(s)) => {
            debug!("[CONNECT] TCP connection established");
            Ok(s)
        }
        Ok(Err(e)) => {
            warn!("[CONNECT] TCP connect failed: {}", e);
            Err(AtError::Io(e))
        }
        Err(_) => {
            warn!(
                "[CONNECT] TCP connect timed out after {}ms",
                CONNECT_TIMEOUT_MS
            );
            Err(AtError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("connect to {} timed out", addr),
            )))
        }
    }
}

fn is_final_error(line: &str) -> bool {
    line == RESULT_ERROR || line.starts_with(PREFIX_CME_ERROR) || line.starts_with(PREFIX_CMS_ERROR)
}

/// Apply the routing decision for one line.
fn route_line(line: String, shared: &SharedState, queues: &Queues) {
    let status = shared
        .status
        .load();
    match classify(&line, status) {
        Route::CommandResponse => {
            trace!("[RECV] response {:?}", line);
            if queues
                .responses
                .send(line)
                .is_err()
            {
                debug!("Response queue closed, dropping line");
            }
        }
        Route::GenericEvent => {
            trace!("[RECV] event {:?} ({})", line, status);
            if queues
                .events
                .send(line)
                .is_err()
            {
                debug!("Event queue closed, dropping line");
            }
        }
        Route::OutgoingCallReport(report) => {
            debug!("[RECV] outgoing call {} {}", report.id, report.state);
            let _ = queues
                .outgoing_calls
                .send(report);
        }
        Route::IncomingCallReport(report) => {
            debug!("[RECV] incoming call {} {}", report.id, report.state);
            match report.state {
                ClccState::Incoming | ClccState::Waiting => {
                    shared
                        .status
                        .transition(SessionStatus::Idle, SessionStatus::IncomingCall);
                }
                ClccState::Disconnect => {
                    shared
                        .status
                        .transition(SessionStatus::IncomingCall, SessionStatus::Idle);
                }
                _ => {}
            }
            let _ = queues
                .incoming_calls
                .send(report);
        }
        Route::SmsMarker => {
            debug!("[RECV] {} - awaiting PDU", line);
            let previous = shared
                .status
                .swap(SessionStatus::AwaitingSmsBody);
            if previous == SessionStatus::AwaitingSmsBody {
                warn!("[RECV] {} before the previous SMS body was taken", line);
            }
        }
        Route::Discard(keyword) => {
            debug!("[RECV] ignoring {}", keyword);
        }
    }
}

/// Background reader loop
async fn reader_loop<R>(
    reader: R,
    shared: Arc<SharedState>,
    status_tx: watch::Sender<ConnectionStatus>,
    queues: Queues,
) where
    R: AsyncRead + Send + Unpin + 'static,
{
    let result = std::panic::AssertUnwindSafe(reader_loop_inner(
        reader,
        shared,
        status_tx.clone(),
        queues,
    ));
    if futures_util::FutureExt::catch_unwind(result)
        .await
        .is_err()
    {
        tracing::error!("reader task panicked");
        let _ = status_tx.send(ConnectionStatus::Disconnected(DisconnectReason::IoError(
            "reader task panicked".to_string(),
        )));
    }
}

async fn reader_loop_inner<R>(
    mut reader: R,
    shared: Arc<SharedState>,
    status_tx: watch::Sender<ConnectionStatus>,
    queues: Queues,
) where
    R: AsyncRead + Send + Unpin + 'static,
{
    let mut parser = LineParser::new();
    let mut read_buffer = [0u8; READ_BUF_SIZE];

    let reason = loop {
        while let Some(line) = parser.parse_line() {
            route_line(line, &shared, &queues);
        }

        tokio::select! {
            biased;
            _ = shared.stop.notified() => {
                info!("Session stop requested");
                break DisconnectReason::ClientRequested;
            }
            read_result = reader.read(&mut read_buffer) => match read_result {
                Ok(0) => {
                    info!("Connection closed (EOF)");
                    break DisconnectReason::ConnectionClosed;
                }
                Ok(n) => {
                    trace!("[RECV] Read {} bytes", n);
                    if let Err(e) = parser.add_data(&read_buffer[..n]) {
                        warn!("Framing error: {}", e);
                        break DisconnectReason::IoError(e.to_string());
                    }
                }
                Err(e) => {
                    warn!("Read error: {}", e);
                    break DisconnectReason::IoError(e.to_string());
                }
            }
        }
    };

    let _ = status_tx.send(ConnectionStatus::Disconnected(reason));
    // Closing the queues is the shutdown sentinel for every consumer.
    drop(queues);
}

impl AtSession {
    /// Start a session over an already-open duplex byte channel.
    ///
    /// Spawns the reader task; must be called inside a tokio runtime.
    pub fn new<R, W>(reader: R, writer: W, options: SessionOptions) -> (Self, SessionStreams)
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (responses_tx, responses_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(SharedState {
            status: StatusCell::new(SessionStatus::Idle),
            stop: Notify::new(),
            command_timeout_ms: AtomicU64::new(options.command_timeout.as_millis() as u64),
            options,
        });

        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Connected);
        let status_rx2 = status_tx.subscribe();

        tokio::spawn(reader_loop(
            reader,
            shared.clone(),
            status_tx,
            Queues {
                responses: responses_tx,
                events: events_tx,
                outgoing_calls: outgoing_tx,
                incoming_calls: incoming_tx,
            },
        ));

        let session = AtSession {
            channel: Arc::new(Mutex::new(CommandChannel {
                writer: Box::new(writer),
                responses: responses_rx,
            })),
            shared,
            status_rx,
        };

        let streams = SessionStreams {
            events: EventStream {
                rx: events_rx,
                status_rx: status_rx2,
            },
            outgoing_calls: CallReports { rx: outgoing_rx },
            incoming_calls: CallReports { rx: incoming_rx },
        };

        (session, streams)
    }

    /// Open a character device (serial port, pty) as the modem channel.
    ///
    /// The device is opened twice, once per direction, so a blocked read
    /// never holds up a write. Line settings (baud rate) are left as
    /// configured on the device.
    pub async fn open_device(
        path: impl AsRef<Path>,
        options: SessionOptions,
    ) -> AtResult<(Self, SessionStreams)> {
        let path = path.as_ref();
        info!("Opening modem device {}", path.display());
        let reader = tokio::fs::OpenOptions::new()
            .read(true)
            .open(path)
            .await?;
        let writer = tokio::fs::OpenOptions::new()
            .write(true)
            .open(path)
            .await?;
        Ok(Self::new(reader, writer, options))
    }

    /// Connect to a modem exposed over TCP (e.g. `ser2net`).
    pub async fn connect_tcp(
        addr: &str,
        options: SessionOptions,
    ) -> AtResult<(Self, SessionStreams)> {
        info!("Connecting to modem at {}", addr);
        let stream = tcp_connect_with_timeout(addr).await?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self::new(read_half, write_half, options))
    }

    /// Send a command and collect the lines preceding its terminator.
    ///
    /// The channel lock is held through the entire send-and-receive cycle:
    /// responses carry no correlation id, so a second concurrent command
    /// would steal lines belonging to the first.
    ///
    /// `+`-prefixed information replies (`+CSQ`, `+CREG`, ...) are routed to
    /// the event stream, not to the response; see [`AtResponse`].
    pub async fn execute(&self, command: AtCommand) -> AtResult<AtResponse> {
        if !self.is_connected() {
            return Err(AtError::NotConnected);
        }
        let mut channel = self
            .channel
            .lock()
            .await;
        Self::execute_locked(&mut channel, &command).await
    }

    async fn execute_locked(
        channel: &mut CommandChannel,
        command: &AtCommand,
    ) -> AtResult<AtResponse> {
        // Leftovers from an earlier timed-out command would be misattributed.
        while let Ok(stale) = channel
            .responses
            .try_recv()
        {
            warn!("[SEND] discarding stale response {:?}", stale);
        }

        debug!("[SEND] {}", command);
        let wire = format!("{}{}", command.line(), LINE_TERMINATOR);
        channel
            .writer
            .write_all(wire.as_bytes())
            .await?;
        channel
            .writer
            .flush()
            .await?;

        let Some(terminator) = command.terminator() else {
            return Ok(AtResponse::default());
        };

        let wait = command.response_timeout();
        let mut lines = Vec::new();
        loop {
            match timeout(wait, channel.responses.recv()).await {
                Ok(Some(line)) if line == terminator => {
                    debug!("[RECV] {} -> {} ({} lines)", command, line, lines.len());
                    return Ok(AtResponse::new(lines));
                }
                Ok(Some(line)) if is_final_error(&line) => {
                    warn!("[RECV] {} -> {}", command, line);
                    return Err(AtError::CommandFailed {
                        command: command.to_string(),
                        reply: line,
                    });
                }
                Ok(Some(line)) => {
                    trace!("[WAIT] {:?}", line);
                    lines.push(line);
                }
                Ok(None) => return Err(AtError::ConnectionClosed),
                Err(_) => {
                    return Err(AtError::CommandTimeout {
                        command: command.to_string(),
                        timeout_ms: wait.as_millis() as u64,
                    })
                }
            }
        }
    }

    /// Send a raw command line awaiting `OK` with the session's command timeout.
    pub async fn command(&self, line: &str) -> AtResult<AtResponse> {
        let command = AtCommand::new(line)?.timeout(self.command_timeout());
        self.execute(command)
            .await
    }

    /// Liveness probe (`AT`).
    pub async fn probe(&self) -> AtResult<()> {
        self.execute(AtCommand::probe().timeout(self.command_timeout()))
            .await
            .map(|_| ())
    }

    /// Put the modem into the mode the session relies on: no echo, call
    /// state reporting, PDU mode and direct SMS delivery.
    pub async fn init_module(&self) -> AtResult<()> {
        for line in INIT_SEQUENCE {
            self.command(line)
                .await?;
        }
        info!("Modem initialized");
        Ok(())
    }

    /// Place a voice call (`ATD<number>;`).
    pub async fn dial(&self, number: &str) -> AtResult<()> {
        self.execute(AtCommand::dial(number)?.timeout(self.command_timeout()))
            .await
            .map(|_| ())
    }

    /// Hang up (`ATH`).
    pub async fn hangup(&self) -> AtResult<()> {
        self.execute(AtCommand::hangup().timeout(self.command_timeout()))
            .await
            .map(|_| ())
    }

    /// Encode and send a text message, one `AT+CMGS` exchange per fragment.
    ///
    /// Each fragment is a two-step exchange: `AT+CMGS=<len>` without waiting,
    /// a fixed pause for the unterminated `> ` prompt, then the PDU with
    /// Ctrl-Z awaiting `OK`. The channel lock is held across all fragments.
    /// Returns the message references reported by the modem.
    pub async fn send_sms(
        &self,
        codec: &dyn SmsCodec,
        number: &str,
        text: &str,
    ) -> AtResult<Vec<u8>> {
        if !self.is_connected() {
            return Err(AtError::NotConnected);
        }
        let fragments = codec.encode(number, text)?;
        let delay = self
            .shared
            .options
            .sms_prompt_delay;
        let mut references = Vec::with_capacity(fragments.len());

        let mut channel = self
            .channel
            .lock()
            .await;
        for (i, fragment) in fragments
            .iter()
            .enumerate()
        {
            debug!(
                "[SMS] sending fragment {}/{} to {}",
                i + 1,
                fragments.len(),
                number
            );
            Self::execute_locked(&mut channel, &AtCommand::sms_submit(fragment.tpdu_length))
                .await?;
            tokio::time::sleep(delay).await;
            let payload = AtCommand::sms_payload(&fragment.to_hex())?.timeout(self.command_timeout());
            let response = Self::execute_locked(&mut channel, &payload).await?;
            match response.message_reference() {
                Some(mr) => references.push(mr),
                None => debug!("[SMS] no message reference in {:?}", response.lines()),
            }
        }
        drop(channel);

        info!(
            "[SMS] sent {} fragment(s) to {}",
            fragments.len(),
            number
        );
        Ok(references)
    }

    /// Mark the announced SMS body as consumed.
    ///
    /// Returns `true` if the session was awaiting an SMS body, i.e. the line
    /// just taken from the event queue is a PDU. Only the event worker calls this.
    pub fn take_sms_body(&self) -> bool {
        self.shared
            .status
            .transition(SessionStatus::AwaitingSmsBody, SessionStatus::Idle)
    }

    /// Move between two statuses; `false` if the session was not in `from`.
    pub(crate) fn transition_status(&self, from: SessionStatus, to: SessionStatus) -> bool {
        self.shared
            .status
            .transition(from, to)
    }

    /// Current session status.
    pub fn status(&self) -> SessionStatus {
        self.shared
            .status
            .load()
    }

    /// Timing parameters the session was started with.
    pub fn options(&self) -> &SessionOptions {
        &self.shared.options
    }

    /// Set command response timeout (default: 10 seconds).
    ///
    /// Applies to `command()`, `probe()`, `init_module()`, `dial()`, `hangup()`
    /// and the payload half of `send_sms()`. Commands built with
    /// [`AtCommand`] and passed to `execute()` carry their own timeout.
    pub fn set_command_timeout(&self, duration: Duration) {
        self.shared
            .command_timeout_ms
            .store(duration.as_millis() as u64, Ordering::Relaxed);
    }

    fn command_timeout(&self) -> Duration {
        Duration::from_millis(
            self.shared
                .command_timeout_ms
                .load(Ordering::Relaxed),
        )
    }

    /// Whether the reader task is still running.
    pub fn is_connected(&self) -> bool {
        matches!(
            *self
                .status_rx
                .borrow(),
            ConnectionStatus::Connected
        )
    }

    /// Current connection status snapshot.
    pub fn connection_status(&self) -> ConnectionStatus {
        self.status_rx
            .borrow()
            .clone()
    }

    /// Stop the reader task and shut down the write side.
    ///
    /// All session queues close once the reader exits, so every consumer
    /// blocked on them wakes up with `None`. Waits for the reader to finish.
    pub async fn stop(&self) -> AtResult<()> {
        info!("Client requested stop");
        self.shared
            .stop
            .notify_one();

        let mut status_rx = self
            .status_rx
            .clone();
        // Err means the reader task is gone, which is what we wait for anyway.
        let _ = status_rx
            .wait_for(|s| matches!(s, ConnectionStatus::Disconnected(_)))
            .await;

        let mut channel = self
            .channel
            .lock()
            .await;
        channel
            .writer
            .shutdown()
            .await?;
        Ok(())
    }
}

impl EventStream {
    /// Receive the next event line, or None once the session has stopped.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx
            .recv()
            .await
    }

    /// Whether the reader task is still running.
    pub fn is_connected(&self) -> bool {
        matches!(
            *self
                .status_rx
                .borrow(),
            ConnectionStatus::Connected
        )
    }

    /// Current connection status snapshot.
    pub fn status(&self) -> ConnectionStatus {
        self.status_rx
            .borrow()
            .clone()
    }
}

impl futures_util::Stream for EventStream {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx
            .poll_recv(cx)
    }
}
