//! Scripted fake modem shared by the integration tests.
//!
//! The modem side of a `tokio::io::duplex` pipe answers every received line
//! through a responder closure and can push unsolicited lines at any time.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{duplex, split, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::Instant;
use wurlitzer::{
    AtResult, AtSession, AudioHandle, AudioPlayer, PduCodec, PduError, SessionOptions,
    SessionStreams, Sms, SmsCodec, SubmitPdu,
};

pub type Responder = Box<dyn FnMut(&str) -> Vec<String> + Send>;

/// Modem side of the pipe.
pub struct FakeModem {
    received: Arc<Mutex<Vec<(Instant, String)>>>,
    inject: mpsc::UnboundedSender<String>,
}

impl FakeModem {
    /// Start a session wired to a fake modem answering through `responder`.
    pub fn start(responder: Responder) -> (AtSession, SessionStreams, FakeModem) {
        let (ours, theirs) = duplex(64 * 1024);
        let (r, w) = split(ours);
        let (session, streams) = AtSession::new(r, w, SessionOptions::default());

        let received = Arc::new(Mutex::new(Vec::new()));
        let (inject_tx, mut inject_rx) = mpsc::unbounded_channel::<String>();
        let (modem_r, mut modem_w) = split(theirs);

        let log = received.clone();
        let mut responder = responder;
        tokio::spawn(async move {
            let mut lines = BufReader::new(modem_r).lines();
            loop {
                tokio::select! {
                    line = lines.next_line() => {
                        let Ok(Some(line)) = line else { break };
                        let line = line.trim_end_matches('\r').to_string();
                        log.lock().unwrap().push((Instant::now(), line.clone()));
                        for reply in responder(&line) {
                            if write_reply(&mut modem_w, &reply).await.is_err() {
                                return;
                            }
                        }
                    }
                    Some(line) = inject_rx.recv() => {
                        if write_reply(&mut modem_w, &line).await.is_err() {
                            return;
                        }
                    }
                }
            }
        });

        (
            session,
            streams,
            FakeModem {
                received,
                inject: inject_tx,
            },
        )
    }

    /// Push an unsolicited line to the session.
    pub fn inject(&self, line: &str) {
        self.inject
            .send(line.to_string())
            .unwrap();
    }

    /// Every line the session has written so far.
    pub fn received(&self) -> Vec<String> {
        self.received_at()
            .into_iter()
            .map(|(_, line)| line)
            .collect()
    }

    /// Every line written so far with the (paused) clock reading at arrival.
    pub fn received_at(&self) -> Vec<(Instant, String)> {
        self.received
            .lock()
            .unwrap()
            .clone()
    }

    /// Wait (on the paused clock) until the session has written a line
    /// matching `pred`.
    pub async fn wait_for_line(&self, pred: impl Fn(&str) -> bool) -> String {
        for _ in 0..1000 {
            if let Some(line) = self
                .received()
                .into_iter()
                .find(|l| pred(l))
            {
                return line;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        panic!("line never sent; got {:?}", self.received());
    }
}

async fn write_reply<W: AsyncWriteExt + Unpin>(w: &mut W, line: &str) -> std::io::Result<()> {
    // The SMS prompt is the one output without a trailing line terminator.
    let wire = if line == "> " {
        "\r\n> ".to_string()
    } else {
        format!("\r\n{}\r\n", line)
    };
    w.write_all(wire.as_bytes())
        .await
}

/// `OK` to everything, with the two-step `AT+CMGS` exchange scripted.
pub fn ok_responder() -> Responder {
    Box::new(standard_reply)
}

pub fn standard_reply(line: &str) -> Vec<String> {
    if line.starts_with("AT+CMGS=") {
        vec!["> ".to_string()]
    } else if line.ends_with('\x1a') {
        vec!["+CMGS: 7".to_string(), "OK".to_string()]
    } else {
        vec!["OK".to_string()]
    }
}

/// `OK` to everything; the dial command is followed by `reports`, given as
/// `+CLCC` state codes for an outgoing call to `number`.
pub fn dial_responder(number: &str, states: &[u8]) -> Responder {
    let reports: Vec<String> = states
        .iter()
        .map(|s| clcc(0, *s, number))
        .collect();
    Box::new(move |line| {
        let mut out = standard_reply(line);
        if line.starts_with("ATD") {
            out.extend(reports.iter().cloned());
        }
        out
    })
}

pub fn clcc(direction: u8, state: u8, number: &str) -> String {
    format!("+CLCC: 1,{},{},0,0,\"{}\",129", direction, state, number)
}

/// Audio player that records what it was asked to do.
#[derive(Default)]
pub struct MockPlayer {
    spawned: Mutex<Vec<PathBuf>>,
    kills: Arc<AtomicUsize>,
    exited: Arc<AtomicBool>,
}

impl MockPlayer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Player whose playback reports finished as soon as it is polled.
    pub fn finishing() -> Arc<Self> {
        let player = Self::default();
        player
            .exited
            .store(true, Ordering::SeqCst);
        Arc::new(player)
    }

    pub fn spawned(&self) -> Vec<PathBuf> {
        self.spawned
            .lock()
            .unwrap()
            .clone()
    }

    pub fn kills(&self) -> usize {
        self.kills
            .load(Ordering::SeqCst)
    }
}

impl AudioPlayer for MockPlayer {
    fn spawn(&self, path: &Path) -> AtResult<Box<dyn AudioHandle>> {
        self.spawned
            .lock()
            .unwrap()
            .push(path.to_path_buf());
        Ok(Box::new(MockHandle {
            kills: self.kills.clone(),
            exited: self.exited.clone(),
        }))
    }
}

struct MockHandle {
    kills: Arc<AtomicUsize>,
    exited: Arc<AtomicBool>,
}

impl AudioHandle for MockHandle {
    fn kill(&mut self) {
        self.kills
            .fetch_add(1, Ordering::SeqCst);
    }

    fn has_exited(&mut self) -> bool {
        self.exited
            .load(Ordering::SeqCst)
    }
}

/// Codec that takes the body line as the message text verbatim and
/// encodes replies for real. Lines starting with `!` fail to decode.
pub struct PlainTextCodec {
    pub sender: String,
    encoder: PduCodec,
}

impl PlainTextCodec {
    pub fn new(sender: &str) -> Arc<Self> {
        Arc::new(Self {
            sender: sender.to_string(),
            encoder: PduCodec::new(),
        })
    }
}

impl SmsCodec for PlainTextCodec {
    fn decode(&self, pdu: &str) -> Result<Sms, PduError> {
        if pdu.starts_with('!') {
            return Err(PduError::InvalidHex(pdu.to_string()));
        }
        Ok(Sms {
            sender: self.sender.clone(),
            text: pdu.to_string(),
            timestamp: "24/01/01,00:00:00".to_string(),
        })
    }

    fn encode(&self, number: &str, text: &str) -> Result<Vec<SubmitPdu>, PduError> {
        self.encoder
            .encode(number, text)
    }
}
