//! Session status shared between the reader task and the event worker.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// What the session is currently doing.
///
/// The reader task moves the session into [`AwaitingSmsBody`](Self::AwaitingSmsBody)
/// when it sees `+CMT`; only the event worker moves it back out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[repr(u8)]
pub enum SessionStatus {
    /// Nothing pending.
    #[default]
    Idle = 0,
    /// `+CMT` seen; the next line is the PDU of the announced message.
    AwaitingSmsBody = 1,
    /// An outgoing call is in progress.
    ActiveCall = 2,
    /// The modem is ringing.
    IncomingCall = 3,
}

impl SessionStatus {
    fn from_u8(n: u8) -> Self {
        match n {
            1 => Self::AwaitingSmsBody,
            2 => Self::ActiveCall,
            3 => Self::IncomingCall,
            _ => Self::Idle,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::AwaitingSmsBody => "awaiting-sms-body",
            Self::ActiveCall => "active-call",
            Self::IncomingCall => "incoming-call",
        };
        f.write_str(name)
    }
}

/// Atomically swapped [`SessionStatus`].
#[derive(Debug, Default)]
pub struct StatusCell(AtomicU8);

impl StatusCell {
    /// New cell holding `status`.
    pub fn new(status: SessionStatus) -> Self {
        Self(AtomicU8::new(status as u8))
    }

    /// Current status.
    pub fn load(&self) -> SessionStatus {
        SessionStatus::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Unconditionally replace the status, returning the previous one.
    pub fn swap(&self, status: SessionStatus) -> SessionStatus {
        SessionStatus::from_u8(self.0.swap(status as u8, Ordering::AcqRel))
    }

    /// Replace `current` with `new`; `false` if the status was something else.
    pub fn transition(&self, current: SessionStatus, new: SessionStatus) -> bool {
        self.0
            .compare_exchange(
                current as u8,
                new as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}
