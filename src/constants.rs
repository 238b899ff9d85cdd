//! Protocol constants and configuration values

/// Line terminator used by the modem in both directions
pub const LINE_TERMINATOR: &str = "\r\n";

/// Ends the PDU payload of a two-step `AT+CMGS` send
pub const CTRL_Z: char = '\x1a';

/// Read buffer size for the transport (4KB) - AT traffic is a few hundred bytes at a time
pub const READ_BUF_SIZE: usize = 4096;

/// Maximum buffered bytes without a line terminator (64KB).
/// A PDU line is at most ~350 hex characters; anything this large is line noise.
pub const MAX_LINE_SIZE: usize = 64 * 1024;

/// Default final result code awaited by a command
pub const RESULT_OK: &str = "OK";
/// Generic failure result code
pub const RESULT_ERROR: &str = "ERROR";
/// Equipment error prefix (`AT+CMEE` extended errors)
pub const PREFIX_CME_ERROR: &str = "+CME ERROR";
/// Message service error prefix
pub const PREFIX_CMS_ERROR: &str = "+CMS ERROR";

/// Unsolicited SMS delivery marker, followed by the PDU on the next line
pub const PREFIX_CMT: &str = "+CMT";
/// Message reference returned by `AT+CMGS`
pub const PREFIX_CMGS: &str = "+CMGS";
/// Current-calls report (`AT+CLCC=1`)
pub const PREFIX_CLCC: &str = "+CLCC:";

/// Command response timeout in milliseconds
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 10_000;

/// How long the call controller waits for the next `+CLCC` report
pub const DEFAULT_CALL_REPORT_TIMEOUT_MS: u64 = 10_000;

/// Report windows a dialing call may stay silent before it is hung up
pub const DEFAULT_DIAL_TIMEOUT_WINDOWS: u32 = 3;

/// Pause between `AT+CMGS=<len>` and the PDU payload.
/// The `> ` prompt carries no line terminator, so it cannot be awaited as a line.
pub const DEFAULT_SMS_PROMPT_DELAY_MS: u64 = 1000;

/// Modem setup sequence issued by [`AtSession::init_module`](crate::AtSession::init_module)
pub const INIT_SEQUENCE: &[&str] = &[
    "ATE0",        // no local echo
    "AT+CFUN=1",   // full functionality
    "AT+COLP=0",   // ATD returns without waiting for the connected line
    "AT+CLCC=1",   // unsolicited +CLCC on every call state change
    "AT+CLIP=1",   // caller id on incoming calls
    "AT+CMGF=0",   // PDU mode
    "AT+CNMI=2,2", // deliver SMS directly as +CMT
];
