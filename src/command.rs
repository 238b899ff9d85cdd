//! Command construction and response handling

use crate::{
    constants::{CTRL_Z, DEFAULT_COMMAND_TIMEOUT_MS, PREFIX_CMGS, RESULT_OK},
    error::{AtError, AtResult},
};
use std::fmt;
use std::time::Duration;

/// Validate that a command line contains no line terminator characters.
///
/// AT commands are line-delimited; an embedded CR would end the command early
/// and let the remainder run as a second command.
fn validate_single_line(s: &str) -> AtResult<()> {
    if s.contains('\n') || s.contains('\r') {
        return Err(AtError::invalid_command(format!(
            "{:?} must not contain line terminators",
            s
        )));
    }
    Ok(())
}

/// One command/response exchange: what to send, what ends the response,
/// and how long to wait for each line of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtCommand {
    line: String,
    terminator: Option<String>,
    timeout: Duration,
}

impl AtCommand {
    /// Command awaiting `OK` with the default timeout.
    ///
    /// ```
    /// use wurlitzer::AtCommand;
    ///
    /// let cmd = AtCommand::new("AT+CPIN?").unwrap();
    /// assert_eq!(cmd.line(), "AT+CPIN?");
    /// assert_eq!(cmd.terminator(), Some("OK"));
    /// ```
    pub fn new(line: impl Into<String>) -> AtResult<Self> {
        let line = line.into();
        validate_single_line(&line)?;
        Ok(Self {
            line,
            terminator: Some(RESULT_OK.to_string()),
            timeout: Duration::from_millis(DEFAULT_COMMAND_TIMEOUT_MS),
        })
    }

    /// Await `terminator` instead of `OK`.
    pub fn expect(mut self, terminator: impl Into<String>) -> Self {
        self.terminator = Some(terminator.into());
        self
    }

    /// Return as soon as the line is written.
    ///
    /// Used for the first half of prompt-based commands where the modem
    /// answers with an unterminated `> `.
    pub fn no_wait(mut self) -> Self {
        self.terminator = None;
        self
    }

    /// Per-line response timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Liveness probe.
    pub fn probe() -> Self {
        Self::trusted("AT")
    }

    /// Voice call to `number` (`ATD<number>;`).
    pub fn dial(number: &str) -> AtResult<Self> {
        if number.is_empty()
            || !number
                .chars()
                .all(|c| c.is_ascii_digit() || matches!(c, '+' | '*' | '#'))
        {
            return Err(AtError::invalid_command(format!(
                "not a dialable number: {:?}",
                number
            )));
        }
        Ok(Self::trusted(format!("ATD{};", number)))
    }

    /// Hang up all calls.
    pub fn hangup() -> Self {
        Self::trusted("ATH")
    }

    /// First half of a PDU-mode send: announces the TPDU length.
    pub fn sms_submit(tpdu_length: usize) -> Self {
        Self::trusted(format!("AT+CMGS={}", tpdu_length)).no_wait()
    }

    /// Second half of a PDU-mode send: hex PDU terminated by Ctrl-Z.
    pub fn sms_payload(pdu_hex: &str) -> AtResult<Self> {
        if !pdu_hex
            .chars()
            .all(|c| c.is_ascii_hexdigit())
        {
            return Err(AtError::invalid_command("PDU must be hex encoded"));
        }
        Ok(Self::trusted(format!("{}{}", pdu_hex, CTRL_Z)))
    }

    fn trusted(line: impl Into<String>) -> Self {
        Self {
            line: line.into(),
            terminator: Some(RESULT_OK.to_string()),
            timeout: Duration::from_millis(DEFAULT_COMMAND_TIMEOUT_MS),
        }
    }

    /// The line written to the modem, without terminator.
    pub fn line(&self) -> &str {
        &self.line
    }

    /// The response line that completes this command, if awaited.
    pub fn terminator(&self) -> Option<&str> {
        self.terminator
            .as_deref()
    }

    /// Per-line response timeout.
    pub fn response_timeout(&self) -> Duration {
        self.timeout
    }
}

impl fmt::Display for AtCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Ctrl-Z is unreadable in logs
        f.write_str(
            self.line
                .trim_end_matches(CTRL_Z),
        )
    }
}

/// Intermediate lines received before a command's terminator.
///
/// Only lines the classifier routes to the command in flight end up here:
/// unprefixed information lines (`AT+CGSN` serial numbers, the `> ` prompt)
/// and `+CMGS`. Any other `+`-prefixed line, such as `+CSQ: 20,0`, is
/// delivered on the event stream instead.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AtResponse {
    lines: Vec<String>,
}

impl AtResponse {
    /// Wrap the collected lines.
    pub fn new(lines: Vec<String>) -> Self {
        Self { lines }
    }

    /// Lines in arrival order, terminator excluded.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Consume into the collected lines.
    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }

    /// `true` if nothing but the terminator arrived.
    pub fn is_empty(&self) -> bool {
        self.lines
            .is_empty()
    }

    /// Value of the first `<prefix>: <value>` line.
    fn value(&self, prefix: &str) -> Option<&str> {
        self.lines
            .iter()
            .find_map(|l| {
                l.strip_prefix(prefix)?
                    .strip_prefix(':')
                    .map(str::trim)
            })
    }

    /// Message reference from a `+CMGS: <mr>` line.
    ///
    /// ```
    /// use wurlitzer::AtResponse;
    ///
    /// let resp = AtResponse::new(vec!["> ".into(), "+CMGS: 12".into()]);
    /// assert_eq!(resp.message_reference(), Some(12));
    /// ```
    pub fn message_reference(&self) -> Option<u8> {
        self.value(PREFIX_CMGS)?
            .parse()
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_line_terminators() {
        assert!(AtCommand::new("AT\r\nATH").is_err());
        assert!(AtCommand::new("AT\n").is_err());
        assert!(AtCommand::new("AT+CSQ").is_ok());
    }

    #[test]
    fn test_builder_overrides() {
        let cmd = AtCommand::new("AT+CGMI")
            .unwrap()
            .expect("DONE")
            .timeout(Duration::from_secs(2));
        assert_eq!(cmd.terminator(), Some("DONE"));
        assert_eq!(cmd.response_timeout(), Duration::from_secs(2));
        assert_eq!(
            cmd.no_wait()
                .terminator(),
            None
        );
    }

    #[test]
    fn test_dial() {
        assert_eq!(
            AtCommand::dial("+4917012345")
                .unwrap()
                .line(),
            "ATD+4917012345;"
        );
        assert!(AtCommand::dial("").is_err());
        assert!(AtCommand::dial("123;ATH").is_err());
    }

    #[test]
    fn test_sms_two_step() {
        let first = AtCommand::sms_submit(23);
        assert_eq!(first.line(), "AT+CMGS=23");
        assert_eq!(first.terminator(), None);

        let second = AtCommand::sms_payload("0011000B91").unwrap();
        assert_eq!(second.line(), "0011000B91\x1a");
        assert_eq!(second.terminator(), Some("OK"));
        assert_eq!(second.to_string(), "0011000B91");
        assert!(AtCommand::sms_payload("00\x1aATH").is_err());
    }

    #[test]
    fn test_response_helpers() {
        let resp = AtResponse::new(vec!["> ".into(), "+CMGS: 42".into()]);
        assert_eq!(resp.message_reference(), Some(42));
        assert_eq!(resp.value("+CSQ"), None);
        assert!(!resp.is_empty());
        assert!(AtResponse::default().is_empty());
    }
}
