//! Typed `+CLCC` call-progress reports.
//!
//! With `AT+CLCC=1` the modem emits one report per call whenever a call
//! changes state:
//!
//! ```text
//! +CLCC: <id>,<dir>,<stat>,<mode>,<mpty>[,<number>,<type>[,<alpha>]]
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{
    constants::PREFIX_CLCC,
    error::{AtError, AtResult},
};

/// Call direction, the `<dir>` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum CallDirection {
    /// Mobile originated (we dialed).
    Outgoing = 0,
    /// Mobile terminated (we are being called).
    Incoming = 1,
}

impl CallDirection {
    /// Parse from the `<dir>` integer.
    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            0 => Some(Self::Outgoing),
            1 => Some(Self::Incoming),
            _ => None,
        }
    }
}

impl fmt::Display for CallDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Outgoing => "outgoing",
            Self::Incoming => "incoming",
        };
        f.write_str(name)
    }
}

/// Call state, the `<stat>` field (3GPP TS 27.007 §7.18).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
#[repr(u8)]
#[allow(missing_docs)]
pub enum ClccState {
    Active = 0,
    Held = 1,
    Dialing = 2,
    Alerting = 3,
    Incoming = 4,
    Waiting = 5,
    Disconnect = 6,
}

impl ClccState {
    /// Parse from the `<stat>` integer.
    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            0 => Some(Self::Active),
            1 => Some(Self::Held),
            2 => Some(Self::Dialing),
            3 => Some(Self::Alerting),
            4 => Some(Self::Incoming),
            5 => Some(Self::Waiting),
            6 => Some(Self::Disconnect),
            _ => None,
        }
    }

    /// Integer code as sent on the wire.
    pub fn as_number(&self) -> u8 {
        *self as u8
    }
}

impl fmt::Display for ClccState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Active => "ACTIVE",
            Self::Held => "HELD",
            Self::Dialing => "DIALING",
            Self::Alerting => "ALERTING",
            Self::Incoming => "INCOMING",
            Self::Waiting => "WAITING",
            Self::Disconnect => "DISCONNECT",
        };
        f.write_str(name)
    }
}

/// One parsed `+CLCC` line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClccReport {
    /// Call index, stable for the lifetime of the call.
    pub id: u8,
    /// Who placed the call.
    pub direction: CallDirection,
    /// Progress of the call.
    pub state: ClccState,
    /// Bearer: 0 voice, 1 data, 2 fax.
    pub mode: u8,
    /// Part of a multiparty (conference) call.
    pub multiparty: bool,
    /// Remote number, empty when withheld.
    pub number: String,
    /// Type of address (129 national, 145 international).
    pub number_type: Option<u8>,
    /// Phonebook name, if the modem resolved one.
    pub alpha: Option<String>,
}

impl ClccReport {
    /// Quick check used by the classifier before attempting a full parse.
    pub fn matches(line: &str) -> bool {
        line.starts_with(PREFIX_CLCC)
    }

    /// `true` for reports about calls we dialed.
    pub fn is_outgoing(&self) -> bool {
        self.direction == CallDirection::Outgoing
    }
}

fn int_field<T: FromStr>(fields: &[String], index: usize, name: &str) -> AtResult<T> {
    let raw = fields
        .get(index)
        .ok_or_else(|| AtError::malformed(format!("+CLCC missing <{}>", name)))?;
    raw.trim()
        .parse()
        .map_err(|_| AtError::malformed(format!("+CLCC invalid <{}>: {:?}", name, raw)))
}

/// Split on commas that are not inside double quotes, unquoting each field.
fn split_fields(body: &str) -> AtResult<Vec<String>> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for c in body.chars() {
        match c {
            '"' => quoted = !quoted,
            ',' if !quoted => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    if quoted {
        return Err(AtError::malformed("+CLCC unterminated quote"));
    }
    fields.push(current);
    Ok(fields)
}

impl FromStr for ClccReport {
    type Err = AtError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let body = line
            .strip_prefix(PREFIX_CLCC)
            .ok_or_else(|| AtError::malformed(format!("not a +CLCC line: {:?}", line)))?;
        let fields = split_fields(body.trim_start())?;

        let id = int_field(&fields, 0, "id")?;
        let dir: u8 = int_field(&fields, 1, "dir")?;
        let direction = CallDirection::from_number(dir)
            .ok_or_else(|| AtError::malformed(format!("+CLCC unknown <dir> {}", dir)))?;
        let stat: u8 = int_field(&fields, 2, "stat")?;
        let state = ClccState::from_number(stat)
            .ok_or_else(|| AtError::malformed(format!("+CLCC unknown <stat> {}", stat)))?;
        let mode = int_field(&fields, 3, "mode")?;
        let mpty: u8 = int_field(&fields, 4, "mpty")?;

        let number = fields
            .get(5)
            .cloned()
            .unwrap_or_default();
        let number_type = match fields.get(6) {
            Some(raw) if !raw.trim().is_empty() => Some(int_field(&fields, 6, "type")?),
            _ => None,
        };
        let alpha = fields
            .get(7)
            .filter(|a| !a.is_empty())
            .cloned();

        Ok(ClccReport {
            id,
            direction,
            state,
            mode,
            multiparty: mpty != 0,
            number,
            number_type,
            alpha,
        })
    }
}

impl fmt::Display for ClccReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {},{},{},{},{},\"{}\"",
            PREFIX_CLCC,
            self.id,
            self.direction as u8,
            self.state.as_number(),
            self.mode,
            u8::from(self.multiparty),
            self.number
        )?;
        if let Some(t) = self.number_type {
            write!(f, ",{}", t)?;
            write!(f, ",\"{}\"", self.alpha.as_deref().unwrap_or(""))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_report() {
        let report: ClccReport = "+CLCC: 1,0,3,0,0,\"+491701234567\",145,\"Alice\""
            .parse()
            .unwrap();
        assert_eq!(report.id, 1);
        assert_eq!(report.direction, CallDirection::Outgoing);
        assert_eq!(report.state, ClccState::Alerting);
        assert_eq!(report.mode, 0);
        assert!(!report.multiparty);
        assert_eq!(report.number, "+491701234567");
        assert_eq!(report.number_type, Some(145));
        assert_eq!(report.alpha.as_deref(), Some("Alice"));
        assert!(report.is_outgoing());
    }

    #[test]
    fn test_parse_incoming_without_alpha() {
        let report: ClccReport = "+CLCC: 2,1,4,0,0,\"0301234\",129"
            .parse()
            .unwrap();
        assert_eq!(report.direction, CallDirection::Incoming);
        assert_eq!(report.state, ClccState::Incoming);
        assert_eq!(report.alpha, None);
    }

    #[test]
    fn test_parse_minimal_report() {
        let report: ClccReport = "+CLCC: 1,0,6,0,0"
            .parse()
            .unwrap();
        assert_eq!(report.state, ClccState::Disconnect);
        assert_eq!(report.number, "");
        assert_eq!(report.number_type, None);
    }

    #[test]
    fn test_quoted_comma_in_alpha() {
        let report: ClccReport = "+CLCC: 1,0,0,0,0,\"123\",129,\"Doe, John\""
            .parse()
            .unwrap();
        assert_eq!(report.alpha.as_deref(), Some("Doe, John"));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("+CLCC: x,0,0,0,0"
            .parse::<ClccReport>()
            .is_err());
        assert!("+CLCC: 1,2,0,0,0"
            .parse::<ClccReport>()
            .is_err());
        assert!("+CLCC: 1,0,9,0,0"
            .parse::<ClccReport>()
            .is_err());
        assert!("+CLCC: 1,0"
            .parse::<ClccReport>()
            .is_err());
        assert!("+CLCC: 1,0,0,0,0,\"123"
            .parse::<ClccReport>()
            .is_err());
        assert!("+CLIP: \"123\",129"
            .parse::<ClccReport>()
            .is_err());
    }

    #[test]
    fn test_state_numbers() {
        for n in 0..=6 {
            let state = ClccState::from_number(n).unwrap();
            assert_eq!(state.as_number(), n);
        }
        assert_eq!(ClccState::from_number(7), None);
    }

    #[test]
    fn test_display_matches_wire_format() {
        let line = "+CLCC: 1,0,2,0,0,\"123\",129,\"\"";
        let report: ClccReport = line
            .parse()
            .unwrap();
        assert_eq!(report.to_string(), line);
    }
}
