//! Routing of incoming modem lines.
//!
//! Every line the reader task frames goes through [`classify`] exactly once;
//! the returned [`Route`] decides which queue, if any, receives it.

use crate::{
    clcc::ClccReport,
    constants::{PREFIX_CME_ERROR, PREFIX_CMGS, PREFIX_CMS_ERROR, PREFIX_CMT},
    status::SessionStatus,
};

/// Error returned when parsing a line that is not an idle call-state keyword.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdleKeywordError(pub String);

impl std::fmt::Display for ParseIdleKeywordError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "not an idle call-state keyword: {}", self.0)
    }
}

impl std::error::Error for ParseIdleKeywordError {}

define_wire_enum! {
    error_type: ParseIdleKeywordError,
    /// Call-state result codes that carry nothing `+CLCC` does not already report.
    pub enum IdleKeyword {
        Busy => "BUSY",
        Ring => "RING",
        NoCarrier => "NO CARRIER",
        NoAnswer => "NO ANSWER",
        NoDialtone => "NO DIALTONE",
    }
}

/// Where a classified line goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Response to the command currently in flight.
    CommandResponse,
    /// Unsolicited notification or SMS PDU for the event worker.
    GenericEvent,
    /// `+CLCC` for a call we placed.
    OutgoingCallReport(ClccReport),
    /// `+CLCC` for a call we are receiving.
    IncomingCallReport(ClccReport),
    /// `+CMT` header: the session must await the PDU line. Not queued.
    SmsMarker,
    /// Known keyword with no further use. Not queued.
    Discard(IdleKeyword),
}

/// Decide where `line` goes given the current session status.
///
/// Pure: the reader task applies the side effect of [`Route::SmsMarker`].
/// A `+CLCC` line that fails to parse falls through to the generic `+` rule.
pub fn classify(line: &str, status: SessionStatus) -> Route {
    if status == SessionStatus::AwaitingSmsBody {
        return Route::GenericEvent;
    }

    if ClccReport::matches(line) {
        if let Ok(report) = line.parse::<ClccReport>() {
            return if report.is_outgoing() {
                Route::OutgoingCallReport(report)
            } else {
                Route::IncomingCallReport(report)
            };
        }
    }

    if line.starts_with(PREFIX_CMT) {
        Route::SmsMarker
    } else if line.starts_with(PREFIX_CMGS)
        || line.starts_with(PREFIX_CME_ERROR)
        || line.starts_with(PREFIX_CMS_ERROR)
    {
        Route::CommandResponse
    } else if let Ok(keyword) = line.parse::<IdleKeyword>() {
        Route::Discard(keyword)
    } else if line.starts_with('+') {
        Route::GenericEvent
    } else {
        Route::CommandResponse
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clcc::ClccState;

    const SAMPLES: &[&str] = &[
        "OK",
        "ERROR",
        "RING",
        "NO CARRIER",
        "+CMT: ,24",
        "+CMGS: 12",
        "+CLCC: 1,0,2,0,0,\"123\",129,\"\"",
        "+CLCC: 1,1,4,0,0,\"123\",129,\"\"",
        "+CREG: 1",
        "07911326040000F0040B911346610089F60000208062917314080CC8F71D14969741F977FD07",
        "",
    ];

    #[test]
    fn test_awaiting_sms_body_routes_everything_to_events() {
        for line in SAMPLES {
            assert_eq!(
                classify(line, SessionStatus::AwaitingSmsBody),
                Route::GenericEvent,
                "line {:?}",
                line
            );
        }
    }

    #[test]
    fn test_clcc_partition_by_direction() {
        match classify("+CLCC: 1,0,3,0,0,\"123\",129,\"\"", SessionStatus::Idle) {
            Route::OutgoingCallReport(r) => assert_eq!(r.state, ClccState::Alerting),
            other => panic!("unexpected route {:?}", other),
        }
        match classify("+CLCC: 1,1,4,0,0,\"123\",129,\"\"", SessionStatus::Idle) {
            Route::IncomingCallReport(r) => assert_eq!(r.state, ClccState::Incoming),
            other => panic!("unexpected route {:?}", other),
        }
        for stat in 0..=6 {
            let out = format!("+CLCC: 1,0,{},0,0,\"1\",129,\"\"", stat);
            let inc = format!("+CLCC: 1,1,{},0,0,\"1\",129,\"\"", stat);
            assert!(matches!(
                classify(&out, SessionStatus::ActiveCall),
                Route::OutgoingCallReport(_)
            ));
            assert!(matches!(
                classify(&inc, SessionStatus::ActiveCall),
                Route::IncomingCallReport(_)
            ));
        }
    }

    #[test]
    fn test_malformed_clcc_is_generic_event() {
        assert_eq!(
            classify("+CLCC: garbage", SessionStatus::Idle),
            Route::GenericEvent
        );
    }

    #[test]
    fn test_sms_marker() {
        assert_eq!(
            classify("+CMT: \"\",24", SessionStatus::Idle),
            Route::SmsMarker
        );
    }

    #[test]
    fn test_command_responses() {
        assert_eq!(classify("+CMGS: 3", SessionStatus::Idle), Route::CommandResponse);
        assert_eq!(
            classify("+CMS ERROR: 500", SessionStatus::Idle),
            Route::CommandResponse
        );
        assert_eq!(
            classify("+CME ERROR: 10", SessionStatus::Idle),
            Route::CommandResponse
        );
        assert_eq!(classify("OK", SessionStatus::Idle), Route::CommandResponse);
        assert_eq!(classify("> ", SessionStatus::Idle), Route::CommandResponse);
        assert_eq!(
            classify("SIM800 R14.18", SessionStatus::Idle),
            Route::CommandResponse
        );
    }

    #[test]
    fn test_idle_keywords_discarded() {
        for keyword in IdleKeyword::ALL {
            assert_eq!(
                classify(keyword.as_str(), SessionStatus::Idle),
                Route::Discard(*keyword)
            );
        }
        // Not an exact keyword: a regular response line
        assert_eq!(classify("RINGING", SessionStatus::Idle), Route::CommandResponse);
    }

    #[test]
    fn test_plus_lines_are_events() {
        assert_eq!(classify("+CREG: 1", SessionStatus::Idle), Route::GenericEvent);
        assert_eq!(
            classify("+CLIP: \"123\",129", SessionStatus::IncomingCall),
            Route::GenericEvent
        );
    }

    #[test]
    fn test_keyword_wire_names() {
        assert_eq!(IdleKeyword::NoDialtone.to_string(), "NO DIALTONE");
        assert_eq!(
            "NO ANSWER".parse::<IdleKeyword>(),
            Ok(IdleKeyword::NoAnswer)
        );
        assert!("no answer"
            .parse::<IdleKeyword>()
            .is_err());
    }
}
