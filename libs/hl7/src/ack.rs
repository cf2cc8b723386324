//! Fallback ACK synthesis.
//!
//! When [`Message::generate_ack`](crate::Message::generate_ack) cannot
//! run (empty frame, unparseable payload) the receiver still owes the
//! client exactly one ACK, so one is built textually.

/// Why a fallback ACK was synthesized instead of a generated one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckReason {
    /// The inbound frame carried no payload.
    Empty,
    /// The payload could not be parsed as HL7.
    ParseFail,
}

impl AckReason {
    /// Wire token placed in MSA-3.
    pub fn as_str(&self) -> &'static str {
        match self {
            AckReason::Empty => "EMPTY",
            AckReason::ParseFail => "PARSEFAIL",
        }
    }
}

/// Build the textual fallback ACK.
///
/// `control_id` may be empty when the source frame yielded none.
pub fn fallback_ack(control_id: &str, reason: AckReason) -> String {
    let now = chrono::Local::now();
    format!(
        "MSH|^~\\&|LOCALBRIDGE|ENGINE|||{}||ACK^A01|ACK-{}|P|2.5\rMSA|AA|{}|{}\r",
        now.format("%Y%m%d%H%M%S"),
        now.format("%Y%m%d%H%M%S%3f"),
        control_id,
        reason.as_str(),
    )
}

/// Best-effort extraction of MSH-10 from raw, possibly unparseable text.
///
/// Used to echo a control ID in fallback ACKs after a parse failure.
pub fn extract_control_id(raw: &str) -> String {
    let first_line = raw
        .split(|c| c == '\r' || c == '\n')
        .next()
        .unwrap_or_default();
    if !first_line.starts_with("MSH") || first_line.len() < 4 {
        return String::new();
    }
    let sep = first_line.chars().nth(3).unwrap_or('|');
    first_line
        .split(sep)
        .nth(9)
        .map(str::to_string)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    #[test]
    fn fallback_ack_matches_wire_shape() {
        let ack = fallback_ack("MSG42", AckReason::ParseFail);
        let re = Regex::new(
            r"^MSH\|\^~\\&\|LOCALBRIDGE\|ENGINE\|\|\|\d{14}\|\|ACK\^A01\|ACK-\d{17}\|P\|2\.5\rMSA\|AA\|MSG42\|PARSEFAIL\r$",
        )
        .unwrap();
        assert!(re.is_match(&ack), "unexpected ACK: {ack:?}");
    }

    #[test]
    fn fallback_ack_for_empty_frame_has_blank_control_id() {
        let ack = fallback_ack("", AckReason::Empty);
        assert!(ack.contains("\rMSA|AA||EMPTY\r"));
    }

    #[test]
    fn fallback_ack_is_parseable_hl7() {
        let ack = fallback_ack("X1", AckReason::Empty);
        let msg = crate::Message::parse(&ack).unwrap();
        assert_eq!(
            msg.get(&"MSA-2".parse().unwrap()).as_deref(),
            Some("X1")
        );
    }

    #[test]
    fn extracts_control_id_from_raw_text() {
        let raw = "MSH|^~\\&|S|F|D|F|20250101||ADT^A01|CTRL99|P|2.5\rPID|1\r";
        assert_eq!(extract_control_id(raw), "CTRL99");
        assert_eq!(extract_control_id("garbage"), "");
        assert_eq!(extract_control_id(""), "");
    }
}
