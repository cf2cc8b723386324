//! Message model: CR-terminated segments of pipe-delimited fields.

use crate::path::FieldPath;
use crate::{Hl7Error, Result};

/// Delimiter set derived from the MSH header.
///
/// The field separator is the 4th byte of the MSH segment; the remaining
/// four come from MSH-2 (the encoding-characters field).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Separators {
    /// Field separator, default `|`.
    pub field: char,
    /// Component separator, default `^`.
    pub component: char,
    /// Repetition separator, default `~`.
    pub repetition: char,
    /// Escape character, default `\`.
    pub escape: char,
    /// Subcomponent separator, default `&`.
    pub subcomponent: char,
}

impl Default for Separators {
    fn default() -> Self {
        Self {
            field: '|',
            component: '^',
            repetition: '~',
            escape: '\\',
            subcomponent: '&',
        }
    }
}

impl Separators {
    fn from_msh_line(line: &str) -> Self {
        let mut sep = Self::default();
        let mut chars = line.chars().skip(3);
        if let Some(field) = chars.next() {
            sep.field = field;
            let encoding: Vec<char> = chars.take_while(|&c| c != sep.field).collect();
            if let Some(&c) = encoding.first() {
                sep.component = c;
            }
            if let Some(&c) = encoding.get(1) {
                sep.repetition = c;
            }
            if let Some(&c) = encoding.get(2) {
                sep.escape = c;
            }
            if let Some(&c) = encoding.get(3) {
                sep.subcomponent = c;
            }
        }
        sep
    }

    /// The MSH-2 encoding-characters token for these separators.
    pub fn encoding_chars(&self) -> String {
        [self.component, self.repetition, self.escape, self.subcomponent]
            .iter()
            .collect()
    }
}

/// One segment: token 0 is the 3-character ID, tokens 1.. are fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    fields: Vec<String>,
}

impl Segment {
    fn parse(line: &str, field_sep: char) -> Result<Self> {
        let fields: Vec<String> = line.split(field_sep).map(str::to_string).collect();
        let id = &fields[0];
        if id.len() != 3 || !id.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(Hl7Error::InvalidSegment {
                line: line.chars().take(32).collect(),
            });
        }
        Ok(Self { fields })
    }

    fn from_tokens(tokens: Vec<String>) -> Self {
        Self { fields: tokens }
    }

    /// Three-character segment ID.
    pub fn id(&self) -> &str {
        &self.fields[0]
    }

    /// Raw field tokens, ID included at index 0.
    pub fn tokens(&self) -> &[String] {
        &self.fields
    }

    fn encode(&self, field_sep: char) -> String {
        self.fields.join(&field_sep.to_string())
    }

    /// Maps a 1-based HL7 field number onto a token index.
    ///
    /// For MSH, field 1 is the separator itself and has no token; field
    /// `n >= 2` lives at token `n - 1`. For every other segment field
    /// `n` lives at token `n`.
    fn token_index(&self, field: u32) -> Option<usize> {
        if self.id().eq_ignore_ascii_case("MSH") {
            if field <= 1 {
                None
            } else {
                Some(field as usize - 1)
            }
        } else {
            Some(field as usize)
        }
    }
}

/// A parsed HL7 message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    segments: Vec<Segment>,
    separators: Separators,
}

impl Message {
    /// Parse pipe-delimited HL7 text.
    ///
    /// `\r\n` and `\n` segment terminators are normalized to `\r`; blank
    /// lines are dropped. The first segment must be MSH.
    pub fn parse(text: &str) -> Result<Self> {
        let normalized = text.replace("\r\n", "\r").replace('\n', "\r");
        let lines: Vec<&str> = normalized
            .split('\r')
            .filter(|l| !l.trim().is_empty())
            .collect();

        let first = *lines.first().ok_or(Hl7Error::Empty)?;
        if !first.starts_with("MSH") || first.len() < 4 {
            return Err(Hl7Error::MissingMsh);
        }
        let separators = Separators::from_msh_line(first);

        let segments = lines
            .iter()
            .map(|line| Segment::parse(line, separators.field))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            segments,
            separators,
        })
    }

    /// Encode to CR-terminated segment text.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        for seg in &self.segments {
            out.push_str(&seg.encode(self.separators.field));
            out.push('\r');
        }
        out
    }

    /// Delimiters in effect for this message.
    pub fn separators(&self) -> Separators {
        self.separators
    }

    /// All segments in message order.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Number of occurrences of segment `id` (case-insensitive).
    pub fn occurrence_count(&self, id: &str) -> usize {
        self.segments
            .iter()
            .filter(|s| s.id().eq_ignore_ascii_case(id))
            .count()
    }

    /// Append a new, empty segment with the given ID and return its index.
    pub fn append_segment(&mut self, id: &str) -> usize {
        self.segments
            .push(Segment::from_tokens(vec![id.to_ascii_uppercase()]));
        self.segments.len() - 1
    }

    fn find_segment(&self, id: &str, occurrence: usize) -> Option<usize> {
        self.segments
            .iter()
            .enumerate()
            .filter(|(_, s)| s.id().eq_ignore_ascii_case(id))
            .map(|(i, _)| i)
            .nth(occurrence)
    }

    /// Read the value a path addresses, or `None` when absent.
    ///
    /// A bare segment path returns the whole encoded segment. Component
    /// and subcomponent access applies to the first repetition of the
    /// field. MSH-1 yields the field separator itself.
    pub fn get(&self, path: &FieldPath) -> Option<String> {
        let occurrence = path.occurrence.unwrap_or(0);
        let seg = &self.segments[self.find_segment(&path.segment, occurrence)?];

        let Some(field) = path.field else {
            return Some(seg.encode(self.separators.field));
        };

        if seg.id().eq_ignore_ascii_case("MSH") && field == 1 {
            return Some(self.separators.field.to_string());
        }

        let token = seg.tokens().get(seg.token_index(field)?)?;
        let Some(component) = path.component else {
            return Some(token.clone());
        };

        let first_rep = token
            .split(self.separators.repetition)
            .next()
            .unwrap_or_default();
        let comp = first_rep
            .split(self.separators.component)
            .nth(component as usize - 1)?;
        let Some(sub) = path.subcomponent else {
            return Some(comp.to_string());
        };
        comp.split(self.separators.subcomponent)
            .nth(sub as usize - 1)
            .map(str::to_string)
    }

    /// Write `value` at the path, widening field/component lists as
    /// needed. The addressed segment occurrence must already exist.
    ///
    /// Setting MSH-1 is a structural no-op: field 1 is the separator.
    pub fn set(&mut self, path: &FieldPath, value: &str) -> Result<()> {
        let occurrence = path.occurrence.unwrap_or(0);
        let idx = self
            .find_segment(&path.segment, occurrence)
            .ok_or_else(|| Hl7Error::SegmentNotFound {
                segment: path.segment.clone(),
                occurrence,
            })?;

        let field = path.field.ok_or_else(|| Hl7Error::InvalidPath {
            path: path.to_string(),
        })?;

        let is_msh = self.segments[idx].id().eq_ignore_ascii_case("MSH");
        if is_msh && field == 1 {
            return Ok(());
        }
        let token_idx = self.segments[idx]
            .token_index(field)
            .expect("non-MSH-1 field always maps to a token");

        let sep = self.separators;
        let fields = &mut self.segments[idx].fields;
        if fields.len() <= token_idx {
            fields.resize(token_idx + 1, String::new());
        }

        match path.component {
            None => fields[token_idx] = value.to_string(),
            Some(component) => {
                let token = &fields[token_idx];
                let (first_rep, rest) = match token.find(sep.repetition) {
                    Some(pos) => (&token[..pos], token[pos..].to_string()),
                    None => (token.as_str(), String::new()),
                };

                let mut comps: Vec<String> = first_rep
                    .split(sep.component)
                    .map(str::to_string)
                    .collect();
                let c = component as usize - 1;
                if comps.len() <= c {
                    comps.resize(c + 1, String::new());
                }

                match path.subcomponent {
                    None => comps[c] = value.to_string(),
                    Some(sub) => {
                        let mut subs: Vec<String> = comps[c]
                            .split(sep.subcomponent)
                            .map(str::to_string)
                            .collect();
                        let s = sub as usize - 1;
                        if subs.len() <= s {
                            subs.resize(s + 1, String::new());
                        }
                        subs[s] = value.to_string();
                        comps[c] = subs.join(&sep.subcomponent.to_string());
                    }
                }

                let rebuilt = comps.join(&sep.component.to_string());
                fields[token_idx] = rebuilt + &rest;
            }
        }
        Ok(())
    }

    /// Generate an application-accept ACK for this message.
    ///
    /// MSA-1 is `AA` and MSA-2 echoes the source MSH-10 control ID;
    /// sender and receiver identities are swapped. Fails when the source
    /// carries no control ID, in which case callers fall back to
    /// [`crate::fallback_ack`].
    pub fn generate_ack(&self) -> Result<Message> {
        let get = |field: u32| {
            self.get(&FieldPath::field("MSH", field))
                .unwrap_or_default()
        };

        let control_id = get(10);
        if control_id.is_empty() {
            return Err(Hl7Error::MissingControlId);
        }

        let trigger = get(9)
            .split(self.separators.component)
            .nth(1)
            .map(str::to_string)
            .unwrap_or_default();
        let ack_type = if trigger.is_empty() {
            "ACK".to_string()
        } else {
            format!("ACK{}{}", self.separators.component, trigger)
        };
        let version = match get(12) {
            v if v.is_empty() => "2.5".to_string(),
            v => v,
        };

        let now = chrono::Local::now();
        let msh = Segment::from_tokens(vec![
            "MSH".to_string(),
            self.separators.encoding_chars(),
            get(5),
            get(6),
            get(3),
            get(4),
            now.format("%Y%m%d%H%M%S").to_string(),
            String::new(),
            ack_type,
            format!("ACK-{}", now.format("%Y%m%d%H%M%S%3f")),
            "P".to_string(),
            version,
        ]);
        let msa = Segment::from_tokens(vec![
            "MSA".to_string(),
            "AA".to_string(),
            control_id,
            String::new(),
        ]);

        Ok(Message {
            segments: vec![msh, msa],
            separators: self.separators,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADT: &str = "MSH|^~\\&|SND|FAC|RCV|DST|20250101010101||ADT^A01|MSG001|P|2.5\rPID|1||123^^^H~456^^^H||DOE^JOHN\r";

    fn path(s: &str) -> FieldPath {
        s.parse().unwrap()
    }

    #[test]
    fn parse_encode_round_trip() {
        let msg = Message::parse(ADT).unwrap();
        assert_eq!(msg.encode(), ADT);
    }

    #[test]
    fn normalizes_line_endings() {
        let msg = Message::parse("MSH|^~\\&|A|B\nPID|1\r\nNTE|1\n").unwrap();
        assert_eq!(msg.encode(), "MSH|^~\\&|A|B\rPID|1\rNTE|1\r");
    }

    #[test]
    fn rejects_empty_and_headerless_input() {
        assert!(matches!(Message::parse(""), Err(Hl7Error::Empty)));
        assert!(matches!(
            Message::parse("PID|1|x\r"),
            Err(Hl7Error::MissingMsh)
        ));
    }

    #[test]
    fn rejects_lines_without_a_segment_id() {
        let text = "MSH|^~\\&|A|B\rnot an hl7 segment\r";
        assert!(matches!(
            Message::parse(text),
            Err(Hl7Error::InvalidSegment { .. })
        ));
    }

    #[test]
    fn derives_custom_separators() {
        let msg = Message::parse("MSH#*+\\&#A#B\rPID#1#x*y\r").unwrap();
        let sep = msg.separators();
        assert_eq!(sep.field, '#');
        assert_eq!(sep.component, '*');
        assert_eq!(sep.repetition, '+');
        assert_eq!(msg.get(&path("PID-2")).as_deref(), Some("x*y"));
        assert_eq!(msg.get(&path("PID-2-2")).as_deref(), Some("y"));
    }

    #[test]
    fn msh_field_numbering_skips_separator() {
        let msg = Message::parse(ADT).unwrap();
        assert_eq!(msg.get(&path("MSH-1")).as_deref(), Some("|"));
        assert_eq!(msg.get(&path("MSH-2")).as_deref(), Some("^~\\&"));
        assert_eq!(msg.get(&path("MSH-9")).as_deref(), Some("ADT^A01"));
        assert_eq!(msg.get(&path("MSH-10")).as_deref(), Some("MSG001"));
    }

    #[test]
    fn component_access_uses_first_repetition() {
        let msg = Message::parse(ADT).unwrap();
        assert_eq!(msg.get(&path("PID-3")).as_deref(), Some("123^^^H~456^^^H"));
        assert_eq!(msg.get(&path("PID-3-1")).as_deref(), Some("123"));
        assert_eq!(msg.get(&path("PID-3-4")).as_deref(), Some("H"));
        assert_eq!(msg.get(&path("PID-5-2")).as_deref(), Some("JOHN"));
    }

    #[test]
    fn get_missing_returns_none() {
        let msg = Message::parse(ADT).unwrap();
        assert!(msg.get(&path("ZZZ-1")).is_none());
        assert!(msg.get(&path("PID-99")).is_none());
        assert!(msg.get(&path("PID(1)-1")).is_none());
    }

    #[test]
    fn set_widens_fields() {
        let mut msg = Message::parse(ADT).unwrap();
        msg.set(&path("PID-13"), "555-1~555-2").unwrap();
        assert_eq!(msg.get(&path("PID-13")).as_deref(), Some("555-1~555-2"));
    }

    #[test]
    fn set_component_preserves_other_repetitions() {
        let mut msg = Message::parse(ADT).unwrap();
        msg.set(&path("PID-3-1"), "999").unwrap();
        assert_eq!(msg.get(&path("PID-3")).as_deref(), Some("999^^^H~456^^^H"));
    }

    #[test]
    fn set_subcomponent() {
        let mut msg = Message::parse(ADT).unwrap();
        msg.set(&path("PID-5-1-2"), "SUB").unwrap();
        assert_eq!(msg.get(&path("PID-5-1")).as_deref(), Some("DOE&SUB"));
    }

    #[test]
    fn set_missing_segment_errors() {
        let mut msg = Message::parse(ADT).unwrap();
        assert!(matches!(
            msg.set(&path("ZZZ-1"), "x"),
            Err(Hl7Error::SegmentNotFound { .. })
        ));
    }

    #[test]
    fn append_then_set() {
        let mut msg = Message::parse(ADT).unwrap();
        msg.append_segment("ZXT");
        msg.set(&path("ZXT-2"), "OK").unwrap();
        assert!(msg.encode().ends_with("ZXT||OK\r"));
    }

    #[test]
    fn generate_ack_echoes_control_id_and_swaps_endpoints() {
        let msg = Message::parse(ADT).unwrap();
        let ack = msg.generate_ack().unwrap();
        assert_eq!(ack.get(&path("MSA-1")).as_deref(), Some("AA"));
        assert_eq!(ack.get(&path("MSA-2")).as_deref(), Some("MSG001"));
        assert_eq!(ack.get(&path("MSH-3")).as_deref(), Some("RCV"));
        assert_eq!(ack.get(&path("MSH-5")).as_deref(), Some("SND"));
        assert_eq!(ack.get(&path("MSH-9")).as_deref(), Some("ACK^A01"));
        assert_eq!(ack.get(&path("MSH-12")).as_deref(), Some("2.5"));
        assert!(ack.encode().contains("\rMSA|AA|MSG001|"));
    }

    #[test]
    fn generate_ack_without_control_id_fails() {
        let msg = Message::parse("MSH|^~\\&|A|B|C|D|20250101||ADT^A01||P|2.5\r").unwrap();
        assert!(matches!(
            msg.generate_ack(),
            Err(Hl7Error::MissingControlId)
        ));
    }
}
