//! Terser-style field path expressions.

use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;

use crate::Hl7Error;

/// Parsed path of the form `SEG`, `SEG-3`, `SEG(1)-3-1-2`.
///
/// The segment occurrence index is zero-based; field, component and
/// subcomponent numbers are the 1-based HL7 positions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    /// Three-character segment ID, uppercased.
    pub segment: String,
    /// Zero-based segment occurrence; `None` addresses occurrence 0.
    pub occurrence: Option<usize>,
    /// 1-based HL7 field number.
    pub field: Option<u32>,
    /// 1-based component number within the field.
    pub component: Option<u32>,
    /// 1-based subcomponent number within the component.
    pub subcomponent: Option<u32>,
}

fn path_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([A-Za-z][A-Za-z0-9]{2})(?:\((\d+)\))?(?:-(\d+))?(?:-(\d+))?(?:-(\d+))?$")
            .expect("path grammar regex")
    })
}

impl FieldPath {
    /// Path addressing every detail down to a field: `SEG-n`.
    pub fn field(segment: &str, field: u32) -> Self {
        Self {
            segment: segment.to_ascii_uppercase(),
            occurrence: None,
            field: Some(field),
            component: None,
            subcomponent: None,
        }
    }

    /// Same path pinned to one segment occurrence.
    pub fn with_occurrence(mut self, occurrence: usize) -> Self {
        self.occurrence = Some(occurrence);
        self
    }
}

impl FromStr for FieldPath {
    type Err = Hl7Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = path_regex()
            .captures(s.trim())
            .ok_or_else(|| Hl7Error::InvalidPath {
                path: s.to_string(),
            })?;

        let num = |i: usize| caps.get(i).map(|m| m.as_str().parse::<u32>().unwrap());
        Ok(FieldPath {
            segment: caps[1].to_ascii_uppercase(),
            occurrence: caps.get(2).map(|m| m.as_str().parse::<usize>().unwrap()),
            field: num(3),
            component: num(4),
            subcomponent: num(5),
        })
    }
}

impl std::fmt::Display for FieldPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.segment)?;
        if let Some(occ) = self.occurrence {
            write!(f, "({occ})")?;
        }
        for part in [self.field, self.component, self.subcomponent]
            .into_iter()
            .flatten()
        {
            write!(f, "-{part}")?;
        }
        Ok(())
    }
}
