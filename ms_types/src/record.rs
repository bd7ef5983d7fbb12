//! Line codec for queue and ledger files.
//!
//! One record per line, fields separated by tabs. Two formats are understood:
//!
//! * `legacy`: bare fields, no escaping. A field containing a tab or newline
//!   corrupts the line.
//! * `v1`: the line starts with the tag [`V1_TAG`]; backslash, tab, CR and LF
//!   inside a field are escaped as `\\`, `\t`, `\r` and `\n`.
//!
//! Decoding accepts either format, so files written by older deployments keep
//! draining after an upgrade.

use crate::identity::{SampleIdentity, SchemaProfile};
use serde::{Deserialize, Serialize};

pub const V1_TAG: &str = "~1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordFormat {
    Legacy,
    #[default]
    V1,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error("expected {expected} fields but found {found} in line {line:?}")]
    FieldCount {
        expected: usize,
        found: usize,
        line: String,
    },

    #[error("invalid escape sequence '\\{escape}' in line {line:?}")]
    BadEscape { escape: String, line: String },

    #[error("empty project or sample field in line {line:?}")]
    EmptyKey { line: String },
}

impl RecordFormat {
    /// Encode one identity as a newline-terminated line.
    pub fn encode(self, id: &SampleIdentity, profile: SchemaProfile) -> String {
        let fields = id.fields(profile);
        let mut line = match self {
            RecordFormat::Legacy => fields.join("\t"),
            RecordFormat::V1 => {
                let mut parts = vec![V1_TAG.to_string()];
                parts.extend(fields.into_iter().map(escape_field));
                parts.join("\t")
            }
        };
        line.push('\n');
        line
    }
}

/// Decode one line (without its terminator) written in either format.
pub fn decode(line: &str, profile: SchemaProfile) -> Result<SampleIdentity, RecordError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let fields: Vec<String> = match line.strip_prefix(V1_TAG).and_then(|r| r.strip_prefix('\t')) {
        Some(rest) => rest
            .split('\t')
            .map(|f| unescape_field(f, line))
            .collect::<Result<_, _>>()?,
        None => line.split('\t').map(|f| f.trim().to_string()).collect(),
    };

    let expected = profile.arity();
    let accepted = fields.len() == expected || fields.len() == SchemaProfile::Minimal.arity();
    if !accepted {
        return Err(RecordError::FieldCount {
            expected,
            found: fields.len(),
            line: line.to_string(),
        });
    }
    SampleIdentity::from_fields(&fields, profile).ok_or_else(|| RecordError::EmptyKey {
        line: line.to_string(),
    })
}

fn escape_field(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    for c in field.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out
}

fn unescape_field(field: &str, line: &str) -> Result<String, RecordError> {
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            other => {
                return Err(RecordError::BadEscape {
                    escape: other.map(String::from).unwrap_or_default(),
                    line: line.to_string(),
                })
            }
        }
    }
    Ok(out)
}
