//! Dotted field paths.
//!
//! A [`FieldPath`] is a *template*: it never carries array positions. The
//! concrete location `items.3.ref` and the template `items.ref` are different
//! things, and only the template form is accepted here. Numeric segments are
//! rejected so a literal dot can never be confused with an array-index dot.

use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldPath {
    segments: Vec<String>,
}

impl FieldPath {
    /// Parse a dotted path such as `items.friend`.
    pub fn parse(raw: &str) -> Result<Self, SchemaError> {
        let malformed = |reason| SchemaError::MalformedPath {
            path: raw.to_string(),
            reason,
        };

        if raw.is_empty() {
            return Err(malformed("path is empty"));
        }

        let mut segments = Vec::new();
        for segment in raw.split('.') {
            validate_segment(segment).map_err(malformed)?;
            segments.push(segment.to_string());
        }

        Ok(Self { segments })
    }

    /// Single-segment path.
    pub fn field(name: &str) -> Result<Self, SchemaError> {
        validate_segment(name).map_err(|reason| SchemaError::MalformedPath {
            path: name.to_string(),
            reason,
        })?;
        Ok(Self {
            segments: vec![name.to_string()],
        })
    }

    /// Append `child` (itself possibly dotted) to this path.
    pub fn join(&self, child: &str) -> Result<Self, SchemaError> {
        let child = Self::parse(child)?;
        let mut segments = self.segments.clone();
        segments.extend(child.segments);
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Last segment (the field name itself).
    pub fn leaf(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or_default()
    }

    /// Render with a trailing sub-field, e.g. `friend` + `ref` → `friend.ref`.
    pub fn dotted_with(&self, sub: &str) -> String {
        format!("{self}.{sub}")
    }
}

fn validate_segment(segment: &str) -> Result<(), &'static str> {
    if segment.is_empty() {
        return Err("empty segment");
    }
    if segment.contains('.') {
        return Err("dot inside a single field name");
    }
    if segment.contains('$') {
        return Err("positional placeholders are not allowed");
    }
    if segment.chars().any(char::is_whitespace) {
        return Err("whitespace in segment");
    }
    if segment.chars().all(|c| c.is_ascii_digit()) {
        return Err("numeric segment would be read as an array index");
    }
    Ok(())
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

impl TryFrom<String> for FieldPath {
    type Error = SchemaError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<FieldPath> for String {
    fn from(value: FieldPath) -> Self {
        value.to_string()
    }
}
