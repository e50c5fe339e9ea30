//! Structural walk over reference occurrences.
//!
//! A descriptor path such as `items.owner` names a *template*; the concrete
//! occurrences in a document depend on how many arrays are crossed on the
//! way. [`locate`] expands the template into positional [`Location`]s
//! (`items.0.owner`, `items.1.owner`, ...) that can be read and written
//! back without re-walking.

use refsync_schema::FieldPath;
use refsync_store::DocumentId;
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Step {
    Key(String),
    Index(usize),
}

/// Concrete position of one occurrence inside a document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Location(Vec<Step>);

impl Location {
    pub fn steps(&self) -> &[Step] {
        &self.0
    }

    fn push(&self, step: Step) -> Self {
        let mut steps = self.0.clone();
        steps.push(step);
        Self(steps)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, step) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            match step {
                Step::Key(key) => f.write_str(key)?,
                Step::Index(idx) => write!(f, "{idx}")?,
            }
        }
        Ok(())
    }
}

/// Every non-null occurrence of `template` in `doc`.
///
/// Arrays fan out wherever they appear, including at the end of the path,
/// so a reference array yields one location per element.
pub fn locate(doc: &Value, template: &FieldPath) -> Vec<Location> {
    let mut out = Vec::new();
    descend(doc, template.segments(), Location::default(), &mut out);
    out
}

fn descend(node: &Value, segments: &[String], at: Location, out: &mut Vec<Location>) {
    match node {
        Value::Null => {}
        Value::Array(items) => {
            for (idx, item) in items.iter().enumerate() {
                descend(item, segments, at.push(Step::Index(idx)), out);
            }
        }
        Value::Object(map) if !segments.is_empty() => {
            if let Some(child) = map.get(&segments[0]) {
                descend(child, &segments[1..], at.push(Step::Key(segments[0].clone())), out);
            }
        }
        _ if segments.is_empty() => out.push(at),
        // A scalar where the path expects an object: nothing here.
        _ => {}
    }
}

pub fn get<'a>(doc: &'a Value, location: &Location) -> Option<&'a Value> {
    location.0.iter().try_fold(doc, |node, step| match step {
        Step::Key(key) => node.get(key.as_str()),
        Step::Index(idx) => node.get(*idx),
    })
}

pub fn get_mut<'a>(doc: &'a mut Value, location: &Location) -> Option<&'a mut Value> {
    location.0.iter().try_fold(doc, |node, step| match step {
        Step::Key(key) => node.get_mut(key.as_str()),
        Step::Index(idx) => node.get_mut(*idx),
    })
}

/// How an occurrence holds its identifier.
#[derive(Debug, Clone, PartialEq)]
pub enum Occurrence<'a> {
    /// `{ <reference_key>: id, ... }`
    Object { raw: &'a Value, id: Option<DocumentId> },
    /// The identifier itself, in either stored form.
    Bare { raw: &'a Value, id: DocumentId },
    /// Anything else, including a reference object without identifier.
    Empty,
}

impl Occurrence<'_> {
    pub fn id(&self) -> Option<DocumentId> {
        match self {
            Self::Object { id, .. } => *id,
            Self::Bare { id, .. } => Some(*id),
            Self::Empty => None,
        }
    }

    /// Identifier as stored, before normalization.
    pub fn raw(&self) -> Option<&Value> {
        match self {
            Self::Object { raw, .. } | Self::Bare { raw, .. } => Some(*raw),
            Self::Empty => None,
        }
    }
}

/// Classify `value`. The native id form is itself an object, so bare ids are
/// recognized first.
pub fn occurrence<'a>(value: &'a Value, reference_key: &str) -> Occurrence<'a> {
    if let Some(id) = DocumentId::from_value(value) {
        return Occurrence::Bare { raw: value, id };
    }
    match value.as_object().and_then(|map| map.get(reference_key)) {
        Some(raw) if !raw.is_null() => Occurrence::Object {
            raw,
            id: DocumentId::from_value(raw),
        },
        _ => Occurrence::Empty,
    }
}
