//! Filters, projections and mutations understood by a [`QueryExecutor`](crate::QueryExecutor).

use crate::id::DocumentId;
use crate::paths;
use serde_json::{Map, Value};

// ============================================================================
// Filters
// ============================================================================

/// Document predicate over dotted paths.
///
/// Paths fan out over arrays, so `friends.ref` matches when *any* element's
/// `ref` matches. A value that is itself an array matches when it contains
/// the expected value.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    All,
    Eq { path: String, value: Value },
    In { path: String, values: Vec<Value> },
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    pub fn eq(path: impl Into<String>, value: Value) -> Self {
        Self::Eq {
            path: path.into(),
            value,
        }
    }

    /// Match `id` at `path` whether it was stored natively or stringified.
    pub fn id_in_any_form(path: impl Into<String>, id: &DocumentId) -> Self {
        let path = path.into();
        Self::Or(vec![
            Self::eq(path.clone(), id.to_native()),
            Self::eq(path, id.to_string_form()),
        ])
    }

    /// Match any of `ids` at `path`, in either stored form.
    pub fn ids_in_any_form<'a>(
        path: impl Into<String>,
        ids: impl IntoIterator<Item = &'a DocumentId>,
    ) -> Self {
        let values = ids
            .into_iter()
            .flat_map(|id| [id.to_native(), id.to_string_form()])
            .collect();
        Self::In {
            path: path.into(),
            values,
        }
    }

    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            Self::All => true,
            Self::Eq { path, value } => {
                any_value_matches(doc, path, |candidate| candidate == value)
            }
            Self::In { path, values } => {
                any_value_matches(doc, path, |candidate| values.contains(candidate))
            }
            Self::And(filters) => filters.iter().all(|f| f.matches(doc)),
            Self::Or(filters) => filters.iter().any(|f| f.matches(doc)),
        }
    }
}

fn any_value_matches(doc: &Value, path: &str, pred: impl Fn(&Value) -> bool) -> bool {
    paths::values_at(doc, &paths::split(path))
        .into_iter()
        .any(|found| match found {
            Value::Array(items) => pred(found) || items.iter().any(&pred),
            other => pred(other),
        })
}

// ============================================================================
// Projections
// ============================================================================

/// Fields to return. An empty projection returns whole documents; the id
/// field is always returned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Projection {
    fields: Vec<String>,
}

impl Projection {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_all(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field_names(&self) -> &[String] {
        &self.fields
    }

    pub fn apply(&self, doc: &Value, id_field: &str) -> Value {
        let Value::Object(src) = doc else {
            return doc.clone();
        };
        if self.is_all() {
            return doc.clone();
        }

        let mut out = Map::new();
        if let Some(id) = src.get(id_field) {
            out.insert(id_field.to_string(), id.clone());
        }
        for field in &self.fields {
            paths::copy_path(src, &mut out, &paths::split(field));
        }
        Value::Object(out)
    }
}

// ============================================================================
// Mutations
// ============================================================================

/// Field assignments applied to one object in a single step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldUpdate {
    pub assign: Map<String, Value>,
    pub clear: Vec<String>,
}

impl FieldUpdate {
    pub fn is_empty(&self) -> bool {
        self.assign.is_empty() && self.clear.is_empty()
    }

    /// Apply to `target`; returns whether anything changed.
    pub fn apply(&self, target: &mut Map<String, Value>) -> bool {
        let mut changed = false;
        for (key, value) in &self.assign {
            if target.get(key) != Some(value) {
                target.insert(key.clone(), value.clone());
                changed = true;
            }
        }
        for key in &self.clear {
            changed |= target.remove(key).is_some();
        }
        changed
    }
}

/// Document mutation. Every form is guarded by `when`, evaluated against
/// the addressed object or array element rather than the whole document.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Update the object found at `path`.
    Set {
        path: String,
        when: Filter,
        update: FieldUpdate,
    },
    /// Remove the field at `path`.
    Unset { path: String, when: Filter },
    /// Remove matching elements from the array at `path`.
    Pull { path: String, when: Filter },
    /// Update matching elements of the array at `path`, leaving siblings alone.
    SetElements {
        path: String,
        when: Filter,
        update: FieldUpdate,
    },
}

impl Mutation {
    pub fn path(&self) -> &str {
        match self {
            Self::Set { path, .. }
            | Self::Unset { path, .. }
            | Self::Pull { path, .. }
            | Self::SetElements { path, .. } => path,
        }
    }

    /// Apply to one document; returns whether it changed.
    pub fn apply(&self, doc: &mut Value) -> bool {
        let segments = paths::split(self.path());
        let mut changed = false;

        match self {
            Self::Set { when, update, .. } => {
                paths::visit_parents_mut(doc, &segments, &mut |parent, key| {
                    if let Some(target) = parent.get_mut(key) {
                        if when.matches(target) {
                            if let Value::Object(obj) = target {
                                changed |= update.apply(obj);
                            }
                        }
                    }
                });
            }
            Self::Unset { when, .. } => {
                paths::visit_parents_mut(doc, &segments, &mut |parent, key| {
                    if parent.get(key).is_some_and(|v| when.matches(v)) {
                        parent.remove(key);
                        changed = true;
                    }
                });
            }
            Self::Pull { when, .. } => {
                paths::visit_parents_mut(doc, &segments, &mut |parent, key| {
                    if let Some(Value::Array(items)) = parent.get_mut(key) {
                        let before = items.len();
                        items.retain(|item| !when.matches(item));
                        changed |= items.len() != before;
                    }
                });
            }
            Self::SetElements { when, update, .. } => {
                paths::visit_parents_mut(doc, &segments, &mut |parent, key| {
                    if let Some(Value::Array(items)) = parent.get_mut(key) {
                        for item in items.iter_mut() {
                            if when.matches(item) {
                                if let Value::Object(obj) = item {
                                    changed |= update.apply(obj);
                                }
                            }
                        }
                    }
                });
            }
        }

        changed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Update every matching document rather than the first one.
    pub multi: bool,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self { multi: true }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub matched: usize,
    pub modified: usize,
}
