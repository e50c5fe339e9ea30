//! Flattened reference descriptors.

use crate::path::FieldPath;
use crate::reference::{FieldOptions, ReferenceDef};
use serde::Serialize;
use std::collections::BTreeMap;

/// One reference field of a local schema, located by its full path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferenceDescriptor {
    target_collection: String,
    field_path: FieldPath,
    projected_fields: Vec<String>,
    is_array: bool,
    /// Some ancestor on the path is an embedded array.
    within_array: bool,
    required: bool,
    per_field_options: BTreeMap<String, FieldOptions>,
}

impl ReferenceDescriptor {
    pub fn new(field_path: FieldPath, def: &ReferenceDef, is_array: bool) -> Self {
        Self {
            target_collection: def.target().to_string(),
            field_path,
            projected_fields: def.projected().to_vec(),
            is_array,
            within_array: false,
            required: def.is_required(),
            per_field_options: def.all_options().clone(),
        }
    }

    pub fn target_collection(&self) -> &str {
        &self.target_collection
    }

    pub fn field_path(&self) -> &FieldPath {
        &self.field_path
    }

    /// Projected fields, in first-declared order.
    pub fn projected_fields(&self) -> &[String] {
        &self.projected_fields
    }

    pub fn is_array(&self) -> bool {
        self.is_array
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    /// Mark the descriptor as living under an embedded array.
    #[must_use]
    pub fn within_array(mut self, within_array: bool) -> Self {
        self.within_array = within_array;
        self
    }

    /// Whether the path crosses an array, either an embedded array on the
    /// way or the reference array itself. Such a reference can legitimately
    /// have no occurrence at all.
    pub fn crosses_array(&self) -> bool {
        self.is_array || self.within_array
    }

    pub fn options(&self, field: &str) -> Option<&FieldOptions> {
        self.per_field_options.get(field)
    }

    /// Projected fields flagged as index-worthy on the local copy.
    pub fn searchable_fields(&self) -> impl Iterator<Item = &str> {
        self.projected_fields
            .iter()
            .filter(|f| self.options(f).is_some_and(|o| o.searchable))
            .map(String::as_str)
    }

    /// Copy of this descriptor with a different projection and options.
    ///
    /// Used by the catalog when it reconciles projections against the target
    /// schema before freezing its tables.
    #[must_use]
    pub fn with_projection(
        &self,
        projected_fields: Vec<String>,
        per_field_options: BTreeMap<String, FieldOptions>,
    ) -> Self {
        Self {
            projected_fields,
            per_field_options,
            ..self.clone()
        }
    }

    /// Merge a second declaration found at the same path.
    ///
    /// Declarations pointing at another target, or with another shape, lose
    /// to the first one and are dropped.
    fn absorb(&mut self, other: ReferenceDescriptor) {
        if self.target_collection != other.target_collection || self.is_array != other.is_array {
            tracing::warn!(
                path = %self.field_path,
                kept = %self.target_collection,
                dropped = %other.target_collection,
                "conflicting reference declaration ignored"
            );
            return;
        }

        for field in other.projected_fields {
            if !self.projected_fields.contains(&field) {
                self.projected_fields.push(field);
            }
        }
        for (field, options) in other.per_field_options {
            self.per_field_options.entry(field).or_insert(options);
        }
        self.required |= other.required;
        self.within_array |= other.within_array;
    }
}

/// Deduplicated descriptors of one schema, keyed by field path.
///
/// Built once by [`resolve`](crate::resolve) and never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DescriptorTable {
    descriptors: Vec<ReferenceDescriptor>,
    #[serde(skip)]
    by_path: BTreeMap<FieldPath, usize>,
}

impl DescriptorTable {
    /// Insert or merge a descriptor.
    pub(crate) fn insert(&mut self, descriptor: ReferenceDescriptor) {
        match self.by_path.get(descriptor.field_path()) {
            Some(&idx) => self.descriptors[idx].absorb(descriptor),
            None => {
                self.by_path
                    .insert(descriptor.field_path().clone(), self.descriptors.len());
                self.descriptors.push(descriptor);
            }
        }
    }

    /// Rebuild a table from already-resolved descriptors.
    pub fn from_descriptors(descriptors: impl IntoIterator<Item = ReferenceDescriptor>) -> Self {
        let mut table = Self::default();
        for descriptor in descriptors {
            table.insert(descriptor);
        }
        table
    }

    pub fn get(&self, path: &FieldPath) -> Option<&ReferenceDescriptor> {
        self.by_path.get(path).map(|&idx| &self.descriptors[idx])
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReferenceDescriptor> {
        self.descriptors.iter()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Descriptors pointing at `collection`.
    pub fn targeting<'a>(
        &'a self,
        collection: &'a str,
    ) -> impl Iterator<Item = &'a ReferenceDescriptor> + 'a {
        self.descriptors
            .iter()
            .filter(move |d| d.target_collection == collection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ReferenceBuilder;

    fn descriptor(path: &str, target: &str, fields: &[&str], is_array: bool) -> ReferenceDescriptor {
        let def = ReferenceBuilder::to(target).on(fields).build().unwrap();
        ReferenceDescriptor::new(FieldPath::parse(path).unwrap(), &def, is_array)
    }

    #[test]
    fn test_same_path_merges_projection() {
        let table = DescriptorTable::from_descriptors([
            descriptor("friend", "people", &["name"], false),
            descriptor("friend", "people", &["name", "age"], false),
        ]);

        assert_eq!(table.len(), 1);
        let friend = table.get(&FieldPath::parse("friend").unwrap()).unwrap();
        assert_eq!(friend.projected_fields(), &["name", "age"]);
    }

    #[test]
    fn test_first_declaration_wins_on_target_conflict() {
        let table = DescriptorTable::from_descriptors([
            descriptor("friend", "people", &["name"], false),
            descriptor("friend", "teams", &["title"], false),
        ]);

        assert_eq!(table.len(), 1);
        let friend = table.get(&FieldPath::parse("friend").unwrap()).unwrap();
        assert_eq!(friend.target_collection(), "people");
        assert_eq!(friend.projected_fields(), &["name"]);
    }

    #[test]
    fn test_first_declaration_wins_on_shape_conflict() {
        let table = DescriptorTable::from_descriptors([
            descriptor("friends", "people", &["name"], true),
            descriptor("friends", "people", &["age"], false),
        ]);
        let friends = table.get(&FieldPath::parse("friends").unwrap()).unwrap();
        assert!(friends.is_array());
        assert_eq!(friends.projected_fields(), &["name"]);
    }

    #[test]
    fn test_crosses_array() {
        assert!(!descriptor("friend", "people", &[], false).crosses_array());
        assert!(descriptor("friends", "people", &[], true).crosses_array());
        assert!(descriptor("items.owner", "people", &[], false)
            .within_array(true)
            .crosses_array());
    }

    #[test]
    fn test_searchable_fields_follow_options() {
        let def = ReferenceBuilder::to("people")
            .on(["name", "age"])
            .set("age", crate::FieldOptions::searchable())
            .unwrap()
            .build()
            .unwrap();
        let d = ReferenceDescriptor::new(FieldPath::parse("friend").unwrap(), &def, false);
        assert_eq!(d.searchable_fields().collect::<Vec<_>>(), vec!["age"]);
    }
}
