//! Schema walk producing the descriptor table.

use crate::descriptor::{DescriptorTable, ReferenceDescriptor};
use crate::path::FieldPath;
use crate::schema::{FieldKind, Schema};
use crate::SchemaError;

/// Flatten every reference declaration reachable from `schema`.
///
/// Embedded sub-schemas (single or array) are descended with their field
/// name as prefix. Each polymorphic variant is walked at the prefix of the
/// schema that owns it; declarations landing on the same path are merged,
/// and on a target or shape conflict the first one is kept.
pub fn resolve(schema: &Schema) -> Result<DescriptorTable, SchemaError> {
    schema.validate()?;
    let mut table = DescriptorTable::default();
    walk(schema, None, false, &mut table)?;
    Ok(table)
}

fn walk(
    schema: &Schema,
    prefix: Option<&FieldPath>,
    within_array: bool,
    table: &mut DescriptorTable,
) -> Result<(), SchemaError> {
    for field in &schema.fields {
        let path = match prefix {
            Some(prefix) => prefix.join(&field.name)?,
            None => FieldPath::parse(&field.name)?,
        };

        match &field.kind {
            FieldKind::Embedded { schema } => {
                walk(schema, Some(&path), within_array, table)?;
            }
            FieldKind::EmbeddedArray { schema } => {
                walk(schema, Some(&path), true, table)?;
            }
            FieldKind::Reference(def) => {
                table.insert(ReferenceDescriptor::new(path, def, false).within_array(within_array));
            }
            FieldKind::ReferenceArray(def) => {
                table.insert(ReferenceDescriptor::new(path, def, true).within_array(within_array));
            }
            _ => {}
        }
    }

    for variant in schema.variants.values() {
        walk(variant, prefix, within_array, table)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ReferenceBuilder;
    use proptest::prelude::*;

    fn reference(target: &str, fields: &[&str]) -> FieldKind {
        FieldKind::Reference(ReferenceBuilder::to(target).on(fields).build().unwrap())
    }

    fn paths(table: &DescriptorTable) -> Vec<String> {
        table.iter().map(|d| d.field_path().to_string()).collect()
    }

    #[test]
    fn test_flat_schema() {
        let schema = Schema::new()
            .field("name", FieldKind::String)
            .field("friend", reference("targets", &["name", "age"]));

        let table = resolve(&schema).unwrap();
        assert_eq!(paths(&table), vec!["friend"]);
        let friend = table.iter().next().unwrap();
        assert_eq!(friend.target_collection(), "targets");
        assert!(!friend.is_array());
    }

    #[test]
    fn test_embedded_schemas_are_prefixed() {
        let owner = Schema::new().field("owner", reference("people", &["name"]));
        let schema = Schema::new()
            .field("meta", FieldKind::Embedded {
                schema: Schema::new().field("author", reference("people", &["name"])),
            })
            .field("items", FieldKind::EmbeddedArray { schema: owner })
            .field(
                "tags",
                FieldKind::ReferenceArray(ReferenceBuilder::to("tags").on(["label"]).build().unwrap()),
            );

        let table = resolve(&schema).unwrap();
        assert_eq!(paths(&table), vec!["meta.author", "items.owner", "tags"]);
        assert!(table.get(&FieldPath::parse("tags").unwrap()).unwrap().is_array());

        let crossing: Vec<bool> = table.iter().map(|d| d.crosses_array()).collect();
        assert_eq!(crossing, vec![false, true, true]);
    }

    #[test]
    fn test_variants_are_walked_and_merged() {
        let schema = Schema::new()
            .field("friend", reference("people", &["name"]))
            .variant("a", Schema::new().field("friend", reference("people", &["name", "age"])))
            .variant("b", Schema::new().field("team", reference("teams", &["title"])));

        let table = resolve(&schema).unwrap();
        assert_eq!(paths(&table), vec!["friend", "team"]);
        let friend = table.get(&FieldPath::parse("friend").unwrap()).unwrap();
        assert_eq!(friend.projected_fields(), &["name", "age"]);
    }

    #[test]
    fn test_variants_with_different_targets_keep_first() {
        let schema = Schema::new()
            .variant("a", Schema::new().field("owner", reference("people", &["name"])))
            .variant("b", Schema::new().field("owner", reference("teams", &["title"])));

        let table = resolve(&schema).unwrap();
        assert_eq!(paths(&table), vec!["owner"]);
        let owner = table.get(&FieldPath::parse("owner").unwrap()).unwrap();
        assert_eq!(owner.target_collection(), "people");
        assert_eq!(owner.projected_fields(), &["name"]);
    }

    #[test]
    fn test_nested_variant_uses_parent_prefix() {
        let inner = Schema::new().variant("x", Schema::new().field("owner", reference("people", &[])));
        let schema = Schema::new().field("meta", FieldKind::Embedded { schema: inner });
        assert_eq!(paths(&resolve(&schema).unwrap()), vec!["meta.owner"]);
    }

    #[test]
    fn test_malformed_field_name_fails_fast() {
        let schema = Schema::new().field("items.$", reference("people", &[]));
        assert!(matches!(resolve(&schema), Err(SchemaError::MalformedPath { .. })));
    }

    proptest! {
        #[test]
        fn prop_merge_is_union_without_duplicates(
            a in prop::collection::vec("[a-e]", 0..6),
            b in prop::collection::vec("[a-e]", 0..6),
        ) {
            let schema = Schema::new()
                .field("friend", FieldKind::Reference(ReferenceBuilder::to("people").on(&a).build().unwrap()))
                .variant("v", Schema::new().field(
                    "friend",
                    FieldKind::Reference(ReferenceBuilder::to("people").on(&b).build().unwrap()),
                ));

            let table = resolve(&schema).unwrap();
            let projected = table.iter().next().unwrap().projected_fields().to_vec();

            let mut expected: Vec<String> = Vec::new();
            for field in a.iter().chain(b.iter()) {
                if !expected.contains(field) {
                    expected.push(field.clone());
                }
            }
            prop_assert_eq!(projected, expected);
        }
    }
}
