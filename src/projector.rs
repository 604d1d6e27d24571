//! Projection of entities into flat, indexable documents.
//!
//! [`searchable_fields`] runs once per entity type when its index is created
//! and decides which fields are searchable. [`project`] runs on every write
//! and reads those fields off an instance.

use std::collections::{BTreeMap, HashSet};

use crate::{
    error::{Error, Result},
    schema::{Entity, EntitySchema, FieldKind, FieldValue},
};

/// Reserved field holding the entity type name. Indexed verbatim so type
/// scoping is an exact match.
pub const TYPE_FIELD: &str = "type";

/// Reserved field holding the document key.
pub const KEY_FIELD: &str = "_key";

/// Field name to string value. Always contains [`TYPE_FIELD`].
pub type Document = BTreeMap<String, String>;

/// Compute the searchable field set of an entity type.
///
/// With declared attributes, every attribute must be declared as a string
/// and must resolve (by name, then by alias) to a string field. Otherwise
/// every string field is searchable under its alias or structural name.
pub fn searchable_fields(schema: &EntitySchema) -> Result<Vec<String>> {
    let fields = match &schema.searchable_attributes {
        Some(declared) => {
            let mut fields = Vec::with_capacity(declared.len());
            for attribute in declared {
                if !attribute.kind.is_string() {
                    return Err(Error::UnsupportedSearchFieldType {
                        entity: schema.name.clone(),
                        field: attribute.name.clone(),
                        kind: attribute.kind,
                    });
                }

                let def = schema.resolve_field(&attribute.name).ok_or_else(
                    || Error::FieldResolution {
                        entity: schema.name.clone(),
                        field: attribute.name.clone(),
                    },
                )?;
                if !def.kind.is_string() {
                    return Err(Error::UnsupportedFieldType {
                        entity: schema.name.clone(),
                        field: attribute.name.clone(),
                        kind: def.kind,
                    });
                }

                fields.push(attribute.name.clone());
            }
            fields
        }
        None => schema
            .fields
            .iter()
            .filter(|f| f.kind.is_string())
            .map(|f| f.indexed_name().to_string())
            .collect(),
    };

    let mut seen = HashSet::with_capacity(fields.len());
    for field in &fields {
        check_field_name(&schema.name, field, &mut seen)?;
    }

    Ok(fields)
}

/// Reject declared attributes whose kind can never be indexed.
///
/// Unlike [`searchable_fields`] this does not require the attributes to
/// resolve, so it is safe to run for every type at startup.
pub fn validate_declared_kinds(schema: &EntitySchema) -> Result<()> {
    let Some(declared) = &schema.searchable_attributes else {
        return Ok(());
    };

    match declared.iter().find(|a| !a.kind.is_string()) {
        Some(attribute) => Err(Error::UnsupportedSearchFieldType {
            entity: schema.name.clone(),
            field: attribute.name.clone(),
            kind: attribute.kind,
        }),
        None => Ok(()),
    }
}

fn check_field_name(
    entity: &str,
    field: &str,
    seen: &mut HashSet<String>,
) -> Result<()> {
    let reason = if field.is_empty() {
        Some("name is empty")
    } else if field.starts_with('-') {
        Some("name starts with '-'")
    } else if field == TYPE_FIELD || field == KEY_FIELD {
        Some("name is reserved")
    } else if !seen.insert(field.to_string()) {
        Some("name is used by more than one field")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(Error::InvalidFieldName {
            entity: entity.to_string(),
            field: field.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

/// Project an entity onto its searchable fields.
///
/// Empty and missing values are left out of the document.
pub fn project(
    entity: &dyn Entity,
    schema: &EntitySchema,
    fields: &[String],
) -> Result<Document> {
    let mut document = Document::new();
    document.insert(TYPE_FIELD.to_string(), schema.name.clone());

    for name in fields {
        let def =
            schema
                .resolve_field(name)
                .ok_or_else(|| Error::FieldResolution {
                    entity: schema.name.clone(),
                    field: name.clone(),
                })?;

        match entity.field(&def.name).unwrap_or(FieldValue::Null) {
            FieldValue::Str(value) if !value.is_empty() => {
                document.insert(name.clone(), value.to_string());
            }
            FieldValue::Str(_) | FieldValue::Null => {}
            other => {
                return Err(Error::UnsupportedFieldType {
                    entity: schema.name.clone(),
                    field: name.clone(),
                    kind: other.kind().unwrap_or(FieldKind::Other),
                });
            }
        }
    }

    Ok(document)
}
