//! Entity model: the per-type schema description and the per-instance
//! accessor surface the projector reads from.
//!
//! A type is described once by an [`EntitySchema`]: its structural fields in
//! declaration order, an optional declared set of searchable attributes, and
//! the capabilities the registry consults (indexing opt-out, repository
//! token). Instances expose their values through [`Entity::field`], keyed by
//! structural field name.

use std::{any::Any, fmt};

use serde::{Deserialize, Serialize};

/// The value kind of a structural field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Bool,
    Int,
    Float,
    Other,
}

impl FieldKind {
    pub fn is_string(self) -> bool {
        self == FieldKind::String
    }

    /// Parse a kind name as written on the command line or in stored
    /// schemas.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "string" | "str" | "text" => Some(FieldKind::String),
            "bool" | "boolean" => Some(FieldKind::Bool),
            "int" | "integer" => Some(FieldKind::Int),
            "float" | "number" => Some(FieldKind::Float),
            "other" => Some(FieldKind::Other),
            _ => None,
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldKind::String => "string",
            FieldKind::Bool => "bool",
            FieldKind::Int => "int",
            FieldKind::Float => "float",
            FieldKind::Other => "other",
        };
        f.write_str(name)
    }
}

/// A field value read from an entity instance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue<'a> {
    Str(&'a str),
    Bool(bool),
    Int(i64),
    Float(f64),
    Null,
    Other,
}

impl FieldValue<'_> {
    /// Kind of the value. `Null` has no kind of its own.
    pub fn kind(&self) -> Option<FieldKind> {
        match self {
            FieldValue::Str(_) => Some(FieldKind::String),
            FieldValue::Bool(_) => Some(FieldKind::Bool),
            FieldValue::Int(_) => Some(FieldKind::Int),
            FieldValue::Float(_) => Some(FieldKind::Float),
            FieldValue::Null => None,
            FieldValue::Other => Some(FieldKind::Other),
        }
    }
}

/// Serialization alias of a structural field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Alias {
    #[default]
    None,
    Rename(String),
    /// The field is explicitly excluded from serialization. It keeps its
    /// structural name for indexing purposes.
    Suppressed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default)]
    pub alias: Alias,
}

impl FieldDef {
    /// The name under which the field is indexed when searchable fields are
    /// inferred.
    pub fn indexed_name(&self) -> &str {
        match &self.alias {
            Alias::Rename(alias) => alias,
            Alias::None | Alias::Suppressed => &self.name,
        }
    }

    pub fn renamed_to(&self, alias: &str) -> bool {
        matches!(&self.alias, Alias::Rename(a) if a == alias)
    }
}

/// A declared searchable attribute and the kind it is expected to have.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchableAttribute {
    pub name: String,
    pub kind: FieldKind,
}

/// Type-level description of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySchema {
    pub name: String,
    pub fields: Vec<FieldDef>,
    #[serde(default)]
    pub searchable_attributes: Option<Vec<SearchableAttribute>>,
    #[serde(default = "default_indexable")]
    pub indexable: bool,
    #[serde(default)]
    pub repository: Option<String>,
}

fn default_indexable() -> bool {
    true
}

impl EntitySchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            searchable_attributes: None,
            indexable: true,
            repository: None,
        }
    }

    pub fn field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldDef {
            name: name.into(),
            kind,
            alias: Alias::None,
        });
        self
    }

    pub fn field_with_alias(
        mut self,
        name: impl Into<String>,
        kind: FieldKind,
        alias: Alias,
    ) -> Self {
        self.fields.push(FieldDef {
            name: name.into(),
            kind,
            alias,
        });
        self
    }

    /// Declare the searchable attributes explicitly instead of inferring
    /// them from string fields.
    pub fn searchable<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = (S, FieldKind)>,
        S: Into<String>,
    {
        self.searchable_attributes = Some(
            attributes
                .into_iter()
                .map(|(name, kind)| SearchableAttribute {
                    name: name.into(),
                    kind,
                })
                .collect(),
        );
        self
    }

    pub fn not_indexable(mut self) -> Self {
        self.indexable = false;
        self
    }

    pub fn with_repository(mut self, token: impl Into<String>) -> Self {
        self.repository = Some(token.into());
        self
    }

    /// Token used to resolve the storage repository backing this type.
    pub fn repository_token(&self) -> &str {
        self.repository.as_deref().unwrap_or(&self.name)
    }

    /// Resolve a field by structural name, falling back to its
    /// serialization alias.
    pub fn resolve_field(&self, name: &str) -> Option<&FieldDef> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .or_else(|| self.fields.iter().find(|f| f.renamed_to(name)))
    }
}

/// A domain value that can be indexed.
pub trait Entity: Send + Sync + fmt::Debug {
    /// Name of the entity type (its schema namespace).
    fn entity_name(&self) -> &str;

    /// Per-instance identifier, unprefixed.
    fn item_id(&self) -> String;

    /// Value of a structural field. `None` when the instance has no value
    /// for it; the projector treats that like an empty value.
    fn field(&self, name: &str) -> Option<FieldValue<'_>>;

    /// Per-instance opt-out from indexing.
    fn index_content(&self) -> bool {
        true
    }

    fn as_any(&self) -> &dyn Any;
}

impl dyn Entity {
    pub fn downcast_ref<T: Entity + 'static>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

/// Static types describe their schema once, at registration time.
pub trait DescribeEntity: Entity {
    fn describe() -> EntitySchema;
}
