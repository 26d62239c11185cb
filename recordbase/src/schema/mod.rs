pub mod parser;
pub mod types;

pub use parser::{parse_schema, parse_schema_str};
pub use types::{
    ApiRules, Collection, CollectionField, CollectionKind, CollectionOptions, FieldKind,
    FieldOptions, Operation, DEFAULT_ID_LENGTH, SUPERUSER_ONLY,
};

use crate::error::{RecordError, Result};
use std::collections::HashMap;

/// The schema registry: every known collection, normalized.
///
/// Registration installs the reserved system fields and fills unset api
/// rules with kind-specific defaults, so a registered collection is never
/// missing either.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    collections: HashMap<String, Collection>,
}

impl Schema {
    pub fn new() -> Self {
        Schema::default()
    }

    /// Register (or replace) a collection. Normalization is idempotent.
    pub fn register(&mut self, mut collection: Collection) -> Result<()> {
        normalize(&mut collection)?;
        self.collections.insert(collection.name.clone(), collection);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Collection> {
        self.collections.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Collection> {
        self.collections.get_mut(name)
    }

    /// Like `get` but with a typed error for unknown collections.
    pub fn collection(&self, name: &str) -> Result<&Collection> {
        self.collections
            .get(name)
            .ok_or_else(|| RecordError::Schema(format!("Collection '{name}' not found")))
    }

    pub fn collections(&self) -> impl Iterator<Item = &Collection> {
        self.collections.values()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.collections.contains_key(name)
    }
}

/// Install reserved fields, assign ids/order, apply api-rule defaults and
/// reject structural problems (duplicate names, bad relation config).
pub fn normalize(collection: &mut Collection) -> Result<()> {
    if collection.name.is_empty() {
        return Err(RecordError::Schema("Collection name must not be empty".into()));
    }
    if collection.id.is_empty() {
        collection.id = collection.name.clone();
    }

    ensure_system_fields(collection);

    let mut seen = std::collections::HashSet::new();
    for field in &collection.fields {
        if !seen.insert(field.name.clone()) {
            return Err(RecordError::Schema(format!(
                "Duplicate field '{}' in collection '{}'",
                field.name, collection.name
            )));
        }
        if field.kind == FieldKind::Relation && field.options.target.is_none() {
            return Err(RecordError::Schema(format!(
                "Relation field '{}.{}' is missing a target collection",
                collection.name, field.name
            )));
        }
    }

    for (position, field) in collection.fields.iter_mut().enumerate() {
        field.order = position;
        if field.id.is_empty() {
            field.id = field.name.clone();
        }
    }

    collection.api_rules.apply_defaults(collection.kind);
    Ok(())
}

/// Every collection carries a locked "id"; Base and Auth carry
/// "created"/"updated"; Auth additionally "email" and "password".
fn ensure_system_fields(collection: &mut Collection) {
    if !collection.has_field("id") {
        collection.fields.insert(0, CollectionField::system_id());
    } else if let Some(id_field) = collection.field_mut("id") {
        id_field.locked = true;
    }

    match collection.kind {
        CollectionKind::Base | CollectionKind::Auth => {
            if !collection.has_field("created") {
                collection.fields.push(CollectionField::system_timestamp("created"));
            }
            if !collection.has_field("updated") {
                collection.fields.push(CollectionField::system_timestamp("updated"));
            }
        }
        CollectionKind::View => {}
    }

    if collection.kind == CollectionKind::Auth {
        if !collection.has_field("email") {
            collection.fields.push(CollectionField::system_email());
        }
        if !collection.has_field("password") {
            collection.fields.push(CollectionField::system_password());
        }
    }
}
