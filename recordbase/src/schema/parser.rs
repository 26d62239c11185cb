use super::types::Collection;
use super::Schema;
use crate::error::Result;
use serde::Deserialize;
use std::path::Path;

/// Top-level shape of a schema YAML document.
#[derive(Debug, Deserialize)]
struct SchemaFile {
    #[serde(default)]
    collections: Vec<Collection>,
}

/// Parse a schema.yaml file into a registered Schema.
pub fn parse_schema(path: &Path) -> Result<Schema> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| crate::error::RecordError::Schema(format!("{}: {e}", path.display())))?;
    parse_schema_str(&content)
}

/// Parse a schema YAML string into a registered Schema.
/// Every collection goes through full registration (reserved fields,
/// api-rule defaults).
pub fn parse_schema_str(content: &str) -> Result<Schema> {
    let file: SchemaFile = serde_yaml::from_str(content)?;
    let mut schema = Schema::new();
    for collection in file.collections {
        schema.register(collection)?;
    }
    Ok(schema)
}
