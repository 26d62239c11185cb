use thiserror::Error;

/// Typed failure of an administrative index create/drop operation.
#[derive(Error, Debug)]
pub enum IndexOperation {
    #[error("unique index '{index}' cannot be satisfied by existing data: {detail}")]
    DuplicateValue { index: String, detail: String },

    #[error("identifier '{identifier}' exceeds the backend length limit ({limit})")]
    IdentifierTooLong { identifier: String, limit: usize },

    #[error("schema sync failed for index '{index}': {detail}")]
    SchemaSyncFailure { index: String, detail: String },
}

#[derive(Error, Debug)]
pub enum RecordError {
    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Record not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    #[error("Operation not permitted on {collection}/{id}")]
    Forbidden { collection: String, id: String },

    /// Post-lifecycle document keys diverged from the schema field set.
    /// Indicates a handler bug, not user error.
    #[error("Structure mismatch in '{collection}': missing fields {missing:?}")]
    StructureMismatch {
        collection: String,
        missing: Vec<String>,
    },

    #[error("Cannot delete: referenced by {collection}.{field} ({count} record(s))")]
    ReferentialIntegrity {
        collection: String,
        field: String,
        count: usize,
    },

    #[error("Index operation failed: {0}")]
    Index(#[from] IndexOperation),

    #[error("Invalid rule {rule:?}: {message}")]
    RuleSyntax { rule: String, message: String },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, RecordError>;
