// Column Indexing Strategy - turns "index these logical fields, optionally
// unique" into physical generated columns + SQL indexes, tracked in
// collection_indexes. Administrative path only: index DDL can lock the
// document table and must never run inline with per-request writes.

use crate::error::{IndexOperation, RecordError, Result};
use crate::schema::Schema;
use crate::storage::Storage;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Identifier-length limit; longer names collapse to a hashed form.
pub const MAX_IDENTIFIER_LENGTH: usize = 63;

const RECORDS_TABLE: &str = "records";

/// Backend-specific DDL. Generated-column syntax differs per engine; the
/// shipped implementation targets SQLite.
pub trait Dialect {
    fn add_generated_column(&self, table: &str, column: &str, field: &str) -> String;
    fn drop_column(&self, table: &str, column: &str) -> String;
    fn create_index(
        &self,
        name: &str,
        table: &str,
        columns: &[String],
        unique: bool,
        collection: &str,
    ) -> String;
    fn drop_index(&self, name: &str) -> String;
}

pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn add_generated_column(&self, table: &str, column: &str, field: &str) -> String {
        format!(
            "ALTER TABLE {table} ADD COLUMN \"{column}\" TEXT \
             GENERATED ALWAYS AS (json_extract(data, '$.{field}')) VIRTUAL"
        )
    }

    fn drop_column(&self, table: &str, column: &str) -> String {
        format!("ALTER TABLE {table} DROP COLUMN \"{column}\"")
    }

    fn create_index(
        &self,
        name: &str,
        table: &str,
        columns: &[String],
        unique: bool,
        collection: &str,
    ) -> String {
        let uniqueness = if unique { "UNIQUE " } else { "" };
        let column_list = columns
            .iter()
            .map(|c| format!("\"{c}\""))
            .collect::<Vec<_>>()
            .join(", ");
        // The records table is shared across collections; a partial index
        // scopes uniqueness and lookups to one collection.
        format!(
            "CREATE {uniqueness}INDEX \"{name}\" ON {table}({column_list}) \
             WHERE collection = '{collection}'"
        )
    }

    fn drop_index(&self, name: &str) -> String {
        format!("DROP INDEX IF EXISTS \"{name}\"")
    }
}

static SQLITE: SqliteDialect = SqliteDialect;

/// Administrative manager for physical secondary indexes.
pub struct ColumnIndexer<'a> {
    storage: &'a Storage,
    dialect: &'a dyn Dialect,
}

impl<'a> ColumnIndexer<'a> {
    pub fn new(storage: &'a Storage, dialect: &'a dyn Dialect) -> Self {
        ColumnIndexer { storage, dialect }
    }

    pub fn sqlite(storage: &'a Storage) -> Self {
        ColumnIndexer::new(storage, &SQLITE)
    }

    /// Create a composite (optionally unique) index over the given logical
    /// fields. Adds any missing generated columns first (idempotent for
    /// columns already present), records the index in the tracking table,
    /// and flips the schema fields' indexed/unique flags only on success.
    /// On failure the generated columns added by this call are dropped
    /// before the typed error is raised.
    pub fn create_index(
        &self,
        schema: &mut Schema,
        collection_name: &str,
        field_names: &[&str],
        unique: bool,
    ) -> Result<String> {
        let collection = schema.collection(collection_name)?;
        if field_names.is_empty() {
            return Err(RecordError::Schema("Cannot index an empty field list".into()));
        }
        for field in field_names {
            if !collection.has_field(field) {
                return Err(RecordError::Schema(format!(
                    "Unknown field '{field}' in collection '{collection_name}'"
                )));
            }
            if field.len() + 3 > MAX_IDENTIFIER_LENGTH {
                return Err(IndexOperation::IdentifierTooLong {
                    identifier: (*field).to_string(),
                    limit: MAX_IDENTIFIER_LENGTH,
                }
                .into());
            }
        }

        let collection_id = collection.id.clone();
        let index_name = index_name(&collection_id, field_names, unique);

        let mut columns = Vec::new();
        let mut added_this_call = Vec::new();
        for field in field_names {
            let column = column_name(field);
            if !self.storage.column_exists(&column)? {
                let ddl = self.dialect.add_generated_column(RECORDS_TABLE, &column, field);
                if let Err(e) = self.storage.execute_ddl(&ddl) {
                    self.rollback_columns(&added_this_call);
                    return Err(classify(&index_name, e));
                }
                added_this_call.push(column.clone());
            }
            columns.push(column);
        }

        let ddl = self
            .dialect
            .create_index(&index_name, RECORDS_TABLE, &columns, unique, collection_name);
        if let Err(e) = self.storage.execute_ddl(&ddl) {
            self.rollback_columns(&added_this_call);
            return Err(classify(&index_name, e));
        }

        let owned_fields: Vec<String> = field_names.iter().map(|f| f.to_string()).collect();
        if let Err(e) =
            self.storage
                .insert_tracked_index(collection_name, &index_name, &owned_fields, unique)
        {
            let _ = self.storage.execute_ddl(&self.dialect.drop_index(&index_name));
            self.rollback_columns(&added_this_call);
            return Err(IndexOperation::SchemaSyncFailure {
                index: index_name,
                detail: e.to_string(),
            }
            .into());
        }

        if let Some(collection) = schema.get_mut(collection_name) {
            for field_name in field_names {
                if let Some(field) = collection.field_mut(field_name) {
                    field.indexed = true;
                    if unique {
                        field.unique = true;
                    }
                }
            }
        }

        Ok(index_name)
    }

    /// Drop a tracked index. The physical index is removed; each generated
    /// column is dropped only if no other tracked index still references
    /// its field; schema flags reset only when no remaining index covers
    /// the field. The tracking row is always removed even when a DDL step
    /// failed - a stale tracking row is worse than a stale physical
    /// artifact - so only tracking-row removal itself can raise.
    pub fn drop_index(
        &self,
        schema: &mut Schema,
        collection_name: &str,
        index_name: &str,
    ) -> Result<()> {
        let tracked = self.storage.tracked_index(index_name)?;
        let remaining: Vec<_> = self
            .storage
            .all_tracked_indexes()?
            .into_iter()
            .filter(|t| t.index_name != index_name)
            .collect();

        if let Err(e) = self.storage.execute_ddl(&self.dialect.drop_index(index_name)) {
            log::warn!("Failed to drop physical index {index_name}: {e}");
        }

        if let Some(tracked) = &tracked {
            for field in &tracked.field_names {
                let still_referenced = remaining
                    .iter()
                    .any(|t| t.field_names.iter().any(|f| f == field));
                if !still_referenced {
                    let column = column_name(field);
                    if self.storage.column_exists(&column)? {
                        let ddl = self.dialect.drop_column(RECORDS_TABLE, &column);
                        if let Err(e) = self.storage.execute_ddl(&ddl) {
                            log::warn!("Failed to drop generated column {column}: {e}");
                        }
                    }
                }

                let covered = remaining.iter().any(|t| {
                    t.collection == tracked.collection
                        && t.field_names.iter().any(|f| f == field)
                });
                let covered_unique = remaining.iter().any(|t| {
                    t.is_unique
                        && t.collection == tracked.collection
                        && t.field_names.iter().any(|f| f == field)
                });
                if let Some(collection) = schema.get_mut(collection_name) {
                    if let Some(schema_field) = collection.field_mut(field) {
                        if !covered {
                            schema_field.indexed = false;
                        }
                        if tracked.is_unique && !covered_unique {
                            schema_field.unique = false;
                        }
                    }
                }
            }
        }

        self.storage.remove_tracked_index(index_name)?;
        Ok(())
    }

    /// True only when both the physical index and the tracking row exist.
    /// Either side missing is drift and answers false.
    pub fn has_index(&self, index_name: &str) -> Result<bool> {
        let physical = self.storage.physical_index_exists(index_name)?;
        let tracked = self.storage.tracked_index(index_name)?.is_some();
        if physical != tracked {
            log::warn!(
                "Index {index_name} drift: physical={physical} tracked={tracked}"
            );
        }
        Ok(physical && tracked)
    }

    fn rollback_columns(&self, columns: &[String]) {
        for column in columns {
            let ddl = self.dialect.drop_column(RECORDS_TABLE, column);
            if let Err(e) = self.storage.execute_ddl(&ddl) {
                log::warn!("Rollback failed to drop generated column {column}: {e}");
            }
        }
    }
}

/// Deterministic index name: `uq_`/`idx_` + collection id + field names,
/// collapsed to a short hashed form past the identifier-length limit.
pub fn index_name(collection_id: &str, field_names: &[&str], unique: bool) -> String {
    let prefix = if unique { "uq" } else { "idx" };
    let full = format!("{prefix}_{collection_id}_{}", field_names.join("_"));
    if full.len() <= MAX_IDENTIFIER_LENGTH {
        return full;
    }

    let mut hasher = DefaultHasher::new();
    full.hash(&mut hasher);
    format!("{prefix}_{:016x}", hasher.finish())
}

/// Deterministic generated-column name for a logical field.
pub fn column_name(field: &str) -> String {
    format!("gc_{field}")
}

fn classify(index_name: &str, error: RecordError) -> RecordError {
    let detail = error.to_string();
    if detail.to_lowercase().contains("unique") {
        IndexOperation::DuplicateValue {
            index: index_name.to_string(),
            detail,
        }
        .into()
    } else {
        IndexOperation::SchemaSyncFailure {
            index: index_name.to_string(),
            detail,
        }
        .into()
    }
}
