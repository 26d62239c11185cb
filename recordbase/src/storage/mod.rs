use crate::error::Result;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};
use std::path::Path;

/// SQLite-backed persistence: the document table, the secondary-index
/// mirror, and the physical-index tracking table.
pub struct Storage {
    conn: Connection,
}

impl Storage {
    /// Open or create the database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let storage = Storage { conn };
        storage.initialize_tables()?;
        Ok(storage)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let storage = Storage { conn };
        storage.initialize_tables()?;
        Ok(storage)
    }

    fn initialize_tables(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS records (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                data TEXT NOT NULL,
                PRIMARY KEY (collection, id)
            );

            CREATE TABLE IF NOT EXISTS record_indexes (
                collection TEXT NOT NULL,
                record_id TEXT NOT NULL,
                field TEXT NOT NULL,
                value_string TEXT,
                value_number REAL,
                value_datetime TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_record_indexes_record
                ON record_indexes(collection, record_id);
            CREATE INDEX IF NOT EXISTS idx_record_indexes_value
                ON record_indexes(value_string);

            CREATE TABLE IF NOT EXISTS collection_indexes (
                collection TEXT NOT NULL,
                index_name TEXT PRIMARY KEY,
                field_names TEXT NOT NULL,
                is_unique INTEGER NOT NULL DEFAULT 0
            );
            ",
        )?;
        Ok(())
    }

    // ── Records ──────────────────────────────────────────────────

    pub fn upsert_record(
        &self,
        collection: &str,
        id: &str,
        data: &Map<String, Value>,
    ) -> Result<()> {
        let data_json = serde_json::to_string(data)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO records (collection, id, data) VALUES (?1, ?2, ?3)",
            params![collection, id, data_json],
        )?;
        Ok(())
    }

    pub fn get_record(&self, collection: &str, id: &str) -> Result<Option<RecordRow>> {
        let result = self
            .conn
            .query_row(
                "SELECT collection, id, data FROM records WHERE collection = ?1 AND id = ?2",
                params![collection, id],
                RecordRow::from_row,
            )
            .optional()?;
        Ok(result)
    }

    pub fn list_records(&self, collection: &str) -> Result<Vec<RecordRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT collection, id, data FROM records WHERE collection = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![collection], RecordRow::from_row)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    pub fn delete_record(&self, collection: &str, id: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM records WHERE collection = ?1 AND id = ?2",
            params![collection, id],
        )?;
        Ok(())
    }

    pub fn record_exists(&self, collection: &str, id: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM records WHERE collection = ?1 AND id = ?2",
            params![collection, id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Count records in a collection whose field equals the given value,
    /// excluding one id. Powers unique-field validation.
    pub fn count_field_matches(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
        exclude_id: &str,
    ) -> Result<usize> {
        let path = format!("$.{field}");
        let bound = match value {
            Value::String(s) => rusqlite::types::Value::Text(s.clone()),
            Value::Number(n) => rusqlite::types::Value::Real(n.as_f64().unwrap_or(0.0)),
            Value::Bool(b) => rusqlite::types::Value::Integer(i64::from(*b)),
            _ => rusqlite::types::Value::Null,
        };
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM records
             WHERE collection = ?1 AND json_extract(data, ?2) = ?3 AND id != ?4",
            params![collection, path, bound, exclude_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    // ── Secondary index rows ─────────────────────────────────────

    pub fn insert_index_row(&self, row: &RecordIndexRow) -> Result<()> {
        self.conn.execute(
            "INSERT INTO record_indexes
             (collection, record_id, field, value_string, value_number, value_datetime)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                row.collection,
                row.record_id,
                row.field,
                row.value_string,
                row.value_number,
                row.value_datetime
            ],
        )?;
        Ok(())
    }

    /// Remove every index row owned by (collection, record_id).
    pub fn delete_index_rows_for_record(&self, collection: &str, record_id: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM record_indexes WHERE collection = ?1 AND record_id = ?2",
            params![collection, record_id],
        )?;
        Ok(())
    }

    /// Remove every index row whose stored value references the given id.
    pub fn delete_index_rows_referencing(&self, target_id: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM record_indexes WHERE value_string = ?1",
            params![target_id],
        )?;
        Ok(())
    }

    pub fn index_rows_for_record(
        &self,
        collection: &str,
        record_id: &str,
    ) -> Result<Vec<RecordIndexRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT collection, record_id, field, value_string, value_number, value_datetime
             FROM record_indexes WHERE collection = ?1 AND record_id = ?2
             ORDER BY field, value_string, value_number, value_datetime",
        )?;
        let rows = stmt.query_map(params![collection, record_id], RecordIndexRow::from_row)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Index rows in collections other than `exclude_collection` whose
    /// value references the given id. Ordered deterministically for the
    /// cascade traversal.
    pub fn find_referencing(
        &self,
        target_id: &str,
        exclude_collection: &str,
    ) -> Result<Vec<RecordIndexRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT collection, record_id, field, value_string, value_number, value_datetime
             FROM record_indexes WHERE value_string = ?1 AND collection != ?2
             ORDER BY collection, field, record_id",
        )?;
        let rows = stmt.query_map(params![target_id, exclude_collection], RecordIndexRow::from_row)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn count_index_rows_referencing(&self, target_id: &str) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM record_indexes WHERE value_string = ?1",
            params![target_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    // ── Physical-index tracking ──────────────────────────────────

    pub fn insert_tracked_index(
        &self,
        collection: &str,
        index_name: &str,
        field_names: &[String],
        is_unique: bool,
    ) -> Result<()> {
        let fields_json = serde_json::to_string(field_names)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO collection_indexes
             (collection, index_name, field_names, is_unique) VALUES (?1, ?2, ?3, ?4)",
            params![collection, index_name, fields_json, is_unique as i64],
        )?;
        Ok(())
    }

    pub fn remove_tracked_index(&self, index_name: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM collection_indexes WHERE index_name = ?1",
            params![index_name],
        )?;
        Ok(())
    }

    pub fn tracked_index(&self, index_name: &str) -> Result<Option<TrackedIndex>> {
        let result = self
            .conn
            .query_row(
                "SELECT collection, index_name, field_names, is_unique
                 FROM collection_indexes WHERE index_name = ?1",
                params![index_name],
                TrackedIndex::from_row,
            )
            .optional()?;
        result.map(TrackedIndex::finish).transpose()
    }

    pub fn tracked_indexes(&self, collection: &str) -> Result<Vec<TrackedIndex>> {
        let mut stmt = self.conn.prepare(
            "SELECT collection, index_name, field_names, is_unique
             FROM collection_indexes WHERE collection = ?1 ORDER BY index_name",
        )?;
        let rows = stmt.query_map(params![collection], TrackedIndex::from_row)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(TrackedIndex::finish(row?)?);
        }
        Ok(out)
    }

    pub fn all_tracked_indexes(&self) -> Result<Vec<TrackedIndex>> {
        let mut stmt = self.conn.prepare(
            "SELECT collection, index_name, field_names, is_unique
             FROM collection_indexes ORDER BY index_name",
        )?;
        let rows = stmt.query_map([], TrackedIndex::from_row)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(TrackedIndex::finish(row?)?);
        }
        Ok(out)
    }

    // ── Physical schema introspection ────────────────────────────

    pub fn physical_index_exists(&self, index_name: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name = ?1",
            params![index_name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn column_exists(&self, column: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM pragma_table_info('records') WHERE name = ?1",
            params![column],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn execute_ddl(&self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    // ── Transaction support ──────────────────────────────────────

    pub fn begin_transaction(&self) -> Result<()> {
        self.conn.execute_batch("BEGIN TRANSACTION")?;
        Ok(())
    }

    pub fn commit_transaction(&self) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    pub fn rollback_transaction(&self) -> Result<()> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }
}

/// A row from the records table.
#[derive(Debug, Clone)]
pub struct RecordRow {
    pub collection: String,
    pub id: String,
    pub data_json: String,
}

impl RecordRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(RecordRow {
            collection: row.get(0)?,
            id: row.get(1)?,
            data_json: row.get(2)?,
        })
    }

    /// Parse the stored JSON blob back into an ordered document map.
    pub fn parse_data(&self) -> Result<Map<String, Value>> {
        let value: Value = serde_json::from_str(&self.data_json)?;
        match value {
            Value::Object(map) => Ok(map),
            _ => Err(crate::error::RecordError::Other(format!(
                "Record {}/{} does not hold a JSON object",
                self.collection, self.id
            ))),
        }
    }
}

/// A row from the record_indexes table. Exactly one value column is
/// populated, per the referenced field's declared type.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordIndexRow {
    pub collection: String,
    pub record_id: String,
    pub field: String,
    pub value_string: Option<String>,
    pub value_number: Option<f64>,
    pub value_datetime: Option<String>,
}

impl RecordIndexRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(RecordIndexRow {
            collection: row.get(0)?,
            record_id: row.get(1)?,
            field: row.get(2)?,
            value_string: row.get(3)?,
            value_number: row.get(4)?,
            value_datetime: row.get(5)?,
        })
    }
}

/// A row from the collection_indexes tracking table.
#[derive(Debug, Clone)]
pub struct TrackedIndex {
    pub collection: String,
    pub index_name: String,
    pub field_names: Vec<String>,
    pub is_unique: bool,
}

impl TrackedIndex {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, String, String, bool)> {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get::<_, i64>(3)? != 0))
    }

    fn finish(raw: (String, String, String, bool)) -> Result<Self> {
        let field_names: Vec<String> = serde_json::from_str(&raw.2)?;
        Ok(TrackedIndex {
            collection: raw.0,
            index_name: raw.1,
            field_names,
            is_unique: raw.3,
        })
    }
}
