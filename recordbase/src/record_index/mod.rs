// Secondary Index Manager - denormalized mirror of relation-field values
// used for cross-collection lookups and delete-time referential checks.

use crate::error::Result;
use crate::record::Record;
use crate::schema::{CollectionField, FieldKind, Schema};
use crate::storage::{RecordIndexRow, Storage};
use serde_json::Value;

/// Fully replace the index rows for (collection, record id): delete-all
/// then bulk-insert, inside the caller's transaction. Re-running for
/// unchanged record state yields a content-equal row set.
pub fn sync_indexes(storage: &Storage, schema: &Schema, record: &Record) -> Result<()> {
    let collection = schema.collection(&record.collection)?;
    let record_id = record.id().to_string();

    storage.delete_index_rows_for_record(&collection.name, &record_id)?;

    for field in collection.relation_fields() {
        let values = relation_values(field, record.get(&field.name));
        if values.is_empty() {
            continue;
        }

        let referenced_kind = referenced_key_kind(schema, field);
        for value in values {
            let row = typed_row(&collection.name, &record_id, &field.name, referenced_kind, &value);
            storage.insert_index_row(&row)?;
        }
    }

    Ok(())
}

/// Remove both directions for a record: rows it owns and rows in other
/// collections that reference its id.
pub fn clear_record(storage: &Storage, collection: &str, record_id: &str) -> Result<()> {
    storage.delete_index_rows_referencing(record_id)?;
    storage.delete_index_rows_for_record(collection, record_id)?;
    Ok(())
}

/// Records in other collections that reference the given id, grouped by
/// (collection, field) in deterministic order.
#[derive(Debug, Clone)]
pub struct ReferencingGroup {
    pub collection: String,
    pub field: String,
    pub record_ids: Vec<String>,
}

pub fn referencing_groups(
    storage: &Storage,
    target_collection: &str,
    target_id: &str,
) -> Result<Vec<ReferencingGroup>> {
    let rows = storage.find_referencing(target_id, target_collection)?;

    let mut groups: Vec<ReferencingGroup> = Vec::new();
    for row in rows {
        match groups
            .iter_mut()
            .find(|g| g.collection == row.collection && g.field == row.field)
        {
            Some(group) => {
                if !group.record_ids.contains(&row.record_id) {
                    group.record_ids.push(row.record_id);
                }
            }
            None => groups.push(ReferencingGroup {
                collection: row.collection,
                field: row.field,
                record_ids: vec![row.record_id],
            }),
        }
    }
    Ok(groups)
}

/// Extract the referenced values of a relation field: multi-valued fields
/// yield one entry per array element; single-valued take the first element
/// (or the scalar itself); null/empty yields none.
fn relation_values(field: &CollectionField, value: Option<&Value>) -> Vec<Value> {
    let elements: Vec<Value> = match value {
        None | Some(Value::Null) => return Vec::new(),
        Some(Value::Array(items)) => items.clone(),
        Some(scalar) => vec![scalar.clone()],
    };

    let non_empty: Vec<Value> = elements
        .into_iter()
        .filter(|v| !matches!(v, Value::Null) && v.as_str() != Some(""))
        .collect();

    if field.is_single_relation() {
        non_empty.into_iter().take(1).collect()
    } else {
        non_empty
    }
}

/// The declared kind of the referenced collection's key field. Relation
/// targets are keyed by "id", which is Text in the current model, but the
/// typed-column selection below stays general.
fn referenced_key_kind(schema: &Schema, field: &CollectionField) -> FieldKind {
    field
        .options
        .target
        .as_deref()
        .and_then(|target| schema.get(target))
        .and_then(|collection| collection.field("id"))
        .map(|id_field| id_field.kind)
        .unwrap_or(FieldKind::Text)
}

fn typed_row(
    collection: &str,
    record_id: &str,
    field: &str,
    kind: FieldKind,
    value: &Value,
) -> RecordIndexRow {
    let mut row = RecordIndexRow {
        collection: collection.to_string(),
        record_id: record_id.to_string(),
        field: field.to_string(),
        value_string: None,
        value_number: None,
        value_datetime: None,
    };

    match kind {
        FieldKind::Number | FieldKind::Bool => {
            row.value_number = Some(match value {
                Value::Bool(b) => f64::from(u8::from(*b)),
                Value::Number(n) => n.as_f64().unwrap_or(0.0),
                Value::String(s) => s.parse().unwrap_or(0.0),
                _ => 0.0,
            });
        }
        FieldKind::Datetime => {
            row.value_datetime = Some(stringify(value));
        }
        _ => {
            row.value_string = Some(stringify(value));
        }
    }
    row
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Collection, CollectionKind};
    use serde_json::{json, Map};

    fn test_schema() -> Schema {
        crate::schema::parse_schema_str(
            r#"
collections:
  - name: users
    kind: auth
  - name: posts
    fields:
      - { name: title, kind: text }
      - name: owner_id
        kind: relation
        options: { target: users }
      - name: reviewers
        kind: relation
        options: { target: users, max_select: 5 }
"#,
        )
        .unwrap()
    }

    fn post(owner: Value, reviewers: Value) -> Record {
        let mut data = Map::new();
        data.insert("id".into(), json!("p1"));
        data.insert("title".into(), json!("hello"));
        data.insert("owner_id".into(), owner);
        data.insert("reviewers".into(), reviewers);
        Record::new("posts", data)
    }

    #[test]
    fn test_sync_emits_row_per_relation_value() {
        let storage = Storage::open_in_memory().unwrap();
        let schema = test_schema();
        let record = post(json!("u1"), json!(["u2", "u3"]));

        sync_indexes(&storage, &schema, &record).unwrap();

        let rows = storage.index_rows_for_record("posts", "p1").unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.value_string.is_some()));
        assert!(rows.iter().any(|r| r.field == "owner_id"));
        assert_eq!(rows.iter().filter(|r| r.field == "reviewers").count(), 2);
    }

    #[test]
    fn test_sync_null_and_empty_emit_nothing() {
        let storage = Storage::open_in_memory().unwrap();
        let schema = test_schema();
        let record = post(Value::Null, json!([]));

        sync_indexes(&storage, &schema, &record).unwrap();
        assert!(storage.index_rows_for_record("posts", "p1").unwrap().is_empty());
    }

    #[test]
    fn test_sync_single_relation_takes_first_element() {
        let storage = Storage::open_in_memory().unwrap();
        let schema = test_schema();
        let record = post(json!(["u1", "u9"]), json!([]));

        sync_indexes(&storage, &schema, &record).unwrap();

        let rows = storage.index_rows_for_record("posts", "p1").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value_string.as_deref(), Some("u1"));
    }

    #[test]
    fn test_sync_is_idempotent() {
        let storage = Storage::open_in_memory().unwrap();
        let schema = test_schema();
        let record = post(json!("u1"), json!(["u2"]));

        sync_indexes(&storage, &schema, &record).unwrap();
        let first = storage.index_rows_for_record("posts", "p1").unwrap();

        sync_indexes(&storage, &schema, &record).unwrap();
        let second = storage.index_rows_for_record("posts", "p1").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_typed_column_follows_referenced_key_kind() {
        let mut schema = test_schema();
        // A collection keyed by a numeric id field exercises value_number.
        let mut counters = Collection::new("counters", CollectionKind::Base);
        counters
            .fields
            .push(crate::schema::CollectionField::new("id", FieldKind::Number));
        schema.register(counters).unwrap();

        let mut tallies = Collection::new("tallies", CollectionKind::Base);
        let mut link = crate::schema::CollectionField::new("counter", FieldKind::Relation);
        link.options.target = Some("counters".into());
        tallies.fields.push(link);
        schema.register(tallies).unwrap();

        let storage = Storage::open_in_memory().unwrap();
        let mut data = Map::new();
        data.insert("id".into(), json!("t1"));
        data.insert("counter".into(), json!(7));
        let record = Record::new("tallies", data);

        sync_indexes(&storage, &schema, &record).unwrap();
        let rows = storage.index_rows_for_record("tallies", "t1").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value_number, Some(7.0));
        assert!(rows[0].value_string.is_none());
    }

    #[test]
    fn test_referencing_groups_are_grouped_and_ordered() {
        let storage = Storage::open_in_memory().unwrap();
        let schema = test_schema();

        sync_indexes(&storage, &schema, &post(json!("u1"), json!(["u1"]))).unwrap();
        let mut other = post(json!("u1"), json!([]));
        other.set("id", json!("p2"));
        sync_indexes(&storage, &schema, &other).unwrap();

        let groups = referencing_groups(&storage, "users", "u1").unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].field, "owner_id");
        assert_eq!(groups[0].record_ids, vec!["p1".to_string(), "p2".to_string()]);
        assert_eq!(groups[1].field, "reviewers");
        assert_eq!(groups[1].record_ids, vec!["p1".to_string()]);
    }

    #[test]
    fn test_clear_record_removes_both_directions() {
        let storage = Storage::open_in_memory().unwrap();
        let schema = test_schema();
        sync_indexes(&storage, &schema, &post(json!("u1"), json!([]))).unwrap();

        clear_record(&storage, "users", "u1").unwrap();
        assert_eq!(storage.count_index_rows_referencing("u1").unwrap(), 0);
    }
}
