use crate::error::{RecordError, Result};
use crate::schema::{Collection, CollectionField, FieldKind, Schema};
use crate::storage::Storage;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

/// Result of validating a record document.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Reconcile a document against its schema: drop unknown keys and rebuild
/// the map in schema field order, filling any absent field with a
/// kind-appropriate default (Text-like -> "", Number -> 0, Bool -> false,
/// else null).
pub fn reconcile(collection: &Collection, data: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    for field in &collection.fields {
        let value = data
            .get(&field.name)
            .cloned()
            .unwrap_or_else(|| default_value(field.kind));
        out.insert(field.name.clone(), value);
    }
    out
}

/// Verify the post-lifecycle invariant: the document's key set equals the
/// collection's field-name set. A violation is a handler bug, not user
/// error.
pub fn check_structure(collection: &Collection, data: &Map<String, Value>) -> Result<()> {
    let missing: Vec<String> = collection
        .fields
        .iter()
        .filter(|f| !data.contains_key(&f.name))
        .map(|f| f.name.clone())
        .collect();
    if !missing.is_empty() {
        return Err(RecordError::StructureMismatch {
            collection: collection.name.clone(),
            missing,
        });
    }
    Ok(())
}

pub fn default_value(kind: FieldKind) -> Value {
    match kind {
        FieldKind::Text | FieldKind::Email | FieldKind::RichText => Value::String(String::new()),
        FieldKind::Number => Value::from(0),
        FieldKind::Bool => Value::Bool(false),
        _ => Value::Null,
    }
}

/// Validate a reconciled document: required/type/option constraints,
/// relation targets, unique fields (checked against storage).
pub fn validate_record(
    schema: &Schema,
    collection: &Collection,
    storage: &Storage,
    data: &Map<String, Value>,
    exclude_id: &str,
) -> ValidationResult {
    let mut result = ValidationResult::default();

    for field in &collection.fields {
        let value = data.get(&field.name).unwrap_or(&Value::Null);

        if field.required && is_blank(value) {
            result
                .errors
                .push(format!("Field '{}' is required", field.name));
            continue;
        }
        if is_blank(value) {
            continue;
        }

        validate_field_value(schema, storage, field, value, &mut result);

        if field.unique && result.is_ok() {
            match storage.count_field_matches(&collection.name, &field.name, value, exclude_id) {
                Ok(0) => {}
                Ok(_) => result.errors.push(format!(
                    "Field '{}' must be unique, value already exists",
                    field.name
                )),
                Err(e) => result
                    .errors
                    .push(format!("Unique check failed for '{}': {e}", field.name)),
            }
        }
    }

    result
}

/// Validate, raising a single aggregated error on failure.
pub fn ensure_valid(
    schema: &Schema,
    collection: &Collection,
    storage: &Storage,
    data: &Map<String, Value>,
    exclude_id: &str,
) -> Result<()> {
    let result = validate_record(schema, collection, storage, data, exclude_id);
    if !result.is_ok() {
        return Err(RecordError::Validation(format!(
            "Record validation failed:\n  - {}",
            result.errors.join("\n  - ")
        )));
    }
    Ok(())
}

fn validate_field_value(
    schema: &Schema,
    storage: &Storage,
    field: &CollectionField,
    value: &Value,
    result: &mut ValidationResult,
) {
    let name = &field.name;
    match field.kind {
        FieldKind::Text | FieldKind::RichText => {
            let Some(s) = value.as_str() else {
                result.errors.push(format!(
                    "Field '{name}' expected string, got {}",
                    type_name(value)
                ));
                return;
            };
            if let Some(min) = field.options.min_length {
                if s.chars().count() < min {
                    result
                        .errors
                        .push(format!("Field '{name}' is shorter than {min} characters"));
                }
            }
            if let Some(max) = field.options.max_length {
                if s.chars().count() > max {
                    result
                        .errors
                        .push(format!("Field '{name}' is longer than {max} characters"));
                }
            }
            if let Some(pattern) = &field.options.pattern {
                match Regex::new(pattern) {
                    Ok(re) if !re.is_match(s) => result
                        .errors
                        .push(format!("Field '{name}' does not match pattern {pattern}")),
                    Ok(_) => {}
                    Err(_) => result
                        .errors
                        .push(format!("Field '{name}' has an invalid pattern {pattern}")),
                }
            }
        }
        FieldKind::Email => {
            let Some(s) = value.as_str() else {
                result.errors.push(format!(
                    "Field '{name}' expected string, got {}",
                    type_name(value)
                ));
                return;
            };
            if !email_regex().is_match(s) {
                result
                    .errors
                    .push(format!("Field '{name}' is not a valid email address"));
                return;
            }
            if let Some(domain) = s.rsplit('@').next() {
                if field
                    .options
                    .except_domains
                    .iter()
                    .any(|d| d.eq_ignore_ascii_case(domain))
                {
                    result
                        .errors
                        .push(format!("Field '{name}' domain '{domain}' is not allowed"));
                }
            }
        }
        FieldKind::Number => {
            let Some(n) = value.as_f64() else {
                result.errors.push(format!(
                    "Field '{name}' expected number, got {}",
                    type_name(value)
                ));
                return;
            };
            if let Some(min) = field.options.min {
                if n < min {
                    result
                        .errors
                        .push(format!("Field '{name}' must be >= {min}"));
                }
            }
            if let Some(max) = field.options.max {
                if n > max {
                    result
                        .errors
                        .push(format!("Field '{name}' must be <= {max}"));
                }
            }
        }
        FieldKind::Bool => {
            if !value.is_boolean() {
                result.errors.push(format!(
                    "Field '{name}' expected boolean, got {}",
                    type_name(value)
                ));
            }
        }
        FieldKind::Datetime => {
            let Some(s) = value.as_str() else {
                result.errors.push(format!(
                    "Field '{name}' expected datetime string, got {}",
                    type_name(value)
                ));
                return;
            };
            if chrono::DateTime::parse_from_rfc3339(s).is_err() {
                result
                    .errors
                    .push(format!("Field '{name}' is not an RFC 3339 datetime"));
            }
        }
        FieldKind::File => {
            // Upload mechanics live outside this core; a file value is its
            // stored name (or names).
            let ok = match value {
                Value::String(_) => true,
                Value::Array(items) => items.iter().all(Value::is_string),
                _ => false,
            };
            if !ok {
                result.errors.push(format!(
                    "Field '{name}' expected file name(s), got {}",
                    type_name(value)
                ));
            }
        }
        FieldKind::Relation => validate_relation(schema, storage, field, value, result),
    }
}

fn validate_relation(
    schema: &Schema,
    storage: &Storage,
    field: &CollectionField,
    value: &Value,
    result: &mut ValidationResult,
) {
    let name = &field.name;
    let Some(target) = field.options.target.as_deref() else {
        result
            .errors
            .push(format!("Relation field '{name}' has no target collection"));
        return;
    };
    if !schema.contains(target) {
        result.errors.push(format!(
            "Relation field '{name}' targets unknown collection '{target}'"
        ));
        return;
    }

    let ids: Vec<&str> = match value {
        Value::String(s) => vec![s.as_str()],
        Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
        _ => {
            result.errors.push(format!(
                "Field '{name}' expected relation id(s), got {}",
                type_name(value)
            ));
            return;
        }
    };

    let max_select = field.options.max_select.unwrap_or(1);
    if ids.len() > max_select {
        result.errors.push(format!(
            "Field '{name}' holds {} references, at most {max_select} allowed",
            ids.len()
        ));
    }

    for id in ids {
        if id.is_empty() {
            continue;
        }
        match storage.record_exists(target, id) {
            Ok(true) => {}
            Ok(false) => result.errors.push(format!(
                "Field '{name}' references missing record {target}/{id}"
            )),
            Err(e) => result
                .errors
                .push(format!("Relation check failed for '{name}': {e}")),
        }
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn email_regex() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("static regex"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_schema() -> Schema {
        crate::schema::parse_schema_str(
            r#"
collections:
  - name: users
    kind: auth
  - name: posts
    fields:
      - { name: title, kind: text, required: true, options: { min_length: 3 } }
      - { name: views, kind: number, options: { min: 0 } }
      - { name: contact, kind: email }
      - { name: published, kind: bool }
      - { name: published_at, kind: datetime }
      - name: owner_id
        kind: relation
        options: { target: users }
"#,
        )
        .unwrap()
    }

    fn valid_post() -> Map<String, Value> {
        let mut data = Map::new();
        data.insert("title".into(), json!("Hello"));
        data.insert("views".into(), json!(3));
        data
    }

    #[test]
    fn test_reconcile_fills_defaults_in_schema_order() {
        let schema = test_schema();
        let posts = schema.collection("posts").unwrap();
        let data = reconcile(posts, &valid_post());

        let keys: Vec<&str> = data.keys().map(String::as_str).collect();
        let expected: Vec<&str> = posts.field_names();
        assert_eq!(keys, expected);
        assert_eq!(data["published"], json!(false));
        assert_eq!(data["contact"], json!(""));
        assert_eq!(data["owner_id"], Value::Null);
    }

    #[test]
    fn test_reconcile_strips_unknown_keys() {
        let schema = test_schema();
        let posts = schema.collection("posts").unwrap();
        let mut raw = valid_post();
        raw.insert("sneaky".into(), json!("x"));

        let data = reconcile(posts, &raw);
        assert!(!data.contains_key("sneaky"));
    }

    #[test]
    fn test_check_structure_reports_missing() {
        let schema = test_schema();
        let posts = schema.collection("posts").unwrap();
        let err = check_structure(posts, &valid_post()).unwrap_err();
        match err {
            RecordError::StructureMismatch { missing, .. } => {
                assert!(missing.contains(&"id".to_string()));
            }
            other => panic!("Expected StructureMismatch, got {other:?}"),
        }

        let full = reconcile(posts, &valid_post());
        check_structure(posts, &full).unwrap();
    }

    #[test]
    fn test_required_field() {
        let schema = test_schema();
        let posts = schema.collection("posts").unwrap();
        let storage = Storage::open_in_memory().unwrap();

        let mut data = reconcile(posts, &valid_post());
        data.insert("title".into(), json!(""));

        let result = validate_record(&schema, posts, &storage, &data, "");
        assert!(result.errors.iter().any(|e| e.contains("required")));
    }

    #[test]
    fn test_type_and_option_checks() {
        let schema = test_schema();
        let posts = schema.collection("posts").unwrap();
        let storage = Storage::open_in_memory().unwrap();

        let mut data = reconcile(posts, &valid_post());
        data.insert("title".into(), json!("ab")); // below min_length
        data.insert("views".into(), json!(-1)); // below min
        data.insert("contact".into(), json!("not-an-email"));
        data.insert("published".into(), json!("yes"));
        data.insert("published_at".into(), json!("not-a-date"));

        let result = validate_record(&schema, posts, &storage, &data, "");
        assert_eq!(result.errors.len(), 5, "errors: {:?}", result.errors);
    }

    #[test]
    fn test_datetime_accepts_rfc3339() {
        let schema = test_schema();
        let posts = schema.collection("posts").unwrap();
        let storage = Storage::open_in_memory().unwrap();

        let mut data = reconcile(posts, &valid_post());
        data.insert("published_at".into(), json!("2026-08-07T12:00:00Z"));

        let result = validate_record(&schema, posts, &storage, &data, "");
        assert!(result.is_ok(), "errors: {:?}", result.errors);
    }

    #[test]
    fn test_relation_must_reference_existing_record() {
        let schema = test_schema();
        let posts = schema.collection("posts").unwrap();
        let storage = Storage::open_in_memory().unwrap();

        let mut data = reconcile(posts, &valid_post());
        data.insert("owner_id".into(), json!("ghost"));

        let result = validate_record(&schema, posts, &storage, &data, "");
        assert!(result.errors.iter().any(|e| e.contains("missing record")));

        let mut user = Map::new();
        user.insert("id".into(), json!("u1"));
        storage.upsert_record("users", "u1", &user).unwrap();
        data.insert("owner_id".into(), json!("u1"));

        let result = validate_record(&schema, posts, &storage, &data, "");
        assert!(result.is_ok(), "errors: {:?}", result.errors);
    }

    #[test]
    fn test_relation_max_select() {
        let schema = test_schema();
        let posts = schema.collection("posts").unwrap();
        let storage = Storage::open_in_memory().unwrap();

        let mut data = reconcile(posts, &valid_post());
        data.insert("owner_id".into(), json!(["u1", "u2"]));

        let result = validate_record(&schema, posts, &storage, &data, "");
        assert!(result.errors.iter().any(|e| e.contains("at most 1")));
    }

    #[test]
    fn test_unique_field() {
        let schema = test_schema();
        let users = schema.collection("users").unwrap();
        let storage = Storage::open_in_memory().unwrap();

        let first_id = "aaaaaaaaaaaaaaaa";
        let second_id = "bbbbbbbbbbbbbbbb";
        let mut existing = Map::new();
        existing.insert("id".into(), json!(first_id));
        existing.insert("email".into(), json!("a@test.com"));
        storage.upsert_record("users", first_id, &existing).unwrap();

        let mut data = reconcile(users, &Map::new());
        data.insert("id".into(), json!(second_id));
        data.insert("email".into(), json!("a@test.com"));

        let result = validate_record(&schema, users, &storage, &data, second_id);
        assert!(result.errors.iter().any(|e| e.contains("unique")));

        // The same value on the same record is not a conflict.
        let result = validate_record(&schema, users, &storage, &existing, first_id);
        assert!(result.is_ok(), "errors: {:?}", result.errors);
    }
}
