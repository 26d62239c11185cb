// Collection type handlers - per-kind lifecycle hooks composed into the
// record lifecycle. The base handler always runs; at most one kind-specific
// handler composes after it, never replacing it. Dispatch is resolved once
// per operation from the collection kind.

use crate::error::{RecordError, Result};
use crate::record::Record;
use crate::schema::{Collection, CollectionKind, FieldKind};
use crate::security;
use chrono::{SecondsFormat, Utc};
use serde_json::Value;

/// Capability set every handler may implement. Defaults are no-ops.
pub trait TypeHandler {
    fn before_save(
        &self,
        _collection: &Collection,
        _record: &mut Record,
        _is_create: bool,
    ) -> Result<()> {
        Ok(())
    }

    fn before_delete(&self, _collection: &Collection, _record: &Record) -> Result<()> {
        Ok(())
    }

    fn on_retrieved(&self, _collection: &Collection, _record: &mut Record) -> Result<()> {
        Ok(())
    }
}

/// Always runs, independent of collection kind: timestamps and
/// autogenerate patterns.
pub struct BaseHandler;

/// Password hashing for auth collections.
pub struct AuthHandler;

/// Read-only projection: every mutation is rejected.
pub struct ViewHandler;

static BASE: BaseHandler = BaseHandler;
static AUTH: AuthHandler = AuthHandler;
static VIEW: ViewHandler = ViewHandler;

pub fn base_handler() -> &'static dyn TypeHandler {
    &BASE
}

/// The kind-specific handler composed after the base handler, if any.
pub fn handler_for(kind: CollectionKind) -> Option<&'static dyn TypeHandler> {
    match kind {
        CollectionKind::Base => None,
        CollectionKind::Auth => Some(&AUTH),
        CollectionKind::View => Some(&VIEW),
    }
}

pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl TypeHandler for BaseHandler {
    fn before_save(
        &self,
        collection: &Collection,
        record: &mut Record,
        is_create: bool,
    ) -> Result<()> {
        if collection.has_field("created") && is_create && record.is_blank("created") {
            record.set("created", Value::String(now_timestamp()));
        }
        if collection.has_field("updated") {
            record.set("updated", Value::String(now_timestamp()));
        }

        for field in &collection.fields {
            if field.kind != FieldKind::Text {
                continue;
            }
            let Some(pattern) = field.options.autogenerate_pattern.clone() else {
                continue;
            };
            if record.is_blank(&field.name) {
                let value = security::generate_from_pattern(&pattern)?;
                record.set(&field.name, Value::String(value));
            }
        }

        Ok(())
    }
}

impl TypeHandler for AuthHandler {
    fn before_save(
        &self,
        collection: &Collection,
        record: &mut Record,
        is_create: bool,
    ) -> Result<()> {
        let min_length = collection.options.min_password_length;

        // A non-empty password_new re-hashes on any save; the submitted
        // password field itself is plaintext only on create.
        let plaintext = match record.get_str("password_new") {
            Some(new_password) if !new_password.is_empty() => Some(new_password.to_string()),
            _ if is_create => record
                .get_str("password")
                .filter(|p| !p.is_empty())
                .map(str::to_string),
            _ => None,
        };

        if let Some(plaintext) = plaintext {
            if plaintext.chars().count() < min_length {
                return Err(RecordError::Validation(format!(
                    "Password must be at least {min_length} characters"
                )));
            }
            record.set("password", Value::String(security::hash_password(&plaintext)));
        }

        Ok(())
    }
}

impl TypeHandler for ViewHandler {
    fn before_save(
        &self,
        collection: &Collection,
        _record: &mut Record,
        _is_create: bool,
    ) -> Result<()> {
        Err(RecordError::Validation(format!(
            "Collection '{}' is a read-only view",
            collection.name
        )))
    }

    fn before_delete(&self, collection: &Collection, _record: &Record) -> Result<()> {
        Err(RecordError::Validation(format!(
            "Collection '{}' is a read-only view",
            collection.name
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schema;
    use serde_json::{json, Map};

    fn schema() -> Schema {
        crate::schema::parse_schema_str(
            r#"
collections:
  - name: users
    kind: auth
  - name: stats
    kind: view
  - name: orders
    fields:
      - { name: reference, kind: text, options: { autogenerate_pattern: '[A-Z]{2}\d{6}' } }
"#,
        )
        .unwrap()
    }

    fn empty_record(collection: &str) -> Record {
        Record::new(collection, Map::new())
    }

    #[test]
    fn test_base_sets_timestamps_on_create() {
        let schema = schema();
        let orders = schema.collection("orders").unwrap();
        let mut record = empty_record("orders");

        base_handler().before_save(orders, &mut record, true).unwrap();
        assert!(!record.is_blank("created"));
        assert!(!record.is_blank("updated"));
        chrono::DateTime::parse_from_rfc3339(record.get_str("created").unwrap()).unwrap();
    }

    #[test]
    fn test_base_refreshes_only_updated_on_update() {
        let schema = schema();
        let orders = schema.collection("orders").unwrap();
        let mut record = empty_record("orders");
        record.set("created", json!("2020-01-01T00:00:00Z"));

        base_handler().before_save(orders, &mut record, false).unwrap();
        assert_eq!(record.get_str("created"), Some("2020-01-01T00:00:00Z"));
        assert!(!record.is_blank("updated"));
    }

    #[test]
    fn test_base_autogenerates_pattern_fields() {
        let schema = schema();
        let orders = schema.collection("orders").unwrap();
        let mut record = empty_record("orders");

        base_handler().before_save(orders, &mut record, true).unwrap();
        let reference = record.get_str("reference").unwrap();
        assert!(regex::Regex::new(r"^[A-Z]{2}\d{6}$").unwrap().is_match(reference));

        // A supplied value is left alone.
        let mut record = empty_record("orders");
        record.set("reference", json!("XX000000"));
        base_handler().before_save(orders, &mut record, true).unwrap();
        assert_eq!(record.get_str("reference"), Some("XX000000"));
    }

    #[test]
    fn test_auth_hashes_password_on_create() {
        let schema = schema();
        let users = schema.collection("users").unwrap();
        let mut record = empty_record("users");
        record.set("password", json!("hunter2hunter2"));

        handler_for(CollectionKind::Auth)
            .unwrap()
            .before_save(users, &mut record, true)
            .unwrap();

        let stored = record.get_str("password").unwrap();
        assert_ne!(stored, "hunter2hunter2");
        assert!(security::verify_password("hunter2hunter2", stored));
    }

    #[test]
    fn test_auth_password_new_rehashes_on_update() {
        let schema = schema();
        let users = schema.collection("users").unwrap();
        let mut record = empty_record("users");
        record.set("password", json!("old-stored-hash"));
        record.set("password_new", json!("fresh-password"));

        handler_for(CollectionKind::Auth)
            .unwrap()
            .before_save(users, &mut record, false)
            .unwrap();

        let stored = record.get_str("password").unwrap();
        assert!(security::verify_password("fresh-password", stored));
    }

    #[test]
    fn test_auth_ignores_stored_hash_on_update() {
        let schema = schema();
        let users = schema.collection("users").unwrap();
        let mut record = empty_record("users");
        record.set("password", json!("already$a$hash"));

        handler_for(CollectionKind::Auth)
            .unwrap()
            .before_save(users, &mut record, false)
            .unwrap();
        assert_eq!(record.get_str("password"), Some("already$a$hash"));
    }

    #[test]
    fn test_auth_rejects_short_password() {
        let schema = schema();
        let users = schema.collection("users").unwrap();
        let mut record = empty_record("users");
        record.set("password", json!("short"));

        let err = handler_for(CollectionKind::Auth)
            .unwrap()
            .before_save(users, &mut record, true)
            .unwrap_err();
        assert!(err.to_string().contains("at least"));
    }

    #[test]
    fn test_view_rejects_mutation() {
        let schema = schema();
        let stats = schema.collection("stats").unwrap();
        let mut record = empty_record("stats");

        let handler = handler_for(CollectionKind::View).unwrap();
        assert!(handler.before_save(stats, &mut record, true).is_err());
        assert!(handler.before_delete(stats, &record).is_err());
    }

    #[test]
    fn test_base_collection_has_no_extra_handler() {
        assert!(handler_for(CollectionKind::Base).is_none());
    }

    #[test]
    fn test_on_retrieved_defaults_to_noop() {
        let schema = schema();
        let users = schema.collection("users").unwrap();
        let mut record = empty_record("users");
        record.set("email", json!("a@test.com"));

        handler_for(CollectionKind::Auth)
            .unwrap()
            .on_retrieved(users, &mut record)
            .unwrap();
        assert_eq!(record.get_str("email"), Some("a@test.com"));
    }
}
