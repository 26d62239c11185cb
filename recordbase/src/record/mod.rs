// Record - one document conforming to a collection's field set.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A document belonging to a collection. `data` is an ordered map of
/// field name to value; `data["id"]` is the externally visible identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub collection: String,
    pub data: Map<String, Value>,
}

impl Record {
    pub fn new(collection: &str, data: Map<String, Value>) -> Self {
        Record {
            collection: collection.to_string(),
            data,
        }
    }

    /// The external id, or "" when not yet assigned.
    pub fn id(&self) -> &str {
        self.data.get("id").and_then(Value::as_str).unwrap_or("")
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.data.get(field).and_then(Value::as_str)
    }

    pub fn set(&mut self, field: &str, value: Value) {
        self.data.insert(field.to_string(), value);
    }

    /// True when the field is absent, null, or an empty string.
    pub fn is_blank(&self, field: &str) -> bool {
        match self.data.get(field) {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.is_empty(),
            Some(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Record {
        let mut data = Map::new();
        data.insert("id".into(), json!("abc123"));
        data.insert("title".into(), json!("hello"));
        data.insert("draft".into(), json!(false));
        Record::new("posts", data)
    }

    #[test]
    fn test_id_accessor() {
        assert_eq!(sample().id(), "abc123");
        assert_eq!(Record::new("posts", Map::new()).id(), "");
    }

    #[test]
    fn test_is_blank() {
        let mut record = sample();
        assert!(!record.is_blank("title"));
        assert!(!record.is_blank("draft"));
        record.set("title", json!(""));
        assert!(record.is_blank("title"));
        record.set("title", Value::Null);
        assert!(record.is_blank("title"));
        assert!(record.is_blank("missing"));
    }
}
