use serde::{Deserialize, Serialize};

/// Sentinel rule value: only a privileged (superuser) context passes.
pub const SUPERUSER_ONLY: &str = "SUPERUSER_ONLY";

/// Default length of generated external record ids.
pub const DEFAULT_ID_LENGTH: usize = 16;

/// Collection behavior variant. Selects which type handler composes with
/// the base handler during the record lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CollectionKind {
    #[default]
    Base,
    Auth,
    View,
}

/// Field type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Email,
    Number,
    Bool,
    Datetime,
    RichText,
    File,
    Relation,
}

/// A record operation gated by an api rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    List,
    View,
    Create,
    Update,
    Delete,
}

/// Per-operation rule expressions. `None` means "not yet configured" and is
/// filled with kind-specific defaults on registration; after that every
/// operation carries a rule string (possibly empty = allow, or the
/// `SUPERUSER_ONLY` sentinel).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiRules {
    #[serde(default)]
    pub list: Option<String>,
    #[serde(default)]
    pub view: Option<String>,
    #[serde(default)]
    pub create: Option<String>,
    #[serde(default)]
    pub update: Option<String>,
    #[serde(default)]
    pub delete: Option<String>,
}

impl ApiRules {
    /// Fill any unset rule with the default for the collection kind.
    pub fn apply_defaults(&mut self, kind: CollectionKind) {
        let owner = "id = @request.auth.id";
        let (list, view, create, update, delete) = match kind {
            CollectionKind::Base => ("", "", "", "", ""),
            CollectionKind::Auth => (owner, owner, "", owner, owner),
            CollectionKind::View => ("", "", SUPERUSER_ONLY, SUPERUSER_ONLY, SUPERUSER_ONLY),
        };
        self.list.get_or_insert_with(|| list.to_string());
        self.view.get_or_insert_with(|| view.to_string());
        self.create.get_or_insert_with(|| create.to_string());
        self.update.get_or_insert_with(|| update.to_string());
        self.delete.get_or_insert_with(|| delete.to_string());
    }

    /// The configured rule for an operation. `None` only before defaults
    /// were applied; callers treat it as deny.
    pub fn rule_for(&self, op: Operation) -> Option<&str> {
        match op {
            Operation::List => self.list.as_deref(),
            Operation::View => self.view.as_deref(),
            Operation::Create => self.create.as_deref(),
            Operation::Update => self.update.as_deref(),
            Operation::Delete => self.delete.as_deref(),
        }
    }

    /// All configured (operation, rule) pairs, for lint sweeps.
    pub fn entries(&self) -> Vec<(Operation, &str)> {
        [
            (Operation::List, &self.list),
            (Operation::View, &self.view),
            (Operation::Create, &self.create),
            (Operation::Update, &self.update),
            (Operation::Delete, &self.delete),
        ]
        .into_iter()
        .filter_map(|(op, rule)| rule.as_deref().map(|r| (op, r)))
        .collect()
    }
}

/// Type-specific field options. Flat optional fields; which ones apply
/// depends on the field kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldOptions {
    /// Text: minimum value length (also the lower bound of the id-length draw).
    #[serde(default)]
    pub min_length: Option<usize>,
    /// Text: maximum value length (also the upper bound of the id-length draw).
    #[serde(default)]
    pub max_length: Option<usize>,
    /// Text: values must match this regex.
    #[serde(default)]
    pub pattern: Option<String>,
    /// Text: synthesize a matching value when none was supplied.
    #[serde(default)]
    pub autogenerate_pattern: Option<String>,
    /// Number: inclusive bounds.
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    /// Relation: name of the referenced collection.
    #[serde(default)]
    pub target: Option<String>,
    /// Relation: maximum number of referenced ids (1 = single-valued).
    #[serde(default)]
    pub max_select: Option<usize>,
    /// Relation: deleting a referenced record also deletes the referencing
    /// record instead of blocking the delete.
    #[serde(default)]
    pub cascade_delete: bool,
    /// File: maximum size in bytes.
    #[serde(default)]
    pub max_size: Option<u64>,
    /// File: accepted mime types.
    #[serde(default)]
    pub mime_types: Vec<String>,
    /// Email: rejected domains.
    #[serde(default)]
    pub except_domains: Vec<String>,
}

/// A typed, named schema element within a collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionField {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub order: usize,
    pub name: String,
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub indexed: bool,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub options: FieldOptions,
}

impl CollectionField {
    pub fn new(name: &str, kind: FieldKind) -> Self {
        CollectionField {
            id: String::new(),
            order: 0,
            name: name.to_string(),
            kind,
            required: false,
            unique: false,
            indexed: false,
            locked: false,
            hidden: false,
            options: FieldOptions::default(),
        }
    }

    /// The reserved external-key field every collection carries.
    pub fn system_id() -> Self {
        let mut field = CollectionField::new("id", FieldKind::Text);
        field.locked = true;
        field.options.min_length = Some(DEFAULT_ID_LENGTH);
        field.options.max_length = Some(DEFAULT_ID_LENGTH);
        field
    }

    pub fn system_timestamp(name: &str) -> Self {
        let mut field = CollectionField::new(name, FieldKind::Datetime);
        field.locked = true;
        field
    }

    pub fn system_email() -> Self {
        let mut field = CollectionField::new("email", FieldKind::Email);
        field.unique = true;
        field.locked = true;
        field
    }

    pub fn system_password() -> Self {
        let mut field = CollectionField::new("password", FieldKind::Text);
        field.locked = true;
        field.hidden = true;
        field
    }

    /// Single-valued relation: at most one referenced id.
    pub fn is_single_relation(&self) -> bool {
        self.options.max_select.unwrap_or(1) <= 1
    }
}

/// Collection-level, kind-specific options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionOptions {
    /// Auth: minimum accepted plaintext password length.
    #[serde(default = "default_min_password_length")]
    pub min_password_length: usize,
    /// View: label of the backing projection.
    #[serde(default)]
    pub view_query: Option<String>,
}

fn default_min_password_length() -> usize {
    8
}

impl Default for CollectionOptions {
    fn default() -> Self {
        CollectionOptions {
            min_password_length: default_min_password_length(),
            view_query: None,
        }
    }
}

/// A logical table: named, typed field set plus per-operation access rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collection {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub project_id: String,
    pub name: String,
    #[serde(default)]
    pub kind: CollectionKind,
    #[serde(default)]
    pub api_rules: ApiRules,
    #[serde(default)]
    pub options: CollectionOptions,
    #[serde(default)]
    pub fields: Vec<CollectionField>,
}

impl Collection {
    pub fn new(name: &str, kind: CollectionKind) -> Self {
        Collection {
            id: String::new(),
            project_id: String::new(),
            name: name.to_string(),
            kind,
            api_rules: ApiRules::default(),
            options: CollectionOptions::default(),
            fields: Vec::new(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&CollectionField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut CollectionField> {
        self.fields.iter_mut().find(|f| f.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn relation_fields(&self) -> impl Iterator<Item = &CollectionField> {
        self.fields.iter().filter(|f| f.kind == FieldKind::Relation)
    }

    pub fn is_auth(&self) -> bool {
        self.kind == CollectionKind::Auth
    }

    pub fn is_view(&self) -> bool {
        self.kind == CollectionKind::View
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_rules_defaults_base() {
        let mut rules = ApiRules::default();
        rules.apply_defaults(CollectionKind::Base);
        assert_eq!(rules.rule_for(Operation::List), Some(""));
        assert_eq!(rules.rule_for(Operation::Delete), Some(""));
    }

    #[test]
    fn test_api_rules_defaults_auth() {
        let mut rules = ApiRules::default();
        rules.apply_defaults(CollectionKind::Auth);
        assert_eq!(rules.rule_for(Operation::Create), Some(""));
        assert_eq!(rules.rule_for(Operation::View), Some("id = @request.auth.id"));
    }

    #[test]
    fn test_api_rules_defaults_view_lock_mutation() {
        let mut rules = ApiRules::default();
        rules.apply_defaults(CollectionKind::View);
        assert_eq!(rules.rule_for(Operation::List), Some(""));
        assert_eq!(rules.rule_for(Operation::Create), Some(SUPERUSER_ONLY));
        assert_eq!(rules.rule_for(Operation::Update), Some(SUPERUSER_ONLY));
    }

    #[test]
    fn test_api_rules_defaults_keep_existing() {
        let mut rules = ApiRules {
            list: Some("status = 'published'".into()),
            ..ApiRules::default()
        };
        rules.apply_defaults(CollectionKind::Base);
        assert_eq!(rules.rule_for(Operation::List), Some("status = 'published'"));
        assert_eq!(rules.rule_for(Operation::View), Some(""));
    }

    #[test]
    fn test_single_relation_default() {
        let field = CollectionField::new("owner", FieldKind::Relation);
        assert!(field.is_single_relation());

        let mut multi = CollectionField::new("tags", FieldKind::Relation);
        multi.options.max_select = Some(5);
        assert!(!multi.is_single_relation());
    }
}
