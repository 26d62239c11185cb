use crate::column_index::ColumnIndexer;
use crate::error::{RecordError, Result};
use crate::events::{EventBus, RecordAction, RecordEvent};
use crate::handlers;
use crate::record::Record;
use crate::record_index;
use crate::rules::{self, RuleContext};
use crate::schema::{self, Collection, Operation, Schema, DEFAULT_ID_LENGTH, SUPERUSER_ONLY};
use crate::security;
use crate::storage::Storage;
use crate::validation;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::Path;

/// Cascade-delete recursion bound; a cyclic relation graph is cut off by
/// the visited set first, this is the backstop.
const MAX_CASCADE_DEPTH: usize = 32;

/// The record engine: schema registry + storage + lifecycle orchestration.
///
/// Save and delete are each one transaction; lifecycle events fire
/// synchronously after commit.
pub struct Store {
    schema: Schema,
    storage: Storage,
    events: EventBus,
}

impl Store {
    pub fn open(path: &Path, schema: Schema) -> Result<Self> {
        Ok(Store {
            schema,
            storage: Storage::open(path)?,
            events: EventBus::new(),
        })
    }

    pub fn open_in_memory(schema: Schema) -> Result<Self> {
        Ok(Store {
            schema,
            storage: Storage::open_in_memory()?,
            events: EventBus::new(),
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn subscribe<F>(&mut self, callback: F)
    where
        F: Fn(&RecordEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(callback);
    }

    /// Register a collection, linting its api rules against the normalized
    /// field set first. A bad rule is reported as a field-level validation
    /// problem and nothing is registered.
    pub fn register_collection(&mut self, mut collection: Collection) -> Result<()> {
        schema::normalize(&mut collection)?;
        for (_, rule) in collection.api_rules.entries() {
            rules::lint(rule, &collection)?;
        }
        self.schema.register(collection)
    }

    // ── Record lifecycle ─────────────────────────────────────────

    /// Create a record: assign the external id, run the base and
    /// kind-specific handlers, reconcile against the schema, validate, and
    /// write the row plus its secondary-index set in one transaction.
    pub fn create_record(&self, collection_name: &str, data: Map<String, Value>) -> Result<Record> {
        let collection = self.schema.collection(collection_name)?.clone();
        let mut record = Record::new(collection_name, data);

        if record.is_blank("id") {
            record.set("id", Value::String(self.generate_id(&collection)));
        }
        if self.storage.record_exists(&collection.name, record.id())? {
            return Err(RecordError::Validation(format!(
                "Record '{}' already exists in '{}'",
                record.id(),
                collection.name
            )));
        }

        self.run_save_pipeline(&collection, &mut record, true)?;
        self.persist(&record)?;
        self.events
            .emit(RecordAction::Created, &collection.name, record.id());
        Ok(record)
    }

    /// Update a record. Fields absent from the submitted form keep their
    /// previous value (loss-free merge); the original "created" value is
    /// re-pinned before handlers run.
    pub fn update_record(
        &self,
        collection_name: &str,
        id: &str,
        data: Map<String, Value>,
    ) -> Result<Record> {
        let collection = self.schema.collection(collection_name)?.clone();
        let previous = self.load_record(collection_name, id)?;

        let mut merged = data;
        for field in &collection.fields {
            if !merged.contains_key(&field.name) {
                if let Some(value) = previous.get(&field.name) {
                    merged.insert(field.name.clone(), value.clone());
                }
            }
        }
        merged.insert("id".into(), Value::String(previous.id().to_string()));
        if let Some(created) = previous.get("created") {
            merged.insert("created".into(), created.clone());
        }

        let mut record = Record::new(collection_name, merged);
        self.run_save_pipeline(&collection, &mut record, false)?;
        self.persist(&record)?;
        self.events
            .emit(RecordAction::Updated, &collection.name, record.id());
        Ok(record)
    }

    /// Delete a record. Inside one transaction: scan the secondary index
    /// for inbound references, abort on any non-cascading one, recursively
    /// delete cascading referencers depth-first, then remove the index
    /// rows and the row itself. Any failure rolls everything back.
    pub fn delete_record(&self, collection_name: &str, id: &str) -> Result<()> {
        let collection = self.schema.collection(collection_name)?;
        if self.storage.get_record(&collection.name, id)?.is_none() {
            return Err(RecordError::NotFound {
                collection: collection.name.clone(),
                id: id.to_string(),
            });
        }

        self.storage.begin_transaction()?;
        let mut visited = HashSet::new();
        let outcome = self.delete_tree(collection_name, id, &mut visited, 0);
        match outcome {
            Ok(deleted) => {
                self.storage.commit_transaction()?;
                for (deleted_collection, deleted_id) in deleted {
                    self.events
                        .emit(RecordAction::Deleted, &deleted_collection, &deleted_id);
                }
                Ok(())
            }
            Err(e) => {
                let _ = self.storage.rollback_transaction();
                Err(e)
            }
        }
    }

    /// Fetch one record, running the retrieval hooks.
    pub fn record(&self, collection_name: &str, id: &str) -> Result<Record> {
        let collection = self.schema.collection(collection_name)?;
        let mut record = self.load_record(collection_name, id)?;
        self.run_retrieved(collection, &mut record)?;
        Ok(record)
    }

    /// Fetch all records of a collection, running the retrieval hooks.
    pub fn records(&self, collection_name: &str) -> Result<Vec<Record>> {
        let collection = self.schema.collection(collection_name)?;
        let rows = self.storage.list_records(&collection.name)?;

        let mut records = Vec::new();
        for row in rows {
            let mut record = Record::new(&collection.name, row.parse_data()?);
            self.run_retrieved(collection, &mut record)?;
            records.push(record);
        }
        Ok(records)
    }

    // ── Rule-gated operations ────────────────────────────────────

    pub fn create_record_as(
        &self,
        collection_name: &str,
        data: Map<String, Value>,
        ctx: &RuleContext,
    ) -> Result<Record> {
        let collection = self.schema.collection(collection_name)?;
        let rule = collection.api_rules.rule_for(Operation::Create);
        if !rules::authorize(Operation::Create, rule, ctx, &data) {
            return Err(RecordError::Forbidden {
                collection: collection.name.clone(),
                id: String::new(),
            });
        }
        self.create_record(collection_name, data)
    }

    pub fn view_record_as(
        &self,
        collection_name: &str,
        id: &str,
        ctx: &RuleContext,
    ) -> Result<Record> {
        let record = self.record(collection_name, id)?;
        self.authorize_existing(Operation::View, collection_name, &record, ctx)?;
        Ok(record)
    }

    pub fn update_record_as(
        &self,
        collection_name: &str,
        id: &str,
        data: Map<String, Value>,
        ctx: &RuleContext,
    ) -> Result<Record> {
        let existing = self.load_record(collection_name, id)?;
        self.authorize_existing(Operation::Update, collection_name, &existing, ctx)?;
        self.update_record(collection_name, id, data)
    }

    pub fn delete_record_as(
        &self,
        collection_name: &str,
        id: &str,
        ctx: &RuleContext,
    ) -> Result<()> {
        let existing = self.load_record(collection_name, id)?;
        self.authorize_existing(Operation::Delete, collection_name, &existing, ctx)?;
        self.delete_record(collection_name, id)
    }

    /// List records visible to the context. The list rule is interpolated
    /// into a filter (request values substituted as literals) and
    /// AND-combined with the caller's filter, so unauthorized rows are
    /// excluded rather than individually checked.
    pub fn query_records(
        &self,
        collection_name: &str,
        ctx: &RuleContext,
        filter: &str,
    ) -> Result<Vec<Record>> {
        let collection = self.schema.collection(collection_name)?;

        let rule = if ctx.superuser {
            ""
        } else {
            collection
                .api_rules
                .rule_for(Operation::List)
                .unwrap_or(SUPERUSER_ONLY)
        };
        if rule == SUPERUSER_ONLY {
            return Ok(Vec::new());
        }

        let combined = rules::combine_filters(rule, filter);
        let interpolated = rules::interpolate(&combined, ctx)?;
        let compiled = rules::compile(&interpolated)?;

        let rows = self.storage.list_records(&collection.name)?;
        let mut records = Vec::new();
        for row in rows {
            let data = row.parse_data()?;
            if !compiled.evaluate(ctx, &data) {
                continue;
            }
            let mut record = Record::new(&collection.name, data);
            self.run_retrieved(collection, &mut record)?;
            records.push(record);
        }
        Ok(records)
    }

    // ── Administrative column indexes ────────────────────────────

    /// Create a physical index over logical fields. Maintenance operation:
    /// issues schema DDL and must not run inline with record writes.
    pub fn create_column_index(
        &mut self,
        collection_name: &str,
        field_names: &[&str],
        unique: bool,
    ) -> Result<String> {
        let indexer = ColumnIndexer::sqlite(&self.storage);
        indexer.create_index(&mut self.schema, collection_name, field_names, unique)
    }

    pub fn drop_column_index(&mut self, collection_name: &str, index_name: &str) -> Result<()> {
        let indexer = ColumnIndexer::sqlite(&self.storage);
        indexer.drop_index(&mut self.schema, collection_name, index_name)
    }

    pub fn has_column_index(&self, index_name: &str) -> Result<bool> {
        ColumnIndexer::sqlite(&self.storage).has_index(index_name)
    }

    // ── Internals ────────────────────────────────────────────────

    fn load_record(&self, collection_name: &str, id: &str) -> Result<Record> {
        let row = self
            .storage
            .get_record(collection_name, id)?
            .ok_or_else(|| RecordError::NotFound {
                collection: collection_name.to_string(),
                id: id.to_string(),
            })?;
        Ok(Record::new(collection_name, row.parse_data()?))
    }

    fn generate_id(&self, collection: &Collection) -> String {
        let (min, max) = collection
            .field("id")
            .map(|f| {
                (
                    f.options.min_length.unwrap_or(DEFAULT_ID_LENGTH),
                    f.options.max_length.unwrap_or(DEFAULT_ID_LENGTH),
                )
            })
            .unwrap_or((DEFAULT_ID_LENGTH, DEFAULT_ID_LENGTH));
        security::random_string_in(min, max)
    }

    /// Handlers, then schema reconciliation, then validation. Shared by
    /// create and update.
    fn run_save_pipeline(
        &self,
        collection: &Collection,
        record: &mut Record,
        is_create: bool,
    ) -> Result<()> {
        handlers::base_handler().before_save(collection, record, is_create)?;
        if let Some(handler) = handlers::handler_for(collection.kind) {
            handler.before_save(collection, record, is_create)?;
        }

        record.data = validation::reconcile(collection, &record.data);
        validation::check_structure(collection, &record.data)?;
        validation::ensure_valid(
            &self.schema,
            collection,
            &self.storage,
            &record.data,
            record.id(),
        )?;
        Ok(())
    }

    fn run_retrieved(&self, collection: &Collection, record: &mut Record) -> Result<()> {
        handlers::base_handler().on_retrieved(collection, record)?;
        if let Some(handler) = handlers::handler_for(collection.kind) {
            handler.on_retrieved(collection, record)?;
        }
        Ok(())
    }

    /// Row write + secondary-index resync, all-or-nothing.
    fn persist(&self, record: &Record) -> Result<()> {
        self.storage.begin_transaction()?;
        let outcome = self
            .storage
            .upsert_record(&record.collection, record.id(), &record.data)
            .and_then(|_| record_index::sync_indexes(&self.storage, &self.schema, record));
        match outcome {
            Ok(()) => self.storage.commit_transaction(),
            Err(e) => {
                let _ = self.storage.rollback_transaction();
                Err(e)
            }
        }
    }

    /// Depth-first delete of a record and every cascading referencer.
    /// Traversal order is deterministic: referencing groups sorted by
    /// (collection, field), record ids ascending. Returns the deleted
    /// (collection, id) pairs in deletion order.
    fn delete_tree(
        &self,
        collection_name: &str,
        id: &str,
        visited: &mut HashSet<(String, String)>,
        depth: usize,
    ) -> Result<Vec<(String, String)>> {
        if !visited.insert((collection_name.to_string(), id.to_string())) {
            return Ok(Vec::new());
        }
        if depth > MAX_CASCADE_DEPTH {
            return Err(RecordError::Other(format!(
                "Cascade delete exceeded depth {MAX_CASCADE_DEPTH} at {collection_name}/{id}"
            )));
        }

        let collection = self.schema.collection(collection_name)?;
        let Some(row) = self.storage.get_record(collection_name, id)? else {
            return Ok(Vec::new());
        };
        let record = Record::new(collection_name, row.parse_data()?);

        handlers::base_handler().before_delete(collection, &record)?;
        if let Some(handler) = handlers::handler_for(collection.kind) {
            handler.before_delete(collection, &record)?;
        }

        let mut deleted = Vec::new();
        let groups = record_index::referencing_groups(&self.storage, collection_name, id)?;
        for group in groups {
            let cascade = self
                .schema
                .collection(&group.collection)?
                .field(&group.field)
                .map(|f| f.options.cascade_delete)
                .unwrap_or(false);

            if !cascade {
                return Err(RecordError::ReferentialIntegrity {
                    collection: group.collection,
                    field: group.field,
                    count: group.record_ids.len(),
                });
            }
            for record_id in &group.record_ids {
                deleted.extend(self.delete_tree(&group.collection, record_id, visited, depth + 1)?);
            }
        }

        record_index::clear_record(&self.storage, collection_name, id)?;
        self.storage.delete_record(collection_name, id)?;
        deleted.push((collection_name.to_string(), id.to_string()));
        Ok(deleted)
    }

    fn authorize_existing(
        &self,
        op: Operation,
        collection_name: &str,
        record: &Record,
        ctx: &RuleContext,
    ) -> Result<()> {
        let collection = self.schema.collection(collection_name)?;
        let rule = collection.api_rules.rule_for(op);
        if rules::authorize(op, rule, ctx, &record.data) {
            Ok(())
        } else {
            Err(RecordError::Forbidden {
                collection: collection.name.clone(),
                id: record.id().to_string(),
            })
        }
    }
}
