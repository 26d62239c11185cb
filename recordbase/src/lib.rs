pub mod schema;
pub mod record;
pub mod storage;
pub mod validation;
pub mod security;
pub mod record_index;
pub mod column_index;
pub mod rules;
pub mod handlers;
pub mod events;
pub mod store;
pub mod error;

pub use error::{IndexOperation, RecordError, Result};
pub use record::Record;
pub use rules::RuleContext;
pub use schema::{Collection, CollectionField, FieldKind, Schema};
pub use store::Store;
