//! `docwatch` core: document model, normalizer, criteria compiler, snapshot differ,
//! and field registry.

pub mod context;
pub mod criteria;
pub mod diff;
pub mod literal;
pub mod normalize;
pub mod query;
pub mod schema;
pub mod types;

pub use context::{Namespace, ViewKey};
pub use criteria::{compile, compile_with_shift, Criteria};
pub use diff::{diff, ChangeSet, Modification, RecordId, Snapshot};
pub use normalize::{Normalizer, TimeShift};
pub use query::{
    compare_by, parse_index_spec, Direction, FindOptions, IndexSpec, Projection, SortKey,
    ID_INDEX_NAME,
};
pub use schema::{FieldDef, FieldRegistry};
pub use types::{document_from_json, document_to_json, lookup_path, Document, Value, ID_FIELD};
