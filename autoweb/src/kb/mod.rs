//! Knowledge-base ingestion and query.
//!
//! [`KnowledgeWriter`] buffers scraped rows, infers numeric types for dynamic
//! metadata fields, applies a batch-level percent-consistency check, registers
//! every dynamic field in the [`FieldRegistry`] *before* the insert it
//! describes, and drains through a single-worker queue. [`KbQuery`] grounds an
//! LLM query analyzer on the registry listing and answers questions over the
//! stored documents.

mod infer;
mod query;
mod registry;
mod writer;

pub use infer::{infer_dynamic_value, DynValue};
pub use query::{KbQuery, QueryPlan};
pub use registry::{
    FieldMeta, FieldRegistry, FieldType, JsonFileStore, RedisStore, RegistryData, RegistryStore,
    FIXED_FILTERABLE_FIELDS,
};
pub use writer::{KbItem, KnowledgeWriter};
