//! Two-tier persistent cache subsystem.
//!
//! [`CodeCacheManager`] stores generated programs keyed by four embedded views
//! of the turn (goal, locator summary, user task, URL); [`DomCacheManager`]
//! stores locator-strategy lists keyed by URL, compacted DOM, and task intent
//! with a TTL and a hard task-intent gate. Both share [`CacheCore`]: lazy
//! dimension probing, idempotent collection ensure with drop-and-recreate on
//! schema mismatch, and a single-worker write-behind queue so public `save`
//! calls return immediately while inserts stay FIFO.

mod base;
mod code;
mod dom;
mod failure_log;
mod score;
mod substitute;
mod url_norm;
mod write_behind;

pub use base::CacheCore;
pub use code::{is_navigation_code, CodeCacheHit, CodeCacheManager, CodeSaveRequest};
pub use dom::{compact_dom, dom_hash, DomCacheHit, DomCacheManager};
pub use failure_log::FailureLog;
pub use score::normalize_score;
pub use substitute::{apply_param_diffs, param_diffs, ParamDiff};
pub use url_norm::normalize_url;
pub use write_behind::WriteBehind;
