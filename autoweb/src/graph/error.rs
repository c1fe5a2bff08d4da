//! Graph compilation error.

use thiserror::Error;

/// Error when compiling a state graph.
///
/// With goto-driven routing the only static checks are that an entry node is
/// set, every interrupt id names a registered node, and node ids are unique.
#[derive(Debug, Error)]
pub enum CompilationError {
    /// The entry node id was not registered via `add_node`.
    #[error("entry node not found: {0}")]
    EntryNotFound(String),

    /// No entry node was declared.
    #[error("graph must declare an entry node")]
    MissingEntry,

    /// An interrupt list references an unknown node id.
    #[error("interrupt references unknown node: {0}")]
    InterruptUnknownNode(String),

    /// Two nodes registered under the same id.
    #[error("duplicate node id: {0}")]
    DuplicateNode(String),
}
