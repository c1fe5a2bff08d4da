//! Vector gateway errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VectorError {
    /// Transport-level failure (connect, timeout, RPC).
    #[error("vector transport: {0}")]
    Transport(String),

    /// The store rejected the request (schema mismatch, bad params).
    #[error("vector request rejected: {0}")]
    Rejected(String),

    /// Response could not be decoded.
    #[error("vector response decode: {0}")]
    Decode(String),

    /// Collection missing where one was required.
    #[error("collection not found: {0}")]
    CollectionNotFound(String),
}

impl VectorError {
    /// Message used for retryability classification.
    pub fn message(&self) -> String {
        self.to_string()
    }
}
