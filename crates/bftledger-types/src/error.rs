//! Error types for membership validation and transaction decoding.

use thiserror::Error;

use crate::ProcessId;

/// A membership that cannot run the protocol.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MembershipError {
    #[error("membership has no nodes")]
    NoNodes,

    /// Node ids must be exactly `1..=n` in order for round-robin leader
    /// election to name every node.
    #[error("node at position {position} has id {found}, expected {expected}")]
    NodeIdOutOfSequence {
        position: usize,
        expected: ProcessId,
        found: ProcessId,
    },

    #[error("process id {0} is listed more than once")]
    DuplicateId(ProcessId),
}

/// A transaction value that does not decode.
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("malformed transaction JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("transfer is missing its {0}")]
    MissingField(&'static str),
}
