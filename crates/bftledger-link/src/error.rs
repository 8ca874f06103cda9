//! Link error types.

use bftledger_types::{MessageId, ProcessId};
use bftledger_wire::WireError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    #[error("process {0} is not a member")]
    UnknownDestination(ProcessId),

    #[error("cannot resolve address {address} of process {process}")]
    UnresolvedAddress { process: ProcessId, address: String },

    /// Retransmission gave up before the destination acknowledged.
    #[error("message {message_id} to {destination} unacknowledged after {attempts} attempts")]
    Unacknowledged {
        destination: ProcessId,
        message_id: MessageId,
        attempts: u32,
    },

    #[error("delivery task was cancelled")]
    Cancelled,
}

/// Result type for link operations.
pub type Result<T> = std::result::Result<T, LinkError>;
