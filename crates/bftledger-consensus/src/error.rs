//! Engine and runtime errors.

use bftledger_link::LinkError;
use bftledger_types::InstanceId;
use thiserror::Error;

/// Violations of the consensus core's own bookkeeping.
///
/// Peer misbehaviour never surfaces as an error; such messages are
/// dropped and logged.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("instance {0} is unknown")]
    UnknownInstance(InstanceId),

    #[error("instance {0} has not committed")]
    NotCommitted(InstanceId),

    #[error("ledger slot {slot} written out of order (next free slot is {next})")]
    OutOfOrder { slot: usize, next: usize },
}

#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}
