use std::time::Duration;

use bftledger_link::LinkError;
use bftledger_types::{MembershipError, ProcessId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("failed to bind loopback socket: {0}")]
    Bind(#[from] std::io::Error),

    #[error("invalid cluster shape: {0}")]
    Membership(#[from] MembershipError),

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error("process {0} is not a client of this cluster")]
    UnknownClient(ProcessId),

    #[error("process {0} is not a node of this cluster")]
    UnknownNode(ProcessId),

    #[error("node {node} decided fewer than {count} instances within {within:?}")]
    NotDecided {
        node: ProcessId,
        count: u64,
        within: Duration,
    },
}
