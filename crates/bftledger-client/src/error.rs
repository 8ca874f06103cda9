//! Client errors.

use std::time::Duration;

use bftledger_link::LinkError;
use bftledger_types::{ProcessId, RequestId};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transfer amount must be positive, got {0}")]
    InvalidAmount(i64),

    #[error("source and destination are the same account")]
    SelfTransfer,

    #[error("process {0} is not in the membership")]
    UnknownProcess(ProcessId),

    #[error("no {needed} matching replies to request {request_id} within {timeout:?}")]
    Timeout {
        request_id: RequestId,
        needed: usize,
        timeout: Duration,
    },

    #[error(transparent)]
    Link(#[from] LinkError),
}
