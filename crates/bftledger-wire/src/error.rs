//! Error types for envelope authentication and decoding.

use bftledger_types::{ProcessId, TransactionError};
use thiserror::Error;

use crate::MessageType;

/// Why an envelope failed authentication.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    /// The envelope names a public key other than the one on record for
    /// its sender.
    #[error("envelope key does not match the key on record for the sender")]
    WrongKey,

    #[error("signature does not verify")]
    WrongSignature,

    #[error("sender {0} is not a member")]
    UnknownSender(ProcessId),
}

/// Malformed envelopes and payloads.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The signed payload disagrees with the envelope header.
    #[error("envelope header does not match its payload")]
    HeaderMismatch,
}

/// Why an embedded client request was rejected.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("sender {0} is not a client")]
    UnknownClient(ProcessId),

    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("malformed request: {0}")]
    Wire(#[from] WireError),

    #[error("{0} is not a client request")]
    NotARequest(MessageType),

    /// The request touches an account its author does not own.
    #[error("client {client} does not own account {account}")]
    ForeignAccount { client: ProcessId, account: String },

    #[error("consensus message names client {claimed} but embeds a request from {actual}")]
    ClientMismatch {
        claimed: ProcessId,
        actual: ProcessId,
    },

    #[error("consensus value does not match the embedded request")]
    ValueMismatch,

    #[error("consensus value is not a transaction: {0}")]
    Transaction(#[from] TransactionError),
}
