//! # bftledger-wire: wire protocol for bftledger
//!
//! Every datagram is a JSON-encoded [`Envelope`]. The envelope carries
//! the sender's identity and signature, plus a `payload` string holding
//! the JSON of the inner [`Message`]:
//!
//! ```text
//! Envelope {
//!     senderId, messageId, type,
//!     signature        = Ed25519(sha256(payload ‖ timestamp)), base64
//!     senderPublicKey  = base64
//!     senderHostname, senderPort, timestamp,
//!     payload          = JSON(Message)
//!     justification?   = [Envelope, ...]   (piggybacked evidence)
//! }
//! ```
//!
//! Consensus messages embed the original signed client request
//! envelope, so every replica can check that the value it is asked to
//! agree on was really requested by the owner of the source account.
//! [`ClientRequest::verify`] and [`ConsensusMessage::verify_binding`]
//! perform those checks.

mod envelope;
mod error;
mod message;
mod request;

pub use envelope::Envelope;
pub use error::{AuthError, RequestError, WireError};
pub use message::{
    ClientBody, ClientMessage, ConsensusMessage, Message, MessageType, Payload, Step,
    UNKNOWN_BALANCE,
};
pub use request::ClientRequest;
