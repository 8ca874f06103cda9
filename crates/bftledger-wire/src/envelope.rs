//! Authenticated envelopes.

use bftledger_crypto::{Signature, VerifyingKey, sha256};
use bftledger_types::{LocalProcess, Membership, MessageId, ProcessId};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::{AuthError, Message, MessageType, WireError};

/// A signed message as it travels between processes.
///
/// The header fields duplicate parts of the signed payload so receivers
/// can route and look up keys before decoding; [`Envelope::open`] rejects
/// envelopes whose header disagrees with the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub sender_id: ProcessId,
    pub message_id: MessageId,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub signature: String,
    pub sender_public_key: String,
    pub sender_hostname: String,
    pub sender_port: u16,
    pub timestamp: String,
    pub payload: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub justification: Option<Vec<Envelope>>,
}

impl Envelope {
    /// Signs `message` as `local`.
    ///
    /// Any justification attached to the message moves onto the envelope.
    pub fn wrap(mut message: Message, local: &LocalProcess) -> Result<Self, WireError> {
        let justification = message.justification.take();
        let payload = serde_json::to_string(&message)?;
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);

        let digest = sha256(&[payload.as_bytes(), timestamp.as_bytes()]);
        let signature = local.signing_key().sign(digest.as_bytes());

        Ok(Self {
            sender_id: message.sender_id,
            message_id: message.message_id,
            message_type: message.message_type(),
            signature: signature.to_base64(),
            sender_public_key: local.public_key().to_base64(),
            sender_hostname: local.config().hostname.clone(),
            sender_port: local.config().port,
            timestamp,
            payload,
            justification,
        })
    }

    /// Checks that the envelope was signed by the holder of `known`.
    pub fn verify(&self, known: &VerifyingKey) -> Result<(), AuthError> {
        if self.sender_public_key != known.to_base64() {
            return Err(AuthError::WrongKey);
        }

        let signature =
            Signature::from_base64(&self.signature).map_err(|_| AuthError::WrongSignature)?;
        let digest = sha256(&[self.payload.as_bytes(), self.timestamp.as_bytes()]);
        known
            .verify(digest.as_bytes(), &signature)
            .map_err(|_| AuthError::WrongSignature)
    }

    /// Looks up the sender's key in `membership` and verifies against it.
    pub fn verify_member(&self, membership: &Membership) -> Result<(), AuthError> {
        let known = membership
            .public_key(self.sender_id)
            .ok_or(AuthError::UnknownSender(self.sender_id))?;
        self.verify(known)
    }

    /// Decodes the signed payload.
    pub fn open(&self) -> Result<Message, WireError> {
        let message: Message = serde_json::from_str(&self.payload)?;
        if message.sender_id != self.sender_id
            || message.message_id != self.message_id
            || message.message_type() != self.message_type
        {
            return Err(WireError::HeaderMismatch);
        }
        Ok(message)
    }

    /// Datagram encoding.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
