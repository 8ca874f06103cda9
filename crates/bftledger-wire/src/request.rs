//! Client request authenticity and its binding to consensus values.

use bftledger_types::{Membership, ProcessId, RequestId, Transaction};

use crate::{ClientBody, ConsensusMessage, Envelope, Payload, RequestError, Step};

/// A client request whose signature and account ownership checked out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRequest {
    pub client_id: ProcessId,
    pub request_id: RequestId,
    pub transaction: Transaction,
}

impl ClientRequest {
    /// Verifies a signed TRANSFER or CHECK_BALANCE envelope.
    ///
    /// The envelope must come from a client in the membership, carry a
    /// valid signature under that client's key, and only touch the
    /// account the client owns.
    pub fn verify(envelope: &Envelope, membership: &Membership) -> Result<Self, RequestError> {
        let client_id = envelope.sender_id;
        if !membership.is_client(client_id) {
            return Err(RequestError::UnknownClient(client_id));
        }
        envelope.verify_member(membership)?;

        let request = Self::decode(envelope)?;

        // Account names are base64 public keys; the author must own the
        // account it spends from or queries.
        if request.transaction.source() != envelope.sender_public_key {
            return Err(RequestError::ForeignAccount {
                client: client_id,
                account: request.transaction.source().to_string(),
            });
        }

        Ok(request)
    }

    /// Decodes a request envelope without authenticating it.
    ///
    /// Only for envelopes that were already verified, such as the request
    /// embedded in a consensus message the link accepted.
    pub fn decode(envelope: &Envelope) -> Result<Self, RequestError> {
        let message = envelope.open()?;
        let Payload::Client(request) = &message.payload else {
            return Err(RequestError::NotARequest(message.message_type()));
        };

        let transaction = match &request.body {
            ClientBody::Transfer {
                source,
                destination,
                amount,
            } => Transaction::transfer(source.clone(), destination.clone(), *amount),
            ClientBody::CheckBalance { account } => Transaction::check_balance(account.clone()),
            _ => return Err(RequestError::NotARequest(message.message_type())),
        };

        Ok(Self {
            client_id: message.sender_id,
            request_id: request.request_id,
            transaction,
        })
    }
}

impl ConsensusMessage {
    /// Verifies the embedded client request and, for every step except
    /// ROUND_CHANGE, that the carried value is exactly that request.
    pub fn verify_binding(&self, membership: &Membership) -> Result<ClientRequest, RequestError> {
        let request = ClientRequest::verify(&self.client_request, membership)?;
        if request.client_id != self.client_id {
            return Err(RequestError::ClientMismatch {
                claimed: self.client_id,
                actual: request.client_id,
            });
        }

        if let Step::PrePrepare { value } | Step::Prepare { value } | Step::Commit { value } =
            &self.step
        {
            if Transaction::from_value(value)? != request.transaction {
                return Err(RequestError::ValueMismatch);
            }
        }

        Ok(request)
    }
}
