//! Message schemas.
//!
//! ```text
//! Client ──TRANSFER / CHECK_BALANCE──► all nodes
//!
//! Leader ──PRE_PREPARE──► all
//! All    ──PREPARE──────► all   (reply to the PRE_PREPARE)
//! All    ──COMMIT───────► all   (after a prepare quorum)
//! All    ──RESPONSE_*───► client (after a commit quorum)
//!
//! Any    ──ROUND_CHANGE─► all   (on timeout, or after f+1 higher rounds)
//! ```
//!
//! Every message except `ACK` is acknowledged by the link layer.

use bftledger_types::{InstanceId, MessageId, ProcessId, RequestId, Round};
use serde::{Deserialize, Serialize};

use crate::Envelope;

/// Balance reported when a query cannot be answered.
pub const UNKNOWN_BALANCE: i64 = -1;

// ============================================================================
// Message type
// ============================================================================

/// Discriminant of every message kind, as written in envelope headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    /// Never sent; marks a retransmission the link already delivered.
    Ignore,
    PrePrepare,
    Prepare,
    Commit,
    Ack,
    RoundChange,
    Transfer,
    CheckBalance,
    ResponseBalance,
    ResponseTransfer,
}

impl MessageType {
    pub fn is_consensus(self) -> bool {
        matches!(
            self,
            Self::PrePrepare | Self::Prepare | Self::Commit | Self::RoundChange
        )
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Ignore => "IGNORE",
            Self::PrePrepare => "PRE_PREPARE",
            Self::Prepare => "PREPARE",
            Self::Commit => "COMMIT",
            Self::Ack => "ACK",
            Self::RoundChange => "ROUND_CHANGE",
            Self::Transfer => "TRANSFER",
            Self::CheckBalance => "CHECK_BALANCE",
            Self::ResponseBalance => "RESPONSE_BALANCE",
            Self::ResponseTransfer => "RESPONSE_TRANSFER",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Message
// ============================================================================

/// A message before it is wrapped in an [`Envelope`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub sender_id: ProcessId,
    /// Assigned by the link when the message is sent.
    pub message_id: MessageId,
    pub payload: Payload,
    /// Evidence to piggyback. Moved onto the envelope by
    /// [`Envelope::wrap`]; never part of the signed payload.
    #[serde(skip)]
    pub justification: Option<Vec<Envelope>>,
}

impl Message {
    pub fn new(sender_id: ProcessId, payload: Payload) -> Self {
        Self {
            sender_id,
            message_id: MessageId::new(0),
            payload,
            justification: None,
        }
    }

    /// Acknowledgement of `message_id`.
    pub fn ack(sender_id: ProcessId, message_id: MessageId) -> Self {
        Self {
            message_id,
            ..Self::new(sender_id, Payload::Ack)
        }
    }

    pub fn consensus(sender_id: ProcessId, message: ConsensusMessage) -> Self {
        Self::new(sender_id, Payload::Consensus(message))
    }

    pub fn client(sender_id: ProcessId, message: ClientMessage) -> Self {
        Self::new(sender_id, Payload::Client(message))
    }

    pub fn with_justification(mut self, justification: Vec<Envelope>) -> Self {
        self.justification = Some(justification);
        self
    }

    pub fn message_type(&self) -> MessageType {
        match &self.payload {
            Payload::Ack => MessageType::Ack,
            Payload::Consensus(message) => message.step.message_type(),
            Payload::Client(message) => message.body.message_type(),
        }
    }

    pub fn as_consensus(&self) -> Option<&ConsensusMessage> {
        match &self.payload {
            Payload::Consensus(message) => Some(message),
            _ => None,
        }
    }

    pub fn as_client(&self) -> Option<&ClientMessage> {
        match &self.payload {
            Payload::Client(message) => Some(message),
            _ => None,
        }
    }
}

/// Payload of a [`Message`], tagged by family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    Ack,
    Consensus(ConsensusMessage),
    Client(ClientMessage),
}

// ============================================================================
// Consensus messages
// ============================================================================

/// A protocol message about one round of one consensus instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsensusMessage {
    pub consensus_instance: InstanceId,
    pub round: Round,
    /// Client whose request is being decided.
    pub client_id: ProcessId,
    /// Set when this message answers a specific earlier message; the
    /// receiver treats it as an acknowledgement of that message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<ProcessId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_message_id: Option<MessageId>,
    pub step: Step,
    /// The client's signed request, verbatim.
    pub client_request: Box<Envelope>,
}

impl ConsensusMessage {
    pub fn new(
        consensus_instance: InstanceId,
        round: Round,
        client_id: ProcessId,
        step: Step,
        client_request: Envelope,
    ) -> Self {
        Self {
            consensus_instance,
            round,
            client_id,
            reply_to: None,
            reply_to_message_id: None,
            step,
            client_request: Box::new(client_request),
        }
    }

    /// Marks this message as the answer to `message_id` from `to`.
    pub fn replying_to(mut self, to: ProcessId, message_id: MessageId) -> Self {
        self.reply_to = Some(to);
        self.reply_to_message_id = Some(message_id);
        self
    }
}

/// Phase-specific content of a [`ConsensusMessage`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Step {
    PrePrepare {
        value: String,
    },
    Prepare {
        value: String,
    },
    Commit {
        value: String,
    },
    #[serde(rename_all = "camelCase")]
    RoundChange {
        /// Highest round this sender prepared in; `-1` on the wire when
        /// it has not prepared.
        #[serde(with = "prepared_round")]
        prepared_round: Option<Round>,
        value: Option<String>,
    },
}

impl Step {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::PrePrepare { .. } => MessageType::PrePrepare,
            Self::Prepare { .. } => MessageType::Prepare,
            Self::Commit { .. } => MessageType::Commit,
            Self::RoundChange { .. } => MessageType::RoundChange,
        }
    }

    /// Value carried by the step, if any.
    pub fn value(&self) -> Option<&str> {
        match self {
            Self::PrePrepare { value } | Self::Prepare { value } | Self::Commit { value } => {
                Some(value)
            }
            Self::RoundChange { value, .. } => value.as_deref(),
        }
    }
}

mod prepared_round {
    use bftledger_types::Round;
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    pub fn serialize<S: Serializer>(round: &Option<Round>, serializer: S) -> Result<S::Ok, S::Error> {
        match round {
            Some(round) => serializer.serialize_i64(round.as_u64() as i64),
            None => serializer.serialize_i64(-1),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Round>, D::Error> {
        match i64::deserialize(deserializer)? {
            -1 => Ok(None),
            round if round >= 1 => Ok(Some(Round::new(round as u64))),
            other => Err(D::Error::custom(format!("invalid prepared round {other}"))),
        }
    }
}

// ============================================================================
// Client messages
// ============================================================================

/// A client request or a node's reply to one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientMessage {
    pub request_id: RequestId,
    pub body: ClientBody,
}

impl ClientMessage {
    pub fn new(request_id: RequestId, body: ClientBody) -> Self {
        Self { request_id, body }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientBody {
    Transfer {
        source: String,
        destination: String,
        amount: i64,
    },
    CheckBalance {
        #[serde(rename = "accountPubKey")]
        account: String,
    },
    ResponseBalance {
        balance: i64,
    },
    ResponseTransfer {
        success: bool,
    },
}

impl ClientBody {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Transfer { .. } => MessageType::Transfer,
            Self::CheckBalance { .. } => MessageType::CheckBalance,
            Self::ResponseBalance { .. } => MessageType::ResponseBalance,
            Self::ResponseTransfer { .. } => MessageType::ResponseTransfer,
        }
    }

    pub fn is_request(&self) -> bool {
        matches!(self, Self::Transfer { .. } | Self::CheckBalance { .. })
    }

    /// The failure reply matching this request kind.
    pub fn failure_reply(&self) -> Option<ClientBody> {
        match self {
            Self::Transfer { .. } => Some(Self::ResponseTransfer { success: false }),
            Self::CheckBalance { .. } => Some(Self::ResponseBalance {
                balance: UNKNOWN_BALANCE,
            }),
            _ => None,
        }
    }
}
