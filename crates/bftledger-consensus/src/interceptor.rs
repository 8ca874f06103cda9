//! Pluggable interception of engine events.
//!
//! Before running the default behaviour of an event, the core walks an
//! ordered table of `(EventKind, Interceptor)` pairs. The first
//! interceptor registered for the event's kind that returns
//! [`Verdict::Handled`] replaces the default behaviour; if none does, the
//! default runs.
//!
//! ```ignore
//! let interceptors = Interceptors::new()
//!     .with(EventKind::Prepare, Silence)
//!     .with(EventKind::Reply, |event: &mut Event<'_>, _: &mut InterceptContext<'_>| {
//!         tracing::info!(?event, "reply");
//!         Verdict::Proceed
//!     });
//! ```
//!
//! Fault-injection tests use this to make nodes misbehave; see the stock
//! behaviours at the bottom of this module.

use std::fmt;
use std::sync::Arc;

use bftledger_types::{FEE, Membership, ProcessId, Transaction};
use bftledger_wire::{ClientMessage, ClientRequest, Envelope, Message, Payload};

use crate::bucket::SignedMessage;
use crate::ledger::Accounts;
use crate::output::EngineOutput;

/// Interceptable engine events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Ready,
    StartConsensus,
    PrePrepare,
    Prepare,
    Commit,
    RoundChange,
    ApplyTransaction,
    Transfer,
    VerifyRequest,
    Reply,
}

/// An event about to be handled, with the data its default behaviour
/// would use.
#[derive(Debug)]
pub enum Event<'a> {
    Ready,
    StartConsensus {
        value: &'a str,
        client_id: ProcessId,
        request: &'a Envelope,
    },
    PrePrepare(&'a SignedMessage),
    Prepare(&'a SignedMessage),
    Commit(&'a SignedMessage),
    RoundChange(&'a SignedMessage),
    /// Applying a decided transfer. A handling interceptor reports the
    /// outcome through `applied`.
    ApplyTransaction {
        transaction: &'a Transaction,
        fee_recipient: &'a str,
        accounts: &'a mut Accounts,
        applied: bool,
    },
    /// A TRANSFER or CHECK_BALANCE arriving from a client.
    Transfer(&'a Envelope),
    /// Authenticating a client request. A handling interceptor reports
    /// the outcome through `verified`; `None` rejects the request.
    VerifyRequest {
        request: &'a Envelope,
        verified: Option<ClientRequest>,
    },
    /// A reply about to be sent to a client.
    Reply {
        client: ProcessId,
        reply: &'a ClientMessage,
    },
}

impl Event<'_> {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Ready => EventKind::Ready,
            Self::StartConsensus { .. } => EventKind::StartConsensus,
            Self::PrePrepare(_) => EventKind::PrePrepare,
            Self::Prepare(_) => EventKind::Prepare,
            Self::Commit(_) => EventKind::Commit,
            Self::RoundChange(_) => EventKind::RoundChange,
            Self::ApplyTransaction { .. } => EventKind::ApplyTransaction,
            Self::Transfer(_) => EventKind::Transfer,
            Self::VerifyRequest { .. } => EventKind::VerifyRequest,
            Self::Reply { .. } => EventKind::Reply,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Run the default behaviour.
    Proceed,
    /// The interceptor replaced the default behaviour.
    Handled,
}

/// What an interceptor can see and do.
pub struct InterceptContext<'a> {
    local: ProcessId,
    membership: &'a Membership,
    outbox: &'a mut EngineOutput,
}

impl<'a> InterceptContext<'a> {
    pub(crate) fn new(
        local: ProcessId,
        membership: &'a Membership,
        outbox: &'a mut EngineOutput,
    ) -> Self {
        Self {
            local,
            membership,
            outbox,
        }
    }

    pub fn local_id(&self) -> ProcessId {
        self.local
    }

    pub fn membership(&self) -> &Membership {
        self.membership
    }

    pub fn send(&mut self, to: ProcessId, payload: Payload) {
        self.outbox.send(to, Message::new(self.local, payload));
    }

    pub fn broadcast(&mut self, payload: Payload) {
        self.outbox.broadcast(Message::new(self.local, payload));
    }

    /// Answers a client request with the failure reply for its kind.
    pub fn reply_failure(&mut self, request: &Envelope) {
        let Some(reply) = failure_reply(request) else {
            return;
        };
        self.send(request.sender_id, Payload::Client(reply));
    }
}

/// The failure reply for the request in `envelope`, if it is one.
pub(crate) fn failure_reply(envelope: &Envelope) -> Option<ClientMessage> {
    let message = envelope.open().ok()?;
    let request = message.as_client()?;
    let body = request.body.failure_reply()?;
    Some(ClientMessage::new(request.request_id, body))
}

/// A strategy that can replace the default handling of an event.
pub trait Interceptor: Send + Sync {
    fn intercept(&self, event: &mut Event<'_>, cx: &mut InterceptContext<'_>) -> Verdict;
}

impl<F> Interceptor for F
where
    F: Fn(&mut Event<'_>, &mut InterceptContext<'_>) -> Verdict + Send + Sync,
{
    fn intercept(&self, event: &mut Event<'_>, cx: &mut InterceptContext<'_>) -> Verdict {
        self(event, cx)
    }
}

/// Ordered interceptor table.
#[derive(Clone, Default)]
pub struct Interceptors {
    table: Vec<(EventKind, Arc<dyn Interceptor>)>,
}

impl fmt::Debug for Interceptors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.table.iter().map(|(kind, _)| kind))
            .finish()
    }
}

impl Interceptors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: EventKind, interceptor: impl Interceptor + 'static) {
        self.table.push((kind, Arc::new(interceptor)));
    }

    pub fn with(mut self, kind: EventKind, interceptor: impl Interceptor + 'static) -> Self {
        self.register(kind, interceptor);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Consults the table for `event`.
    pub fn run(&self, event: &mut Event<'_>, cx: &mut InterceptContext<'_>) -> Verdict {
        let kind = event.kind();
        for (registered, interceptor) in &self.table {
            if *registered == kind && interceptor.intercept(event, cx) == Verdict::Handled {
                tracing::debug!(replica = %cx.local_id(), ?kind, "event intercepted");
                return Verdict::Handled;
            }
        }
        Verdict::Proceed
    }
}

// ============================================================================
// Stock behaviours
// ============================================================================

/// Swallows the event.
#[derive(Debug, Clone, Copy, Default)]
pub struct Silence;

impl Interceptor for Silence {
    fn intercept(&self, _: &mut Event<'_>, _: &mut InterceptContext<'_>) -> Verdict {
        Verdict::Handled
    }
}

/// Answers a client's request with a failure straight away instead of
/// running consensus. Register for [`EventKind::StartConsensus`] or
/// [`EventKind::Transfer`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RespondImmediately;

impl Interceptor for RespondImmediately {
    fn intercept(&self, event: &mut Event<'_>, cx: &mut InterceptContext<'_>) -> Verdict {
        match event {
            Event::StartConsensus { request, .. } | Event::Transfer(request) => {
                cx.reply_failure(request);
                Verdict::Handled
            }
            _ => Verdict::Proceed,
        }
    }
}

/// Sends every client reply twice.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplyTwice;

impl Interceptor for ReplyTwice {
    fn intercept(&self, event: &mut Event<'_>, cx: &mut InterceptContext<'_>) -> Verdict {
        let Event::Reply { client, reply } = event else {
            return Verdict::Proceed;
        };
        for _ in 0..2 {
            cx.send(*client, Payload::Client((*reply).clone()));
        }
        Verdict::Handled
    }
}

/// Accepts client requests without checking signatures or account
/// ownership.
#[derive(Debug, Clone, Copy, Default)]
pub struct SkipRequestVerification;

impl Interceptor for SkipRequestVerification {
    fn intercept(&self, event: &mut Event<'_>, _: &mut InterceptContext<'_>) -> Verdict {
        let Event::VerifyRequest { request, verified } = event else {
            return Verdict::Proceed;
        };
        *verified = ClientRequest::decode(request).ok();
        Verdict::Handled
    }
}

/// Refuses to start consensus for one client's requests.
#[derive(Debug, Clone, Copy)]
pub struct IgnoreClient(pub ProcessId);

impl Interceptor for IgnoreClient {
    fn intercept(&self, event: &mut Event<'_>, _: &mut InterceptContext<'_>) -> Verdict {
        match event {
            Event::StartConsensus { client_id, .. } if *client_id == self.0 => Verdict::Handled,
            _ => Verdict::Proceed,
        }
    }
}

/// Charges `factor` times the normal fee when applying transfers.
#[derive(Debug, Clone, Copy)]
pub struct OverchargeFee(pub i64);

impl Interceptor for OverchargeFee {
    fn intercept(&self, event: &mut Event<'_>, _: &mut InterceptContext<'_>) -> Verdict {
        let Event::ApplyTransaction {
            transaction:
                Transaction::Transfer {
                    source,
                    destination,
                    amount,
                },
            fee_recipient,
            accounts,
            applied,
        } = event
        else {
            return Verdict::Proceed;
        };
        *applied = accounts.transfer(source, destination, *amount, fee_recipient, FEE * self.0);
        Verdict::Handled
    }
}
