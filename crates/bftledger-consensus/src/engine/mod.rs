//! The consensus core.
//!
//! [`ConsensusCore`] owns all protocol state of one node: the instances,
//! the three message buckets, the accounts and the ledger. Handlers are
//! synchronous and never touch the network or the clock; each returns an
//! [`EngineOutput`] describing the messages to send, the timers to arm or
//! stop, and whether an instance just committed. The async runtime in
//! [`crate::node`] executes those outputs.
//!
//! Handlers are split by protocol phase:
//!
//! - `normal`: PRE_PREPARE, PREPARE and COMMIT
//! - `round_change`: timeouts, ROUND_CHANGE and leader re-proposals
//! - `justification`: validation of piggybacked quorum evidence

mod justification;
mod normal;
mod round_change;

#[cfg(test)]
mod tests;

use std::collections::BTreeMap;
use std::sync::Arc;

use bftledger_link::Delivered;
use bftledger_types::{FEE, InstanceId, Membership, ProcessId, RequestId, Role, Round, Transaction};
use bftledger_wire::{
    ClientBody, ClientMessage, ClientRequest, ConsensusMessage, Envelope, Message, Payload, Step,
    UNKNOWN_BALANCE,
};

use crate::bucket::{MessageBucket, SignedMessage};
use crate::error::EngineError;
use crate::instance::InstanceState;
use crate::interceptor::{Event, InterceptContext, Interceptors, Verdict, failure_reply};
use crate::ledger::{Accounts, Ledger, LedgerEntry};
use crate::output::EngineOutput;

pub use justification::highest_prepared;

/// Protocol state of one node.
#[derive(Debug)]
pub struct ConsensusCore {
    id: ProcessId,
    membership: Arc<Membership>,
    interceptors: Interceptors,

    instances: BTreeMap<InstanceId, InstanceState>,
    /// Highest instance this node started for a client request.
    last_started: u64,

    prepares: MessageBucket,
    commits: MessageBucket,
    round_changes: MessageBucket,

    accounts: Accounts,
    ledger: Ledger,
}

impl ConsensusCore {
    pub fn new(id: ProcessId, membership: Arc<Membership>, interceptors: Interceptors) -> Self {
        Self {
            id,
            interceptors,
            instances: BTreeMap::new(),
            last_started: 0,
            prepares: MessageBucket::new(&membership),
            commits: MessageBucket::new(&membership),
            round_changes: MessageBucket::new(&membership),
            accounts: Accounts::new(&membership),
            ledger: Ledger::new(),
            membership,
        }
    }

    pub fn id(&self) -> ProcessId {
        self.id
    }

    pub fn membership(&self) -> &Arc<Membership> {
        &self.membership
    }

    pub fn instance(&self, instance: InstanceId) -> Option<&InstanceState> {
        self.instances.get(&instance)
    }

    pub fn accounts(&self) -> &Accounts {
        &self.accounts
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn balance(&self, account: &str) -> Option<i64> {
        self.accounts.balance(account)
    }

    /// The instance whose decision would fill the next ledger slot.
    pub fn next_to_decide(&self) -> InstanceId {
        InstanceId::new(self.ledger.len() as u64 + 1)
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Runs the handler for a message the link delivered.
    ///
    /// Consensus messages only count when a node signed them.
    pub fn dispatch(&mut self, delivered: Delivered) -> EngineOutput {
        let Delivered {
            envelope, message, ..
        } = delivered;

        match message.payload {
            Payload::Consensus(_) if !self.signed_by_node(&envelope) => {
                tracing::warn!(
                    replica = %self.id,
                    from = %envelope.sender_id,
                    kind = %envelope.message_type,
                    "ignoring consensus message from a non-node"
                );
                EngineOutput::empty()
            }
            Payload::Consensus(consensus) => {
                let message = SignedMessage::new(envelope, consensus);
                match message.step() {
                    Step::PrePrepare { .. } => self.on_pre_prepare(message),
                    Step::Prepare { .. } => self.on_prepare(message),
                    Step::Commit { .. } => self.on_commit(message),
                    Step::RoundChange { .. } => self.on_round_change(message),
                }
            }
            Payload::Client(request) if request.body.is_request() => self.on_transfer(&envelope),
            payload => {
                tracing::trace!(
                    replica = %self.id,
                    from = %envelope.sender_id,
                    ?payload,
                    "ignoring message"
                );
                EngineOutput::empty()
            }
        }
    }

    /// Start-up hook, run once before any message is handled.
    pub fn ready(&mut self) -> EngineOutput {
        let mut output = EngineOutput::empty();
        if self.intercept(&mut Event::Ready, &mut output) {
            return output;
        }
        tracing::info!(
            replica = %self.id,
            nodes = self.membership.node_count(),
            quorum = self.membership.quorum(),
            "consensus core ready"
        );
        output
    }

    // ========================================================================
    // Client Requests
    // ========================================================================

    /// Handles a TRANSFER or CHECK_BALANCE straight from a client.
    ///
    /// Requests failing verification are answered with the failure reply
    /// for their kind.
    pub fn on_transfer(&mut self, request: &Envelope) -> EngineOutput {
        let mut output = EngineOutput::empty();
        if self.intercept(&mut Event::Transfer(request), &mut output) {
            return output;
        }

        match self.verify_request(request, &mut output) {
            Some(verified) => {
                let value = verified.transaction.to_value();
                output.merge(self.start_consensus(value, verified.client_id, request));
            }
            None => {
                if let Some(reply) = failure_reply(request) {
                    self.reply(request.sender_id, reply, &mut output);
                }
            }
        }
        output
    }

    /// Starts a consensus instance for `value`, the encoded transaction of
    /// `request`.
    ///
    /// A request whose id is not above the client's cursor is dropped. A
    /// request some instance is already bound to, typically learned from a
    /// peer, re-arms that instance and is proposed there if this node leads
    /// round 1. Anything else opens the next instance id not already in
    /// use.
    pub fn start_consensus(
        &mut self,
        value: String,
        client_id: ProcessId,
        request: &Envelope,
    ) -> EngineOutput {
        let mut output = EngineOutput::empty();
        let mut event = Event::StartConsensus {
            value: &value,
            client_id,
            request,
        };
        if self.intercept(&mut event, &mut output) {
            return output;
        }

        let Some(verified) = self.verify_request(request, &mut output) else {
            return output;
        };
        if !self.ledger.is_fresh(client_id, verified.request_id) {
            tracing::debug!(
                replica = %self.id,
                client = %client_id,
                request = %verified.request_id,
                "request already decided"
            );
            return output;
        }

        if let Some(instance) = self.instance_carrying(client_id, verified.request_id) {
            tracing::debug!(
                replica = %self.id,
                %instance,
                client = %client_id,
                request = %verified.request_id,
                "request already bound to an instance"
            );
            let leads_first_round = self.instances.get(&instance).is_some_and(|state| {
                state.current_round() == Round::FIRST && !state.is_committed()
            }) && self.membership.is_leader(self.id, Round::FIRST);
            if leads_first_round {
                self.propose(instance, Round::FIRST, value, request.clone(), None, &mut output);
            }
            output.arm(instance);
            return output;
        }

        let instance = self.allocate_instance();
        tracing::info!(
            replica = %self.id,
            %instance,
            client = %client_id,
            request = %verified.request_id,
            "starting consensus"
        );
        self.instances.insert(
            instance,
            InstanceState::new(value.clone(), client_id, request.clone()),
        );

        if self.membership.is_leader(self.id, Round::FIRST) {
            self.propose(instance, Round::FIRST, value, request.clone(), None, &mut output);
        }
        output.arm(instance);
        output
    }

    // ========================================================================
    // Decide
    // ========================================================================

    /// Applies a committed instance to the ledger and answers its client.
    ///
    /// Must be called in instance order: the decision fills ledger slot
    /// `instance - 1`, which has to be the next free one. Deciding twice is
    /// a no-op.
    pub fn decide(&mut self, instance: InstanceId) -> Result<EngineOutput, EngineError> {
        let mut output = EngineOutput::empty();
        let state = self
            .instances
            .get(&instance)
            .ok_or(EngineError::UnknownInstance(instance))?;
        if state.is_decided() {
            return Ok(output);
        }
        let round = state
            .committed_round()
            .ok_or(EngineError::NotCommitted(instance))?;
        let commit = state
            .commit_message()
            .ok_or(EngineError::NotCommitted(instance))?
            .clone();

        let request = ClientRequest::decode(&commit.client_request).ok();
        let transaction = commit
            .step
            .value()
            .and_then(|value| Transaction::from_value(value).ok());

        let (entry, reply) = match (request, transaction) {
            (Some(request), Some(transaction))
                if self.ledger.is_fresh(request.client_id, request.request_id) =>
            {
                self.ledger
                    .advance_cursor(request.client_id, request.request_id);
                let (entry, body) = self.execute(transaction, round, &mut output);
                (entry, Some((request.client_id, request.request_id, body)))
            }
            (Some(request), transaction) => {
                tracing::debug!(
                    replica = %self.id,
                    %instance,
                    client = %request.client_id,
                    request = %request.request_id,
                    "replayed request decided, ledger slot left empty"
                );
                let body = match transaction {
                    Some(Transaction::CheckBalance { .. }) => ClientBody::ResponseBalance {
                        balance: UNKNOWN_BALANCE,
                    },
                    _ => ClientBody::ResponseTransfer { success: false },
                };
                (
                    LedgerEntry::Empty,
                    Some((request.client_id, request.request_id, body)),
                )
            }
            (None, _) => {
                tracing::warn!(
                    replica = %self.id,
                    %instance,
                    "committed value carries an unreadable request"
                );
                (LedgerEntry::Empty, None)
            }
        };

        self.ledger.fill(instance.slot(), entry)?;
        if let Some(state) = self.instances.get_mut(&instance) {
            state.mark_decided();
        }
        tracing::info!(
            replica = %self.id,
            %instance,
            %round,
            ledger_len = self.ledger.len(),
            "decided"
        );

        if let Some((client, request_id, body)) = reply {
            self.reply(client, ClientMessage::new(request_id, body), &mut output);
        }
        Ok(output)
    }

    /// Runs a fresh decided transaction against the accounts.
    fn execute(
        &mut self,
        transaction: Transaction,
        round: Round,
        output: &mut EngineOutput,
    ) -> (LedgerEntry, ClientBody) {
        match &transaction {
            Transaction::CheckBalance { source } => {
                let balance = self.accounts.balance(source).unwrap_or(UNKNOWN_BALANCE);
                (LedgerEntry::Empty, ClientBody::ResponseBalance { balance })
            }
            Transaction::Transfer { .. } => {
                let leader = self.membership.leader(round);
                let fee_recipient = self
                    .membership
                    .get(leader)
                    .map(|identity| identity.account())
                    .unwrap_or_default();

                let success = self.apply_transaction(&transaction, &fee_recipient, output);
                let entry = if success {
                    LedgerEntry::Applied(transaction)
                } else {
                    LedgerEntry::Empty
                };
                (entry, ClientBody::ResponseTransfer { success })
            }
        }
    }

    fn apply_transaction(
        &mut self,
        transaction: &Transaction,
        fee_recipient: &str,
        output: &mut EngineOutput,
    ) -> bool {
        let mut event = Event::ApplyTransaction {
            transaction,
            fee_recipient,
            accounts: &mut self.accounts,
            applied: false,
        };
        if run_interceptors(
            &self.interceptors,
            self.id,
            &self.membership,
            &mut event,
            output,
        ) {
            return matches!(event, Event::ApplyTransaction { applied: true, .. });
        }

        let Transaction::Transfer {
            source,
            destination,
            amount,
        } = transaction
        else {
            return false;
        };
        let applied = self
            .accounts
            .transfer(source, destination, *amount, fee_recipient, FEE);
        if !applied {
            tracing::info!(
                replica = %self.id,
                %source,
                %destination,
                amount,
                "transfer rejected"
            );
        }
        applied
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Runs the interceptor table; `true` if an interceptor handled the
    /// event.
    fn intercept(&self, event: &mut Event<'_>, output: &mut EngineOutput) -> bool {
        run_interceptors(
            &self.interceptors,
            self.id,
            &self.membership,
            event,
            output,
        )
    }

    /// Authenticates a client request, through the interceptors.
    fn verify_request(
        &self,
        request: &Envelope,
        output: &mut EngineOutput,
    ) -> Option<ClientRequest> {
        let mut event = Event::VerifyRequest {
            request,
            verified: None,
        };
        if self.intercept(&mut event, output) {
            let Event::VerifyRequest { verified, .. } = event else {
                return None;
            };
            return verified;
        }

        match ClientRequest::verify(request, &self.membership) {
            Ok(verified) => Some(verified),
            Err(error) => {
                tracing::warn!(
                    replica = %self.id,
                    from = %request.sender_id,
                    %error,
                    "rejecting client request"
                );
                None
            }
        }
    }

    /// Sends a reply to a client, through the interceptors.
    fn reply(&self, client: ProcessId, reply: ClientMessage, output: &mut EngineOutput) {
        let mut event = Event::Reply {
            client,
            reply: &reply,
        };
        if self.intercept(&mut event, output) {
            return;
        }
        tracing::debug!(
            replica = %self.id,
            %client,
            request = %reply.request_id,
            body = ?reply.body,
            "replying to client"
        );
        output.send(client, Message::client(self.id, reply));
    }

    fn signed_by_node(&self, envelope: &Envelope) -> bool {
        self.membership.role(envelope.sender_id) == Some(Role::Node)
    }

    /// Undecided instance bound to request `request` of `client`.
    fn instance_carrying(&self, client: ProcessId, request: RequestId) -> Option<InstanceId> {
        self.instances
            .iter()
            .find(|(_, state)| !state.is_decided() && state.carries(client, request))
            .map(|(instance, _)| *instance)
    }

    /// Lowest instance id above the last one this node started that no
    /// peer has opened yet.
    fn allocate_instance(&mut self) -> InstanceId {
        loop {
            self.last_started += 1;
            let instance = InstanceId::new(self.last_started);
            if !self.instances.contains_key(&instance) {
                return instance;
            }
        }
    }

    /// Creates the instance a consensus message refers to from its
    /// embedded request, if this node has not seen it yet.
    fn ensure_instance(&mut self, message: &SignedMessage) -> bool {
        if self.instances.contains_key(&message.instance()) {
            return true;
        }
        match ClientRequest::decode(&message.message.client_request) {
            Ok(request) => {
                tracing::debug!(
                    replica = %self.id,
                    instance = %message.instance(),
                    from = %message.sender(),
                    "learned instance from peer"
                );
                self.instances.insert(
                    message.instance(),
                    InstanceState::new(
                        request.transaction.to_value(),
                        request.client_id,
                        (*message.message.client_request).clone(),
                    ),
                );
                true
            }
            Err(error) => {
                tracing::warn!(
                    replica = %self.id,
                    from = %message.sender(),
                    %error,
                    "consensus message carries an unreadable request"
                );
                false
            }
        }
    }

    /// Broadcasts a PRE_PREPARE for `value` as leader of `round`, once per
    /// round.
    fn propose(
        &mut self,
        instance: InstanceId,
        round: Round,
        value: String,
        request: Envelope,
        justification: Option<Vec<Envelope>>,
        output: &mut EngineOutput,
    ) {
        if let Some(state) = self.instances.get_mut(&instance) {
            if !state.propose(round) {
                return;
            }
        }

        tracing::info!(
            replica = %self.id,
            %instance,
            %round,
            justified = justification.is_some(),
            "proposing"
        );
        let client_id = request.sender_id;
        let pre_prepare = ConsensusMessage::new(
            instance,
            round,
            client_id,
            Step::PrePrepare { value },
            request,
        );
        let mut message = Message::consensus(self.id, pre_prepare);
        if let Some(justification) = justification {
            message = message.with_justification(justification);
        }
        output.broadcast(message);
    }
}

fn run_interceptors(
    interceptors: &Interceptors,
    local: ProcessId,
    membership: &Membership,
    event: &mut Event<'_>,
    output: &mut EngineOutput,
) -> bool {
    if interceptors.is_empty() {
        return false;
    }
    let mut cx = InterceptContext::new(local, membership, output);
    interceptors.run(event, &mut cx) == Verdict::Handled
}

