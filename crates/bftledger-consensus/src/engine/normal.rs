//! Normal-case handlers: PRE_PREPARE, PREPARE and COMMIT.

use bftledger_wire::{ClientRequest, ConsensusMessage, Message, Step};

use crate::bucket::SignedMessage;
use crate::interceptor::Event;
use crate::output::EngineOutput;

use super::ConsensusCore;

impl ConsensusCore {
    // ========================================================================
    // PrePrepare Handler
    // ========================================================================

    /// Handles the leader's proposal.
    ///
    /// The proposal is accepted when it comes from the leader of its round,
    /// carries a request that is not older than the client's cursor, is
    /// justified (always true in round 1), and is the first proposal
    /// accepted for that round. Nothing is recorded for a rejected
    /// proposal. Acceptance binds the instance to the proposed request,
    /// broadcasts a PREPARE and restarts the instance timer.
    pub fn on_pre_prepare(&mut self, message: SignedMessage) -> EngineOutput {
        let mut output = EngineOutput::empty();
        if self.intercept(&mut Event::PrePrepare(&message), &mut output) {
            return output;
        }

        let Step::PrePrepare { value } = message.step() else {
            return output;
        };
        let instance = message.instance();
        let round = message.round();
        let sender = message.sender();

        let request = match ClientRequest::decode(&message.message.client_request) {
            Ok(request) => request,
            Err(error) => {
                tracing::warn!(
                    replica = %self.id,
                    %instance,
                    from = %sender,
                    %error,
                    "PRE_PREPARE carries an unreadable request"
                );
                return output;
            }
        };
        if !self
            .ledger
            .is_not_stale(request.client_id, request.request_id)
        {
            tracing::debug!(
                replica = %self.id,
                %instance,
                client = %request.client_id,
                request = %request.request_id,
                "PRE_PREPARE for a stale request"
            );
            return output;
        }

        if !self.membership.is_leader(sender, round) {
            tracing::warn!(
                replica = %self.id,
                %instance,
                %round,
                from = %sender,
                leader = %self.membership.leader(round),
                "PRE_PREPARE from a process that does not lead the round"
            );
            return output;
        }

        if !self.justify_pre_prepare(&message, value) {
            tracing::warn!(
                replica = %self.id,
                %instance,
                %round,
                from = %sender,
                "unjustified PRE_PREPARE"
            );
            return output;
        }
        if !self.ensure_instance(&message) {
            return output;
        }

        let Some(state) = self.instances.get_mut(&instance) else {
            return output;
        };
        if !state.accept_pre_prepare(round) {
            tracing::debug!(
                replica = %self.id,
                %instance,
                %round,
                "PRE_PREPARE already accepted for this round"
            );
            return output;
        }
        state.advance_to(round);
        state.adopt(
            value.clone(),
            message.message.client_id,
            (*message.message.client_request).clone(),
        );

        tracing::debug!(
            replica = %self.id,
            %instance,
            %round,
            from = %sender,
            "accepted PRE_PREPARE"
        );
        output.arm(instance);

        let prepare = ConsensusMessage::new(
            instance,
            round,
            message.message.client_id,
            Step::Prepare {
                value: value.clone(),
            },
            (*message.message.client_request).clone(),
        )
        .replying_to(sender, message.envelope.message_id);
        output.broadcast(Message::consensus(self.id, prepare));
        output
    }

    // ========================================================================
    // Prepare Handler
    // ========================================================================

    /// Collects PREPAREs. A quorum for one value in a round above the
    /// prepared round prepares that value and broadcasts a COMMIT.
    ///
    /// A node that already committed the instance answers a PREPARE from an
    /// equal or later round with its stored COMMIT instead.
    pub fn on_prepare(&mut self, message: SignedMessage) -> EngineOutput {
        let mut output = EngineOutput::empty();
        if self.intercept(&mut Event::Prepare(&message), &mut output) {
            return output;
        }

        let instance = message.instance();
        let round = message.round();
        let sender = message.sender();
        let message_id = message.envelope.message_id;

        self.prepares.add(message.clone());
        if !self.ensure_instance(&message) {
            return output;
        }
        let Some(state) = self.instances.get_mut(&instance) else {
            return output;
        };

        if let Some(committed) = state.committed_round() {
            if committed <= round {
                if let Some(commit) = state.commit_message() {
                    tracing::debug!(
                        replica = %self.id,
                        %instance,
                        to = %sender,
                        "answering late PREPARE with COMMIT"
                    );
                    let commit = commit.clone().replying_to(sender, message_id);
                    output.send(sender, Message::consensus(self.id, commit));
                }
            }
            return output;
        }

        let Some((value, support)) = self.prepares.prepare_quorum(instance, round) else {
            return output;
        };
        if state
            .prepared_round()
            .is_some_and(|prepared| prepared >= round)
        {
            return output;
        }

        // Any supporter's embedded request is bound to `value`.
        let Some(witness) = support.first() else {
            return output;
        };
        let client_id = witness.message.client_id;
        let request = (*witness.message.client_request).clone();
        let evidence = support.iter().map(|m| m.envelope.clone()).collect();

        state.prepare(round, value.clone(), evidence);
        tracing::info!(
            replica = %self.id,
            %instance,
            %round,
            "prepared"
        );

        let commit = ConsensusMessage::new(instance, round, client_id, Step::Commit { value }, request);
        output.broadcast(Message::consensus(self.id, commit));
        output
    }

    // ========================================================================
    // Commit Handler
    // ========================================================================

    /// Collects COMMITs. A quorum for one value commits the instance: the
    /// timer stops and the runtime is asked to decide it in order.
    ///
    /// Only the first commit of an instance counts.
    pub fn on_commit(&mut self, message: SignedMessage) -> EngineOutput {
        let mut output = EngineOutput::empty();
        if self.intercept(&mut Event::Commit(&message), &mut output) {
            return output;
        }

        let instance = message.instance();
        let round = message.round();
        self.commits.add(message);

        let Some(state) = self.instances.get_mut(&instance) else {
            tracing::debug!(
                replica = %self.id,
                %instance,
                "COMMIT for an unknown instance"
            );
            return output;
        };
        if state.is_committed() {
            return output;
        }

        let Some((value, support)) = self.commits.commit_quorum(instance, round) else {
            return output;
        };
        let Some(witness) = support.first() else {
            return output;
        };
        let commit = ConsensusMessage::new(
            instance,
            round,
            witness.message.client_id,
            Step::Commit { value },
            (*witness.message.client_request).clone(),
        );

        state.commit(round, commit);
        tracing::info!(
            replica = %self.id,
            %instance,
            %round,
            "committed"
        );
        output.stop(instance);
        output.committed = Some(instance);
        output
    }
}
