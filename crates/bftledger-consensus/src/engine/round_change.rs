//! Round change: timeouts, ROUND_CHANGE handling and re-proposals.

use bftledger_types::{InstanceId, Round};
use bftledger_wire::{ConsensusMessage, Envelope, Message, Step};

use crate::bucket::SignedMessage;
use crate::interceptor::Event;
use crate::output::EngineOutput;

use super::{ConsensusCore, highest_prepared};

impl ConsensusCore {
    // ========================================================================
    // Timeout Handler
    // ========================================================================

    /// Handles an instance's round-change timer firing.
    ///
    /// An uncommitted instance moves to the next round and asks the other
    /// nodes to follow with a ROUND_CHANGE carrying its prepared value and
    /// the PREPARE quorum behind it. The timer keeps running.
    pub fn on_timeout(&mut self, instance: InstanceId) -> EngineOutput {
        let mut output = EngineOutput::empty();
        let Some(state) = self.instances.get_mut(&instance) else {
            output.stop(instance);
            return output;
        };
        if state.is_committed() {
            output.stop(instance);
            return output;
        }

        let round = state.next_round();
        tracing::info!(
            replica = %self.id,
            %instance,
            %round,
            "round-change timeout"
        );
        self.broadcast_round_change(instance, round, &mut output);
        output
    }

    // ========================================================================
    // RoundChange Handler
    // ========================================================================

    /// Collects ROUND_CHANGEs.
    ///
    /// - A node that already committed answers with its stored COMMIT.
    /// - `f + 1` distinct nodes asking for rounds above the current one
    ///   pull this node up to the smallest of those rounds.
    /// - The leader of the current round re-proposes once it holds a
    ///   justified quorum of ROUND_CHANGEs for it, keeping the highest
    ///   prepared value if there is one.
    pub fn on_round_change(&mut self, message: SignedMessage) -> EngineOutput {
        let mut output = EngineOutput::empty();
        if self.intercept(&mut Event::RoundChange(&message), &mut output) {
            return output;
        }

        let instance = message.instance();
        let sender = message.sender();
        let message_id = message.envelope.message_id;

        self.round_changes.add(message.clone());
        if !self.ensure_instance(&message) {
            return output;
        }
        let Some(state) = self.instances.get_mut(&instance) else {
            return output;
        };

        if state.is_committed() {
            if let Some(commit) = state.commit_message() {
                tracing::debug!(
                    replica = %self.id,
                    %instance,
                    to = %sender,
                    "answering ROUND_CHANGE with COMMIT"
                );
                let commit = commit.clone().replying_to(sender, message_id);
                output.send(sender, Message::consensus(self.id, commit));
            }
            return output;
        }

        let current = state.current_round();
        if let Some(round) = self.round_changes.round_change_f_plus_1(instance, current) {
            state.advance_to(round);
            tracing::info!(
                replica = %self.id,
                %instance,
                from = %current,
                to = %round,
                "joining round change"
            );
            output.arm(instance);
            self.broadcast_round_change(instance, round, &mut output);
        }

        self.try_repropose(instance, &mut output);
        output
    }

    /// Proposes as leader of the current round once a justified
    /// ROUND_CHANGE quorum for it is in.
    fn try_repropose(&mut self, instance: InstanceId, output: &mut EngineOutput) {
        let Some(state) = self.instances.get(&instance) else {
            return;
        };
        let round = state.current_round();
        if !self.membership.is_leader(self.id, round) {
            return;
        }
        let Some(quorum) = self.round_changes.round_change_quorum(instance, round, None) else {
            return;
        };
        if !self.justify_round_change(instance, &quorum) {
            tracing::warn!(
                replica = %self.id,
                %instance,
                %round,
                "ROUND_CHANGE quorum is not justified"
            );
            return;
        }

        let (value, request) = match highest_prepared(&quorum) {
            Some((_, value)) if value == state.input_value() => {
                (value, state.client_request().clone())
            }
            Some((_, value)) => {
                let request = self
                    .request_bound_to(&quorum, &value)
                    .unwrap_or_else(|| state.client_request().clone());
                (value, request)
            }
            None => (
                state.input_value().to_string(),
                state.client_request().clone(),
            ),
        };
        let justification = quorum.into_iter().map(|member| member.envelope).collect();
        self.propose(instance, round, value, request, Some(justification), output);
    }

    /// Broadcasts this node's ROUND_CHANGE for `round`.
    fn broadcast_round_change(
        &self,
        instance: InstanceId,
        round: Round,
        output: &mut EngineOutput,
    ) {
        let Some(state) = self.instances.get(&instance) else {
            return;
        };
        let (prepared_round, value, evidence) = match state.prepared() {
            Some(prepared) => (
                Some(prepared.round),
                Some(prepared.value.clone()),
                Some(prepared.evidence.clone()),
            ),
            None => (None, None, None),
        };

        let round_change = ConsensusMessage::new(
            instance,
            round,
            state.client_id(),
            Step::RoundChange {
                prepared_round,
                value,
            },
            state.client_request().clone(),
        );
        let mut message = Message::consensus(self.id, round_change);
        if let Some(evidence) = evidence {
            message = message.with_justification(evidence);
        }
        output.broadcast(message);
    }

    /// Finds a client request bound to `value` among the PREPAREs
    /// piggybacked on a ROUND_CHANGE quorum.
    fn request_bound_to(&self, quorum: &[SignedMessage], value: &str) -> Option<Envelope> {
        quorum
            .iter()
            .filter_map(|member| member.envelope.justification.as_deref())
            .flatten()
            .filter_map(|envelope| SignedMessage::verify(envelope, &self.membership))
            .find(|prepare| {
                matches!(prepare.step(), Step::Prepare { value: v } if v == value)
                    && prepare.message.verify_binding(&self.membership).is_ok()
            })
            .map(|prepare| *prepare.message.client_request)
    }
}
