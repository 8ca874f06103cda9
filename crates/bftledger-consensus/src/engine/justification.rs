//! Validation of piggybacked quorum evidence.
//!
//! Two pieces of evidence travel outside signed payloads:
//!
//! - a ROUND_CHANGE that reports a prepared value carries the PREPARE
//!   quorum that prepared it;
//! - a PRE_PREPARE for a round above 1 carries the ROUND_CHANGE quorum
//!   that elected its leader.
//!
//! Every piggybacked envelope is authenticated against the membership
//! before it counts.

use std::collections::{HashMap, HashSet};

use bftledger_types::{InstanceId, Role, Round};
use bftledger_wire::{Envelope, Step};

use crate::bucket::SignedMessage;

use super::ConsensusCore;

/// Highest `(prepared_round, value)` reported by a set of ROUND_CHANGEs,
/// or `None` if no member reports a prepared value.
pub fn highest_prepared(quorum: &[SignedMessage]) -> Option<(Round, String)> {
    quorum
        .iter()
        .filter_map(|member| match member.step() {
            Step::RoundChange {
                prepared_round: Some(round),
                value: Some(value),
            } => Some((*round, value)),
            _ => None,
        })
        .max_by_key(|(round, _)| *round)
        .map(|(round, value)| (round, value.clone()))
}

impl ConsensusCore {
    /// Whether a quorum of ROUND_CHANGEs justifies a new proposal.
    ///
    /// Justified when no member reports a prepared value, or when some
    /// member reports exactly the highest prepared round and value and
    /// backs it with a valid PREPARE quorum.
    pub(crate) fn justify_round_change(
        &self,
        instance: InstanceId,
        quorum: &[SignedMessage],
    ) -> bool {
        let Some((round, value)) = highest_prepared(quorum) else {
            return true;
        };

        quorum.iter().any(|member| {
            let reports_highest = matches!(
                member.step(),
                Step::RoundChange {
                    prepared_round: Some(reported),
                    value: Some(reported_value),
                } if *reported == round && *reported_value == value
            );
            reports_highest
                && self.is_prepare_quorum(
                    instance,
                    round,
                    &value,
                    member.envelope.justification.as_deref(),
                )
        })
    }

    /// Whether a PRE_PREPARE is justified.
    ///
    /// Round 1 needs no evidence. Later rounds must not be behind the
    /// local round and must carry a quorum of ROUND_CHANGEs for the same
    /// instance and round that passes [`Self::justify_round_change`]; if
    /// that quorum reports a prepared value, the proposal must carry it.
    pub(crate) fn justify_pre_prepare(&self, message: &SignedMessage, value: &str) -> bool {
        let instance = message.instance();
        let round = message.round();
        if round == Round::FIRST {
            return true;
        }

        let current = self
            .instances
            .get(&instance)
            .map_or(Round::FIRST, |state| state.current_round());
        if round < current {
            return false;
        }

        let Some(justification) = message.envelope.justification.as_deref() else {
            return false;
        };

        let mut quorum: HashMap<_, SignedMessage> = HashMap::new();
        for envelope in justification {
            let Some(member) = SignedMessage::verify(envelope, &self.membership) else {
                continue;
            };
            let counts = self.membership.role(member.sender()) == Some(Role::Node)
                && member.instance() == instance
                && member.round() == round
                && matches!(member.step(), Step::RoundChange { .. });
            if counts {
                quorum.entry(member.sender()).or_insert(member);
            }
        }
        if quorum.len() < self.membership.quorum() {
            return false;
        }

        let quorum: Vec<SignedMessage> = quorum.into_values().collect();
        if !self.justify_round_change(instance, &quorum) {
            return false;
        }
        match highest_prepared(&quorum) {
            Some((_, prepared)) => prepared == value,
            None => true,
        }
    }

    /// Whether `evidence` holds PREPAREs for `(instance, round, value)`
    /// from a quorum of distinct nodes.
    pub(crate) fn is_prepare_quorum(
        &self,
        instance: InstanceId,
        round: Round,
        value: &str,
        evidence: Option<&[Envelope]>,
    ) -> bool {
        let Some(evidence) = evidence else {
            return false;
        };

        let senders: HashSet<_> = evidence
            .iter()
            .filter_map(|envelope| SignedMessage::verify(envelope, &self.membership))
            .filter(|member| {
                self.membership.role(member.sender()) == Some(Role::Node)
                    && member.instance() == instance
                    && member.round() == round
                    && matches!(member.step(), Step::Prepare { value: v } if v == value)
            })
            .map(|member| member.sender())
            .collect();

        senders.len() >= self.membership.quorum()
    }
}
