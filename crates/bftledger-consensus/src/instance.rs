//! Per-instance consensus state.

use std::collections::HashSet;

use bftledger_types::{ProcessId, RequestId, Round};
use bftledger_wire::{ClientRequest, ConsensusMessage, Envelope};

/// Where an instance stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    New,
    PrePrepared,
    Prepared,
    Committed,
    Decided,
}

/// Mutable record of one consensus instance.
///
/// Rounds only move forward: `current_round`, the prepared round and the
/// committed round never decrease. The instance's round-change timer is
/// owned by the node runtime, keyed by instance id.
#[derive(Debug, Clone)]
pub struct InstanceState {
    current_round: Round,
    prepared: Option<Prepared>,
    committed_round: Option<Round>,
    commit_message: Option<ConsensusMessage>,
    input_value: String,
    client_id: ProcessId,
    client_request: Envelope,
    /// Rounds in which a PRE_PREPARE was accepted.
    pre_prepared: HashSet<Round>,
    /// Rounds in which this node proposed as leader.
    proposed: HashSet<Round>,
    decided: bool,
}

/// A value this node saw a prepare quorum for.
#[derive(Debug, Clone, PartialEq)]
pub struct Prepared {
    pub round: Round,
    pub value: String,
    /// The quorum of PREPARE envelopes, piggybacked on round changes.
    pub evidence: Vec<Envelope>,
}

impl InstanceState {
    pub fn new(input_value: String, client_id: ProcessId, client_request: Envelope) -> Self {
        Self {
            current_round: Round::FIRST,
            prepared: None,
            committed_round: None,
            commit_message: None,
            input_value,
            client_id,
            client_request,
            pre_prepared: HashSet::new(),
            proposed: HashSet::new(),
            decided: false,
        }
    }

    pub fn current_round(&self) -> Round {
        self.current_round
    }

    /// Moves to `round` if it is ahead of the current round.
    pub fn advance_to(&mut self, round: Round) -> bool {
        if round > self.current_round {
            self.current_round = round;
            true
        } else {
            false
        }
    }

    /// Moves to the next round, returning it.
    pub fn next_round(&mut self) -> Round {
        self.current_round = self.current_round.next();
        self.current_round
    }

    pub fn prepared(&self) -> Option<&Prepared> {
        self.prepared.as_ref()
    }

    pub fn prepared_round(&self) -> Option<Round> {
        self.prepared.as_ref().map(|prepared| prepared.round)
    }

    pub fn prepared_value(&self) -> Option<&str> {
        self.prepared.as_ref().map(|prepared| prepared.value.as_str())
    }

    /// Records a prepare quorum. Ignored unless `round` is above the
    /// current prepared round.
    pub fn prepare(&mut self, round: Round, value: String, evidence: Vec<Envelope>) -> bool {
        if self.prepared_round().is_some_and(|prepared| prepared >= round) {
            return false;
        }
        self.prepared = Some(Prepared {
            round,
            value,
            evidence,
        });
        true
    }

    pub fn committed_round(&self) -> Option<Round> {
        self.committed_round
    }

    pub fn is_committed(&self) -> bool {
        self.committed_round.is_some()
    }

    /// The COMMIT this node replays to stragglers.
    pub fn commit_message(&self) -> Option<&ConsensusMessage> {
        self.commit_message.as_ref()
    }

    /// Records the commit quorum. Only the first commit counts.
    pub fn commit(&mut self, round: Round, commit: ConsensusMessage) -> bool {
        if self.committed_round.is_some() {
            return false;
        }
        self.committed_round = Some(round);
        self.commit_message = Some(commit);
        true
    }

    pub fn is_decided(&self) -> bool {
        self.decided
    }

    pub fn mark_decided(&mut self) {
        self.decided = true;
    }

    pub fn input_value(&self) -> &str {
        &self.input_value
    }

    pub fn client_id(&self) -> ProcessId {
        self.client_id
    }

    pub fn client_request(&self) -> &Envelope {
        &self.client_request
    }

    /// Whether the instance is bound to request `request` of `client`.
    pub fn carries(&self, client: ProcessId, request: RequestId) -> bool {
        self.client_id == client
            && ClientRequest::decode(&self.client_request)
                .is_ok_and(|decoded| decoded.request_id == request)
    }

    /// Rebinds the instance to the request of an accepted proposal. The
    /// leader's numbering wins over the order requests reached this node.
    pub fn adopt(&mut self, value: String, client_id: ProcessId, client_request: Envelope) {
        self.input_value = value;
        self.client_id = client_id;
        self.client_request = client_request;
    }

    /// Records an accepted PRE_PREPARE; `false` if one was already
    /// accepted for `round`.
    pub fn accept_pre_prepare(&mut self, round: Round) -> bool {
        self.pre_prepared.insert(round)
    }

    /// Records a proposal as leader; `false` if already proposed in
    /// `round`.
    pub fn propose(&mut self, round: Round) -> bool {
        self.proposed.insert(round)
    }

    pub fn phase(&self) -> Phase {
        if self.decided {
            Phase::Decided
        } else if self.committed_round.is_some() {
            Phase::Committed
        } else if self.prepared.is_some() {
            Phase::Prepared
        } else if self.pre_prepared.is_empty() {
            Phase::New
        } else {
            Phase::PrePrepared
        }
    }
}
