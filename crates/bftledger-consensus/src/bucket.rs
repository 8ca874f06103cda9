//! Quorum evidence per instance and round.

use std::collections::{BTreeMap, HashMap, HashSet};

use bftledger_types::{InstanceId, Membership, ProcessId, Round};
use bftledger_wire::{ConsensusMessage, Envelope, Payload, Step};

/// An authenticated consensus message and the envelope it arrived in.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedMessage {
    pub envelope: Envelope,
    pub message: ConsensusMessage,
}

impl SignedMessage {
    pub fn new(envelope: Envelope, message: ConsensusMessage) -> Self {
        Self { envelope, message }
    }

    /// Authenticates a piggybacked envelope and decodes its consensus
    /// payload.
    pub fn verify(envelope: &Envelope, membership: &Membership) -> Option<Self> {
        envelope.verify_member(membership).ok()?;
        let message = envelope.open().ok()?;
        match message.payload {
            Payload::Consensus(consensus) => Some(Self::new(envelope.clone(), consensus)),
            _ => None,
        }
    }

    pub fn sender(&self) -> ProcessId {
        self.envelope.sender_id
    }

    pub fn instance(&self) -> InstanceId {
        self.message.consensus_instance
    }

    pub fn round(&self) -> Round {
        self.message.round
    }

    pub fn step(&self) -> &Step {
        &self.message.step
    }
}

/// Messages of one kind, indexed `instance -> round -> sender`.
///
/// A later message from the same sender for the same round replaces the
/// earlier one.
#[derive(Debug, Clone)]
pub struct MessageBucket {
    quorum: usize,
    max_faulty: usize,
    messages: HashMap<InstanceId, BTreeMap<Round, HashMap<ProcessId, SignedMessage>>>,
}

impl MessageBucket {
    pub fn new(membership: &Membership) -> Self {
        Self::with_sizes(membership.quorum(), membership.max_faulty())
    }

    pub fn with_sizes(quorum: usize, max_faulty: usize) -> Self {
        Self {
            quorum,
            max_faulty,
            messages: HashMap::new(),
        }
    }

    pub fn add(&mut self, message: SignedMessage) {
        self.messages
            .entry(message.instance())
            .or_default()
            .entry(message.round())
            .or_default()
            .insert(message.sender(), message);
    }

    /// Messages of `(instance, round)`, keyed by sender.
    pub fn messages(
        &self,
        instance: InstanceId,
        round: Round,
    ) -> Option<&HashMap<ProcessId, SignedMessage>> {
        self.messages.get(&instance)?.get(&round)
    }

    /// Value carried by a quorum of PREPAREs, with the supporting
    /// envelopes.
    pub fn prepare_quorum_value(
        &self,
        instance: InstanceId,
        round: Round,
    ) -> Option<(String, Vec<Envelope>)> {
        let (value, support) = self.prepare_quorum(instance, round)?;
        Some((value, support.into_iter().map(|m| m.envelope.clone()).collect()))
    }

    /// Like [`Self::prepare_quorum_value`], with the supporting messages.
    pub fn prepare_quorum(
        &self,
        instance: InstanceId,
        round: Round,
    ) -> Option<(String, Vec<&SignedMessage>)> {
        self.quorum_value(instance, round, |step| match step {
            Step::Prepare { value } => Some(value),
            _ => None,
        })
    }

    /// Value carried by a quorum of COMMITs.
    pub fn commit_quorum_value(&self, instance: InstanceId, round: Round) -> Option<String> {
        self.commit_quorum(instance, round).map(|(value, _)| value)
    }

    /// Like [`Self::commit_quorum_value`], with the supporting messages.
    pub fn commit_quorum(
        &self,
        instance: InstanceId,
        round: Round,
    ) -> Option<(String, Vec<&SignedMessage>)> {
        self.quorum_value(instance, round, |step| match step {
            Step::Commit { value } => Some(value),
            _ => None,
        })
    }

    /// Smallest round above `current` once at least `f + 1` distinct
    /// senders asked for rounds above `current`.
    pub fn round_change_f_plus_1(&self, instance: InstanceId, current: Round) -> Option<Round> {
        let rounds = self.messages.get(&instance)?;
        let mut senders = HashSet::new();
        let mut min_round = None;

        for (&round, by_sender) in rounds.range(current.next()..) {
            let mut any = false;
            for message in by_sender.values() {
                if matches!(message.step(), Step::RoundChange { .. }) {
                    senders.insert(message.sender());
                    any = true;
                }
            }
            if any && min_round.is_none() {
                min_round = Some(round);
            }
        }

        if senders.len() > self.max_faulty {
            min_round
        } else {
            None
        }
    }

    /// A quorum of ROUND_CHANGEs for `round`.
    ///
    /// With `prepared` set, only messages reporting exactly that prepared
    /// round and value count.
    pub fn round_change_quorum(
        &self,
        instance: InstanceId,
        round: Round,
        prepared: Option<(Round, &str)>,
    ) -> Option<Vec<SignedMessage>> {
        let members: Vec<SignedMessage> = self
            .messages(instance, round)?
            .values()
            .filter(|message| match (message.step(), prepared) {
                (Step::RoundChange { .. }, None) => true,
                (
                    Step::RoundChange {
                        prepared_round: Some(reported),
                        value: Some(value),
                    },
                    Some((round, expected)),
                ) => *reported == round && value == expected,
                _ => false,
            })
            .cloned()
            .collect();

        (members.len() >= self.quorum).then_some(members)
    }

    fn quorum_value<'a>(
        &'a self,
        instance: InstanceId,
        round: Round,
        value_of: impl Fn(&'a Step) -> Option<&'a String>,
    ) -> Option<(String, Vec<&'a SignedMessage>)> {
        let mut by_value: HashMap<&String, Vec<&SignedMessage>> = HashMap::new();
        for message in self.messages(instance, round)?.values() {
            if let Some(value) = value_of(message.step()) {
                by_value.entry(value).or_default().push(message);
            }
        }

        // Quorum intersection leaves at most one candidate.
        by_value
            .into_iter()
            .find(|(_, support)| support.len() >= self.quorum)
            .map(|(value, support)| (value.clone(), support))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bftledger_crypto::SigningKey;
    use bftledger_types::{LocalProcess, MessageId, ProcessConfig, RequestId};
    use bftledger_wire::{ClientBody, ClientMessage, Message};

    fn request() -> Envelope {
        let client = LocalProcess::new(
            ProcessConfig::new(ProcessId::new(5), "127.0.0.1", 5005),
            SigningKey::generate(),
        );
        let body = ClientBody::CheckBalance {
            account: client.public_key().to_base64(),
        };
        Envelope::wrap(
            Message::client(client.id(), ClientMessage::new(RequestId::new(1), body)),
            &client,
        )
        .unwrap()
    }

    fn signed(sender: u32, round: u64, step: Step) -> SignedMessage {
        let message = ConsensusMessage::new(
            InstanceId::FIRST,
            Round::new(round),
            ProcessId::new(5),
            step,
            request(),
        );
        let mut envelope = request();
        envelope.sender_id = ProcessId::new(sender);
        envelope.message_id = MessageId::new(u64::from(sender));
        SignedMessage::new(envelope, message)
    }

    fn prepare(sender: u32, round: u64, value: &str) -> SignedMessage {
        signed(
            sender,
            round,
            Step::Prepare {
                value: value.to_string(),
            },
        )
    }

    fn round_change(sender: u32, round: u64, prepared: Option<(u64, &str)>) -> SignedMessage {
        signed(
            sender,
            round,
            Step::RoundChange {
                prepared_round: prepared.map(|(r, _)| Round::new(r)),
                value: prepared.map(|(_, v)| v.to_string()),
            },
        )
    }

    /// Four nodes: quorum 3, f = 1.
    fn bucket() -> MessageBucket {
        MessageBucket::with_sizes(3, 1)
    }

    #[test]
    fn prepare_quorum_needs_three_matching_values() {
        let mut bucket = bucket();
        bucket.add(prepare(1, 1, "a"));
        bucket.add(prepare(2, 1, "a"));
        bucket.add(prepare(3, 1, "b"));
        assert!(bucket.prepare_quorum_value(InstanceId::FIRST, Round::FIRST).is_none());

        bucket.add(prepare(4, 1, "a"));
        let (value, support) = bucket
            .prepare_quorum_value(InstanceId::FIRST, Round::FIRST)
            .unwrap();
        assert_eq!(value, "a");
        assert_eq!(support.len(), 3);
    }

    #[test]
    fn same_sender_overwrites() {
        let mut bucket = bucket();
        bucket.add(prepare(1, 1, "a"));
        bucket.add(prepare(1, 1, "a"));
        bucket.add(prepare(1, 1, "a"));
        bucket.add(prepare(2, 1, "a"));
        assert!(bucket.prepare_quorum_value(InstanceId::FIRST, Round::FIRST).is_none());
        assert_eq!(
            bucket.messages(InstanceId::FIRST, Round::FIRST).unwrap().len(),
            2
        );
    }

    #[test]
    fn commit_quorum_is_per_round() {
        let mut bucket = bucket();
        for sender in 1..=2 {
            bucket.add(signed(
                sender,
                1,
                Step::Commit {
                    value: "v".to_string(),
                },
            ));
        }
        bucket.add(signed(
            3,
            2,
            Step::Commit {
                value: "v".to_string(),
            },
        ));
        assert!(bucket.commit_quorum_value(InstanceId::FIRST, Round::FIRST).is_none());

        bucket.add(signed(
            4,
            1,
            Step::Commit {
                value: "v".to_string(),
            },
        ));
        assert_eq!(
            bucket.commit_quorum_value(InstanceId::FIRST, Round::FIRST),
            Some("v".to_string())
        );
    }

    #[test]
    fn f_plus_one_higher_round_changes_pick_the_smallest_round() {
        let mut bucket = bucket();
        bucket.add(round_change(1, 3, None));
        assert_eq!(
            bucket.round_change_f_plus_1(InstanceId::FIRST, Round::FIRST),
            None
        );

        bucket.add(round_change(2, 2, None));
        assert_eq!(
            bucket.round_change_f_plus_1(InstanceId::FIRST, Round::FIRST),
            Some(Round::new(2))
        );
        // Nothing above round 3.
        assert_eq!(
            bucket.round_change_f_plus_1(InstanceId::FIRST, Round::new(3)),
            None
        );
    }

    #[test]
    fn one_sender_in_many_rounds_counts_once() {
        let mut bucket = bucket();
        bucket.add(round_change(4, 2, None));
        bucket.add(round_change(4, 3, None));
        bucket.add(round_change(4, 4, None));
        assert_eq!(
            bucket.round_change_f_plus_1(InstanceId::FIRST, Round::FIRST),
            None
        );
    }

    #[test]
    fn round_change_quorum_with_and_without_filter() {
        let mut bucket = bucket();
        bucket.add(round_change(1, 2, Some((1, "v"))));
        bucket.add(round_change(2, 2, Some((1, "v"))));
        bucket.add(round_change(3, 2, None));

        let quorum = bucket
            .round_change_quorum(InstanceId::FIRST, Round::new(2), None)
            .unwrap();
        assert_eq!(quorum.len(), 3);
        assert!(
            bucket
                .round_change_quorum(InstanceId::FIRST, Round::new(2), Some((Round::FIRST, "v")))
                .is_none()
        );

        bucket.add(round_change(4, 2, Some((1, "v"))));
        assert_eq!(
            bucket
                .round_change_quorum(InstanceId::FIRST, Round::new(2), Some((Round::FIRST, "v")))
                .unwrap()
                .len(),
            3
        );
    }
}
