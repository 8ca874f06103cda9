//! Deterministic tests of the consensus core.
//!
//! A [`Sim`] wires four cores and two clients together through an
//! in-memory FIFO queue. Messages are signed and checked the way the link
//! does it, timers only fire when a test says so, and committed instances
//! are decided in order as soon as they can be.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use bftledger_crypto::SigningKey;
use bftledger_link::Delivered;
use bftledger_types::{
    INITIAL_BALANCE, InstanceId, LocalProcess, Membership, MessageId, ProcessConfig, ProcessId,
    ProcessIdentity, RequestId, Round, Transaction,
};
use bftledger_wire::{
    ClientBody, ClientMessage, ConsensusMessage, Envelope, Message, Payload, Step,
};
use test_case::test_case;

use super::*;
use crate::interceptor::{
    EventKind, IgnoreClient, InterceptContext, OverchargeFee, RespondImmediately, Silence,
    SkipRequestVerification,
};
use crate::output::{Outbound, Recipient, TimerCommand};

const NODES: u32 = 4;
const ALICE: u32 = 5;
const BOB: u32 = 6;

// ============================================================================
// Simulation
// ============================================================================

struct Sim {
    membership: Arc<Membership>,
    processes: BTreeMap<ProcessId, LocalProcess>,
    cores: BTreeMap<ProcessId, ConsensusCore>,
    queue: VecDeque<(ProcessId, ProcessId, Message)>,
    replies: Vec<(ProcessId, ProcessId, ClientMessage)>,
    committed: BTreeMap<ProcessId, BTreeSet<InstanceId>>,
    next_message_id: u64,
}

impl Sim {
    fn new() -> Self {
        Self::with_interceptors(|_| Interceptors::new())
    }

    fn with_interceptors(interceptors: impl Fn(ProcessId) -> Interceptors) -> Self {
        let processes: BTreeMap<ProcessId, LocalProcess> = (1..=NODES)
            .chain([ALICE, BOB])
            .map(|id| {
                let id = ProcessId::new(id);
                let config = ProcessConfig::new(id, "127.0.0.1", 4000 + id.as_u32() as u16);
                (id, LocalProcess::new(config, SigningKey::generate()))
            })
            .collect();

        let identities: Vec<ProcessIdentity> =
            processes.values().map(|p| p.identity().clone()).collect();
        let (nodes, clients) = identities.split_at(NODES as usize);
        let membership = Arc::new(Membership::new(nodes.to_vec(), clients.to_vec()).unwrap());

        let cores = (1..=NODES)
            .map(ProcessId::new)
            .map(|id| {
                let core = ConsensusCore::new(id, Arc::clone(&membership), interceptors(id));
                (id, core)
            })
            .collect();

        Self {
            membership,
            processes,
            cores,
            queue: VecDeque::new(),
            replies: Vec::new(),
            committed: BTreeMap::new(),
            next_message_id: 0,
        }
    }

    fn node(&self, id: u32) -> &ConsensusCore {
        &self.cores[&ProcessId::new(id)]
    }

    fn nodes(&self) -> impl Iterator<Item = &ConsensusCore> {
        self.cores.values()
    }

    fn account(&self, id: u32) -> String {
        self.processes[&ProcessId::new(id)].identity().account()
    }

    /// Signs `message` as `from`, the way the link would send it.
    fn sign(&mut self, from: ProcessId, mut message: Message) -> Envelope {
        self.next_message_id += 1;
        message.sender_id = from;
        message.message_id = MessageId::new(self.next_message_id);
        Envelope::wrap(message, &self.processes[&from]).unwrap()
    }

    fn request(&mut self, client: u32, request_id: u64, body: ClientBody) -> Envelope {
        let client = ProcessId::new(client);
        let message = Message::client(client, ClientMessage::new(RequestId::new(request_id), body));
        self.sign(client, message)
    }

    fn transfer(&mut self, from: u32, to: u32, amount: i64, request_id: u64) -> Envelope {
        let body = ClientBody::Transfer {
            source: self.account(from),
            destination: self.account(to),
            amount,
        };
        self.request(from, request_id, body)
    }

    fn check_balance(&mut self, client: u32, request_id: u64) -> Envelope {
        let body = ClientBody::CheckBalance {
            account: self.account(client),
        };
        self.request(client, request_id, body)
    }

    /// Hands a client request to every node.
    fn submit(&mut self, request: &Envelope) {
        for id in self.node_ids() {
            let output = self.core(id).on_transfer(request);
            self.absorb(id, output);
        }
    }

    /// Hands a client request to one node.
    fn submit_to(&mut self, node: u32, request: &Envelope) {
        let id = ProcessId::new(node);
        let output = self.core(id).on_transfer(request);
        self.absorb(id, output);
    }

    fn timeout(&mut self, node: u32, instance: InstanceId) {
        let id = ProcessId::new(node);
        let output = self.core(id).on_timeout(instance);
        self.absorb(id, output);
    }

    fn run(&mut self) {
        let mut steps = 0;
        while let Some((from, to, message)) = self.queue.pop_front() {
            self.deliver(from, to, message);
            steps += 1;
            assert!(steps < 100_000, "simulation does not quiesce");
        }
    }

    fn deliver(&mut self, from: ProcessId, to: ProcessId, message: Message) {
        let envelope = self.sign(from, message);
        let message = envelope.open().unwrap();

        if self.membership.is_client(to) {
            if let Payload::Client(reply) = message.payload {
                self.replies.push((to, from, reply));
            }
            return;
        }
        if let Some(consensus) = message.as_consensus() {
            if consensus.verify_binding(&self.membership).is_err() {
                return;
            }
        }

        let output = self.core(to).dispatch(Delivered {
            envelope,
            message,
            local: from == to,
        });
        self.absorb(to, output);
    }

    fn absorb(&mut self, node: ProcessId, output: EngineOutput) {
        for Outbound { to, message } in output.messages {
            match to {
                Recipient::AllNodes => {
                    for id in self.node_ids() {
                        self.queue.push_back((node, id, message.clone()));
                    }
                }
                Recipient::Process(id) => self.queue.push_back((node, id, message)),
            }
        }

        if let Some(instance) = output.committed {
            self.committed.entry(node).or_default().insert(instance);
            loop {
                let next = self.core(node).next_to_decide();
                if !self.committed[&node].contains(&next) {
                    break;
                }
                let output = self.core(node).decide(next).unwrap();
                self.absorb(node, output);
            }
        }
    }

    fn core(&mut self, id: ProcessId) -> &mut ConsensusCore {
        self.cores.get_mut(&id).unwrap()
    }

    fn node_ids(&self) -> Vec<ProcessId> {
        self.cores.keys().copied().collect()
    }

    fn replies_to(&self, client: u32) -> Vec<&ClientBody> {
        self.replies
            .iter()
            .filter(|(to, _, _)| *to == ProcessId::new(client))
            .map(|(_, _, reply)| &reply.body)
            .collect()
    }

    /// A consensus message signed by `from`.
    fn consensus(&mut self, from: u32, message: ConsensusMessage) -> SignedMessage {
        let from = ProcessId::new(from);
        let envelope = self.sign(from, Message::consensus(from, message));
        let Payload::Consensus(message) = envelope.open().unwrap().payload else {
            unreachable!()
        };
        SignedMessage::new(envelope, message)
    }
}

fn only_for(node: u32, interceptors: Interceptors) -> impl Fn(ProcessId) -> Interceptors {
    move |id| {
        if id == ProcessId::new(node) {
            interceptors.clone()
        } else {
            Interceptors::new()
        }
    }
}

fn steps_broadcast(output: &EngineOutput) -> Vec<&Step> {
    output
        .messages
        .iter()
        .filter_map(|outbound| outbound.message.as_consensus())
        .map(|message| &message.step)
        .collect()
}

// ============================================================================
// Normal case
// ============================================================================

#[test]
fn transfer_is_decided_everywhere() {
    let mut sim = Sim::new();
    let request = sim.transfer(ALICE, BOB, 500, 1);
    sim.submit(&request);
    sim.run();

    // Leader of round 1 is node 2.
    let leader = sim.account(2);
    let (alice, bob) = (sim.account(ALICE), sim.account(BOB));
    for core in sim.nodes() {
        assert_eq!(core.ledger().len(), 1);
        assert_eq!(
            core.ledger().transactions().collect::<Vec<_>>(),
            vec![&Transaction::transfer(alice.clone(), bob.clone(), 500)]
        );
        assert_eq!(core.balance(&alice), Some(9_490));
        assert_eq!(core.balance(&bob), Some(10_500));
        assert_eq!(core.balance(&leader), Some(INITIAL_BALANCE + FEE));
        assert_eq!(core.instance(InstanceId::FIRST).unwrap().committed_round(), Some(Round::FIRST));
    }

    let replies = sim.replies_to(ALICE);
    assert_eq!(replies.len(), 4);
    assert!(
        replies
            .iter()
            .all(|body| **body == ClientBody::ResponseTransfer { success: true })
    );
}

#[test_case(10_000 ; "fee not covered")]
#[test_case(-5 ; "negative amount")]
fn rejected_transfer_fills_an_empty_slot(amount: i64) {
    let mut sim = Sim::new();
    let request = sim.transfer(ALICE, BOB, amount, 1);
    sim.submit(&request);
    sim.run();

    let alice = sim.account(ALICE);
    for core in sim.nodes() {
        assert_eq!(core.ledger().entries(), &[LedgerEntry::Empty]);
        assert_eq!(core.balance(&alice), Some(INITIAL_BALANCE));
        assert_eq!(core.accounts().total(), 6 * INITIAL_BALANCE);
    }
    assert!(
        sim.replies_to(ALICE)
            .iter()
            .all(|body| **body == ClientBody::ResponseTransfer { success: false })
    );
}

#[test]
fn balance_query_goes_through_consensus() {
    let mut sim = Sim::new();
    let request = sim.check_balance(BOB, 1);
    sim.submit(&request);
    sim.run();

    for core in sim.nodes() {
        assert_eq!(core.ledger().entries(), &[LedgerEntry::Empty]);
    }
    let replies = sim.replies_to(BOB);
    assert_eq!(replies.len(), 4);
    assert!(replies.iter().all(|body| **body
        == ClientBody::ResponseBalance {
            balance: INITIAL_BALANCE
        }));
}

#[test]
fn consecutive_requests_fill_consecutive_slots() {
    let mut sim = Sim::new();
    let first = sim.transfer(ALICE, BOB, 100, 1);
    let second = sim.transfer(BOB, ALICE, 30, 1);
    let third = sim.transfer(ALICE, BOB, 1, 2);
    for request in [&first, &second, &third] {
        sim.submit(request);
        sim.run();
    }

    let alice = sim.account(ALICE);
    for core in sim.nodes() {
        assert_eq!(core.ledger().len(), 3);
        assert_eq!(core.balance(&alice), Some(INITIAL_BALANCE - 100 - 1 + 30 - 2 * FEE));
        assert_eq!(core.accounts().total(), 6 * INITIAL_BALANCE);
    }
}

#[test]
fn replayed_request_starts_nothing() {
    let mut sim = Sim::new();
    let request = sim.transfer(ALICE, BOB, 500, 1);
    sim.submit(&request);
    sim.run();
    let replies = sim.replies_to(ALICE).len();

    sim.submit(&request);
    sim.run();

    let alice = sim.account(ALICE);
    for core in sim.nodes() {
        assert!(core.instance(InstanceId::new(2)).is_none());
        assert_eq!(core.ledger().len(), 1);
        assert_eq!(core.balance(&alice), Some(9_490));
    }
    assert_eq!(sim.replies_to(ALICE).len(), replies);
}

#[test]
fn spending_from_another_account_is_refused() {
    let mut sim = Sim::new();
    let body = ClientBody::Transfer {
        source: sim.account(BOB),
        destination: sim.account(ALICE),
        amount: 500,
    };
    let forged = sim.request(ALICE, 1, body);
    sim.submit(&forged);
    sim.run();

    for core in sim.nodes() {
        assert!(core.instance(InstanceId::FIRST).is_none());
        assert!(core.ledger().is_empty());
    }
    let replies = sim.replies_to(ALICE);
    assert_eq!(replies.len(), 4);
    assert!(
        replies
            .iter()
            .all(|body| **body == ClientBody::ResponseTransfer { success: false })
    );
}

#[test]
fn pre_prepare_from_a_non_leader_is_ignored() {
    let mut sim = Sim::new();
    let request = sim.transfer(ALICE, BOB, 500, 1);
    let value = Transaction::transfer(sim.account(ALICE), sim.account(BOB), 500).to_value();
    let pre_prepare = |round| {
        ConsensusMessage::new(
            InstanceId::FIRST,
            Round::new(round),
            ProcessId::new(ALICE),
            Step::PrePrepare {
                value: value.clone(),
            },
            request.clone(),
        )
    };

    let impostor = sim.consensus(3, pre_prepare(1));
    assert!(sim.core(ProcessId::new(1)).on_pre_prepare(impostor).is_empty());

    // Node 3 leads round 2 but brings no ROUND_CHANGE quorum.
    let unjustified = sim.consensus(3, pre_prepare(2));
    assert!(
        sim.core(ProcessId::new(1))
            .on_pre_prepare(unjustified)
            .is_empty()
    );

    let genuine = sim.consensus(2, pre_prepare(1));
    let output = sim.core(ProcessId::new(1)).on_pre_prepare(genuine.clone());
    assert!(matches!(steps_broadcast(&output)[..], [Step::Prepare { .. }]));
    assert_eq!(output.timers, vec![TimerCommand::Arm(InstanceId::FIRST)]);

    // A second PRE_PREPARE for the same round is not prepared again.
    let again = sim.consensus(2, pre_prepare(1));
    assert!(sim.core(ProcessId::new(1)).on_pre_prepare(again).is_empty());
}

#[test]
fn committed_node_answers_late_prepare_with_commit() {
    let mut sim = Sim::new();
    let request = sim.transfer(ALICE, BOB, 500, 1);
    sim.submit(&request);
    sim.run();

    let value = Transaction::transfer(sim.account(ALICE), sim.account(BOB), 500).to_value();
    let late = sim.consensus(
        4,
        ConsensusMessage::new(
            InstanceId::FIRST,
            Round::FIRST,
            ProcessId::new(ALICE),
            Step::Prepare { value },
            request,
        ),
    );
    let late_id = late.envelope.message_id;
    let output = sim.core(ProcessId::new(1)).on_prepare(late);

    assert_eq!(output.messages.len(), 1);
    let Outbound { to, message } = &output.messages[0];
    assert_eq!(*to, Recipient::Process(ProcessId::new(4)));
    let commit = message.as_consensus().unwrap();
    assert!(matches!(commit.step, Step::Commit { .. }));
    assert_eq!(commit.reply_to, Some(ProcessId::new(4)));
    assert_eq!(commit.reply_to_message_id, Some(late_id));
}

#[test]
fn decide_needs_a_commit() {
    let mut sim = Sim::new();
    assert_eq!(
        sim.core(ProcessId::new(1)).decide(InstanceId::FIRST),
        Err(EngineError::UnknownInstance(InstanceId::FIRST))
    );

    let request = sim.transfer(ALICE, BOB, 500, 1);
    let output = sim.core(ProcessId::new(1)).on_transfer(&request);
    assert_eq!(output.timers, vec![TimerCommand::Arm(InstanceId::FIRST)]);
    assert_eq!(
        sim.core(ProcessId::new(1)).decide(InstanceId::FIRST),
        Err(EngineError::NotCommitted(InstanceId::FIRST))
    );
}

// ============================================================================
// Faults
// ============================================================================

#[test]
fn one_node_ignoring_prepares_does_not_block() {
    let mut sim = Sim::with_interceptors(|id| {
        if id == ProcessId::new(4) {
            Interceptors::new().with(EventKind::Prepare, Silence)
        } else {
            Interceptors::new()
        }
    });
    let request = sim.transfer(ALICE, BOB, 500, 1);
    sim.submit(&request);
    sim.run();

    for core in sim.nodes() {
        assert_eq!(core.ledger().transactions().count(), 1);
    }
}

#[test]
fn immediate_responders_reply_before_consensus() {
    let mut sim = Sim::with_interceptors(|id| {
        if id.as_u32() >= 3 {
            Interceptors::new().with(EventKind::Transfer, RespondImmediately)
        } else {
            Interceptors::new()
        }
    });
    let request = sim.transfer(ALICE, BOB, 500, 1);
    sim.submit(&request);
    sim.run();

    // Nodes 3 and 4 answered before the PREPARE phase started.
    let replies = sim.replies_to(ALICE);
    assert_eq!(
        &replies[..2],
        &[
            &ClientBody::ResponseTransfer { success: false },
            &ClientBody::ResponseTransfer { success: false }
        ]
    );
}

#[test]
fn byzantine_fee_only_changes_the_faulty_replica() {
    let mut sim = Sim::with_interceptors(|id| {
        if id == ProcessId::new(1) {
            Interceptors::new().with(EventKind::ApplyTransaction, OverchargeFee(10))
        } else {
            Interceptors::new()
        }
    });
    let request = sim.transfer(ALICE, BOB, 500, 1);
    sim.submit(&request);
    sim.run();

    let alice = sim.account(ALICE);
    assert_eq!(sim.node(1).balance(&alice), Some(INITIAL_BALANCE - 500 - 10 * FEE));
    for id in 2..=NODES {
        assert_eq!(sim.node(id).balance(&alice), Some(9_490));
    }
}

// ============================================================================
// Round change
// ============================================================================

#[test]
fn silent_leader_is_replaced() {
    let mut sim = Sim::with_interceptors(|id| {
        if id == ProcessId::new(2) {
            Interceptors::new().with(EventKind::StartConsensus, Silence)
        } else {
            Interceptors::new()
        }
    });
    let request = sim.transfer(ALICE, BOB, 500, 1);
    sim.submit(&request);
    sim.run();
    assert!(sim.nodes().all(|core| core.ledger().is_empty()));

    for node in [1, 3, 4] {
        sim.timeout(node, InstanceId::FIRST);
    }
    sim.run();

    // Node 3 leads round 2 and collects the fee.
    let (alice, new_leader) = (sim.account(ALICE), sim.account(3));
    for core in sim.nodes() {
        assert_eq!(core.ledger().transactions().count(), 1);
        assert_eq!(core.balance(&alice), Some(9_490));
        assert_eq!(core.balance(&new_leader), Some(INITIAL_BALANCE + FEE));
        assert_eq!(
            core.instance(InstanceId::FIRST).unwrap().committed_round(),
            Some(Round::new(2))
        );
    }
}

#[test]
fn prepared_value_survives_round_change() {
    // COMMITs of round 1 are lost, so every node prepares but none commits.
    let drop_first_round_commits = |event: &mut Event<'_>, _: &mut InterceptContext<'_>| match event {
        Event::Commit(message) if message.round() == Round::FIRST => Verdict::Handled,
        _ => Verdict::Proceed,
    };
    let mut sim = Sim::with_interceptors(|_| {
        Interceptors::new().with(EventKind::Commit, drop_first_round_commits)
    });
    let request = sim.transfer(ALICE, BOB, 500, 1);
    sim.submit(&request);
    sim.run();

    let value = Transaction::transfer(sim.account(ALICE), sim.account(BOB), 500).to_value();
    for core in sim.nodes() {
        let state = core.instance(InstanceId::FIRST).unwrap();
        assert_eq!(state.prepared_value(), Some(value.as_str()));
        assert!(!state.is_committed());
    }

    for node in 1..=NODES {
        sim.timeout(node, InstanceId::FIRST);
    }
    sim.run();

    for core in sim.nodes() {
        let state = core.instance(InstanceId::FIRST).unwrap();
        assert_eq!(state.committed_round(), Some(Round::new(2)));
        assert_eq!(core.ledger().transactions().count(), 1);
    }
}

#[test]
fn timeout_after_commit_stops_the_timer() {
    let mut sim = Sim::new();
    let request = sim.transfer(ALICE, BOB, 500, 1);
    sim.submit(&request);
    sim.run();

    let output = sim.core(ProcessId::new(1)).on_timeout(InstanceId::FIRST);
    assert!(output.messages.is_empty());
    assert_eq!(output.timers, vec![TimerCommand::Stop(InstanceId::FIRST)]);
}

#[test]
fn round_change_without_prepared_values_is_justified() {
    let mut sim = Sim::new();
    let request = sim.transfer(ALICE, BOB, 500, 1);
    let quorum: Vec<SignedMessage> = (1..=3)
        .map(|node| {
            sim.consensus(
                node,
                ConsensusMessage::new(
                    InstanceId::FIRST,
                    Round::new(2),
                    ProcessId::new(ALICE),
                    Step::RoundChange {
                        prepared_round: None,
                        value: None,
                    },
                    request.clone(),
                ),
            )
        })
        .collect();

    assert_eq!(highest_prepared(&quorum), None);
    assert!(sim.node(1).justify_round_change(InstanceId::FIRST, &quorum));
}

#[test]
fn prepared_claim_without_evidence_is_not_justified() {
    let mut sim = Sim::new();
    let request = sim.transfer(ALICE, BOB, 500, 1);
    let round_change = |prepared: Option<&str>| {
        ConsensusMessage::new(
            InstanceId::FIRST,
            Round::new(2),
            ProcessId::new(ALICE),
            Step::RoundChange {
                prepared_round: prepared.map(|_| Round::FIRST),
                value: prepared.map(str::to_string),
            },
            request.clone(),
        )
    };
    let quorum = vec![
        sim.consensus(1, round_change(Some("made-up"))),
        sim.consensus(2, round_change(None)),
        sim.consensus(3, round_change(None)),
    ];

    assert_eq!(
        highest_prepared(&quorum),
        Some((Round::FIRST, "made-up".to_string()))
    );
    assert!(!sim.node(4).justify_round_change(InstanceId::FIRST, &quorum));
}

// ============================================================================
// Message authority
// ============================================================================

#[test]
fn consensus_messages_signed_by_clients_do_not_count() {
    let mut sim = Sim::new();
    let request = sim.transfer(ALICE, BOB, 500, 1);
    let value = Transaction::transfer(sim.account(ALICE), sim.account(BOB), 500).to_value();
    let node = ProcessId::new(1);
    let _ = sim.core(node).on_transfer(&request);

    let commit = ConsensusMessage::new(
        InstanceId::FIRST,
        Round::FIRST,
        ProcessId::new(ALICE),
        Step::Commit { value },
        request.clone(),
    );
    let round_change = ConsensusMessage::new(
        InstanceId::FIRST,
        Round::new(7),
        ProcessId::new(ALICE),
        Step::RoundChange {
            prepared_round: None,
            value: None,
        },
        request.clone(),
    );
    let send = |sim: &mut Sim, from: u32, message: &ConsensusMessage| {
        let from = ProcessId::new(from);
        sim.deliver(from, node, Message::consensus(from, message.clone()));
    };

    // Two client COMMITs plus one node's would make a quorum of three.
    for from in [ALICE, BOB, 4] {
        send(&mut sim, from, &commit);
    }
    assert!(!sim.node(1).instance(InstanceId::FIRST).unwrap().is_committed());

    // Two client ROUND_CHANGEs would pass the f + 1 rule.
    for from in [ALICE, BOB] {
        send(&mut sim, from, &round_change);
    }
    assert_eq!(
        sim.node(1).instance(InstanceId::FIRST).unwrap().current_round(),
        Round::FIRST
    );

    for from in [2, 3] {
        send(&mut sim, from, &commit);
    }
    assert_eq!(
        sim.node(1).instance(InstanceId::FIRST).unwrap().committed_round(),
        Some(Round::FIRST)
    );
}

#[test]
fn unjustified_pre_prepare_does_not_stop_the_real_leader() {
    let mut sim = Sim::new();
    let request = sim.transfer(ALICE, BOB, 500, 1);
    let value = Transaction::transfer(sim.account(ALICE), sim.account(BOB), 500).to_value();

    // Node 3 leads round 2 but brings no ROUND_CHANGE quorum.
    let unjustified = sim.consensus(
        3,
        ConsensusMessage::new(
            InstanceId::FIRST,
            Round::new(2),
            ProcessId::new(ALICE),
            Step::PrePrepare { value },
            request.clone(),
        ),
    );
    let leader = ProcessId::new(2);
    assert!(sim.core(leader).on_pre_prepare(unjustified).is_empty());
    assert!(sim.node(2).instance(InstanceId::FIRST).is_none());

    let output = sim.core(leader).on_transfer(&request);
    assert!(matches!(steps_broadcast(&output)[..], [Step::PrePrepare { .. }]));
    assert_eq!(output.timers, vec![TimerCommand::Arm(InstanceId::FIRST)]);
}

#[test]
fn instance_learned_from_a_peer_is_still_proposed_and_armed() {
    let mut sim = Sim::new();
    let request = sim.transfer(ALICE, BOB, 500, 1);
    let value = Transaction::transfer(sim.account(ALICE), sim.account(BOB), 500).to_value();
    let prepare = ConsensusMessage::new(
        InstanceId::FIRST,
        Round::FIRST,
        ProcessId::new(ALICE),
        Step::Prepare { value },
        request.clone(),
    );

    // The PREPARE overtakes the client request at the leader and at node 1.
    for node in [1, 2] {
        let early = sim.consensus(4, prepare.clone());
        let _ = sim.core(ProcessId::new(node)).on_prepare(early);
        assert!(sim.node(node).instance(InstanceId::FIRST).is_some());
    }

    let output = sim.core(ProcessId::new(2)).on_transfer(&request);
    assert!(matches!(steps_broadcast(&output)[..], [Step::PrePrepare { .. }]));
    assert_eq!(output.timers, vec![TimerCommand::Arm(InstanceId::FIRST)]);

    let output = sim.core(ProcessId::new(1)).on_transfer(&request);
    assert!(output.messages.is_empty());
    assert_eq!(output.timers, vec![TimerCommand::Arm(InstanceId::FIRST)]);

    for node in [1, 2] {
        assert!(sim.node(node).instance(InstanceId::new(2)).is_none());
    }
}

// ============================================================================
// Concurrent clients
// ============================================================================

/// Hands Alice's request to nodes 1 and 2 first and Bob's to nodes 3 and 4
/// first, before any consensus message moves.
fn submit_in_opposite_orders(sim: &mut Sim, alice: &Envelope, bob: &Envelope) {
    for node in [1, 2] {
        sim.submit_to(node, alice);
        sim.submit_to(node, bob);
    }
    for node in [3, 4] {
        sim.submit_to(node, bob);
        sim.submit_to(node, alice);
    }
}

/// Every node holds `expected` in its ledger, each transfer applied once.
fn assert_applied_once_everywhere(sim: &Sim, expected: &[Transaction]) {
    let (alice, bob) = (sim.account(ALICE), sim.account(BOB));
    for core in sim.nodes() {
        assert_eq!(
            core.ledger().transactions().collect::<Vec<_>>(),
            expected.iter().collect::<Vec<_>>()
        );
        assert_eq!(core.ledger().entries(), sim.node(1).ledger().entries());
        assert_eq!(core.balance(&alice), Some(INITIAL_BALANCE - 100 + 50 - FEE));
        assert_eq!(core.balance(&bob), Some(INITIAL_BALANCE + 100 - 50 - FEE));
        assert_eq!(core.accounts().total(), 6 * INITIAL_BALANCE);
    }
    for client in [ALICE, BOB] {
        let replies = sim.replies_to(client);
        assert_eq!(replies.len(), 4);
        assert!(
            replies
                .iter()
                .all(|body| **body == ClientBody::ResponseTransfer { success: true })
        );
    }
}

#[test]
fn requests_reaching_nodes_in_opposite_orders_follow_the_leader() {
    let mut sim = Sim::new();
    let alice = sim.transfer(ALICE, BOB, 100, 1);
    let bob = sim.transfer(BOB, ALICE, 50, 1);
    submit_in_opposite_orders(&mut sim, &alice, &bob);
    sim.run();

    // Node 2 leads round 1 and saw Alice first.
    let (a, b) = (sim.account(ALICE), sim.account(BOB));
    assert_applied_once_everywhere(
        &sim,
        &[
            Transaction::transfer(a.clone(), b.clone(), 100),
            Transaction::transfer(b, a, 50),
        ],
    );
}

#[test]
fn round_change_leader_orders_requests_that_arrived_in_opposite_orders() {
    let mut sim = Sim::with_interceptors(only_for(
        2,
        Interceptors::new().with(EventKind::StartConsensus, Silence),
    ));
    let alice = sim.transfer(ALICE, BOB, 100, 1);
    let bob = sim.transfer(BOB, ALICE, 50, 1);
    submit_in_opposite_orders(&mut sim, &alice, &bob);
    sim.run();
    assert!(sim.nodes().all(|core| core.ledger().is_empty()));

    for node in [1, 3, 4] {
        for instance in [1, 2] {
            sim.timeout(node, InstanceId::new(instance));
        }
    }
    sim.run();

    // Node 3 leads round 2 and saw Bob first.
    let (a, b) = (sim.account(ALICE), sim.account(BOB));
    assert_applied_once_everywhere(
        &sim,
        &[
            Transaction::transfer(b.clone(), a.clone(), 50),
            Transaction::transfer(a, b, 100),
        ],
    );
    let new_leader = sim.account(3);
    for core in sim.nodes() {
        assert_eq!(core.balance(&new_leader), Some(INITIAL_BALANCE + 2 * FEE));
    }
}

// ============================================================================
// Request handling faults
// ============================================================================

#[test]
fn leader_skipping_request_verification_cannot_forge_a_transfer() {
    let mut sim = Sim::with_interceptors(only_for(
        2,
        Interceptors::new().with(EventKind::VerifyRequest, SkipRequestVerification),
    ));
    let body = ClientBody::Transfer {
        source: sim.account(BOB),
        destination: sim.account(ALICE),
        amount: 500,
    };
    let forged = sim.request(ALICE, 1, body);
    sim.submit(&forged);
    sim.run();

    // The faulty leader opened and proposed an instance nobody joined.
    let state = sim.node(2).instance(InstanceId::FIRST).unwrap();
    assert!(!state.is_committed());
    for id in [1, 3, 4] {
        assert!(sim.node(id).instance(InstanceId::FIRST).is_none());
    }
    let replies = sim.replies_to(ALICE);
    assert_eq!(replies.len(), 3);
    assert!(
        replies
            .iter()
            .all(|body| **body == ClientBody::ResponseTransfer { success: false })
    );

    // Its ROUND_CHANGE carries the same request and goes nowhere either.
    sim.timeout(2, InstanceId::FIRST);
    sim.run();
    let bob = sim.account(BOB);
    for id in [1, 3, 4] {
        assert!(sim.node(id).instance(InstanceId::FIRST).is_none());
    }
    for core in sim.nodes() {
        assert!(core.ledger().is_empty());
        assert_eq!(core.balance(&bob), Some(INITIAL_BALANCE));
    }
}

#[test]
fn leader_ignoring_a_client_is_bypassed_by_a_round_change() {
    let mut sim = Sim::with_interceptors(only_for(
        2,
        Interceptors::new().with(EventKind::StartConsensus, IgnoreClient(ProcessId::new(BOB))),
    ));
    let alice = sim.transfer(ALICE, BOB, 100, 1);
    sim.submit(&alice);
    sim.run();
    assert!(sim.nodes().all(|core| core.ledger().len() == 1));

    let bob = sim.transfer(BOB, ALICE, 50, 1);
    sim.submit(&bob);
    sim.run();
    assert!(sim.nodes().all(|core| core.ledger().len() == 1));
    assert!(sim.node(2).instance(InstanceId::new(2)).is_none());

    for node in [1, 3, 4] {
        sim.timeout(node, InstanceId::new(2));
    }
    sim.run();

    let (round_one_leader, round_two_leader) = (sim.account(2), sim.account(3));
    for core in sim.nodes() {
        assert_eq!(core.ledger().transactions().count(), 2);
        assert_eq!(
            core.instance(InstanceId::new(2)).unwrap().committed_round(),
            Some(Round::new(2))
        );
        assert_eq!(core.balance(&round_one_leader), Some(INITIAL_BALANCE + FEE));
        assert_eq!(core.balance(&round_two_leader), Some(INITIAL_BALANCE + FEE));
    }
}
