//! Static system membership.
//!
//! The membership is loaded once at startup and shared read-only. It
//! fixes the protocol arithmetic:
//!
//! ```text
//! n      = number of nodes
//! f      = floor((n - 1) / 3)
//! quorum = floor((n + f) / 2) + 1
//! leader(round) = (round mod n) + 1
//! ```

use std::collections::HashSet;

use bftledger_crypto::{SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::{MembershipError, ProcessId, Round};

/// Largest number of Byzantine nodes `n` nodes tolerate.
pub fn max_faulty(n: usize) -> usize {
    n.saturating_sub(1) / 3
}

/// Minimum number of matching messages that certify a value among `n`
/// nodes. Any two quorums intersect in at least `f + 1` nodes.
pub fn quorum_size(n: usize) -> usize {
    (n + max_faulty(n)) / 2 + 1
}

/// Network address of a process, as listed in the membership file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessConfig {
    pub id: ProcessId,
    pub hostname: String,
    pub port: u16,
}

impl ProcessConfig {
    pub fn new(id: ProcessId, hostname: impl Into<String>, port: u16) -> Self {
        Self {
            id,
            hostname: hostname.into(),
            port,
        }
    }

    /// `hostname:port`, suitable for socket resolution.
    pub fn address(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }
}

/// A process's address together with its public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessIdentity {
    pub config: ProcessConfig,
    pub public_key: VerifyingKey,
}

impl ProcessIdentity {
    pub fn new(config: ProcessConfig, public_key: VerifyingKey) -> Self {
        Self { config, public_key }
    }

    pub fn id(&self) -> ProcessId {
        self.config.id
    }

    /// Ledger account owned by this process.
    pub fn account(&self) -> String {
        self.public_key.to_base64()
    }
}

/// The identity of the running process, including its private key.
#[derive(Debug, Clone)]
pub struct LocalProcess {
    identity: ProcessIdentity,
    signing_key: SigningKey,
}

impl LocalProcess {
    pub fn new(config: ProcessConfig, signing_key: SigningKey) -> Self {
        Self {
            identity: ProcessIdentity::new(config, signing_key.verifying_key()),
            signing_key,
        }
    }

    pub fn id(&self) -> ProcessId {
        self.identity.id()
    }

    pub fn identity(&self) -> &ProcessIdentity {
        &self.identity
    }

    pub fn config(&self) -> &ProcessConfig {
        &self.identity.config
    }

    pub fn public_key(&self) -> &VerifyingKey {
        &self.identity.public_key
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }
}

/// Whether a process takes part in consensus or only issues requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Node,
    Client,
}

/// Ordered node and client lists.
#[derive(Debug, Clone)]
pub struct Membership {
    nodes: Vec<ProcessIdentity>,
    clients: Vec<ProcessIdentity>,
}

impl Membership {
    /// Builds a membership, checking that node ids run `1..=n` in order
    /// and that no id appears twice.
    pub fn new(
        nodes: Vec<ProcessIdentity>,
        clients: Vec<ProcessIdentity>,
    ) -> Result<Self, MembershipError> {
        if nodes.is_empty() {
            return Err(MembershipError::NoNodes);
        }

        for (position, node) in nodes.iter().enumerate() {
            let expected = ProcessId::new(position as u32 + 1);
            if node.id() != expected {
                return Err(MembershipError::NodeIdOutOfSequence {
                    position,
                    expected,
                    found: node.id(),
                });
            }
        }

        let mut seen = HashSet::new();
        for process in nodes.iter().chain(&clients) {
            if !seen.insert(process.id()) {
                return Err(MembershipError::DuplicateId(process.id()));
            }
        }

        Ok(Self { nodes, clients })
    }

    pub fn nodes(&self) -> &[ProcessIdentity] {
        &self.nodes
    }

    pub fn clients(&self) -> &[ProcessIdentity] {
        &self.clients
    }

    /// All processes, nodes first.
    pub fn processes(&self) -> impl Iterator<Item = &ProcessIdentity> {
        self.nodes.iter().chain(&self.clients)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn max_faulty(&self) -> usize {
        max_faulty(self.node_count())
    }

    pub fn quorum(&self) -> usize {
        quorum_size(self.node_count())
    }

    /// Round-robin proposer for `round`.
    pub fn leader(&self, round: Round) -> ProcessId {
        let n = self.node_count() as u64;
        ProcessId::new((round.as_u64() % n) as u32 + 1)
    }

    pub fn is_leader(&self, id: ProcessId, round: Round) -> bool {
        self.leader(round) == id
    }

    pub fn get(&self, id: ProcessId) -> Option<&ProcessIdentity> {
        self.processes().find(|process| process.id() == id)
    }

    pub fn role(&self, id: ProcessId) -> Option<Role> {
        if self.nodes.iter().any(|node| node.id() == id) {
            Some(Role::Node)
        } else if self.clients.iter().any(|client| client.id() == id) {
            Some(Role::Client)
        } else {
            None
        }
    }

    pub fn is_client(&self, id: ProcessId) -> bool {
        self.role(id) == Some(Role::Client)
    }

    pub fn public_key(&self, id: ProcessId) -> Option<&VerifyingKey> {
        self.get(id).map(|process| &process.public_key)
    }

    /// Process owning the account named by `account` (a base64 public key).
    pub fn owner_of(&self, account: &str) -> Option<&ProcessIdentity> {
        self.processes()
            .find(|process| process.public_key.to_base64() == account)
    }
}
