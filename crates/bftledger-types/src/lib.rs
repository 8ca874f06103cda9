//! # bftledger-types: core types for bftledger
//!
//! Identifiers shared by every layer, the ledger's [`Transaction`], and
//! the static [`Membership`] that fixes `n`, `f`, the quorum size and the
//! round-robin leader schedule.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

mod error;
mod membership;
mod transaction;

pub use error::{MembershipError, TransactionError};
pub use membership::{
    LocalProcess, Membership, ProcessConfig, ProcessIdentity, Role, max_faulty, quorum_size,
};
pub use transaction::{FEE, INITIAL_BALANCE, Transaction};

// ============================================================================
// Process identifiers
// ============================================================================

/// Identifier of a node or client, as listed in the membership.
///
/// Node ids are `1..=n`; clients use ids outside that range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProcessId(u32);

impl ProcessId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl Display for ProcessId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ProcessId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<ProcessId> for u32 {
    fn from(id: ProcessId) -> Self {
        id.0
    }
}

// ============================================================================
// Consensus instance and round
// ============================================================================

/// One run of consensus, deciding a single ledger slot.
///
/// Instances are numbered from 1; instance `i` fills ledger slot `i - 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstanceId(u64);

impl InstanceId {
    pub const FIRST: InstanceId = InstanceId(1);

    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// The instance that must be decided before this one, if any.
    pub fn previous(self) -> Option<Self> {
        (self.0 > Self::FIRST.0).then(|| Self(self.0 - 1))
    }

    /// Index of the ledger slot this instance fills.
    pub fn slot(self) -> usize {
        self.0.saturating_sub(1) as usize
    }
}

impl Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for InstanceId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// A sub-attempt within an instance. Rounds start at 1 and only grow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Round(u64);

impl Round {
    pub const FIRST: Round = Round(1);

    pub const fn new(round: u64) -> Self {
        Self(round)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl Display for Round {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Round {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

// ============================================================================
// Message and request identifiers
// ============================================================================

/// Link-level message identifier, increasing per (sender, destination).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(u64);

impl MessageId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for MessageId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Client-assigned request number. Each client numbers its requests
/// 1, 2, 3, ...; replicas apply each request at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestId(u64);

impl RequestId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for RequestId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}
