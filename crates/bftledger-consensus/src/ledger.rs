//! The replicated ledger application.
//!
//! Every process owns one account, named by its base64 public key and
//! funded with [`INITIAL_BALANCE`]. A transfer of `amount` moves
//! `amount` to the destination, charges the source `amount + FEE`, and
//! pays the fee to the leader of the round the transfer committed in.

use std::collections::{BTreeMap, HashMap};

use bftledger_types::{INITIAL_BALANCE, Membership, ProcessId, RequestId, Transaction};

use crate::EngineError;

/// Account balances.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Accounts {
    balances: BTreeMap<String, i64>,
}

impl Accounts {
    /// One funded account per node and client.
    pub fn new(membership: &Membership) -> Self {
        let balances = membership
            .processes()
            .map(|process| (process.account(), INITIAL_BALANCE))
            .collect();
        Self { balances }
    }

    pub fn balance(&self, account: &str) -> Option<i64> {
        self.balances.get(account).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.balances
            .iter()
            .map(|(account, balance)| (account.as_str(), *balance))
    }

    /// Whether `source` can pay `amount` to `destination` plus `fee`.
    pub fn is_valid(&self, source: &str, destination: &str, amount: i64, fee: i64) -> bool {
        if amount < 0 || source == destination || !self.balances.contains_key(destination) {
            return false;
        }
        self.balance(source)
            .and_then(|balance| amount.checked_add(fee).map(|cost| balance >= cost))
            .unwrap_or(false)
    }

    /// Moves `amount` from `source` to `destination` and pays `fee` from
    /// `source` to `fee_recipient`. Nothing changes if the transfer is
    /// invalid.
    pub fn transfer(
        &mut self,
        source: &str,
        destination: &str,
        amount: i64,
        fee_recipient: &str,
        fee: i64,
    ) -> bool {
        if !self.is_valid(source, destination, amount, fee)
            || !self.balances.contains_key(fee_recipient)
        {
            return false;
        }
        self.adjust(source, -(amount + fee));
        self.adjust(destination, amount);
        self.adjust(fee_recipient, fee);
        true
    }

    /// Sum of all balances.
    pub fn total(&self) -> i64 {
        self.balances.values().sum()
    }

    fn adjust(&mut self, account: &str, delta: i64) {
        if let Some(balance) = self.balances.get_mut(account) {
            *balance += delta;
        }
    }
}

/// Content of one ledger slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEntry {
    Applied(Transaction),
    /// A decided instance that changed nothing: a rejected transfer, a
    /// balance query, or a replayed request.
    Empty,
}

impl LedgerEntry {
    pub fn transaction(&self) -> Option<&Transaction> {
        match self {
            Self::Applied(transaction) => Some(transaction),
            Self::Empty => None,
        }
    }
}

/// Decided entries in instance order, plus the per-client request
/// cursor.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    entries: Vec<LedgerEntry>,
    cursor: HashMap<ProcessId, RequestId>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Applied transactions, skipping empty slots.
    pub fn transactions(&self) -> impl Iterator<Item = &Transaction> {
        self.entries.iter().filter_map(LedgerEntry::transaction)
    }

    /// Fills `slot`, which must be the next free one.
    pub fn fill(&mut self, slot: usize, entry: LedgerEntry) -> Result<(), EngineError> {
        if slot != self.entries.len() {
            return Err(EngineError::OutOfOrder {
                slot,
                next: self.entries.len(),
            });
        }
        self.entries.push(entry);
        Ok(())
    }

    /// Highest request applied for `client`.
    pub fn last_request(&self, client: ProcessId) -> Option<RequestId> {
        self.cursor.get(&client).copied()
    }

    /// Whether `request` is newer than anything applied for `client`.
    pub fn is_fresh(&self, client: ProcessId, request: RequestId) -> bool {
        self.last_request(client).is_none_or(|last| request > last)
    }

    /// Whether `request` is at least as new as the last applied one.
    pub fn is_not_stale(&self, client: ProcessId, request: RequestId) -> bool {
        self.last_request(client).is_none_or(|last| request >= last)
    }

    pub fn advance_cursor(&mut self, client: ProcessId, request: RequestId) {
        let last = self.cursor.entry(client).or_insert(request);
        *last = (*last).max(request);
    }
}
