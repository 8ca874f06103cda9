//! # bftledger-consensus: Byzantine fault tolerant replicated ledger
//!
//! This crate orders client transactions with a PBFT-style protocol and
//! applies them to a replicated account ledger. With `n` nodes it
//! tolerates `f = (n - 1) / 3` Byzantine nodes; quorums have
//! `(n + f) / 2 + 1` members and the leader of round `r` is node
//! `(r mod n) + 1`.
//!
//! # Architecture
//!
//! The crate follows a functional core / imperative shell split:
//!
//! - [`ConsensusCore`] is the synchronous protocol state machine. Its
//!   handlers take one message or timer event and return an
//!   [`EngineOutput`]; they never perform I/O.
//! - [`Node`] is the async runtime: it receives from a
//!   [`bftledger_link::ReliableLink`], feeds the core, sends the output,
//!   drives per-instance round-change timers, and decides committed
//!   instances in order.
//!
//! # Protocol
//!
//! Each client request runs in its own consensus instance. In round 1 the
//! leader broadcasts a PRE_PREPARE, every node answers with a PREPARE, a
//! quorum of PREPAREs makes a node broadcast a COMMIT, and a quorum of
//! COMMITs commits the value. When an instance's timer fires the node
//! moves to the next round and broadcasts a ROUND_CHANGE; `f + 1` of them
//! pull lagging nodes along, and a quorum lets the new leader re-propose
//! the highest prepared value.
//!
//! Decided instances fill the ledger in instance order. Transfers pay a
//! fixed fee to the leader of the round they committed in.
//!
//! # Fault injection
//!
//! [`Interceptors`] replace the default handling of chosen events, which
//! is how tests make nodes silent, lying or overcharging.

mod bucket;
mod engine;
mod error;
mod instance;
pub mod interceptor;
mod ledger;
mod node;
mod output;

pub use bucket::{MessageBucket, SignedMessage};
pub use engine::{ConsensusCore, highest_prepared};
pub use error::{EngineError, NodeError};
pub use instance::{InstanceState, Phase, Prepared};
pub use interceptor::{Event, EventKind, InterceptContext, Interceptor, Interceptors, Verdict};
pub use ledger::{Accounts, Ledger, LedgerEntry};
pub use node::{DEFAULT_ROUND_CHANGE_TIMEOUT, Node, NodeConfig};
pub use output::{EngineOutput, Outbound, Recipient, TimerCommand};
