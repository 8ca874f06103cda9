//! # bftledger-link: authenticated reliable links
//!
//! [`ReliableLink`] turns an unreliable UDP socket into effectively-once
//! delivery between the processes of a static membership:
//!
//! - every outgoing message is signed and retransmitted with exponential
//!   backoff until the destination acknowledges it;
//! - every incoming message is verified against the sender's known key,
//!   rate-limited per sender, deduplicated by message id, and
//!   acknowledged;
//! - consensus messages additionally have their embedded client request
//!   checked before they are delivered.
//!
//! Messages a process sends to itself skip the network and are delivered
//! through a local queue.

mod collapsing;
mod config;
mod error;
mod link;

pub use collapsing::CollapsingSet;
pub use config::LinkConfig;
pub use error::{LinkError, Result};
pub use link::{Delivered, Delivery, Inbound, ReliableLink};
