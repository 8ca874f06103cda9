//! # bftledger-client: talking to a bftledger cluster
//!
//! A [`Client`] signs TRANSFER and CHECK_BALANCE requests, broadcasts them
//! to every node over a [`bftledger_link::ReliableLink`], and accepts an
//! answer once `f + 1` distinct nodes agree on it. At least one of those
//! is correct, so a Byzantine minority cannot forge an outcome.
//!
//! ```ignore
//! let mut client = Client::new(link, ClientConfig::default());
//! let to = client.account_of(ProcessId::new(6))?;
//! let ok = client.transfer(&client.account(), &to, 500).await?;
//! ```

mod client;
mod error;
mod tally;

pub use client::{Client, ClientConfig};
pub use error::{ClientError, Result};
pub use tally::Tally;
