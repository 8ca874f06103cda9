//! # bftledger-test-harness
//!
//! Spins up a whole bftledger cluster inside one test process. Every node
//! and client gets a UDP socket on `127.0.0.1:0` and a freshly generated
//! key pair, so tests never touch the file system or fixed ports.
//!
//! ```ignore
//! let cluster = TestCluster::builder()
//!     .nodes(4)
//!     .clients(2)
//!     .interceptors(ProcessId::new(4), Interceptors::new().with(EventKind::Prepare, Silence))
//!     .start()
//!     .await?;
//!
//! let mut alice = cluster.client(cluster.client_id(0))?;
//! ```
//!
//! Timeouts default to values that keep a round change well under a
//! second.

mod cluster;
mod error;

pub use cluster::{TestCluster, TestClusterBuilder};
pub use error::HarnessError;
