//! CLI command implementations.

pub mod client;
pub mod config;
pub mod keygen;
pub mod node;

use std::path::Path;

use anyhow::{Context, Result};
use bftledger_config::{BftLedgerConfig, MembershipFile};

/// Merged configuration plus the membership file it points at.
pub(crate) fn load(project: &str) -> Result<(BftLedgerConfig, MembershipFile)> {
    let config = BftLedgerConfig::load_from_dir(Path::new(project))
        .context("Failed to load configuration")?;
    let membership = config.membership_file().with_context(|| {
        format!(
            "Failed to load membership file {}",
            config.membership.file.display()
        )
    })?;
    Ok((config, membership))
}

/// Runs `future` to completion on a fresh multi-threaded runtime.
pub(crate) fn block_on<F: std::future::Future>(future: F) -> Result<F::Output> {
    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    Ok(runtime.block_on(future))
}
