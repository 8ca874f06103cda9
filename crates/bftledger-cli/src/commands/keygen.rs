//! Keygen command - writes key pairs for the whole membership.

use anyhow::{Result, bail};

use crate::style::{print_hint, print_labeled, print_success};

pub fn run(project: &str, force: bool) -> Result<()> {
    let (config, membership) = super::load(project)?;
    let keys = config.keys.key_store();

    if !force {
        let existing: Vec<_> = membership
            .all()
            .filter(|p| keys.process_dir(&p.hostname, p.port).exists())
            .map(|p| p.address())
            .collect();
        if !existing.is_empty() {
            bail!(
                "Keys already exist for {}. Re-run with --force to replace them.",
                existing.join(", ")
            );
        }
    }

    membership.generate_keys(&keys)?;

    print_success(&format!(
        "Generated keys for {} nodes and {} clients",
        membership.nodes.len(),
        membership.clients.len()
    ));
    print_labeled("Key directory", &keys.root().display().to_string());
    print_hint("Copy the directory to every machine; each process only needs its own private key.");
    Ok(())
}
