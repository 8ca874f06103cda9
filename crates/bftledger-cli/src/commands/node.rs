//! Node command - runs one replica.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use bftledger_consensus::{Interceptors, Node};
use bftledger_link::ReliableLink;
use bftledger_types::{ProcessId, Role};
use tracing::info;

use crate::style::{SemanticStyle, print_labeled, print_success};

pub fn run(project: &str, id: u32) -> Result<()> {
    let id = ProcessId::new(id);
    let (config, membership_file) = super::load(project)?;
    let keys = config.keys.key_store();

    let membership = Arc::new(
        membership_file
            .to_membership(&keys)
            .context("Failed to resolve membership keys")?,
    );
    match membership.role(id) {
        Some(Role::Node) => {}
        Some(Role::Client) => bail!("Process {id} is a client, not a node"),
        None => bail!("Process {id} is not in the membership"),
    }
    let local = membership_file
        .local_process(id, &keys)
        .with_context(|| format!("Failed to load keys of node {id}"))?;

    println!();
    println!("{}", "bftledger replica".header());
    println!();
    print_labeled("Node", &id.to_string());
    print_labeled("Address", &local.config().address());
    print_labeled(
        "Cluster",
        &format!(
            "{} nodes, tolerating {} faulty",
            membership.node_count(),
            membership.max_faulty()
        ),
    );
    print_labeled("Account", &local.identity().account());
    println!();

    let link_config = config.link.link_config();
    let node_config = config.consensus.node_config();

    super::block_on(async move {
        let link = ReliableLink::bind(local, membership, link_config)
            .await
            .context("Failed to bind replica socket")?;
        let node = Node::new(link, Interceptors::new(), node_config);

        info!(replica = %id, "replica started");
        println!("Replica is ready. Press Ctrl+C to stop.");

        tokio::select! {
            result = node.run() => result.context("Replica stopped with an error")?,
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl+C")?;
            }
        }
        node.stop_timers();

        println!();
        print_success(&format!(
            "Replica stopped after deciding {} instances.",
            node.ledger().len()
        ));
        Ok::<_, anyhow::Error>(())
    })?
}
