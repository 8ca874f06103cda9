//! Transfer and balance commands - one-shot client operations.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use bftledger_client::{Client, ClientConfig};
use bftledger_link::ReliableLink;
use bftledger_types::{ProcessId, RequestId, Role};

use crate::style::{print_failure, print_labeled, print_success, print_warn};

pub fn transfer(
    project: &str,
    client: u32,
    destination: u32,
    amount: i64,
    timeout: u64,
) -> Result<()> {
    super::block_on(async move {
        let mut client = connect(project, client, timeout).await?;
        let source = client.account();
        let destination = client.account_of(ProcessId::new(destination))?;

        let accepted = client
            .transfer(&source, &destination, amount)
            .await
            .context("Transfer did not complete")?;
        if accepted {
            print_success(&format!("Transferred {amount}"));
        } else {
            print_failure("Transfer rejected by the cluster");
        }
        print_labeled("From", &source);
        print_labeled("To", &destination);
        Ok::<_, anyhow::Error>(())
    })?
}

pub fn balance(project: &str, client: u32, account: Option<u32>, timeout: u64) -> Result<()> {
    super::block_on(async move {
        let mut client = connect(project, client, timeout).await?;
        let account = match account {
            Some(owner) => client.account_of(ProcessId::new(owner))?,
            None => client.account(),
        };

        let balance = client
            .check_balance(&account)
            .await
            .context("Balance query did not complete")?;
        if balance < 0 {
            print_warn("The cluster refused to report this balance");
        } else {
            print_labeled("Balance", &balance.to_string());
        }
        print_labeled("Account", &account);
        Ok::<_, anyhow::Error>(())
    })?
}

async fn connect(project: &str, id: u32, timeout: u64) -> Result<Client> {
    let id = ProcessId::new(id);
    let (config, membership_file) = super::load(project)?;
    let keys = config.keys.key_store();

    let membership = Arc::new(
        membership_file
            .to_membership(&keys)
            .context("Failed to resolve membership keys")?,
    );
    if membership.role(id) != Some(Role::Client) {
        bail!("Process {id} is not a client in the membership");
    }
    let local = membership_file
        .local_process(id, &keys)
        .with_context(|| format!("Failed to load keys of client {id}"))?;

    let link = ReliableLink::bind(local, membership, config.link.link_config())
        .await
        .context("Failed to bind client socket")?;

    // Nodes drop request ids they have already seen from this client, so a
    // fresh process must not start from 1 again.
    let first = u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(1);
    let client_config = ClientConfig {
        timeout: Some(Duration::from_secs(timeout)),
    };
    Ok(Client::new(link, client_config).starting_at(RequestId::new(first)))
}
