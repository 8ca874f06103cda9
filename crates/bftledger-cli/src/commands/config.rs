//! Config command - prints the merged configuration.

use std::path::Path;

use anyhow::{Context, Result};
use bftledger_config::BftLedgerConfig;

use crate::style::{SemanticStyle, print_labeled, print_warn};

pub fn show(project: &str, format: &str) -> Result<()> {
    let config = BftLedgerConfig::load_from_dir(Path::new(project))
        .context("Failed to load configuration")?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&config)?),
        "toml" => println!("{}", toml::to_string_pretty(&config)?),
        _ => {
            println!("{}", "bftledger Configuration".header());
            println!("=======================\n");

            println!("Link:");
            print_labeled("Retry base", &format!("{} ms", config.link.retry_base_ms));
            print_labeled("Max backoff", &format!("{} ms", config.link.max_backoff_ms));
            let attempts = match config.link.max_attempts {
                0 => "unbounded".to_string(),
                n => n.to_string(),
            };
            print_labeled("Max attempts", &attempts);
            print_labeled("Client window", &format!("{} ms", config.link.client_window_ms));
            print_labeled("Node window", &format!("{} ms", config.link.node_window_ms));
            println!();

            println!("Consensus:");
            print_labeled(
                "Round change timeout",
                &format!("{} ms", config.consensus.round_change_timeout_ms),
            );
            println!();

            println!("Keys:");
            print_labeled("Directory", &config.keys.directory.display().to_string());
            println!();

            println!("Membership:");
            print_labeled("File", &config.membership.file.display().to_string());
            match config.membership_file() {
                Ok(membership) => {
                    for node in &membership.nodes {
                        print_labeled(&format!("Node {}", node.id), &node.address());
                    }
                    for client in &membership.clients {
                        print_labeled(&format!("Client {}", client.id), &client.address());
                    }
                }
                Err(error) => print_warn(&format!("Membership unavailable: {error}")),
            }
        }
    }

    Ok(())
}
