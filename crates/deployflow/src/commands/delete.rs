//! Environment teardown
//!
//! Destroys everything install created, leaf-first: node groups, then the
//! stacks in reverse creation order, then the hosted zone. Asks for
//! confirmation unless `--yes` is passed.

use std::io::Write as _;
use std::path::Path;

use anyhow::{bail, Context as _};
use colored::Colorize;

use deployflow_core::{DeployConfig, EnvContext, StageLedger};

use crate::commands::outputs;
use crate::platform::Platform;

pub async fn handle(config_path: &Path, assume_yes: bool) -> anyhow::Result<()> {
    let config = DeployConfig::load(config_path)?;
    println!(
        "{}",
        format!(
            "Deleting environment '{}' in {}",
            config.environment, config.region
        )
        .red()
        .bold()
    );

    if !assume_yes && !confirm(&config.environment)? {
        println!("Aborted.");
        return Ok(());
    }

    let platform = Platform::new(&config.region).await?;
    let env = EnvContext::new(config);

    let infra = env.stack_name();
    if !platform.stacks.exists(&infra).await? {
        bail!("environment '{infra}' does not exist in region {}", env.config.region);
    }

    // Node groups block stack deletion, so they go first.
    if let Some(cluster) = cluster_name(&platform, &infra).await? {
        let groups = platform.node_groups.list(&cluster).await?;
        for group in &groups {
            println!("Deleting node group {}", group.cyan());
            platform.node_groups.delete(&cluster, group).await?;
        }
    } else {
        tracing::warn!(stack = %infra, "no cluster name exported, skipping node groups");
    }

    for stack in env.stack_names().iter().rev() {
        println!("Deleting stack {}", stack.cyan());
        if !platform.stacks.delete(stack).await? {
            println!("  {} was already gone", stack);
        }
    }

    let domain = &env.config.domain;
    println!("Deleting hosted zone {}", domain.cyan());
    if !platform.zones.delete_zone(domain).await? {
        println!("  {} was already gone", domain);
    }

    StageLedger::new(&env.ledger_path).clear()?;

    println!();
    println!(
        "{}",
        format!("✓ Environment '{}' deleted", env.config.environment)
            .green()
            .bold()
    );
    Ok(())
}

async fn cluster_name(platform: &Platform, infra: &str) -> anyhow::Result<Option<String>> {
    let stack_outputs = platform.stacks.outputs(infra).await?;
    Ok(stack_outputs.get(outputs::CLUSTER_NAME).cloned())
}

fn confirm(environment: &str) -> anyhow::Result<bool> {
    print!("This permanently destroys '{environment}' and all its data. Type 'y' to continue: ");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin()
        .read_line(&mut answer)
        .context("failed to read confirmation")?;
    Ok(answer.trim().eq_ignore_ascii_case("y"))
}
