//! Rollback after a node group replacement
//!
//! Undoes the node side of an upgrade using the snapshot the upgrade left in
//! the cluster: traffic moves back to the pre-upgrade nodes, the replacement
//! group is deleted, and the snapshot is consumed. Stack updates are not
//! reverted.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context as _};
use colored::Colorize;

use deployflow_core::DeployConfig;

use crate::commands::outputs;
use crate::platform::Platform;

const AUTOSCALER_NAMESPACE: &str = "kube-system";
const AUTOSCALER_DEPLOYMENT: &str = "cluster-autoscaler";
const DRAIN_PAUSE: Duration = Duration::from_secs(60);

pub async fn handle(config_path: &Path) -> anyhow::Result<()> {
    let config = DeployConfig::load(config_path)?;
    println!(
        "{}",
        format!("Rolling back node replacement for '{}'", config.environment).bold()
    );

    let platform = Platform::new(&config.region).await?;
    let env = platform.build_context(config).await?;

    let infra = env.stack_name();
    if !platform.stacks.exists(&infra).await? {
        bail!("environment '{infra}' does not exist in region {}", env.config.region);
    }

    let stack_outputs = platform.stacks.outputs(&infra).await?;
    let cluster = stack_outputs
        .get(outputs::CLUSTER_NAME)
        .cloned()
        .with_context(|| format!("stack '{infra}' did not export {}", outputs::CLUSTER_NAME))?;

    let snapshot = platform
        .kube
        .load_snapshot()
        .await?
        .context("no upgrade snapshot found, nothing to roll back")?;

    let all_groups = platform.node_groups.list(&cluster).await?;
    let all_nodes = platform.kube.nodes().await?;
    let new_groups = added_since(&all_groups, &snapshot.node_groups);
    let new_nodes = added_since(&all_nodes, &snapshot.nodes);
    tracing::info!(
        old_groups = ?snapshot.node_groups,
        new_groups = ?new_groups,
        new_nodes = new_nodes.len(),
        "rollback targets resolved"
    );

    println!("Cordoning {} replacement nodes", new_nodes.len());
    for node in &new_nodes {
        platform.kube.cordon(node).await?;
    }

    println!("Uncordoning {} pre-upgrade nodes", snapshot.nodes.len());
    for node in &snapshot.nodes {
        platform.kube.uncordon(node).await?;
    }

    for node in &new_nodes {
        println!("Draining {}", node.cyan());
        platform.kube.drain(node).await?;
        tokio::time::sleep(DRAIN_PAUSE).await;
    }

    super::upgrade::wait_for_pods_healthy_default(&platform).await?;

    for group in &new_groups {
        println!("Deleting replacement node group {}", group.cyan());
        platform.node_groups.delete(&cluster, group).await?;
    }

    platform
        .kube
        .scale_deployment(AUTOSCALER_NAMESPACE, AUTOSCALER_DEPLOYMENT, 1)
        .await?;
    platform.kube.delete_snapshot().await?;

    println!();
    println!(
        "{}",
        format!("✓ Rollback complete for '{}'", env.config.environment)
            .green()
            .bold()
    );
    Ok(())
}

/// Names present now but not in the snapshot.
fn added_since(current: &[String], before: &[String]) -> Vec<String> {
    current
        .iter()
        .filter(|name| !before.contains(name))
        .cloned()
        .collect()
}
