//! Cleanup after a verified node group replacement
//!
//! Once the replacement group has proven itself, the pre-upgrade node groups
//! recorded in the snapshot are deleted, the autoscaler is re-enabled, and
//! the snapshot is consumed.

use std::path::Path;

use anyhow::{bail, Context as _};
use colored::Colorize;

use deployflow_core::DeployConfig;

use crate::commands::outputs;
use crate::platform::Platform;

const AUTOSCALER_NAMESPACE: &str = "kube-system";
const AUTOSCALER_DEPLOYMENT: &str = "cluster-autoscaler";

pub async fn handle(config_path: &Path) -> anyhow::Result<()> {
    let config = DeployConfig::load(config_path)?;
    println!(
        "{}",
        format!("Cleaning up after upgrade of '{}'", config.environment).bold()
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
        .context("no upgrade snapshot found, nothing to clean up")?;

    for group in &snapshot.node_groups {
        println!("Deleting pre-upgrade node group {}", group.cyan());
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
        format!("✓ Cleanup complete for '{}'", env.config.environment)
            .green()
            .bold()
    );
    Ok(())
}
