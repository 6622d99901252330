//! Upgrade workflow
//!
//! Rolls the environment forward to the configured Kubernetes version: stack
//! updates, add-on image bumps, and a node group replacement when the node
//! fleet itself needs the new version. Before replacing nodes, the current
//! node group and node names are snapshotted into the cluster so rollback
//! and cleanup can tell old from new.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context as _};
use colored::Colorize;

use deployflow_cloud::NodeGroupDescription;
use deployflow_core::DeployConfig;

use crate::commands::{install, outputs};
use crate::kube::{retarget_image_version, UpgradeSnapshot};
use crate::platform::Platform;

const AUTOSCALER_NAMESPACE: &str = "kube-system";
const AUTOSCALER_DEPLOYMENT: &str = "cluster-autoscaler";

/// Headroom added to the replacement group's desired size so drained
/// workloads have somewhere to land.
const SURGE_NODES: u32 = 2;

const DRAIN_PAUSE: Duration = Duration::from_secs(60);
const POD_HEALTH_RETRIES: u32 = 60;
const POD_HEALTH_INTERVAL: Duration = Duration::from_secs(60);

pub async fn handle(config_path: &Path, upgrade_downscaler: bool) -> anyhow::Result<()> {
    let config = DeployConfig::load(config_path)?;
    println!(
        "{}",
        format!(
            "Upgrading environment '{}' to Kubernetes {}",
            config.environment, config.kubernetes_version
        )
        .bold()
    );

    let platform = Platform::new(&config.region).await?;
    let mut env = platform.build_context(config).await?;

    let infra = env.stack_name();
    if !platform.stacks.exists(&infra).await? {
        bail!("environment '{infra}' does not exist in region {}", env.config.region);
    }

    let unhealthy = platform.kube.unhealthy_pods().await?;
    if !unhealthy.is_empty() {
        for (namespace, name) in &unhealthy {
            tracing::error!(pod = %name, namespace = %namespace, "pod is unhealthy");
        }
        bail!("{} unhealthy pods in the cluster, refusing to upgrade", unhealthy.len());
    }

    // State before anything changes: the node groups and nodes that a
    // replacement would retire.
    let stack_outputs = platform.stacks.outputs(&infra).await?;
    let cluster = stack_outputs
        .get(outputs::CLUSTER_NAME)
        .cloned()
        .with_context(|| format!("stack '{infra}' did not export {}", outputs::CLUSTER_NAME))?;
    env.record_outputs(&infra, stack_outputs);
    env.cluster_name = Some(cluster.clone());
    let old_groups = platform.node_groups.list(&cluster).await?;
    let old_nodes = platform.kube.nodes().await?;

    // Parked so it cannot fight the node group replacement.
    platform
        .kube
        .scale_deployment(AUTOSCALER_NAMESPACE, AUTOSCALER_DEPLOYMENT, 0)
        .await?;

    // Upgrade-needed has to be decided against the parameters the infra
    // stack was running with before this update rewrites them.
    let prior = platform.stacks.describe(&infra).await?;

    println!("{}", "Updating stacks...".blue());
    let infra_outputs = platform
        .stacks
        .create_or_update(&infra, &env.config.templates.infra, &install::infra_stack_parameters(&env))
        .await?;
    env.record_outputs(&infra, infra_outputs);

    let controller_params = install::controller_stack_parameters(&env, &cluster);
    let additional = env.additional_stack_name();
    platform
        .stacks
        .create_or_update(&additional, &env.config.templates.additional, &controller_params)
        .await?;
    let alb = env.alb_controller_stack_name();
    platform
        .stacks
        .create_or_update(&alb, &env.config.templates.alb_controller, &controller_params)
        .await?;
    let csi = env.ebs_csi_controller_stack_name();
    platform
        .stacks
        .create_or_update(&csi, &env.config.templates.ebs_csi_controller, &controller_params)
        .await?;

    update_addons(&platform, &env.config).await?;

    if upgrade_downscaler {
        match env.config.addons.downscaler_manifest {
            Some(ref manifest) => {
                println!("Upgrading the downscaler from {}", manifest.cyan());
                platform.kube.apply_manifest(manifest).await?;
            }
            None => bail!("downscaler upgrade requested but addons.downscaler_manifest is not set"),
        }
    } else {
        tracing::info!("skipping downscaler upgrade, pass --upgrade-downscaler to enable");
    }

    anyhow::ensure!(
        old_groups.len() == 1,
        "expected exactly one node group, found {}: {:?}",
        old_groups.len(),
        old_groups
    );
    let current_group = platform.node_groups.describe(&cluster, &old_groups[0]).await?;
    let current_stack_version = prior
        .parameters
        .get("KubernetesVersion")
        .cloned()
        .with_context(|| format!("stack '{infra}' has no KubernetesVersion parameter"))?;

    if !upgrade_needed(
        &current_stack_version,
        &env.config.kubernetes_version,
        &current_group,
        &env.config.node_group.instance_type,
    )? {
        println!("{}", "Node fleet already matches the target, nothing to replace".green());
        platform
            .kube
            .scale_deployment(AUTOSCALER_NAMESPACE, AUTOSCALER_DEPLOYMENT, 1)
            .await?;
        return Ok(());
    }

    platform
        .kube
        .save_snapshot(&UpgradeSnapshot {
            node_groups: old_groups.clone(),
            nodes: old_nodes.clone(),
        })
        .await?;

    let role_arn = env
        .output(&infra, outputs::NODE_ROLE_ARN)
        .map(str::to_string)
        .with_context(|| format!("stack '{infra}' did not export {}", outputs::NODE_ROLE_ARN))?;
    let mut spec = install::node_group_spec(&env, &cluster, &role_arn);
    spec.scaling = current_group.scaling.surged(SURGE_NODES);
    println!("Creating replacement node group {}", spec.name.cyan());
    platform.node_groups.create(&spec).await?;

    println!("Cordoning {} old nodes", old_nodes.len());
    for node in &old_nodes {
        platform.kube.cordon(node).await?;
    }

    for node in &old_nodes {
        println!("Draining {}", node.cyan());
        platform.kube.drain(node).await?;
        tokio::time::sleep(DRAIN_PAUSE).await;
    }

    wait_for_pods_healthy(&platform, POD_HEALTH_RETRIES, POD_HEALTH_INTERVAL).await?;

    println!();
    println!(
        "{}",
        format!(
            "✓ Upgrade complete, replacement group '{}' is active. Verify the cluster, then run 'deployflow cleanup'.",
            spec.name
        )
        .green()
        .bold()
    );
    Ok(())
}

/// Bump kube-proxy, CoreDNS and the cluster autoscaler to the versions the
/// config pins. Unpinned add-ons are left on their running image.
async fn update_addons(platform: &Platform, config: &DeployConfig) -> anyhow::Result<()> {
    let targets = [
        ("daemonset/kube-proxy", "kube-proxy", &config.addons.kube_proxy_version),
        ("deployment/coredns", "coredns", &config.addons.core_dns_version),
        (
            "deployment/cluster-autoscaler",
            "cluster-autoscaler",
            &config.addons.cluster_autoscaler_version,
        ),
    ];
    for (target, container, version) in targets {
        let Some(version) = version else {
            tracing::debug!(target, "no pinned version, leaving add-on as is");
            continue;
        };
        let current = platform.kube.container_image(target, container).await?;
        let wanted = retarget_image_version(&current, version);
        if wanted == current {
            tracing::info!(target, image = %current, "add-on already at target version");
            continue;
        }
        println!("Updating {} to {}", target.cyan(), wanted.cyan());
        platform.kube.set_container_image(target, container, &wanted).await?;
    }
    Ok(())
}

/// The bounded wait with the standard budget, shared with rollback.
pub(crate) async fn wait_for_pods_healthy_default(platform: &Platform) -> anyhow::Result<()> {
    wait_for_pods_healthy(platform, POD_HEALTH_RETRIES, POD_HEALTH_INTERVAL).await
}

async fn wait_for_pods_healthy(
    platform: &Platform,
    retries: u32,
    interval: Duration,
) -> anyhow::Result<()> {
    println!("{}", "Waiting for all pods to become healthy...".blue());
    let mut unhealthy = Vec::new();
    for _ in 0..retries {
        unhealthy = platform.kube.unhealthy_pods().await?;
        if unhealthy.is_empty() {
            println!("{}", "All pods are healthy".green());
            return Ok(());
        }
        tracing::info!(count = unhealthy.len(), "pods still unhealthy, waiting");
        tokio::time::sleep(interval).await;
    }
    for (namespace, name) in &unhealthy {
        tracing::error!(pod = %name, namespace = %namespace, "pod did not recover");
    }
    bail!("{} pods did not become healthy after node replacement", unhealthy.len());
}

fn parse_version(raw: &str) -> anyhow::Result<Vec<u32>> {
    raw.trim()
        .trim_start_matches('v')
        .split('.')
        .map(|part| {
            part.parse::<u32>()
                .with_context(|| format!("invalid version component '{part}' in '{raw}'"))
        })
        .collect()
}

/// Whether the node fleet has to be replaced. A target version lower than
/// what is running is an error, never a silent downgrade.
fn upgrade_needed(
    current_stack_version: &str,
    target_version: &str,
    group: &NodeGroupDescription,
    target_instance_type: &str,
) -> anyhow::Result<bool> {
    let current = parse_version(current_stack_version)?;
    let target = parse_version(target_version)?;

    if target != current {
        if target > current {
            tracing::info!(
                current = current_stack_version,
                target = target_version,
                "cluster version changes"
            );
            return Ok(true);
        }
        bail!("target Kubernetes version {target_version} is lower than current version {current_stack_version}");
    }

    let current_instance_type = group
        .instance_types
        .first()
        .map(String::as_str)
        .unwrap_or_default();
    if current_instance_type != target_instance_type {
        tracing::info!(
            current = current_instance_type,
            target = target_instance_type,
            "node instance type changes"
        );
        return Ok(true);
    }

    if let Some(ref raw) = group.kubernetes_version {
        let group_version = parse_version(raw)?;
        if group_version != target {
            if target > group_version {
                tracing::info!(group = %group.name, current = %raw, target = target_version, "node group version lags the cluster");
                return Ok(true);
            }
            bail!("target Kubernetes version {target_version} is lower than node group version {raw}");
        }
    }

    Ok(false)
}
