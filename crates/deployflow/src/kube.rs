//! kubectl wrapper
//!
//! Cluster-side operations the workflows need: node scheduling control
//! during node group replacement, pod health checks, the pre-upgrade
//! snapshot, and add-on image bumps.

use std::collections::BTreeMap;
use std::process::Stdio;

use anyhow::{bail, Context};
use serde::Deserialize;
use tokio::process::Command;

/// Name of the config map holding node group and node names captured before
/// a node group replacement. Consumed by rollback and cleanup.
pub const SNAPSHOT_NAME: &str = "deployflow-upgrade-snapshot";
const SNAPSHOT_NAMESPACE: &str = "kube-system";

#[derive(Debug, Clone, Default)]
pub struct KubeCtl {
    kubeconfig: Option<String>,
}

/// Node group and node names as they were before the replacement group was
/// created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeSnapshot {
    pub node_groups: Vec<String>,
    pub nodes: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ItemList<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct NodeItem {
    metadata: Metadata,
}

#[derive(Debug, Deserialize)]
struct Metadata {
    name: String,
    #[serde(default)]
    namespace: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PodItem {
    metadata: Metadata,
    status: PodStatus,
}

#[derive(Debug, Deserialize)]
struct PodStatus {
    #[serde(default)]
    phase: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConfigMapItem {
    #[serde(default)]
    data: BTreeMap<String, String>,
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl KubeCtl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_kubeconfig(path: impl Into<String>) -> Self {
        Self {
            kubeconfig: Some(path.into()),
        }
    }

    fn command_args(&self, args: &[&str]) -> Vec<String> {
        let mut full: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        if let Some(ref kubeconfig) = self.kubeconfig {
            full.push("--kubeconfig".to_string());
            full.push(kubeconfig.clone());
        }
        full
    }

    async fn run(&self, args: &[&str]) -> anyhow::Result<String> {
        let args = self.command_args(args);
        let mut cmd = Command::new("kubectl");
        cmd.args(&args);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        tracing::debug!("Running: kubectl {}", args.join(" "));

        let output = cmd.output().await.context("failed to spawn kubectl")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("kubectl {} failed: {}", args.join(" "), stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Names of all nodes currently in the cluster.
    pub async fn nodes(&self) -> anyhow::Result<Vec<String>> {
        let output = self.run(&["get", "nodes", "-o", "json"]).await?;
        let list: ItemList<NodeItem> = serde_json::from_str(&output)?;
        Ok(list.items.into_iter().map(|n| n.metadata.name).collect())
    }

    /// `(namespace, name)` of every pod not in a healthy phase.
    pub async fn unhealthy_pods(&self) -> anyhow::Result<Vec<(String, String)>> {
        let output = self
            .run(&["get", "pods", "--all-namespaces", "-o", "json"])
            .await?;
        let list: ItemList<PodItem> = serde_json::from_str(&output)?;
        Ok(list
            .items
            .into_iter()
            .filter(|pod| {
                !matches!(
                    pod.status.phase.as_deref(),
                    Some("Running") | Some("Succeeded")
                )
            })
            .map(|pod| {
                (
                    pod.metadata.namespace.unwrap_or_default(),
                    pod.metadata.name,
                )
            })
            .collect())
    }

    pub async fn cordon(&self, node: &str) -> anyhow::Result<()> {
        self.run(&["cordon", node]).await?;
        Ok(())
    }

    pub async fn uncordon(&self, node: &str) -> anyhow::Result<()> {
        self.run(&["uncordon", node]).await?;
        Ok(())
    }

    pub async fn drain(&self, node: &str) -> anyhow::Result<()> {
        self.run(&[
            "drain",
            node,
            "--ignore-daemonsets",
            "--delete-emptydir-data",
            "--force",
        ])
        .await?;
        Ok(())
    }

    /// Scale a deployment, used to park the cluster autoscaler during node
    /// group replacement.
    pub async fn scale_deployment(
        &self,
        namespace: &str,
        name: &str,
        replicas: u32,
    ) -> anyhow::Result<()> {
        let replicas = format!("--replicas={replicas}");
        self.run(&["scale", "deployment", name, "-n", namespace, replicas.as_str()])
            .await?;
        Ok(())
    }

    /// Current image of a container, `kind/name` form.
    pub async fn container_image(&self, target: &str, container: &str) -> anyhow::Result<String> {
        let jsonpath = format!(
            "jsonpath={{.spec.template.spec.containers[?(@.name=='{container}')].image}}"
        );
        let output = self
            .run(&["get", target, "-n", "kube-system", "-o", jsonpath.as_str()])
            .await?;
        Ok(output.trim().to_string())
    }

    pub async fn set_container_image(
        &self,
        target: &str,
        container: &str,
        image: &str,
    ) -> anyhow::Result<()> {
        let assignment = format!("{container}={image}");
        self.run(&["set", "image", target, assignment.as_str(), "-n", "kube-system"])
            .await?;
        Ok(())
    }

    pub async fn apply_manifest(&self, path_or_url: &str) -> anyhow::Result<()> {
        self.run(&["apply", "-f", path_or_url]).await?;
        Ok(())
    }

    /// Store the pre-upgrade snapshot, replacing any stale one.
    pub async fn save_snapshot(&self, snapshot: &UpgradeSnapshot) -> anyhow::Result<()> {
        self.delete_snapshot().await?;
        let node_groups = format!("--from-literal=node_groups={}", snapshot.node_groups.join(","));
        let nodes = format!("--from-literal=nodes={}", snapshot.nodes.join(","));
        self.run(&[
            "create",
            "configmap",
            SNAPSHOT_NAME,
            "-n",
            SNAPSHOT_NAMESPACE,
            node_groups.as_str(),
            nodes.as_str(),
        ])
        .await?;
        Ok(())
    }

    /// Read the snapshot back. `None` when no upgrade left one behind.
    pub async fn load_snapshot(&self) -> anyhow::Result<Option<UpgradeSnapshot>> {
        let result = self
            .run(&[
                "get",
                "configmap",
                SNAPSHOT_NAME,
                "-n",
                SNAPSHOT_NAMESPACE,
                "-o",
                "json",
            ])
            .await;
        let output = match result {
            Ok(output) => output,
            Err(err) if err.to_string().to_lowercase().contains("not found") => return Ok(None),
            Err(err) => return Err(err),
        };
        let item: ConfigMapItem = serde_json::from_str(&output)?;
        Ok(Some(UpgradeSnapshot {
            node_groups: split_csv(item.data.get("node_groups").map(String::as_str).unwrap_or("")),
            nodes: split_csv(item.data.get("nodes").map(String::as_str).unwrap_or("")),
        }))
    }

    pub async fn delete_snapshot(&self) -> anyhow::Result<()> {
        let result = self
            .run(&[
                "delete",
                "configmap",
                SNAPSHOT_NAME,
                "-n",
                SNAPSHOT_NAMESPACE,
            ])
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(err) if err.to_string().to_lowercase().contains("not found") => Ok(()),
            Err(err) => Err(err),
        }
    }
}

/// Swap the `x.y.z` version component of an image reference for the target
/// version, leaving registry and repository untouched.
pub fn retarget_image_version(current: &str, target_version: &str) -> String {
    let pattern = regex::Regex::new(r"\d+\.\d+\.\d+").expect("static pattern");
    pattern.replace(current, target_version).into_owned()
}
