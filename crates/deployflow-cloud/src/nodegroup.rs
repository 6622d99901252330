//! Managed node group controller
//!
//! Node groups are immutable-and-replaced: changing instance type, disk or
//! Kubernetes version means creating a fresh group under a new synthesized
//! name and retiring the old one, never updating in place. The name encodes
//! the creation date plus a random suffix so successive replacements within
//! one cluster never collide.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use crate::error::{CloudError, Result};
use crate::poll::{poll_until_deleted, poll_until_terminal, Observation, PollOptions};
use crate::status;

/// Autoscaling bounds and target for one node group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalingEnvelope {
    pub min_size: u32,
    pub max_size: u32,
    pub desired_size: u32,
}

impl ScalingEnvelope {
    /// Envelope for a replacement group: extra headroom on the desired count
    /// so workloads drained off the old group have somewhere to land, capped
    /// at the configured maximum.
    pub fn surged(&self, extra: u32) -> Self {
        Self {
            desired_size: (self.desired_size + extra).min(self.max_size),
            ..*self
        }
    }
}

/// Everything needed to create one node group.
#[derive(Debug, Clone)]
pub struct NodeGroupSpec {
    pub cluster: String,
    pub name: String,
    pub scaling: ScalingEnvelope,
    pub subnets: Vec<String>,
    pub instance_type: String,
    pub disk_size_gb: u32,
    pub ami_type: String,
    pub node_role_arn: String,
    pub ssh_key_pair: Option<String>,
    pub kubernetes_version: Option<String>,
}

/// Current remote state of a node group.
#[derive(Debug, Clone)]
pub struct NodeGroupDescription {
    pub name: String,
    pub status: String,
    pub scaling: ScalingEnvelope,
    pub instance_types: Vec<String>,
    pub kubernetes_version: Option<String>,
}

#[async_trait]
pub trait NodeGroupApi: Send + Sync {
    async fn create_node_group(&self, spec: &NodeGroupSpec) -> Result<()>;
    async fn describe_node_group(&self, cluster: &str, name: &str)
        -> Result<NodeGroupDescription>;
    async fn delete_node_group(&self, cluster: &str, name: &str) -> Result<()>;
    async fn list_node_groups(&self, cluster: &str) -> Result<Vec<String>>;
}

/// `<cluster>-Node-Group-<yyyymmdd>-<5 random uppercase letters>`.
pub fn synthesize_name(cluster: &str) -> String {
    let date = chrono::Utc::now().format("%Y%m%d");
    let mut rng = rand::thread_rng();
    let suffix: String = (0..5)
        .map(|_| (b'A' + rng.gen_range(0..26u8)) as char)
        .collect();
    format!("{cluster}-Node-Group-{date}-{suffix}")
}

#[derive(Debug, Clone, Copy)]
pub struct NodeGroupPolicy {
    pub create_poll: PollOptions,
    pub delete_poll: PollOptions,
}

impl Default for NodeGroupPolicy {
    fn default() -> Self {
        Self {
            create_poll: PollOptions::every(Duration::from_secs(30)),
            delete_poll: PollOptions::every(Duration::from_secs(30)),
        }
    }
}

pub struct NodeGroupController<A> {
    api: A,
    policy: NodeGroupPolicy,
}

impl<A: NodeGroupApi> NodeGroupController<A> {
    pub fn new(api: A) -> Self {
        Self {
            api,
            policy: NodeGroupPolicy::default(),
        }
    }

    pub fn with_policy(api: A, policy: NodeGroupPolicy) -> Self {
        Self { api, policy }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    /// Create the group and wait for ACTIVE. Returns the final description.
    pub async fn create(&self, spec: &NodeGroupSpec) -> Result<NodeGroupDescription> {
        tracing::info!(
            cluster = %spec.cluster,
            node_group = %spec.name,
            instance_type = %spec.instance_type,
            "creating node group"
        );
        self.api.create_node_group(spec).await?;

        let api = &self.api;
        let cluster = spec.cluster.as_str();
        let name = spec.name.as_str();
        let observation = poll_until_terminal(
            name,
            self.policy.create_poll,
            || {
                let api = api;
                async move {
                    let description = api.describe_node_group(cluster, name).await?;
                    Ok(Observation {
                        status: description.status.clone(),
                        detail: description,
                    })
                }
            },
            status::classify_node_group,
        )
        .await?;

        tracing::info!(cluster, node_group = name, "node group is active");
        Ok(observation.detail)
    }

    /// Delete the group if present. Returns `false` without error when it is
    /// already gone.
    pub async fn delete(&self, cluster: &str, name: &str) -> Result<bool> {
        tracing::info!(cluster, node_group = name, "deleting node group");
        match self.api.delete_node_group(cluster, name).await {
            Ok(()) => {}
            Err(CloudError::Api(message)) if status::is_nodegroup_not_found_message(&message) => {
                tracing::info!(cluster, node_group = name, "node group already absent");
                return Ok(false);
            }
            Err(err) => return Err(err),
        }

        let api = &self.api;
        poll_until_deleted(
            name,
            self.policy.delete_poll,
            || {
                let api = api;
                async move {
                    let description = api.describe_node_group(cluster, name).await?;
                    Ok(Observation {
                        status: description.status.clone(),
                        detail: description,
                    })
                }
            },
            status::classify_node_group_delete,
            |err| {
                matches!(err, CloudError::Api(message) if status::is_nodegroup_not_found_message(message))
            },
        )
        .await?;

        tracing::info!(cluster, node_group = name, "node group deleted");
        Ok(true)
    }

    pub async fn describe(&self, cluster: &str, name: &str) -> Result<NodeGroupDescription> {
        self.api.describe_node_group(cluster, name).await
    }

    pub async fn list(&self, cluster: &str) -> Result<Vec<String>> {
        self.api.list_node_groups(cluster).await
    }
}
