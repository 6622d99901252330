//! Deployment configuration
//!
//! One YAML file per environment. Validation rules are declared as data
//! tables below rather than ad-hoc checks scattered through the loader, so
//! the full rule set is readable in one place and each rule yields exactly
//! one message.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeployConfig {
    /// Environment name; doubles as the base stack name.
    pub environment: String,
    pub region: String,
    /// Hosted zone name for the environment's records.
    pub domain: String,
    pub kubernetes_version: String,
    pub templates: Templates,
    pub network: Network,
    pub node_group: NodeGroupConfig,
    /// Cluster add-on versions to pin during upgrade. Absent versions leave
    /// the running image untouched.
    #[serde(default)]
    pub addons: AddonConfig,
}

/// Template URLs for each stack, already uploaded and addressable.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Templates {
    pub base: String,
    pub infra: String,
    pub additional: String,
    pub alb_controller: String,
    pub ebs_csi_controller: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Network {
    pub subnet_ids: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NodeGroupConfig {
    pub instance_type: String,
    pub disk_size_gb: u32,
    pub min_nodes: u32,
    pub max_nodes: u32,
    pub desired_nodes: u32,
    #[serde(default)]
    pub ssh_key_pair: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AddonConfig {
    #[serde(default)]
    pub kube_proxy_version: Option<String>,
    #[serde(default)]
    pub core_dns_version: Option<String>,
    #[serde(default)]
    pub cluster_autoscaler_version: Option<String>,
    /// Manifest applied when the downscaler upgrade flag is passed.
    #[serde(default)]
    pub downscaler_manifest: Option<String>,
}

struct RequiredRule {
    field: &'static str,
    get: fn(&DeployConfig) -> &str,
}

struct RangeRule {
    field: &'static str,
    min: u32,
    max: u32,
    get: fn(&DeployConfig) -> u32,
}

const REQUIRED_RULES: &[RequiredRule] = &[
    RequiredRule {
        field: "environment",
        get: |c| &c.environment,
    },
    RequiredRule {
        field: "region",
        get: |c| &c.region,
    },
    RequiredRule {
        field: "domain",
        get: |c| &c.domain,
    },
    RequiredRule {
        field: "kubernetes_version",
        get: |c| &c.kubernetes_version,
    },
    RequiredRule {
        field: "templates.base",
        get: |c| &c.templates.base,
    },
    RequiredRule {
        field: "templates.infra",
        get: |c| &c.templates.infra,
    },
    RequiredRule {
        field: "templates.additional",
        get: |c| &c.templates.additional,
    },
    RequiredRule {
        field: "templates.alb_controller",
        get: |c| &c.templates.alb_controller,
    },
    RequiredRule {
        field: "templates.ebs_csi_controller",
        get: |c| &c.templates.ebs_csi_controller,
    },
    RequiredRule {
        field: "node_group.instance_type",
        get: |c| &c.node_group.instance_type,
    },
];

const RANGE_RULES: &[RangeRule] = &[
    RangeRule {
        field: "node_group.disk_size_gb",
        min: 20,
        max: 200,
        get: |c| c.node_group.disk_size_gb,
    },
    RangeRule {
        field: "node_group.min_nodes",
        min: 1,
        max: 10,
        get: |c| c.node_group.min_nodes,
    },
    RangeRule {
        field: "node_group.max_nodes",
        min: 1,
        max: 50,
        get: |c| c.node_group.max_nodes,
    },
];

impl DeployConfig {
    /// Parse and validate. Any rule violation is fatal.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: DeployConfig = serde_yaml::from_str(&raw)?;
        let problems = config.validate();
        if problems.is_empty() {
            Ok(config)
        } else {
            Err(CoreError::ConfigurationInvalid(problems))
        }
    }

    /// All rule violations, one message each. Empty means valid.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        for rule in REQUIRED_RULES {
            if (rule.get)(self).trim().is_empty() {
                problems.push(format!("{} must not be blank", rule.field));
            }
        }

        for rule in RANGE_RULES {
            let value = (rule.get)(self);
            if value < rule.min || value > rule.max {
                problems.push(format!(
                    "{} must be between {} and {} (got {})",
                    rule.field, rule.min, rule.max, value
                ));
            }
        }

        if self.network.subnet_ids.is_empty() {
            problems.push("network.subnet_ids must not be empty".to_string());
        }

        let ng = &self.node_group;
        if ng.min_nodes > ng.max_nodes {
            problems.push(format!(
                "node_group.min_nodes ({}) must not exceed node_group.max_nodes ({})",
                ng.min_nodes, ng.max_nodes
            ));
        }
        if ng.desired_nodes < ng.min_nodes || ng.desired_nodes > ng.max_nodes {
            problems.push(format!(
                "node_group.desired_nodes ({}) must be within min_nodes..=max_nodes ({}..={})",
                ng.desired_nodes, ng.min_nodes, ng.max_nodes
            ));
        }

        problems
    }
}
