//! Environment context
//!
//! One context per invocation, built from the validated config plus facts
//! discovered from the platform at startup, then threaded mutably through
//! the workflow stages. Stages append what they learn (stack outputs, the
//! cluster name) so later stages read from the context instead of
//! re-describing resources.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::config::DeployConfig;

pub const LEDGER_FILE: &str = ".install_stage.log";

/// Per-stack output key/value pairs accumulated as stacks complete.
pub type StackOutputs = BTreeMap<String, String>;

#[derive(Debug, Clone)]
pub struct EnvContext {
    pub config: DeployConfig,
    pub ledger_path: PathBuf,

    // Discovered from the platform before the workflow starts.
    pub account_id: Option<String>,
    pub availability_zones: Vec<String>,
    pub route_table_ids: Vec<String>,
    pub vpc_cidr: Option<String>,

    // Learned as stages complete.
    pub cluster_name: Option<String>,
    pub outputs: BTreeMap<String, StackOutputs>,
}

impl EnvContext {
    pub fn new(config: DeployConfig) -> Self {
        Self {
            config,
            ledger_path: PathBuf::from(LEDGER_FILE),
            account_id: None,
            availability_zones: Vec::new(),
            route_table_ids: Vec::new(),
            vpc_cidr: None,
            cluster_name: None,
            outputs: BTreeMap::new(),
        }
    }

    /// Infra stack, named after the environment itself.
    pub fn stack_name(&self) -> String {
        self.config.environment.clone()
    }

    /// Base VPC stack, created before everything else.
    pub fn base_stack_name(&self) -> String {
        format!("{}-base", self.config.environment)
    }

    pub fn additional_stack_name(&self) -> String {
        format!("{}-additional", self.config.environment)
    }

    pub fn alb_controller_stack_name(&self) -> String {
        format!("{}-alb-controller", self.config.environment)
    }

    pub fn ebs_csi_controller_stack_name(&self) -> String {
        format!("{}-ebs-csi-controller", self.config.environment)
    }

    /// Stacks in creation order; teardown walks this in reverse.
    pub fn stack_names(&self) -> Vec<String> {
        vec![
            self.base_stack_name(),
            self.stack_name(),
            self.additional_stack_name(),
            self.alb_controller_stack_name(),
            self.ebs_csi_controller_stack_name(),
        ]
    }

    pub fn record_outputs(&mut self, stack: &str, outputs: StackOutputs) {
        self.outputs.insert(stack.to_string(), outputs);
    }

    pub fn output(&self, stack: &str, key: &str) -> Option<&str> {
        self.outputs
            .get(stack)
            .and_then(|outputs| outputs.get(key))
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Network, NodeGroupConfig, Templates};

    fn context_fixture() -> EnvContext {
        EnvContext::new(DeployConfig {
            environment: "prod".to_string(),
            region: "ap-northeast-1".to_string(),
            domain: "prod.example.com".to_string(),
            kubernetes_version: "1.29".to_string(),
            templates: Templates {
                base: "https://templates/base.yaml".to_string(),
                infra: "https://templates/infra.yaml".to_string(),
                additional: "https://templates/additional.yaml".to_string(),
                alb_controller: "https://templates/alb.yaml".to_string(),
                ebs_csi_controller: "https://templates/csi.yaml".to_string(),
            },
            network: Network {
                subnet_ids: vec!["subnet-aaa".to_string()],
            },
            node_group: NodeGroupConfig {
                instance_type: "m5.large".to_string(),
                disk_size_gb: 80,
                min_nodes: 2,
                max_nodes: 10,
                desired_nodes: 2,
                ssh_key_pair: None,
            },
            addons: Default::default(),
        })
    }

    #[test]
    fn stack_names_derive_from_environment() {
        let ctx = context_fixture();
        assert_eq!(
            ctx.stack_names(),
            vec![
                "prod-base",
                "prod",
                "prod-additional",
                "prod-alb-controller",
                "prod-ebs-csi-controller"
            ]
        );
    }

    #[test]
    fn outputs_accumulate_per_stack() {
        let mut ctx = context_fixture();
        let mut outputs = StackOutputs::new();
        outputs.insert("ClusterName".to_string(), "prod-EKS-Cluster".to_string());
        ctx.record_outputs("prod", outputs);

        assert_eq!(ctx.output("prod", "ClusterName"), Some("prod-EKS-Cluster"));
        assert_eq!(ctx.output("prod", "Missing"), None);
        assert_eq!(ctx.output("prod-additional", "ClusterName"), None);
    }
}
