//! Client assembly and environment discovery
//!
//! One `Platform` per invocation: the controllers over the AWS CLI backends
//! plus the kubectl wrapper, built from the validated config.

use anyhow::Context as _;
use colored::Colorize;

use deployflow_cloud::{NodeGroupController, StackController, ZoneController};
use deployflow_cloud_aws::{AwsCli, CloudFormationCli, Ec2Cli, EksCli, Route53Cli, StsCli};
use deployflow_core::{DeployConfig, EnvContext};

use crate::kube::KubeCtl;

pub struct Platform {
    pub stacks: StackController<CloudFormationCli>,
    pub node_groups: NodeGroupController<EksCli>,
    pub zones: ZoneController<Route53Cli>,
    pub ec2: Ec2Cli,
    pub sts: StsCli,
    pub kube: KubeCtl,
}

impl Platform {
    /// Fails fast when the aws CLI is not on the PATH. kubectl honours an
    /// explicit `KUBECONFIG` override; it is forwarded on every invocation
    /// so the logged command lines are reproducible.
    pub async fn new(region: &str) -> anyhow::Result<Self> {
        let aws = AwsCli::new(region);
        aws.check_installed()
            .await
            .context("the aws CLI is required but was not found on the PATH")?;

        let kube = match std::env::var("KUBECONFIG") {
            Ok(path) if !path.is_empty() => KubeCtl::with_kubeconfig(path),
            _ => KubeCtl::new(),
        };

        Ok(Self {
            stacks: StackController::new(CloudFormationCli::new(aws.clone())),
            node_groups: NodeGroupController::new(EksCli::new(aws.clone())),
            zones: ZoneController::new(Route53Cli::new(aws.clone())),
            ec2: Ec2Cli::new(aws.clone()),
            sts: StsCli::new(aws),
            kube,
        })
    }

    /// Build the environment context: validated config plus the facts the
    /// stack parameters need (availability zones, route tables, VPC CIDR,
    /// account id).
    pub async fn build_context(&self, config: DeployConfig) -> anyhow::Result<EnvContext> {
        let mut ctx = EnvContext::new(config);

        println!("{}", "Discovering environment facts...".blue());
        let subnets = self
            .ec2
            .describe_subnets(&ctx.config.network.subnet_ids)
            .await
            .context("failed to describe configured subnets")?;
        anyhow::ensure!(
            !subnets.is_empty(),
            "none of the configured subnets exist in region {}",
            ctx.config.region
        );

        let vpc_id = subnets[0].vpc_id.clone();
        ctx.availability_zones = subnets.iter().map(|s| s.availability_zone.clone()).collect();
        ctx.route_table_ids = self.ec2.route_table_ids(&vpc_id).await?;
        ctx.vpc_cidr = Some(self.ec2.vpc_cidr(&vpc_id).await?);
        ctx.account_id = Some(self.sts.account_id().await?);

        tracing::debug!(
            vpc = %vpc_id,
            zones = ?ctx.availability_zones,
            "environment discovery complete"
        );
        Ok(ctx)
    }
}
