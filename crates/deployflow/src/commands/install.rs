//! Install workflow
//!
//! Brings a complete environment up from a validated config: subnet tags,
//! the stack chain, the first node group, and the hosted zone. Progress is
//! recorded per stage in the install ledger, so a failed install re-run
//! picks up at the stage that broke.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context as _;
use colored::Colorize;

use deployflow_cloud::{AliasTarget, NodeGroupSpec, RecordSet};
use deployflow_core::{DeployConfig, EnvContext, StageFuture, StageLedger, Workflow};

use crate::commands::outputs;
use crate::platform::Platform;

const AMI_TYPE: &str = "AL2_x86_64";
const SUBNET_ELB_TAG: &str = "kubernetes.io/role/internal-elb";

pub struct InstallContext {
    pub platform: Platform,
    pub env: EnvContext,
}

pub async fn handle(config_path: &Path) -> anyhow::Result<()> {
    let config = DeployConfig::load(config_path)?;
    println!(
        "{}",
        format!(
            "Installing environment '{}' in {}",
            config.environment, config.region
        )
        .bold()
    );

    let platform = Platform::new(&config.region).await?;
    let env = platform.build_context(config).await?;
    let ledger = StageLedger::new(&env.ledger_path);
    let mut ctx = InstallContext { platform, env };

    let report = install_workflow().run(&ledger, &mut ctx).await?;

    println!();
    println!(
        "{}",
        format!(
            "✓ Install complete ({} stages run, {} already done)",
            report.executed.len(),
            report.skipped.len()
        )
        .green()
        .bold()
    );
    if let Some(ref cluster) = ctx.env.cluster_name {
        println!("  Cluster: {}", cluster.cyan());
    }
    Ok(())
}

pub fn install_workflow() -> Workflow<InstallContext> {
    Workflow::new()
        .stage("install.apply.subnet.tags", |ctx: &mut InstallContext| -> StageFuture<'_> {
            Box::pin(async move {
                ctx.platform
                    .ec2
                    .tag_resources(&ctx.env.config.network.subnet_ids, SUBNET_ELB_TAG, "1")
                    .await?;
                Ok(())
            })
        })
        .stage("install.create.base.stack", |ctx: &mut InstallContext| -> StageFuture<'_> {
            Box::pin(async move {
                let name = ctx.env.base_stack_name();
                let template = ctx.env.config.templates.base.clone();
                let params = base_stack_parameters(&ctx.env);
                let stack_outputs = ctx.platform.stacks.create_or_update(&name, &template, &params).await?;
                ctx.env.record_outputs(&name, stack_outputs);
                Ok(())
            })
        })
        .stage("install.update.endpoint.security.group", |ctx: &mut InstallContext| -> StageFuture<'_> {
            Box::pin(async move {
                let base = ctx.env.base_stack_name();
                let group_id = fetch_output(ctx, &base, outputs::ENDPOINT_SECURITY_GROUP).await?;
                let cidr = ctx
                    .env
                    .vpc_cidr
                    .clone()
                    .context("VPC CIDR was not discovered")?;
                ctx.platform.ec2.allow_https_from(&group_id, &cidr).await?;
                Ok(())
            })
        })
        .stage("install.create.infra.stack", |ctx: &mut InstallContext| -> StageFuture<'_> {
            Box::pin(async move {
                let name = ctx.env.stack_name();
                let template = ctx.env.config.templates.infra.clone();
                let params = infra_stack_parameters(&ctx.env);
                let stack_outputs = ctx.platform.stacks.create_or_update(&name, &template, &params).await?;
                ctx.env.cluster_name = stack_outputs.get(outputs::CLUSTER_NAME).cloned();
                ctx.env.record_outputs(&name, stack_outputs);
                anyhow::ensure!(
                    ctx.env.cluster_name.is_some(),
                    "stack '{name}' did not export {}",
                    outputs::CLUSTER_NAME
                );
                Ok(())
            })
        })
        .stage("install.create.additional.stack", |ctx: &mut InstallContext| -> StageFuture<'_> {
            Box::pin(async move {
                let cluster = ensure_cluster_name(ctx).await?;
                let name = ctx.env.additional_stack_name();
                let template = ctx.env.config.templates.additional.clone();
                let params = controller_stack_parameters(&ctx.env, &cluster);
                let stack_outputs = ctx.platform.stacks.create_or_update(&name, &template, &params).await?;
                ctx.env.record_outputs(&name, stack_outputs);
                Ok(())
            })
        })
        .stage("install.create.alb.controller.stack", |ctx: &mut InstallContext| -> StageFuture<'_> {
            Box::pin(async move {
                let cluster = ensure_cluster_name(ctx).await?;
                let name = ctx.env.alb_controller_stack_name();
                let template = ctx.env.config.templates.alb_controller.clone();
                let params = controller_stack_parameters(&ctx.env, &cluster);
                let stack_outputs = ctx.platform.stacks.create_or_update(&name, &template, &params).await?;
                ctx.env.record_outputs(&name, stack_outputs);
                Ok(())
            })
        })
        .stage("install.create.csi.controller.stack", |ctx: &mut InstallContext| -> StageFuture<'_> {
            Box::pin(async move {
                let cluster = ensure_cluster_name(ctx).await?;
                let name = ctx.env.ebs_csi_controller_stack_name();
                let template = ctx.env.config.templates.ebs_csi_controller.clone();
                let params = controller_stack_parameters(&ctx.env, &cluster);
                let stack_outputs = ctx.platform.stacks.create_or_update(&name, &template, &params).await?;
                ctx.env.record_outputs(&name, stack_outputs);
                Ok(())
            })
        })
        .stage("install.create.node.group", |ctx: &mut InstallContext| -> StageFuture<'_> {
            Box::pin(async move {
                let cluster = ensure_cluster_name(ctx).await?;
                let infra = ctx.env.stack_name();
                let role_arn = fetch_output(ctx, &infra, outputs::NODE_ROLE_ARN).await?;
                let spec = node_group_spec(&ctx.env, &cluster, &role_arn);
                println!("Creating node group {}", spec.name.cyan());
                ctx.platform.node_groups.create(&spec).await?;
                Ok(())
            })
        })
        .stage("install.create.hosted.zone", |ctx: &mut InstallContext| -> StageFuture<'_> {
            Box::pin(async move {
                let domain = ctx.env.config.domain.clone();
                let zone = ctx.platform.zones.ensure_zone(&domain).await?;
                let records = zone_records(&ctx.env);
                if records.is_empty() {
                    tracing::info!(zone = %domain, "no load balancer output yet, skipping records");
                } else {
                    ctx.platform.zones.upsert_records(&zone.id, &records).await?;
                }
                Ok(())
            })
        })
}

/// Read a stack output from the context, fetching from the platform when the
/// stage that produced it was skipped on a resumed run.
async fn fetch_output(ctx: &mut InstallContext, stack: &str, key: &str) -> anyhow::Result<String> {
    if let Some(value) = ctx.env.output(stack, key) {
        return Ok(value.to_string());
    }
    let stack_outputs = ctx.platform.stacks.outputs(stack).await?;
    let value = stack_outputs
        .get(key)
        .cloned()
        .with_context(|| format!("stack '{stack}' did not export {key}"))?;
    ctx.env.record_outputs(stack, stack_outputs);
    Ok(value)
}

async fn ensure_cluster_name(ctx: &mut InstallContext) -> anyhow::Result<String> {
    if let Some(ref name) = ctx.env.cluster_name {
        return Ok(name.clone());
    }
    let infra = ctx.env.stack_name();
    let name = fetch_output(ctx, &infra, outputs::CLUSTER_NAME).await?;
    ctx.env.cluster_name = Some(name.clone());
    Ok(name)
}

fn csv(values: &[String]) -> String {
    values.join(",")
}

fn base_stack_parameters(env: &EnvContext) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    params.insert("EnvironmentName".to_string(), env.config.environment.clone());
    params.insert("SubnetIds".to_string(), csv(&env.config.network.subnet_ids));
    params
}

pub(crate) fn infra_stack_parameters(env: &EnvContext) -> BTreeMap<String, String> {
    let mut params = base_stack_parameters(env);
    params.insert(
        "KubernetesVersion".to_string(),
        env.config.kubernetes_version.clone(),
    );
    params.insert(
        "AvailabilityZones".to_string(),
        csv(&env.availability_zones),
    );
    params.insert("RouteTableIds".to_string(), csv(&env.route_table_ids));
    if let Some(ref cidr) = env.vpc_cidr {
        params.insert("VpcCidr".to_string(), cidr.clone());
    }
    if let Some(ref account) = env.account_id {
        params.insert("AccountId".to_string(), account.clone());
    }
    params
}

pub(crate) fn controller_stack_parameters(env: &EnvContext, cluster: &str) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    params.insert("EnvironmentName".to_string(), env.config.environment.clone());
    params.insert("ClusterName".to_string(), cluster.to_string());
    params
}

pub(crate) fn node_group_spec(env: &EnvContext, cluster: &str, role_arn: &str) -> NodeGroupSpec {
    let ng = &env.config.node_group;
    NodeGroupSpec {
        cluster: cluster.to_string(),
        name: deployflow_cloud::synthesize_name(cluster),
        scaling: deployflow_cloud::ScalingEnvelope {
            min_size: ng.min_nodes,
            max_size: ng.max_nodes,
            desired_size: ng.desired_nodes,
        },
        subnets: env.config.network.subnet_ids.clone(),
        instance_type: ng.instance_type.clone(),
        disk_size_gb: ng.disk_size_gb,
        ami_type: AMI_TYPE.to_string(),
        node_role_arn: role_arn.to_string(),
        ssh_key_pair: ng.ssh_key_pair.clone(),
        kubernetes_version: Some(env.config.kubernetes_version.clone()),
    }
}

/// Alias records pointing the environment domain at the load balancer, once
/// the infra stack has exported its DNS name.
fn zone_records(env: &EnvContext) -> Vec<RecordSet> {
    let stack = env.stack_name();
    let (Some(dns_name), Some(lb_zone)) = (
        env.output(&stack, outputs::LOAD_BALANCER_DNS),
        env.output(&stack, outputs::LOAD_BALANCER_ZONE),
    ) else {
        return Vec::new();
    };
    vec![RecordSet {
        name: format!("{}.", env.config.domain.trim_end_matches('.')),
        record_type: "A".to_string(),
        ttl: None,
        values: Vec::new(),
        alias_target: Some(AliasTarget {
            hosted_zone_id: lb_zone.to_string(),
            dns_name: dns_name.to_string(),
        }),
    }]
}

#[cfg(test)]
mod tests {
    use super::*;
    use deployflow_core::{Network, NodeGroupConfig, StackOutputs, Templates};

    fn env_fixture() -> EnvContext {
        let mut env = EnvContext::new(DeployConfig {
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
                subnet_ids: vec!["subnet-aaa".to_string(), "subnet-bbb".to_string()],
            },
            node_group: NodeGroupConfig {
                instance_type: "m5.large".to_string(),
                disk_size_gb: 80,
                min_nodes: 2,
                max_nodes: 10,
                desired_nodes: 2,
                ssh_key_pair: Some("prod-keypair".to_string()),
            },
            addons: Default::default(),
        });
        env.availability_zones = vec!["ap-northeast-1a".to_string(), "ap-northeast-1c".to_string()];
        env.route_table_ids = vec!["rtb-0123".to_string()];
        env.vpc_cidr = Some("10.0.0.0/16".to_string());
        env.account_id = Some("111111111111".to_string());
        env
    }

    #[test]
    fn infra_parameters_carry_discovered_facts() {
        let params = infra_stack_parameters(&env_fixture());
        assert_eq!(params["SubnetIds"], "subnet-aaa,subnet-bbb");
        assert_eq!(params["AvailabilityZones"], "ap-northeast-1a,ap-northeast-1c");
        assert_eq!(params["RouteTableIds"], "rtb-0123");
        assert_eq!(params["VpcCidr"], "10.0.0.0/16");
        assert_eq!(params["AccountId"], "111111111111");
        assert_eq!(params["KubernetesVersion"], "1.29");
    }

    #[test]
    fn node_group_spec_reflects_config() {
        let env = env_fixture();
        let spec = node_group_spec(&env, "prod-EKS-Cluster", "arn:aws:iam::1:role/node");
        assert!(spec.name.starts_with("prod-EKS-Cluster-Node-Group-"));
        assert_eq!(spec.scaling.desired_size, 2);
        assert_eq!(spec.disk_size_gb, 80);
        assert_eq!(spec.ssh_key_pair.as_deref(), Some("prod-keypair"));
        assert_eq!(spec.kubernetes_version.as_deref(), Some("1.29"));
    }

    #[test]
    fn zone_records_need_load_balancer_outputs() {
        let mut env = env_fixture();
        assert!(zone_records(&env).is_empty());

        let mut outputs = StackOutputs::new();
        outputs.insert(
            super::outputs::LOAD_BALANCER_DNS.to_string(),
            "alb-123.elb.amazonaws.com".to_string(),
        );
        outputs.insert(
            super::outputs::LOAD_BALANCER_ZONE.to_string(),
            "Z32O12XQLNTSW2".to_string(),
        );
        env.record_outputs("prod", outputs);

        let records = zone_records(&env);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "prod.example.com.");
        assert!(records[0].alias_target.is_some());
    }

    #[test]
    fn workflow_stage_order() {
        let workflow = install_workflow();
        let names = workflow.stage_names();
        assert_eq!(names.first(), Some(&"install.apply.subnet.tags"));
        assert_eq!(names.last(), Some(&"install.create.hosted.zone"));
        assert_eq!(names.len(), 9);
    }
}
