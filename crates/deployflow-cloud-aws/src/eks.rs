//! EKS managed node group backend

use async_trait::async_trait;
use serde::Deserialize;

use deployflow_cloud::{
    CloudError, NodeGroupApi, NodeGroupDescription, NodeGroupSpec, Result, ScalingEnvelope,
};

use crate::cli::AwsCli;

#[derive(Debug, Clone)]
pub struct EksCli {
    aws: AwsCli,
}

impl EksCli {
    pub fn new(aws: AwsCli) -> Self {
        Self { aws }
    }
}

#[derive(Debug, Deserialize)]
struct DescribeNodegroupResponse {
    nodegroup: NodegroupDetail,
}

#[derive(Debug, Deserialize)]
struct NodegroupDetail {
    #[serde(rename = "nodegroupName")]
    nodegroup_name: String,
    status: String,
    #[serde(rename = "scalingConfig")]
    scaling_config: ScalingConfig,
    #[serde(rename = "instanceTypes", default)]
    instance_types: Vec<String>,
    version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScalingConfig {
    #[serde(rename = "minSize")]
    min_size: u32,
    #[serde(rename = "maxSize")]
    max_size: u32,
    #[serde(rename = "desiredSize")]
    desired_size: u32,
}

#[derive(Debug, Deserialize)]
struct ListNodegroupsResponse {
    #[serde(default)]
    nodegroups: Vec<String>,
}

impl NodegroupDetail {
    fn into_description(self) -> NodeGroupDescription {
        NodeGroupDescription {
            name: self.nodegroup_name,
            status: self.status,
            scaling: ScalingEnvelope {
                min_size: self.scaling_config.min_size,
                max_size: self.scaling_config.max_size,
                desired_size: self.scaling_config.desired_size,
            },
            instance_types: self.instance_types,
            kubernetes_version: self.version,
        }
    }
}

fn scaling_config_arg(scaling: &ScalingEnvelope) -> String {
    format!(
        "minSize={},maxSize={},desiredSize={}",
        scaling.min_size, scaling.max_size, scaling.desired_size
    )
}

#[async_trait]
impl NodeGroupApi for EksCli {
    async fn create_node_group(&self, spec: &NodeGroupSpec) -> Result<()> {
        let scaling = scaling_config_arg(&spec.scaling);
        let disk_size = spec.disk_size_gb.to_string();
        let remote_access = spec
            .ssh_key_pair
            .as_ref()
            .map(|key| format!("ec2SshKey={key}"));

        let mut args = vec![
            "create-nodegroup",
            "--cluster-name",
            spec.cluster.as_str(),
            "--nodegroup-name",
            spec.name.as_str(),
            "--scaling-config",
            scaling.as_str(),
            "--disk-size",
            disk_size.as_str(),
            "--instance-types",
            spec.instance_type.as_str(),
            "--ami-type",
            spec.ami_type.as_str(),
            "--node-role",
            spec.node_role_arn.as_str(),
            "--subnets",
        ];
        args.extend(spec.subnets.iter().map(String::as_str));
        if let Some(ref remote_access) = remote_access {
            args.push("--remote-access");
            args.push(remote_access.as_str());
        }
        if let Some(ref version) = spec.kubernetes_version {
            args.push("--kubernetes-version");
            args.push(version.as_str());
        }

        self.aws
            .run("eks", &args)
            .await
            .map_err(CloudError::from)?;
        Ok(())
    }

    async fn describe_node_group(
        &self,
        cluster: &str,
        name: &str,
    ) -> Result<NodeGroupDescription> {
        let response: DescribeNodegroupResponse = self
            .aws
            .run_json(
                "eks",
                &[
                    "describe-nodegroup",
                    "--cluster-name",
                    cluster,
                    "--nodegroup-name",
                    name,
                ],
            )
            .await
            .map_err(CloudError::from)?;
        Ok(response.nodegroup.into_description())
    }

    async fn delete_node_group(&self, cluster: &str, name: &str) -> Result<()> {
        self.aws
            .run(
                "eks",
                &[
                    "delete-nodegroup",
                    "--cluster-name",
                    cluster,
                    "--nodegroup-name",
                    name,
                ],
            )
            .await
            .map_err(CloudError::from)?;
        Ok(())
    }

    async fn list_node_groups(&self, cluster: &str) -> Result<Vec<String>> {
        let response: ListNodegroupsResponse = self
            .aws
            .run_json("eks", &["list-nodegroups", "--cluster-name", cluster])
            .await
            .map_err(CloudError::from)?;
        Ok(response.nodegroups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaling_config_arg_format() {
        let scaling = ScalingEnvelope {
            min_size: 2,
            max_size: 10,
            desired_size: 4,
        };
        assert_eq!(scaling_config_arg(&scaling), "minSize=2,maxSize=10,desiredSize=4");
    }

    #[test]
    fn describe_response_parses() {
        let raw = r#"{
            "nodegroup": {
                "nodegroupName": "prod-EKS-Cluster-Node-Group-20260827-ABCDE",
                "status": "ACTIVE",
                "scalingConfig": {"minSize": 2, "maxSize": 10, "desiredSize": 2},
                "instanceTypes": ["m5.large"],
                "version": "1.29"
            }
        }"#;
        let response: DescribeNodegroupResponse = serde_json::from_str(raw).unwrap();
        let description = response.nodegroup.into_description();
        assert_eq!(description.status, "ACTIVE");
        assert_eq!(description.scaling.desired_size, 2);
        assert_eq!(description.kubernetes_version.as_deref(), Some("1.29"));
    }

    #[test]
    fn list_response_defaults_to_empty() {
        let response: ListNodegroupsResponse = serde_json::from_str("{}").unwrap();
        assert!(response.nodegroups.is_empty());
    }
}
