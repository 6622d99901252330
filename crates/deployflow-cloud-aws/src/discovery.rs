//! Environment discovery via EC2 and STS
//!
//! Facts the templates need but the config does not carry: which
//! availability zones the configured subnets live in, the VPC they belong
//! to, its route tables and primary CIDR, and the account id.

use serde::Deserialize;

use deployflow_cloud::{CloudError, Result};

use crate::cli::AwsCli;

#[derive(Debug, Clone)]
pub struct Ec2Cli {
    aws: AwsCli,
}

#[derive(Debug, Clone)]
pub struct StsCli {
    aws: AwsCli,
}

#[derive(Debug, Clone)]
pub struct SubnetInfo {
    pub subnet_id: String,
    pub availability_zone: String,
    pub vpc_id: String,
}

#[derive(Debug, Deserialize)]
struct DescribeSubnetsResponse {
    #[serde(rename = "Subnets", default)]
    subnets: Vec<WireSubnet>,
}

#[derive(Debug, Deserialize)]
struct WireSubnet {
    #[serde(rename = "SubnetId")]
    subnet_id: String,
    #[serde(rename = "AvailabilityZone")]
    availability_zone: String,
    #[serde(rename = "VpcId")]
    vpc_id: String,
}

#[derive(Debug, Deserialize)]
struct DescribeRouteTablesResponse {
    #[serde(rename = "RouteTables", default)]
    route_tables: Vec<WireRouteTable>,
}

#[derive(Debug, Deserialize)]
struct WireRouteTable {
    #[serde(rename = "RouteTableId")]
    route_table_id: String,
}

#[derive(Debug, Deserialize)]
struct DescribeVpcsResponse {
    #[serde(rename = "Vpcs", default)]
    vpcs: Vec<WireVpc>,
}

#[derive(Debug, Deserialize)]
struct WireVpc {
    #[serde(rename = "CidrBlock")]
    cidr_block: String,
}

#[derive(Debug, Deserialize)]
struct CallerIdentityResponse {
    #[serde(rename = "Account")]
    account: String,
}

fn is_duplicate_rule_message(message: &str) -> bool {
    message.contains("InvalidPermission.Duplicate")
}

impl Ec2Cli {
    pub fn new(aws: AwsCli) -> Self {
        Self { aws }
    }

    pub async fn describe_subnets(&self, subnet_ids: &[String]) -> Result<Vec<SubnetInfo>> {
        let mut args = vec!["describe-subnets", "--subnet-ids"];
        args.extend(subnet_ids.iter().map(String::as_str));
        let response: DescribeSubnetsResponse = self
            .aws
            .run_json("ec2", &args)
            .await
            .map_err(CloudError::from)?;
        Ok(response
            .subnets
            .into_iter()
            .map(|s| SubnetInfo {
                subnet_id: s.subnet_id,
                availability_zone: s.availability_zone,
                vpc_id: s.vpc_id,
            })
            .collect())
    }

    pub async fn route_table_ids(&self, vpc_id: &str) -> Result<Vec<String>> {
        let filter = format!("Name=vpc-id,Values={vpc_id}");
        let response: DescribeRouteTablesResponse = self
            .aws
            .run_json("ec2", &["describe-route-tables", "--filters", filter.as_str()])
            .await
            .map_err(CloudError::from)?;
        Ok(response
            .route_tables
            .into_iter()
            .map(|t| t.route_table_id)
            .collect())
    }

    pub async fn vpc_cidr(&self, vpc_id: &str) -> Result<String> {
        let response: DescribeVpcsResponse = self
            .aws
            .run_json("ec2", &["describe-vpcs", "--vpc-ids", vpc_id])
            .await
            .map_err(CloudError::from)?;
        response
            .vpcs
            .into_iter()
            .next()
            .map(|v| v.cidr_block)
            .ok_or_else(|| CloudError::NotFound(vpc_id.to_string()))
    }

    /// Tag the given subnets. Tagging is idempotent on the platform side.
    pub async fn tag_resources(&self, resource_ids: &[String], key: &str, value: &str) -> Result<()> {
        let tag = format!("Key={key},Value={value}");
        let mut args = vec!["create-tags", "--resources"];
        args.extend(resource_ids.iter().map(String::as_str));
        args.push("--tags");
        args.push(tag.as_str());
        self.aws.run("ec2", &args).await.map_err(CloudError::from)?;
        Ok(())
    }

    /// Allow HTTPS from the VPC CIDR on the endpoint security group. A rule
    /// that already exists is a no-op, not an error.
    pub async fn allow_https_from(&self, group_id: &str, cidr: &str) -> Result<()> {
        let result = self
            .aws
            .run(
                "ec2",
                &[
                    "authorize-security-group-ingress",
                    "--group-id",
                    group_id,
                    "--protocol",
                    "tcp",
                    "--port",
                    "443",
                    "--cidr",
                    cidr,
                ],
            )
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(crate::error::AwsError::CommandFailed(message))
                if is_duplicate_rule_message(&message) =>
            {
                tracing::debug!(group_id, cidr, "ingress rule already present");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}

impl StsCli {
    pub fn new(aws: AwsCli) -> Self {
        Self { aws }
    }

    pub async fn account_id(&self) -> Result<String> {
        let response: CallerIdentityResponse = self
            .aws
            .run_json("sts", &["get-caller-identity"])
            .await
            .map_err(CloudError::from)?;
        Ok(response.account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subnets_response_parses() {
        let raw = r#"{
            "Subnets": [
                {"SubnetId": "subnet-aaa", "AvailabilityZone": "ap-northeast-1a", "VpcId": "vpc-0123"},
                {"SubnetId": "subnet-bbb", "AvailabilityZone": "ap-northeast-1c", "VpcId": "vpc-0123"}
            ]
        }"#;
        let response: DescribeSubnetsResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(response.subnets.len(), 2);
        assert_eq!(response.subnets[1].availability_zone, "ap-northeast-1c");
    }

    #[test]
    fn caller_identity_parses() {
        let raw = r#"{"UserId": "AIDA...", "Account": "111111111111", "Arn": "arn:aws:iam::111111111111:user/deploy"}"#;
        let response: CallerIdentityResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(response.account, "111111111111");
    }

    #[test]
    fn duplicate_rule_message_detection() {
        assert!(is_duplicate_rule_message(
            "An error occurred (InvalidPermission.Duplicate) when calling the AuthorizeSecurityGroupIngress operation"
        ));
        assert!(!is_duplicate_rule_message("Access denied"));
    }
}
