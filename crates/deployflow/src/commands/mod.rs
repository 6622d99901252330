pub mod cleanup;
pub mod delete;
pub mod init;
pub mod install;
pub mod rollback;
pub mod upgrade;
pub mod validate;

/// Output keys the stacks are expected to export.
pub mod outputs {
    pub const CLUSTER_NAME: &str = "EksClusterName";
    pub const NODE_ROLE_ARN: &str = "NodeInstanceRoleArn";
    pub const ENDPOINT_SECURITY_GROUP: &str = "EndpointSecurityGroupId";
    pub const LOAD_BALANCER_DNS: &str = "LoadBalancerDnsName";
    pub const LOAD_BALANCER_ZONE: &str = "LoadBalancerHostedZoneId";
}
