//! AWS backends for deployflow
//!
//! Implements the capability traits from `deployflow-cloud` by shelling out
//! to the `aws` CLI: CloudFormation for stacks, EKS for node groups,
//! Route 53 for hosted zones, plus EC2/STS discovery helpers used to build
//! the environment context.

pub mod cli;
pub mod cloudformation;
pub mod discovery;
pub mod eks;
pub mod error;
pub mod route53;

// Re-exports
pub use cli::AwsCli;
pub use cloudformation::CloudFormationCli;
pub use discovery::{Ec2Cli, StsCli, SubnetInfo};
pub use eks::EksCli;
pub use error::{AwsError, Result};
pub use route53::Route53Cli;
