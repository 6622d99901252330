//! aws CLI runner
//!
//! Wraps `aws <service> <operation> ...` invocations. All service wrappers
//! share one runner so the region flag and output handling stay in one
//! place.

use std::process::Stdio;

use tokio::process::Command;

use crate::error::{AwsError, Result};

#[derive(Debug, Clone)]
pub struct AwsCli {
    region: String,
}

impl AwsCli {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Check that the aws CLI is installed.
    pub async fn check_installed(&self) -> Result<()> {
        if binary_on_path("aws").await? {
            Ok(())
        } else {
            Err(AwsError::AwsCliNotFound)
        }
    }

    /// Run an aws command and return stdout. Non-zero exit maps to
    /// `CommandFailed` with stderr preserved verbatim; the status
    /// classification layer matches on that text.
    pub async fn run(&self, service: &str, args: &[&str]) -> Result<String> {
        let mut cmd = Command::new("aws");
        cmd.arg(service);
        cmd.args(args);
        cmd.arg("--region").arg(&self.region);
        cmd.arg("--output").arg("json");
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        tracing::debug!(
            "Running: aws {} {} --region {}",
            service,
            args.join(" "),
            self.region
        );

        let output = cmd.output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AwsError::CommandFailed(stderr.trim().to_string()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Run and parse stdout as JSON.
    pub async fn run_json<T: serde::de::DeserializeOwned>(
        &self,
        service: &str,
        args: &[&str],
    ) -> Result<T> {
        let output = self.run(service, args).await?;
        Ok(serde_json::from_str(&output)?)
    }
}

async fn binary_on_path(name: &str) -> Result<bool> {
    let which = Command::new("which").arg(name).output().await?;
    Ok(which.status.success())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn path_lookup_distinguishes_present_and_missing_binaries() {
        assert!(binary_on_path("sh").await.unwrap());
        assert!(!binary_on_path("no-such-binary-on-any-path").await.unwrap());
    }
}
