//! CloudFormation backend for the stack controller

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;

use deployflow_cloud::status::STACK_LIST_STATUSES;
use deployflow_cloud::{
    CloudError, Result, StackApi, StackDescription, StackOutputs, StackPage, StackSubmission,
};

use crate::cli::AwsCli;

#[derive(Debug, Clone)]
pub struct CloudFormationCli {
    aws: AwsCli,
}

impl CloudFormationCli {
    pub fn new(aws: AwsCli) -> Self {
        Self { aws }
    }
}

#[derive(Debug, Deserialize)]
struct ListStacksResponse {
    #[serde(rename = "StackSummaries", default)]
    stack_summaries: Vec<StackSummary>,
    #[serde(rename = "NextToken")]
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StackSummary {
    #[serde(rename = "StackName")]
    stack_name: String,
}

#[derive(Debug, Deserialize)]
struct DescribeStacksResponse {
    #[serde(rename = "Stacks", default)]
    stacks: Vec<StackDetail>,
}

#[derive(Debug, Deserialize)]
struct StackDetail {
    #[serde(rename = "StackName")]
    stack_name: String,
    #[serde(rename = "StackStatus")]
    stack_status: String,
    #[serde(rename = "Parameters", default)]
    parameters: Vec<StackParameter>,
    #[serde(rename = "Outputs", default)]
    outputs: Vec<StackOutput>,
}

#[derive(Debug, Deserialize)]
struct StackParameter {
    #[serde(rename = "ParameterKey")]
    parameter_key: String,
    #[serde(rename = "ParameterValue")]
    parameter_value: String,
}

#[derive(Debug, Deserialize)]
struct StackOutput {
    #[serde(rename = "OutputKey")]
    output_key: String,
    #[serde(rename = "OutputValue")]
    output_value: String,
}

#[derive(Debug, Deserialize)]
struct SubmissionResponse {
    #[serde(rename = "StackId")]
    stack_id: String,
}

impl StackDetail {
    fn into_description(self) -> StackDescription {
        let parameters: BTreeMap<String, String> = self
            .parameters
            .into_iter()
            .map(|p| (p.parameter_key, p.parameter_value))
            .collect();
        let outputs: StackOutputs = self
            .outputs
            .into_iter()
            .map(|o| (o.output_key, o.output_value))
            .collect();
        StackDescription {
            name: self.stack_name,
            status: self.stack_status,
            parameters,
            outputs,
        }
    }
}

/// `ParameterKey=K,ParameterValue=V` pairs for `--parameters`.
fn parameter_args(parameters: &BTreeMap<String, String>) -> Vec<String> {
    parameters
        .iter()
        .map(|(key, value)| format!("ParameterKey={key},ParameterValue={value}"))
        .collect()
}

fn submission_args<'a>(
    submission: &'a StackSubmission,
    parameter_args: &'a [String],
    timeout: &'a Option<String>,
) -> Vec<&'a str> {
    let mut args = vec![
        "--stack-name",
        submission.name.as_str(),
        "--template-url",
        submission.template_url.as_str(),
        "--capabilities",
        "CAPABILITY_NAMED_IAM",
    ];
    if !parameter_args.is_empty() {
        args.push("--parameters");
        args.extend(parameter_args.iter().map(String::as_str));
    }
    if submission.disable_rollback {
        args.push("--disable-rollback");
    }
    if let Some(timeout) = timeout {
        args.push("--timeout-in-minutes");
        args.push(timeout.as_str());
    }
    args
}

#[async_trait]
impl StackApi for CloudFormationCli {
    async fn list_stacks(&self, next_token: Option<&str>) -> Result<StackPage> {
        let mut args = vec!["list-stacks", "--stack-status-filter"];
        args.extend_from_slice(STACK_LIST_STATUSES);
        if let Some(token) = next_token {
            args.push("--starting-token");
            args.push(token);
        }
        let response: ListStacksResponse = self
            .aws
            .run_json("cloudformation", &args)
            .await
            .map_err(CloudError::from)?;
        Ok(StackPage {
            names: response
                .stack_summaries
                .into_iter()
                .map(|s| s.stack_name)
                .collect(),
            next_token: response.next_token,
        })
    }

    async fn validate_template(&self, template_url: &str) -> Result<()> {
        self.aws
            .run("cloudformation", &["validate-template", "--template-url", template_url])
            .await
            .map_err(CloudError::from)?;
        Ok(())
    }

    async fn create_stack(&self, submission: &StackSubmission) -> Result<String> {
        let parameters = parameter_args(&submission.parameters);
        let timeout = submission.timeout_minutes.map(|t| t.to_string());
        let mut args = vec!["create-stack"];
        args.extend(submission_args(submission, &parameters, &timeout));
        let response: SubmissionResponse = self
            .aws
            .run_json("cloudformation", &args)
            .await
            .map_err(CloudError::from)?;
        Ok(response.stack_id)
    }

    async fn update_stack(&self, submission: &StackSubmission) -> Result<String> {
        let parameters = parameter_args(&submission.parameters);
        // Rollback and timeout flags apply only at creation.
        let mut args = vec![
            "update-stack",
            "--stack-name",
            submission.name.as_str(),
            "--template-url",
            submission.template_url.as_str(),
            "--capabilities",
            "CAPABILITY_NAMED_IAM",
        ];
        if !parameters.is_empty() {
            args.push("--parameters");
            args.extend(parameters.iter().map(String::as_str));
        }
        let response: SubmissionResponse = self
            .aws
            .run_json("cloudformation", &args)
            .await
            .map_err(CloudError::from)?;
        Ok(response.stack_id)
    }

    async fn delete_stack(&self, name: &str) -> Result<()> {
        self.aws
            .run("cloudformation", &["delete-stack", "--stack-name", name])
            .await
            .map_err(CloudError::from)?;
        Ok(())
    }

    async fn describe_stack(&self, name: &str) -> Result<StackDescription> {
        let response: DescribeStacksResponse = self
            .aws
            .run_json("cloudformation", &["describe-stacks", "--stack-name", name])
            .await
            .map_err(CloudError::from)?;
        response
            .stacks
            .into_iter()
            .find(|s| s.stack_name == name)
            .map(StackDetail::into_description)
            .ok_or_else(|| CloudError::NotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameter_args_format() {
        let mut parameters = BTreeMap::new();
        parameters.insert("EnvName".to_string(), "prod".to_string());
        parameters.insert("KubernetesVersion".to_string(), "1.29".to_string());
        assert_eq!(
            parameter_args(&parameters),
            vec![
                "ParameterKey=EnvName,ParameterValue=prod",
                "ParameterKey=KubernetesVersion,ParameterValue=1.29"
            ]
        );
    }

    #[test]
    fn create_args_include_rollback_and_timeout_flags() {
        let submission = StackSubmission {
            name: "prod".to_string(),
            template_url: "https://templates/infra.yaml".to_string(),
            parameters: BTreeMap::new(),
            disable_rollback: true,
            timeout_minutes: Some(120),
        };
        let parameters = parameter_args(&submission.parameters);
        let timeout = submission.timeout_minutes.map(|t| t.to_string());
        let args = submission_args(&submission, &parameters, &timeout);
        assert!(args.contains(&"--disable-rollback"));
        let idx = args.iter().position(|a| *a == "--timeout-in-minutes").unwrap();
        assert_eq!(args[idx + 1], "120");
    }

    #[test]
    fn describe_response_parses_outputs() {
        let raw = r#"{
            "Stacks": [{
                "StackName": "prod",
                "StackStatus": "CREATE_COMPLETE",
                "Parameters": [
                    {"ParameterKey": "KubernetesVersion", "ParameterValue": "1.28"}
                ],
                "Outputs": [
                    {"OutputKey": "ClusterName", "OutputValue": "prod-EKS-Cluster"},
                    {"OutputKey": "VpcId", "OutputValue": "vpc-0123"}
                ]
            }]
        }"#;
        let response: DescribeStacksResponse = serde_json::from_str(raw).unwrap();
        let description = response.stacks.into_iter().next().unwrap().into_description();
        assert_eq!(description.status, "CREATE_COMPLETE");
        assert_eq!(
            description.outputs.get("ClusterName").map(String::as_str),
            Some("prod-EKS-Cluster")
        );
        assert_eq!(
            description.parameters.get("KubernetesVersion").map(String::as_str),
            Some("1.28")
        );
    }

    #[test]
    fn list_response_tolerates_missing_fields() {
        let raw = r#"{"StackSummaries": [{"StackName": "prod"}]}"#;
        let response: ListStacksResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(response.stack_summaries.len(), 1);
        assert!(response.next_token.is_none());
    }
}
