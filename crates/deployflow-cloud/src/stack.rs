//! Stack lifecycle controller
//!
//! Generic create-or-update-or-delete for a named declarative stack. The
//! remote platform is the source of truth: existence is re-checked before
//! every mutating operation and never cached, because stacks can be mutated
//! out-of-band between calls.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{CloudError, Result};
use crate::poll::{poll_until_deleted, poll_until_terminal, Observation, PollOptions};
use crate::status;

/// Output key/value pairs reported by a stack in a complete state.
pub type StackOutputs = BTreeMap<String, String>;

/// One page of a stack enumeration. `next_token` is present while more pages
/// remain.
#[derive(Debug, Clone, Default)]
pub struct StackPage {
    pub names: Vec<String>,
    pub next_token: Option<String>,
}

/// Current remote state of a stack.
#[derive(Debug, Clone)]
pub struct StackDescription {
    pub name: String,
    pub status: String,
    pub parameters: BTreeMap<String, String>,
    pub outputs: StackOutputs,
}

/// A create or update submission.
#[derive(Debug, Clone)]
pub struct StackSubmission {
    pub name: String,
    pub template_url: String,
    pub parameters: BTreeMap<String, String>,
    /// Creates run with rollback disabled so a failed creation stays up for
    /// inspection instead of being torn down automatically.
    pub disable_rollback: bool,
    /// Overall timeout enforced by the remote platform. The local poll for
    /// stack convergence is unbounded; the remote side is trusted to fail
    /// the operation and reach a failure-terminal status on its own.
    pub timeout_minutes: Option<u32>,
}

/// Capability set the underlying platform client must provide. Every
/// operation is asynchronous on the remote side; submissions return once the
/// operation has been accepted, not once it has finished.
#[async_trait]
pub trait StackApi: Send + Sync {
    async fn list_stacks(&self, next_token: Option<&str>) -> Result<StackPage>;
    async fn validate_template(&self, template_url: &str) -> Result<()>;
    async fn create_stack(&self, submission: &StackSubmission) -> Result<String>;
    async fn update_stack(&self, submission: &StackSubmission) -> Result<String>;
    async fn delete_stack(&self, name: &str) -> Result<()>;
    async fn describe_stack(&self, name: &str) -> Result<StackDescription>;
}

/// Polling cadence and submission limits for one stack class.
#[derive(Debug, Clone, Copy)]
pub struct StackPolicy {
    pub create_poll: PollOptions,
    pub update_poll: PollOptions,
    pub delete_poll: PollOptions,
    pub create_timeout_minutes: u32,
}

impl Default for StackPolicy {
    fn default() -> Self {
        Self {
            create_poll: PollOptions::every(Duration::from_secs(10)),
            update_poll: PollOptions::every(Duration::from_secs(30)),
            delete_poll: PollOptions::every(Duration::from_secs(30)),
            create_timeout_minutes: 120,
        }
    }
}

/// Create-or-update logic over a [`StackApi`]. At most one mutating
/// operation per stack name is in flight from this process: every operation
/// blocks polling until the prior submission reaches a terminal state before
/// returning.
pub struct StackController<A> {
    api: A,
    policy: StackPolicy,
}

impl<A: StackApi> StackController<A> {
    pub fn new(api: A) -> Self {
        Self {
            api,
            policy: StackPolicy::default(),
        }
    }

    pub fn with_policy(api: A, policy: StackPolicy) -> Self {
        Self { api, policy }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    /// Enumerate all stacks, following the continuation token to exhaustion,
    /// and test membership by name. Evaluated fresh on every call.
    pub async fn exists(&self, name: &str) -> Result<bool> {
        let mut token: Option<String> = None;
        loop {
            let page = self.api.list_stacks(token.as_deref()).await?;
            if page.names.iter().any(|n| n == name) {
                tracing::debug!(stack = name, "stack exists");
                return Ok(true);
            }
            match page.next_token {
                Some(next) => token = Some(next),
                None => {
                    tracing::debug!(stack = name, "stack does not exist");
                    return Ok(false);
                }
            }
        }
    }

    /// Create the stack if absent, otherwise update it in place. Returns the
    /// stack's outputs once the operation reaches its success-terminal state.
    ///
    /// An update the platform rejects as containing no changes is a
    /// successful no-op: the prior outputs are returned unchanged.
    pub async fn create_or_update(
        &self,
        name: &str,
        template_url: &str,
        parameters: &BTreeMap<String, String>,
    ) -> Result<StackOutputs> {
        // Validate before any mutating call is issued.
        self.api
            .validate_template(template_url)
            .await
            .map_err(|err| CloudError::TemplateInvalid {
                template: template_url.to_string(),
                reason: err.to_string(),
            })?;

        let submission = StackSubmission {
            name: name.to_string(),
            template_url: template_url.to_string(),
            parameters: parameters.clone(),
            disable_rollback: true,
            timeout_minutes: Some(self.policy.create_timeout_minutes),
        };

        let observation = if self.exists(name).await? {
            tracing::info!(stack = name, "stack exists, updating");
            match self.api.update_stack(&submission).await {
                Ok(stack_id) => {
                    tracing::debug!(stack = name, stack_id = %stack_id, "stack update accepted");
                    self.poll_stack(name, self.policy.update_poll, status::classify_stack_update)
                        .await?
                }
                Err(CloudError::Api(message)) if status::is_no_updates_message(&message) => {
                    tracing::info!(stack = name, "no changes to apply, keeping current state");
                    return self.outputs(name).await;
                }
                Err(err) => return Err(err),
            }
        } else {
            tracing::info!(stack = name, template = template_url, "stack does not exist, creating");
            let stack_id = self.api.create_stack(&submission).await?;
            tracing::debug!(stack = name, stack_id = %stack_id, "stack creation accepted");
            self.poll_stack(name, self.policy.create_poll, status::classify_stack_create)
                .await?
        };

        Ok(observation.detail.outputs)
    }

    /// Delete the stack if present. Returns `false` without error when the
    /// stack is already absent.
    pub async fn delete(&self, name: &str) -> Result<bool> {
        if !self.exists(name).await? {
            tracing::info!(stack = name, "stack already absent, nothing to delete");
            return Ok(false);
        }

        tracing::info!(stack = name, "deleting stack");
        self.api.delete_stack(name).await?;

        let api = &self.api;
        poll_until_deleted(
            name,
            self.policy.delete_poll,
            || {
                let api = api;
                async move {
                    let description = api.describe_stack(name).await?;
                    Ok(Observation {
                        status: description.status.clone(),
                        detail: description,
                    })
                }
            },
            status::classify_stack_delete,
            |err| matches!(err, CloudError::Api(message) if status::is_stack_not_found_message(message)),
        )
        .await?;

        tracing::info!(stack = name, "stack deleted");
        Ok(true)
    }

    /// Current outputs of the stack.
    pub async fn outputs(&self, name: &str) -> Result<StackOutputs> {
        let description = self.api.describe_stack(name).await?;
        Ok(description.outputs)
    }

    /// Full current state, including the parameters the stack was last
    /// submitted with.
    pub async fn describe(&self, name: &str) -> Result<StackDescription> {
        self.api.describe_stack(name).await
    }

    async fn poll_stack(
        &self,
        name: &str,
        opts: PollOptions,
        classify: fn(&str) -> crate::poll::StatusClass,
    ) -> Result<Observation<StackDescription>> {
        let api = &self.api;
        poll_until_terminal(
            name,
            opts,
            || {
                let api = api;
                async move {
                    let description = api.describe_stack(name).await?;
                    Ok(Observation {
                        status: description.status.clone(),
                        detail: description,
                    })
                }
            },
            classify,
        )
        .await
    }
}
