//! Poll-until-terminal primitive
//!
//! Every lifecycle operation in this crate funnels through these two loops:
//! submit a mutation, then poll the remote description until the reported
//! status classifies as terminal. Intervals and attempt bounds are chosen by
//! the call site because different resource classes converge at very
//! different speeds.

use std::future::Future;
use std::time::Duration;

use crate::error::{CloudError, Result};

/// Classification of a remote status string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// Operation still running; keep polling.
    InProgress,
    /// Success terminal state.
    Success,
    /// Failure terminal state.
    Failure,
}

/// Polling cadence for one lifecycle operation.
#[derive(Debug, Clone, Copy)]
pub struct PollOptions {
    /// Sleep between consecutive status fetches.
    pub interval: Duration,
    /// Give up after this many fetches. `None` polls forever and trusts the
    /// remote side to eventually reach a terminal status.
    pub max_attempts: Option<u32>,
}

impl PollOptions {
    /// Unbounded polling at a fixed interval.
    pub const fn every(interval: Duration) -> Self {
        Self {
            interval,
            max_attempts: None,
        }
    }

    /// Bounded polling for resources with an explicit convergence signal.
    pub const fn bounded(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts: Some(max_attempts),
        }
    }
}

/// One status fetch: the raw status string plus the full description it came
/// from, returned to the caller on success so outputs can be read without a
/// second describe call.
#[derive(Debug, Clone)]
pub struct Observation<T> {
    pub status: String,
    pub detail: T,
}

/// Fetch status until it classifies as terminal.
///
/// Fetches first and sleeps between fetches, so a status that is already
/// terminal costs exactly one describe call. Fetch errors are fatal and
/// propagated immediately; only an accepted, in-progress operation is waited
/// on.
pub async fn poll_until_terminal<T, F, Fut, C>(
    name: &str,
    opts: PollOptions,
    mut fetch: F,
    classify: C,
) -> Result<Observation<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Observation<T>>>,
    C: Fn(&str) -> StatusClass,
{
    let mut attempts: u32 = 0;

    loop {
        let observation = fetch().await?;
        attempts += 1;
        tracing::debug!(
            resource = name,
            status = %observation.status,
            attempt = attempts,
            "polled resource status"
        );

        match classify(&observation.status) {
            StatusClass::Success => return Ok(observation),
            StatusClass::Failure => {
                return Err(CloudError::OperationFailed {
                    name: name.to_string(),
                    status: observation.status,
                })
            }
            StatusClass::InProgress => {}
        }

        if let Some(max) = opts.max_attempts {
            if attempts >= max {
                return Err(CloudError::OperationTimedOut {
                    name: name.to_string(),
                    attempts,
                });
            }
        }

        tokio::time::sleep(opts.interval).await;
    }
}

/// Deletion variant: the describe call itself starts failing with a
/// "not found" error once the resource is fully gone, so a fetch error
/// matching `is_gone` is reclassified as successful completion instead of
/// being propagated. Any other fetch error remains fatal.
pub async fn poll_until_deleted<T, F, Fut, C, G>(
    name: &str,
    opts: PollOptions,
    mut fetch: F,
    classify: C,
    is_gone: G,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Observation<T>>>,
    C: Fn(&str) -> StatusClass,
    G: Fn(&CloudError) -> bool,
{
    let mut attempts: u32 = 0;

    loop {
        let observation = match fetch().await {
            Ok(observation) => observation,
            Err(err) if is_gone(&err) => {
                tracing::debug!(resource = name, "describe reports not found, deletion complete");
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        attempts += 1;
        tracing::debug!(
            resource = name,
            status = %observation.status,
            attempt = attempts,
            "polled deletion status"
        );

        match classify(&observation.status) {
            StatusClass::Success => return Ok(()),
            StatusClass::Failure => {
                return Err(CloudError::OperationFailed {
                    name: name.to_string(),
                    status: observation.status,
                })
            }
            StatusClass::InProgress => {}
        }

        if let Some(max) = opts.max_attempts {
            if attempts >= max {
                return Err(CloudError::OperationTimedOut {
                    name: name.to_string(),
                    attempts,
                });
            }
        }

        tokio::time::sleep(opts.interval).await;
    }
}
