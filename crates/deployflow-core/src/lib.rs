//! Deployflow core
//!
//! Configuration loading and validation, the per-invocation environment
//! context, the append-only stage ledger, and the resumable workflow runner
//! built on top of it.

pub mod config;
pub mod context;
pub mod error;
pub mod ledger;
pub mod runner;

// Re-exports
pub use config::{AddonConfig, DeployConfig, Network, NodeGroupConfig, Templates};
pub use context::{EnvContext, StackOutputs, LEDGER_FILE};
pub use error::{CoreError, Result};
pub use ledger::{StageLedger, StageState};
pub use runner::{RunReport, StageFuture, Workflow};
