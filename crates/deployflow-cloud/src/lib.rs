//! Deployflow cloud resource lifecycle
//!
//! This crate provides the provider-agnostic resource lifecycle core for
//! deployflow: submit a declarative mutation, poll the remote platform until
//! it reaches a terminal state, and normalize "already there" / "already
//! gone" outcomes into boolean no-ops.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                 deployflow CLI                   │
//! │        (install / upgrade / delete ...)          │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │               deployflow-cloud                   │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │  Controllers over capability traits       │   │
//! │  │  StackApi / NodeGroupApi / DnsApi         │   │
//! │  └──────────────────────────────────────────┘   │
//! │  ┌──────────────┐  ┌──────────────┐            │
//! │  │ poll-until-  │  │   status     │            │
//! │  │  terminal    │  │ classifiers  │            │
//! │  └──────────────┘  └──────────────┘            │
//! └───────┬─────────────────────────────────────────┘
//!         │
//! ┌───────▼───────────┐
//! │ deployflow-cloud- │
//! │  aws (aws CLI)    │
//! └───────────────────┘
//! ```

pub mod dns;
pub mod error;
pub mod nodegroup;
pub mod poll;
pub mod stack;
pub mod status;

// Re-exports
pub use dns::{
    AliasTarget, ChangeAction, DnsApi, RecordChange, RecordSet, Zone, ZoneController, ZonePolicy,
};
pub use error::{CloudError, Result};
pub use nodegroup::{
    synthesize_name, NodeGroupApi, NodeGroupController, NodeGroupDescription, NodeGroupPolicy,
    NodeGroupSpec, ScalingEnvelope,
};
pub use poll::{poll_until_deleted, poll_until_terminal, Observation, PollOptions, StatusClass};
pub use stack::{
    StackApi, StackController, StackDescription, StackOutputs, StackPage, StackPolicy,
    StackSubmission,
};
