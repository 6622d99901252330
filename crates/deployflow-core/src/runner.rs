//! Workflow runner
//!
//! An ordered list of named stages over one shared mutable context. Progress
//! is recorded in a [`StageLedger`]; stages whose last recorded state is
//! `finished` are skipped, everything else re-runs from the top. Stages get
//! at-least-once execution, so bodies must tolerate re-running after a crash
//! mid-stage.

use std::future::Future;
use std::pin::Pin;

use crate::error::{CoreError, Result};
use crate::ledger::{StageLedger, StageState};

pub type StageFuture<'a> = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>>;

type StageBody<C> = Box<dyn for<'a> Fn(&'a mut C) -> StageFuture<'a> + Send + Sync>;

struct Stage<C> {
    name: String,
    body: StageBody<C>,
}

/// What a run did: stages executed this time versus skipped as already
/// finished.
#[derive(Debug, Default)]
pub struct RunReport {
    pub executed: Vec<String>,
    pub skipped: Vec<String>,
}

pub struct Workflow<C> {
    stages: Vec<Stage<C>>,
}

impl<C> Default for Workflow<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Workflow<C> {
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    /// Append a stage. Bodies return a boxed future borrowing the context:
    ///
    /// ```ignore
    /// workflow.stage("install.create.vpc.stack", |ctx| {
    ///     Box::pin(async move { create_vpc_stack(ctx).await })
    /// })
    /// ```
    pub fn stage<F>(mut self, name: impl Into<String>, body: F) -> Self
    where
        F: for<'a> Fn(&'a mut C) -> StageFuture<'a> + Send + Sync + 'static,
    {
        self.stages.push(Stage {
            name: name.into(),
            body: Box::new(body),
        });
        self
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    /// Run every stage in order, skipping those the ledger already records
    /// as finished. The first failing stage halts the run; its `started`
    /// entry stays in the ledger so the next run resumes there.
    pub async fn run(&self, ledger: &StageLedger, context: &mut C) -> Result<RunReport> {
        let recorded = ledger.load()?;
        let mut report = RunReport::default();

        for stage in &self.stages {
            if recorded.get(&stage.name) == Some(&StageState::Finished) {
                tracing::info!(stage = %stage.name, "stage already finished, skipping");
                report.skipped.push(stage.name.clone());
                continue;
            }

            tracing::info!(stage = %stage.name, "running stage");
            ledger.record_start(&stage.name)?;
            (stage.body)(context)
                .await
                .map_err(|source| CoreError::StageFailed {
                    stage: stage.name.clone(),
                    source,
                })?;
            ledger.record_finish(&stage.name)?;
            report.executed.push(stage.name.clone());
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct TestContext {
        log: Vec<String>,
        fail_on: Option<String>,
    }

    // A capturing closure's annotated return lifetime is not inferred as
    // higher-ranked, so the stage body bound needs the HRTB spelled out.
    fn body(
        name: &'static str,
    ) -> impl for<'a> Fn(&'a mut TestContext) -> StageFuture<'a> + Send + Sync {
        move |ctx| {
            Box::pin(async move {
                if ctx.fail_on.as_deref() == Some(name) {
                    anyhow::bail!("injected failure");
                }
                ctx.log.push(name.to_string());
                Ok(())
            })
        }
    }

    fn workflow() -> Workflow<TestContext> {
        Workflow::new()
            .stage("install.create.vpc.stack", body("install.create.vpc.stack"))
            .stage("install.create.infra.stack", body("install.create.infra.stack"))
            .stage("install.create.node.group", body("install.create.node.group"))
    }

    fn ledger_in(dir: &tempfile::TempDir) -> StageLedger {
        StageLedger::new(dir.path().join(".install_stage.log"))
    }

    #[tokio::test]
    async fn runs_all_stages_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger_in(&dir);
        let mut ctx = TestContext::default();

        let report = workflow().run(&ledger, &mut ctx).await.unwrap();

        assert_eq!(report.executed.len(), 3);
        assert!(report.skipped.is_empty());
        assert_eq!(
            ctx.log,
            vec![
                "install.create.vpc.stack",
                "install.create.infra.stack",
                "install.create.node.group"
            ]
        );
        assert!(ledger.is_finished("install.create.node.group").unwrap());
    }

    #[tokio::test]
    async fn skips_stages_the_ledger_marks_finished() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger_in(&dir);
        ledger.record_start("install.create.vpc.stack").unwrap();
        ledger.record_finish("install.create.vpc.stack").unwrap();
        let mut ctx = TestContext::default();

        let report = workflow().run(&ledger, &mut ctx).await.unwrap();

        assert_eq!(report.skipped, vec!["install.create.vpc.stack"]);
        assert_eq!(
            ctx.log,
            vec!["install.create.infra.stack", "install.create.node.group"]
        );
    }

    #[tokio::test]
    async fn failure_halts_and_leaves_resumption_point() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger_in(&dir);
        let mut ctx = TestContext {
            fail_on: Some("install.create.infra.stack".to_string()),
            ..Default::default()
        };

        let err = workflow().run(&ledger, &mut ctx).await.unwrap_err();

        match err {
            CoreError::StageFailed { stage, .. } => {
                assert_eq!(stage, "install.create.infra.stack");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(ctx.log, vec!["install.create.vpc.stack"]);
        let states = ledger.load().unwrap();
        assert_eq!(
            states.get("install.create.vpc.stack"),
            Some(&StageState::Finished)
        );
        assert_eq!(
            states.get("install.create.infra.stack"),
            Some(&StageState::Started)
        );
        assert!(!states.contains_key("install.create.node.group"));

        // Re-run after the cause is fixed: finished stage skipped, the
        // failed stage re-executes.
        ctx.fail_on = None;
        let report = workflow().run(&ledger, &mut ctx).await.unwrap();
        assert_eq!(report.skipped, vec!["install.create.vpc.stack"]);
        assert_eq!(
            report.executed,
            vec!["install.create.infra.stack", "install.create.node.group"]
        );
    }

    #[tokio::test]
    async fn fully_finished_ledger_skips_everything() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger_in(&dir);
        let mut ctx = TestContext::default();
        workflow().run(&ledger, &mut ctx).await.unwrap();

        let mut ctx = TestContext::default();
        let report = workflow().run(&ledger, &mut ctx).await.unwrap();

        assert!(report.executed.is_empty());
        assert_eq!(report.skipped.len(), 3);
        assert!(ctx.log.is_empty());
    }
}
