//! Stage ledger
//!
//! Append-only progress log for one workflow run, one `<stage>::<state>`
//! line per transition. Replaying the file and keeping the last state per
//! stage reconstructs where a crashed run stopped. The format stays
//! line-oriented and human-diffable on purpose; operators read and
//! occasionally hand-edit these files.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::Result;

const SEPARATOR: &str = "::";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    Started,
    Finished,
}

impl StageState {
    fn as_str(self) -> &'static str {
        match self {
            StageState::Started => "started",
            StageState::Finished => "finished",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "started" => Some(StageState::Started),
            "finished" => Some(StageState::Finished),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StageLedger {
    path: PathBuf,
}

impl StageLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record_start(&self, stage: &str) -> Result<()> {
        self.append(stage, StageState::Started)
    }

    pub fn record_finish(&self, stage: &str) -> Result<()> {
        self.append(stage, StageState::Finished)
    }

    /// Last recorded state per stage. A missing ledger file is an empty
    /// ledger; malformed lines are skipped, not fatal.
    pub fn load(&self) -> Result<BTreeMap<String, StageState>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(err) => return Err(err.into()),
        };

        let mut states = BTreeMap::new();
        for line in raw.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Some((stage, state)) = line.rsplit_once(SEPARATOR) else {
                tracing::warn!(?line, "skipping malformed ledger line");
                continue;
            };
            let Some(state) = StageState::parse(state) else {
                tracing::warn!(?line, "skipping ledger line with unknown state");
                continue;
            };
            states.insert(stage.to_string(), state);
        }
        Ok(states)
    }

    pub fn is_finished(&self, stage: &str) -> Result<bool> {
        Ok(self.load()?.get(stage) == Some(&StageState::Finished))
    }

    /// Remove the ledger file. Missing file is fine.
    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn append(&self, stage: &str, state: StageState) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{stage}{SEPARATOR}{}", state.as_str())?;
        tracing::debug!(stage, state = state.as_str(), "recorded stage transition");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger_in(dir: &tempfile::TempDir) -> StageLedger {
        StageLedger::new(dir.path().join(".install_stage.log"))
    }

    #[test]
    fn missing_file_is_an_empty_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger_in(&dir);
        assert!(ledger.load().unwrap().is_empty());
        assert!(!ledger.is_finished("install.create.vpc.stack").unwrap());
    }

    #[test]
    fn last_state_per_stage_wins() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger_in(&dir);
        ledger.record_start("install.create.vpc.stack").unwrap();
        ledger.record_finish("install.create.vpc.stack").unwrap();
        ledger.record_start("install.create.infra.stack").unwrap();

        let states = ledger.load().unwrap();
        assert_eq!(
            states.get("install.create.vpc.stack"),
            Some(&StageState::Finished)
        );
        assert_eq!(
            states.get("install.create.infra.stack"),
            Some(&StageState::Started)
        );
        assert!(ledger.is_finished("install.create.vpc.stack").unwrap());
        assert!(!ledger.is_finished("install.create.infra.stack").unwrap());
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".install_stage.log");
        std::fs::write(
            &path,
            "install.create.vpc.stack::finished\ngarbage\nstage::unknown-state\n\n",
        )
        .unwrap();

        let ledger = StageLedger::new(path);
        let states = ledger.load().unwrap();
        assert_eq!(states.len(), 1);
        assert!(ledger.is_finished("install.create.vpc.stack").unwrap());
    }

    #[test]
    fn clear_removes_the_file_and_tolerates_absence() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger_in(&dir);
        ledger.record_start("install.create.vpc.stack").unwrap();
        ledger.clear().unwrap();
        assert!(ledger.load().unwrap().is_empty());
        // Clearing again must not fail.
        ledger.clear().unwrap();
    }
}
