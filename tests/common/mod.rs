// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use caskgrant::action::{ActionOutcome, CommandSink, ReinstallAction};
use caskgrant::catalog::PackageCatalog;
use caskgrant::orchestrator::{ReinstallOrchestrator, RunContext};
use caskgrant::trace::TraceRecorder;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use uuid::Uuid;

/// Build an argv from string slices
pub fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

/// Inventory with a fixed list of installed casks
pub struct FixedCatalog(pub Vec<String>);

impl FixedCatalog {
    pub fn new(ids: &[&str]) -> Self {
        Self(argv(ids))
    }
}

impl PackageCatalog for FixedCatalog {
    fn installed_packages(&self) -> caskgrant::Result<Vec<String>> {
        Ok(self.0.clone())
    }
}

/// What one scripted reinstall attempt does
#[derive(Debug, Clone)]
pub enum Step {
    /// Report these privileged commands, then finish with the outcome
    Run {
        commands: Vec<Vec<String>>,
        outcome: ActionOutcome,
    },
    /// Report these commands, then panic as if the process died
    Crash { commands: Vec<Vec<String>> },
    /// Fail to start at all
    SpawnError,
}

impl Step {
    pub fn succeed(commands: &[&[&str]]) -> Self {
        Self::Run {
            commands: commands.iter().map(|c| argv(c)).collect(),
            outcome: ActionOutcome::Succeeded,
        }
    }

    pub fn fail(commands: &[&[&str]], reason: &str) -> Self {
        Self::Run {
            commands: commands.iter().map(|c| argv(c)).collect(),
            outcome: ActionOutcome::failed(reason),
        }
    }

    pub fn crash() -> Self {
        Self::Crash {
            commands: Vec::new(),
        }
    }
}

/// Reinstall action that replays scripted steps per package.
///
/// Once a package's script is used up every further attempt succeeds
/// without privileged commands. Invocations are shared with the test so
/// they survive the action being moved into an orchestrator.
#[derive(Clone, Default)]
pub struct ScriptedAction {
    scripts: Arc<Mutex<HashMap<String, VecDeque<Step>>>>,
    invocations: Arc<Mutex<Vec<String>>>,
    fetches: Arc<Mutex<Vec<String>>>,
}

impl ScriptedAction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, package: &str, steps: Vec<Step>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(package.to_string(), steps.into());
        self
    }

    /// Packages reinstalled so far, in call order
    pub fn invocations(&self) -> Vec<String> {
        self.invocations.lock().unwrap().clone()
    }

    pub fn fetches(&self) -> Vec<String> {
        let mut fetched = self.fetches.lock().unwrap().clone();
        fetched.sort();
        fetched
    }
}

impl ReinstallAction for ScriptedAction {
    fn reinstall(&mut self, package: &str, sink: &mut CommandSink<'_>) -> caskgrant::Result<ActionOutcome> {
        self.invocations.lock().unwrap().push(package.to_string());
        let step = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(package)
            .and_then(|steps| steps.pop_front());

        match step {
            None => Ok(ActionOutcome::Succeeded),
            Some(Step::Run { commands, outcome }) => {
                for command in commands {
                    sink(command)?;
                }
                Ok(outcome)
            }
            Some(Step::Crash { commands }) => {
                for command in commands {
                    sink(command)?;
                }
                panic!("simulated crash while reinstalling {}", package);
            }
            Some(Step::SpawnError) => Err(caskgrant::Error::ActionError(format!(
                "failed to spawn brew for {}",
                package
            ))),
        }
    }

    fn fetch(&self, package: &str) -> caskgrant::Result<bool> {
        self.fetches.lock().unwrap().push(package.to_string());
        Ok(true)
    }
}

/// Create an isolated working directory.
///
/// Returns the TempDir - keep it alive to prevent cleanup.
pub fn setup_workdir() -> TempDir {
    tempfile::tempdir().unwrap()
}

/// Orchestrator over `workdir` driving `action`
pub fn orchestrator(workdir: &Path, action: &ScriptedAction) -> ReinstallOrchestrator {
    let ctx = RunContext::open(workdir).unwrap();
    ReinstallOrchestrator::new(ctx, Box::new(action.clone()))
}

/// Write a trace log with one attempt per package
pub fn write_trace(path: &Path, entries: &[(&str, &[&str])]) {
    let mut recorder = TraceRecorder::open(path).unwrap();
    let mut attempts: HashMap<String, Uuid> = HashMap::new();
    for (package, command) in entries {
        let attempt = *attempts
            .entry(package.to_string())
            .or_insert_with(Uuid::new_v4);
        recorder.record(package, attempt, argv(command)).unwrap();
    }
}
