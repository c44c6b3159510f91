//! In-memory launcher and checker probe for deterministic tests.
//!
//! Nothing here spawns a real process. Each program or probe is driven by a
//! script of outcomes; once a script runs out its last entry repeats.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::process::{CheckProbe, ExitOutcome, ProbeOutput, ProcessHandle, ProcessLauncher};
use super::spec::ServiceSpec;
use crate::error::{Result, SupervisorError};

const SIGKILL: i32 = 9;

#[derive(Debug)]
struct Script<T> {
    queue: VecDeque<T>,
    last: Option<T>,
}

impl<T: Clone> Script<T> {
    fn new(items: impl IntoIterator<Item = T>) -> Self {
        Self {
            queue: items.into_iter().collect(),
            last: None,
        }
    }

    fn next(&mut self) -> Option<T> {
        if let Some(item) = self.queue.pop_front() {
            self.last = Some(item.clone());
        }
        self.last.clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Scripted behavior of one fake process start
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeExit {
    /// Exit immediately with the code
    Code(i32),
    /// Run for the duration, then exit with the code
    After(Duration, i32),
    /// Run until killed
    Hang,
    /// Fail at spawn time
    SpawnError,
}

#[derive(Debug, Default)]
struct LauncherState {
    scripts: HashMap<String, Script<FakeExit>>,
    spawned: Vec<String>,
}

/// Fake [`ProcessLauncher`]; clones share state, so a test can keep one as a spy.
#[derive(Debug, Clone, Default)]
pub struct FakeLauncher {
    state: Arc<Mutex<LauncherState>>,
    kills: Arc<AtomicUsize>,
    next_pid: Arc<AtomicU32>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `name` resolvable, with one scripted outcome per start
    pub fn program(self, name: &str, exits: impl IntoIterator<Item = FakeExit>) -> Self {
        lock(&self.state)
            .scripts
            .insert(name.to_string(), Script::new(exits));
        self
    }

    /// Program names in spawn order
    pub fn spawned(&self) -> Vec<String> {
        lock(&self.state).spawned.clone()
    }

    /// Number of kill requests delivered to fake processes
    pub fn kills(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }
}

impl ProcessLauncher for FakeLauncher {
    fn resolve(&self, program: &str) -> Result<PathBuf> {
        if lock(&self.state).scripts.contains_key(program) {
            Ok(PathBuf::from("/fake/bin").join(program))
        } else {
            Err(SupervisorError::NotFound {
                program: program.to_string(),
                reason: "not registered with the fake launcher".to_string(),
            })
        }
    }

    fn spawn(
        &self,
        _path: &Path,
        spec: &ServiceSpec,
        _env: &[(OsString, OsString)],
    ) -> Result<Box<dyn ProcessHandle>> {
        let mut state = lock(&self.state);
        let exit = state
            .scripts
            .get_mut(&spec.program)
            .and_then(Script::next)
            .unwrap_or(FakeExit::Code(0));

        if exit == FakeExit::SpawnError {
            return Err(SupervisorError::Spawn {
                program: spec.program.clone(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "fake spawn error"),
            });
        }

        state.spawned.push(spec.program.clone());
        Ok(Box::new(FakeProcess {
            pid: self.next_pid.fetch_add(1, Ordering::SeqCst) + 1000,
            exit,
            killed: false,
            kills: self.kills.clone(),
        }))
    }
}

struct FakeProcess {
    pid: u32,
    exit: FakeExit,
    killed: bool,
    kills: Arc<AtomicUsize>,
}

#[async_trait]
impl ProcessHandle for FakeProcess {
    fn id(&self) -> Option<u32> {
        Some(self.pid)
    }

    async fn wait(&mut self) -> std::io::Result<ExitOutcome> {
        if self.killed {
            return Ok(ExitOutcome::Signaled(SIGKILL));
        }
        match self.exit {
            FakeExit::Code(code) => Ok(ExitOutcome::Exited(code)),
            FakeExit::After(duration, code) => {
                tokio::time::sleep(duration).await;
                Ok(ExitOutcome::Exited(code))
            }
            FakeExit::Hang | FakeExit::SpawnError => std::future::pending().await,
        }
    }

    fn start_kill(&mut self) -> std::io::Result<()> {
        self.killed = true;
        self.kills.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Scripted result of one fake checker execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeCheck {
    /// Checker ran and exited with the status
    Output(ProbeOutput),
    /// Checker could not be executed
    Error,
    /// Checker never finishes
    Hang,
}

impl FakeCheck {
    /// Successful run printing `stdout`
    pub fn stdout(stdout: &str) -> Self {
        FakeCheck::Output(ProbeOutput {
            status: ExitOutcome::Exited(0),
            stdout: stdout.as_bytes().to_vec(),
        })
    }

    /// Failed run printing `stdout`
    pub fn failing(code: i32, stdout: &str) -> Self {
        FakeCheck::Output(ProbeOutput {
            status: ExitOutcome::Exited(code),
            stdout: stdout.as_bytes().to_vec(),
        })
    }
}

#[derive(Debug)]
struct ProbeState {
    resolvable: bool,
    script: Mutex<Script<FakeCheck>>,
    calls: AtomicUsize,
}

/// Fake [`CheckProbe`]; clones share the call counter.
#[derive(Debug, Clone)]
pub struct FakeProbe {
    state: Arc<ProbeState>,
}

impl FakeProbe {
    pub fn new(checks: impl IntoIterator<Item = FakeCheck>) -> Self {
        Self::with_resolution(true, checks)
    }

    /// Probe whose checker executable cannot be found; every execution errors.
    pub fn missing() -> Self {
        Self::with_resolution(false, [FakeCheck::Error])
    }

    fn with_resolution(resolvable: bool, checks: impl IntoIterator<Item = FakeCheck>) -> Self {
        Self {
            state: Arc::new(ProbeState {
                resolvable,
                script: Mutex::new(Script::new(checks)),
                calls: AtomicUsize::new(0),
            }),
        }
    }

    /// Number of checker executions so far
    pub fn calls(&self) -> usize {
        self.state.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CheckProbe for FakeProbe {
    fn resolve(&self, program: &str) -> Result<PathBuf> {
        if self.state.resolvable {
            Ok(PathBuf::from("/fake/bin").join(program))
        } else {
            Err(SupervisorError::NotFound {
                program: program.to_string(),
                reason: "fake checker is missing".to_string(),
            })
        }
    }

    async fn execute(&self, _path: &Path, _args: &[String]) -> std::io::Result<ProbeOutput> {
        self.state.calls.fetch_add(1, Ordering::SeqCst);
        let check = lock(&self.state.script).next().unwrap_or(FakeCheck::Error);
        match check {
            FakeCheck::Output(output) => Ok(output),
            FakeCheck::Error => Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "fake checker failed to start",
            )),
            FakeCheck::Hang => std::future::pending().await,
        }
    }
}
