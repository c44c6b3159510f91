//! Lifecycle of one supervised OS process.

use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::checker::HealthChecker;
use super::process::{merge_env, OsLauncher, ProcessHandle, ProcessLauncher};
use super::spec::ServiceSpec;
use super::stop::{stop_channel, StopSignal};
use crate::error::{Result, SupervisorError};

/// Handle to a started service. Dropped once the process is known to be gone.
pub struct RunningProcess {
    /// Resolved executable path
    pub path: PathBuf,
    /// Environment the process was started with
    pub env: Vec<(OsString, OsString)>,
    handle: Box<dyn ProcessHandle>,
}

impl RunningProcess {
    pub fn pid(&self) -> Option<u32> {
        self.handle.id()
    }
}

impl std::fmt::Debug for RunningProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunningProcess")
            .field("path", &self.path)
            .field("pid", &self.pid())
            .finish()
    }
}

/// Runs a [`ServiceSpec`], holding at most one live process at a time
pub struct ProcessRunner {
    spec: ServiceSpec,
    launcher: Arc<dyn ProcessLauncher>,
    resolved: Option<PathBuf>,
    running: Option<RunningProcess>,
}

impl ProcessRunner {
    pub fn new(spec: ServiceSpec, launcher: Arc<dyn ProcessLauncher>) -> Self {
        Self {
            spec,
            launcher,
            resolved: None,
            running: None,
        }
    }

    /// Runner backed by real OS processes
    pub fn os(spec: ServiceSpec) -> Self {
        Self::new(spec, Arc::new(OsLauncher))
    }

    pub fn spec(&self) -> &ServiceSpec {
        &self.spec
    }

    pub fn running(&self) -> Option<&RunningProcess> {
        self.running.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Look up the executable on the search path
    pub fn resolve(&mut self) -> Result<PathBuf> {
        match self.launcher.resolve(&self.spec.program) {
            Ok(path) => {
                debug!("resolved {} to {}", self.spec.program, path.display());
                self.resolved = Some(path.clone());
                Ok(path)
            }
            Err(e) => {
                error!("{} not found", self.spec.program);
                self.resolved = None;
                Err(e)
            }
        }
    }

    /// Start the process with the inherited environment plus the service's extra entries
    pub fn start(&mut self) -> Result<()> {
        if self.running.is_some() {
            warn!("{} still has a live process, stopping it first", self.spec.program);
            self.stop();
        }

        let path = match &self.resolved {
            Some(path) => path.clone(),
            None => self.resolve()?,
        };
        let env = merge_env(&self.spec.extra_env);

        info!("start service {}", self.spec.program);
        let handle = self
            .launcher
            .spawn(&path, &self.spec, &env)
            .inspect_err(|e| error!("{}", e))?;
        info!(pid = ?handle.id(), "service {} started", self.spec.program);

        self.running = Some(RunningProcess { path, env, handle });
        Ok(())
    }

    /// Block until the process exits. Non-zero exits and kills are errors.
    pub async fn wait(&mut self) -> Result<()> {
        self.wait_until(None).await
    }

    /// Like [`wait`](Self::wait), but kills the process as soon as `stop` fires.
    pub async fn wait_until(&mut self, stop: Option<StopSignal>) -> Result<()> {
        let program = self.spec.program.clone();
        let process = self.running.as_mut().ok_or(SupervisorError::NotRunning)?;

        let stop_requested = async move {
            match stop {
                Some(signal) => signal.fired().await,
                None => false,
            }
        };

        let waited = tokio::select! {
            status = process.handle.wait() => status,
            true = stop_requested => {
                info!(pid = ?process.handle.id(), "stop requested for {}", program);
                if let Err(e) = process.handle.start_kill() {
                    debug!("kill {}: {}", program, e);
                }
                process.handle.wait().await
            }
        };
        self.running = None;

        let outcome = waited.map_err(|source| SupervisorError::Wait {
            program: program.clone(),
            source,
        })?;
        if outcome.success() {
            info!("{} exited cleanly", program);
            Ok(())
        } else {
            error!("wait error: {} {}", program, outcome);
            Err(SupervisorError::RuntimeExit { program, outcome })
        }
    }

    /// Kill the live process, if any, and forget it. Safe to call repeatedly.
    pub fn stop(&mut self) {
        if let Some(mut process) = self.running.take() {
            info!(pid = ?process.pid(), "stopping {}", self.spec.program);
            if let Err(e) = process.handle.start_kill() {
                debug!("kill {}: {}", self.spec.program, e);
            }
        }
    }

    /// Resolve, start and wait, with `checker` polling alongside the process.
    ///
    /// A missing checker or service executable fails the run before anything
    /// is spawned. The checker task ends together with the process.
    pub async fn run(&mut self, checker: Option<&HealthChecker>) -> Result<()> {
        debug!("check program {}", self.spec.program);
        if let Some(checker) = checker {
            checker
                .resolve()
                .inspect_err(|e| error!("checker not found: {}", e))?;
        }
        self.resolve()?;
        self.start()?;

        let Some(checker) = checker else {
            return self.wait().await;
        };

        info!("start checker");
        let (trigger, signal) = stop_channel();
        let task = tokio::spawn(checker.clone().run(trigger));
        let result = self.wait_until(Some(signal)).await;
        task.abort();
        result
    }
}
