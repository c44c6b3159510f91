//! Process capabilities used by the runner and the health checker.
//!
//! The supervision logic only talks to these traits, so it can be driven by
//! real OS processes ([`OsLauncher`], [`CommandProbe`]) or by the scripted
//! doubles in [`super::fake`].

use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::warn;

use super::spec::ServiceSpec;
use crate::error::{Result, SupervisorError};

/// How a process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Exited with a status code
    Exited(i32),
    /// Terminated by a signal
    Signaled(i32),
}

impl ExitOutcome {
    pub fn success(&self) -> bool {
        matches!(self, ExitOutcome::Exited(0))
    }
}

impl std::fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitOutcome::Exited(code) => write!(f, "exit code {}", code),
            ExitOutcome::Signaled(signal) => write!(f, "killed by signal {}", signal),
        }
    }
}

impl From<std::process::ExitStatus> for ExitOutcome {
    fn from(status: std::process::ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return ExitOutcome::Exited(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return ExitOutcome::Signaled(signal);
            }
        }
        ExitOutcome::Exited(-1)
    }
}

/// A started process
#[async_trait]
pub trait ProcessHandle: Send {
    /// OS process id, if still known
    fn id(&self) -> Option<u32>;

    /// Block until the process has exited
    async fn wait(&mut self) -> std::io::Result<ExitOutcome>;

    /// Request termination without waiting for it
    fn start_kill(&mut self) -> std::io::Result<()>;
}

/// Capability to locate and start service processes
#[cfg_attr(test, mockall::automock)]
pub trait ProcessLauncher: Send + Sync {
    /// Look the program up on the search path
    fn resolve(&self, program: &str) -> Result<PathBuf>;

    /// Start `path` with the service's arguments and sink and exactly `env` as environment
    fn spawn(
        &self,
        path: &Path,
        spec: &ServiceSpec,
        env: &[(OsString, OsString)],
    ) -> Result<Box<dyn ProcessHandle>>;
}

/// Captured result of one checker execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutput {
    pub status: ExitOutcome,
    pub stdout: Vec<u8>,
}

/// Capability to run the health checker command
#[async_trait]
pub trait CheckProbe: Send + Sync {
    fn resolve(&self, program: &str) -> Result<PathBuf>;

    async fn execute(&self, path: &Path, args: &[String]) -> std::io::Result<ProbeOutput>;
}

/// Search PATH for `program`; names containing a path separator are checked as given.
pub fn resolve_program(program: &str) -> Result<PathBuf> {
    which::which(program).map_err(|e| SupervisorError::NotFound {
        program: program.to_string(),
        reason: e.to_string(),
    })
}

/// Inherited environment followed by `extra` `KEY=VALUE` entries.
///
/// Duplicate keys are kept; when applied to a command the later entry wins.
pub fn merge_env(extra: &[String]) -> Vec<(OsString, OsString)> {
    let mut env: Vec<(OsString, OsString)> = std::env::vars_os().collect();
    for entry in extra {
        match entry.split_once('=') {
            Some((key, value)) if !key.is_empty() => {
                env.push((OsString::from(key), OsString::from(value)));
            }
            _ => warn!("ignoring malformed environment entry: {:?}", entry),
        }
    }
    env
}

/// Launches real OS processes through tokio
#[derive(Debug, Clone, Copy, Default)]
pub struct OsLauncher;

impl ProcessLauncher for OsLauncher {
    fn resolve(&self, program: &str) -> Result<PathBuf> {
        resolve_program(program)
    }

    fn spawn(
        &self,
        path: &Path,
        spec: &ServiceSpec,
        env: &[(OsString, OsString)],
    ) -> Result<Box<dyn ProcessHandle>> {
        let spawn_err = |source| SupervisorError::Spawn {
            program: spec.program.clone(),
            source,
        };

        let mut command = Command::new(path);
        command
            .args(&spec.args)
            .env_clear()
            .envs(env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::inherit())
            .stdout(spec.sink.stdout().map_err(spawn_err)?)
            .stderr(spec.sink.stderr().map_err(spawn_err)?)
            .kill_on_drop(true);

        let child = command.spawn().map_err(spawn_err)?;
        Ok(Box::new(OsProcess { child }))
    }
}

struct OsProcess {
    child: Child,
}

#[async_trait]
impl ProcessHandle for OsProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    async fn wait(&mut self) -> std::io::Result<ExitOutcome> {
        self.child.wait().await.map(ExitOutcome::from)
    }

    fn start_kill(&mut self) -> std::io::Result<()> {
        self.child.start_kill()
    }
}

/// Runs the checker as a child process, capturing stdout and discarding stderr
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandProbe;

#[async_trait]
impl CheckProbe for CommandProbe {
    fn resolve(&self, program: &str) -> Result<PathBuf> {
        resolve_program(program)
    }

    async fn execute(&self, path: &Path, args: &[String]) -> std::io::Result<ProbeOutput> {
        let output = Command::new(path)
            .args(args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        Ok(ProbeOutput {
            status: output.status.into(),
            stdout: output.stdout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_outcome_success() {
        assert!(ExitOutcome::Exited(0).success());
        assert!(!ExitOutcome::Exited(1).success());
        assert!(!ExitOutcome::Signaled(9).success());
        assert_eq!(ExitOutcome::Signaled(9).to_string(), "killed by signal 9");
    }

    #[test]
    fn test_merge_env_appends_after_inherited() {
        let env = merge_env(&["SERVICEMON_TEST_A=1".to_string(), "PATH=/nowhere".to_string()]);
        let inherited = std::env::vars_os().count();
        assert_eq!(env.len(), inherited + 2);
        assert_eq!(
            env[inherited],
            (OsString::from("SERVICEMON_TEST_A"), OsString::from("1"))
        );
        assert_eq!(
            env.last().cloned(),
            Some((OsString::from("PATH"), OsString::from("/nowhere")))
        );
    }

    #[test]
    fn test_merge_env_keeps_value_with_equals() {
        let env = merge_env(&["OPTS=a=b".to_string()]);
        assert_eq!(
            env.last().cloned(),
            Some((OsString::from("OPTS"), OsString::from("a=b")))
        );
    }

    #[test]
    fn test_merge_env_skips_malformed() {
        let inherited = std::env::vars_os().count();
        let env = merge_env(&["NO_EQUALS".to_string(), "=value".to_string()]);
        assert_eq!(env.len(), inherited);
    }

    #[test]
    fn test_resolve_missing_program() {
        let err = resolve_program("servicemon-definitely-missing-binary").unwrap_err();
        assert!(matches!(err, SupervisorError::NotFound { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_probe_captures_stdout() {
        let probe = CommandProbe;
        let path = probe.resolve("echo").unwrap();
        let output = probe
            .execute(&path, &["healthy".to_string()])
            .await
            .unwrap();
        assert!(output.status.success());
        assert_eq!(output.stdout, b"healthy\n");
    }
}
