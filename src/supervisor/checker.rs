//! Health checker: polls an external command and stops the service on the
//! first unhealthy answer.
//!
//! A run goes `Idle -> Polling -> Triggered`. Anything other than a clean exit
//! printing exactly the expected string counts as unhealthy, including a
//! checker that cannot be found, fails to start, or overruns its timeout.

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::process::{CheckProbe, CommandProbe};
use super::spec::CheckerSpec;
use super::stop::StopTrigger;
use crate::error::{Result, SupervisorError};

/// Scratch state of one checker run, owned by the polling task
#[derive(Debug, Default)]
pub struct CheckerRunState {
    /// Stdout of the current check
    pub buffer: Vec<u8>,
    /// Checker path, resolved once when the run starts
    pub path: Option<PathBuf>,
    /// Cleared when an unhealthy result ends the run
    pub active: bool,
    /// Checks performed so far
    pub checks: u64,
}

/// Summary of a finished checker run
#[derive(Debug, Clone)]
pub struct CheckerReport {
    pub checks: u64,
    /// Whether the runner was still listening when the stop fired
    pub delivered: bool,
    pub reason: String,
}

/// Periodic health checker. Cheap to clone; each run gets fresh state.
#[derive(Clone)]
pub struct HealthChecker {
    spec: Arc<CheckerSpec>,
    probe: Arc<dyn CheckProbe>,
}

impl HealthChecker {
    pub fn new(spec: CheckerSpec, probe: Arc<dyn CheckProbe>) -> Self {
        Self {
            spec: Arc::new(spec),
            probe,
        }
    }

    /// Checker executing real commands
    pub fn os(spec: CheckerSpec) -> Self {
        Self::new(spec, Arc::new(CommandProbe))
    }

    pub fn spec(&self) -> &CheckerSpec {
        &self.spec
    }

    /// Look the checker executable up on the search path
    pub fn resolve(&self) -> Result<PathBuf> {
        self.probe.resolve(&self.spec.program)
    }

    /// Run one check. `Err(CheckerUnhealthy)` on any mismatch or failure,
    /// which also clears `state.active`.
    pub async fn check(&self, state: &mut CheckerRunState) -> Result<()> {
        let result = self.evaluate(state).await;
        if result.is_err() {
            state.active = false;
        }
        result
    }

    async fn evaluate(&self, state: &mut CheckerRunState) -> Result<()> {
        state.buffer.clear();
        state.checks += 1;

        let Some(path) = state.path.as_deref() else {
            return Err(SupervisorError::CheckerUnhealthy(format!(
                "checker {} is not resolvable",
                self.spec.program
            )));
        };

        let args = self.spec.args();
        let execution = self.probe.execute(path, &args);
        let output = match self.spec.timeout {
            Some(limit) => match tokio::time::timeout(limit, execution).await {
                Ok(output) => output,
                Err(_) => {
                    return Err(SupervisorError::CheckerUnhealthy(format!(
                        "checker timed out after {}",
                        humantime::format_duration(limit)
                    )))
                }
            },
            None => execution.await,
        };

        let output = output.map_err(|e| {
            SupervisorError::CheckerUnhealthy(format!("failed to run checker: {}", e))
        })?;
        if !output.status.success() {
            return Err(SupervisorError::CheckerUnhealthy(format!(
                "checker {}",
                output.status
            )));
        }

        state.buffer.extend_from_slice(&output.stdout);
        let result = String::from_utf8_lossy(&state.buffer);
        info!("check result: {}/{}", result, self.spec.expected);

        if state.buffer == self.spec.expected.as_bytes() {
            Ok(())
        } else {
            Err(SupervisorError::CheckerUnhealthy(format!(
                "expected {:?}, got {:?}",
                self.spec.expected, result
            )))
        }
    }

    /// Poll until the first unhealthy result, then fire `stop` and return.
    ///
    /// A healthy service keeps this future pending; the runner aborts it when
    /// the service exits.
    pub async fn run(self, stop: StopTrigger) -> CheckerReport {
        let mut state = CheckerRunState::default();
        match self.resolve() {
            Ok(path) => state.path = Some(path),
            Err(e) => warn!("checker {}; every check will fail", e),
        }
        state.active = true;

        tokio::time::sleep(self.spec.initial_delay).await;

        let mut reason = String::new();
        while state.active {
            match self.check(&mut state).await {
                Ok(()) => {
                    debug!("service healthy after {} checks", state.checks);
                    tokio::time::sleep(self.spec.interval).await;
                }
                Err(e) => reason = e.to_string(),
            }
        }

        info!("service check failed: {}", reason);
        let delivered = stop.fire();
        info!("checker ends");

        CheckerReport {
            checks: state.checks,
            delivered,
            reason,
        }
    }
}

impl std::fmt::Debug for HealthChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthChecker")
            .field("spec", &self.spec)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::fake::{FakeCheck, FakeProbe};
    use crate::supervisor::stop::stop_channel;
    use std::time::{Duration, Instant};

    fn checker(probe: &FakeProbe, expected: &str) -> HealthChecker {
        HealthChecker::new(
            CheckerSpec::new("probe", expected).with_interval(Duration::from_millis(5)),
            Arc::new(probe.clone()),
        )
    }

    async fn run_to_trigger(checker: HealthChecker) -> (CheckerReport, bool) {
        let (trigger, signal) = stop_channel();
        let report = tokio::time::timeout(Duration::from_secs(5), checker.run(trigger))
            .await
            .expect("checker should trigger");
        (report, signal.fired().await)
    }

    #[tokio::test]
    async fn test_healthy_output_keeps_polling() {
        let probe = FakeProbe::new([FakeCheck::stdout("ok")]);
        let (trigger, signal) = stop_channel();

        let outcome =
            tokio::time::timeout(Duration::from_millis(100), checker(&probe, "ok").run(trigger))
                .await;

        assert!(outcome.is_err(), "healthy checker must not finish");
        assert!(probe.calls() > 1);
        assert!(!signal.fired().await);
    }

    #[tokio::test]
    async fn test_mismatch_triggers_once_and_stops() {
        let probe = FakeProbe::new([
            FakeCheck::stdout("ok"),
            FakeCheck::stdout("ok"),
            FakeCheck::stdout("degraded"),
            FakeCheck::stdout("ok"),
        ]);

        let (report, fired) = run_to_trigger(checker(&probe, "ok")).await;

        assert!(fired);
        assert!(report.delivered);
        assert_eq!(report.checks, 3);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(probe.calls(), 3);
    }

    #[tokio::test]
    async fn test_empty_output_is_unhealthy() {
        let probe = FakeProbe::new([FakeCheck::stdout("")]);
        let (report, fired) = run_to_trigger(checker(&probe, "ok")).await;
        assert!(fired);
        assert_eq!(report.checks, 1);
    }

    #[tokio::test]
    async fn test_comparison_is_case_and_newline_sensitive() {
        let probe = FakeProbe::new([FakeCheck::stdout("OK")]);
        let (_, fired) = run_to_trigger(checker(&probe, "ok")).await;
        assert!(fired);

        let probe = FakeProbe::new([FakeCheck::stdout("ok\n")]);
        let (_, fired) = run_to_trigger(checker(&probe, "ok")).await;
        assert!(fired);
    }

    #[tokio::test]
    async fn test_failing_exit_is_unhealthy_even_with_expected_output() {
        let probe = FakeProbe::new([FakeCheck::failing(1, "ok")]);
        let (report, fired) = run_to_trigger(checker(&probe, "ok")).await;
        assert!(fired);
        assert!(report.reason.contains("exit code 1"));
    }

    #[tokio::test]
    async fn test_execution_error_is_unhealthy() {
        let probe = FakeProbe::new([FakeCheck::Error]);
        let (report, fired) = run_to_trigger(checker(&probe, "ok")).await;
        assert!(fired);
        assert!(report.reason.contains("failed to run checker"));
    }

    #[tokio::test]
    async fn test_unresolvable_checker_fails_closed() {
        let probe = FakeProbe::missing();
        let (report, fired) = run_to_trigger(checker(&probe, "ok")).await;
        assert!(fired);
        assert_eq!(report.checks, 1);
        assert_eq!(probe.calls(), 0);
    }

    #[tokio::test]
    async fn test_timeout_is_unhealthy() {
        let probe = FakeProbe::new([FakeCheck::Hang]);
        let checker = HealthChecker::new(
            CheckerSpec::new("probe", "ok").with_timeout(Some(Duration::from_millis(20))),
            Arc::new(probe.clone()),
        );
        let (report, fired) = run_to_trigger(checker).await;
        assert!(fired);
        assert!(report.reason.contains("timed out"));
    }

    #[tokio::test]
    async fn test_initial_delay_before_first_check() {
        let probe = FakeProbe::new([FakeCheck::stdout("bad")]);
        let checker = HealthChecker::new(
            CheckerSpec::new("probe", "ok").with_initial_delay(Duration::from_millis(60)),
            Arc::new(probe.clone()),
        );
        let started = Instant::now();
        let (_, fired) = run_to_trigger(checker).await;
        assert!(fired);
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn test_trigger_without_listener_is_not_delivered() {
        let probe = FakeProbe::new([FakeCheck::stdout("bad")]);
        let (trigger, signal) = stop_channel();
        drop(signal);
        let report = checker(&probe, "ok").run(trigger).await;
        assert!(!report.delivered);
    }

    #[tokio::test]
    async fn test_check_resets_buffer() {
        let probe = FakeProbe::new([FakeCheck::stdout("ok"), FakeCheck::stdout("ok")]);
        let checker = checker(&probe, "ok");
        let mut state = CheckerRunState {
            path: Some(PathBuf::from("/fake/bin/probe")),
            ..Default::default()
        };
        checker.check(&mut state).await.unwrap();
        checker.check(&mut state).await.unwrap();
        assert_eq!(state.buffer, b"ok");
        assert_eq!(state.checks, 2);
    }

    #[tokio::test]
    async fn test_unhealthy_check_deactivates_run() {
        let results = FakeProbe::new([FakeCheck::stdout("ok"), FakeCheck::stdout("down")]);
        let checker = checker(&results, "ok");
        let mut state = CheckerRunState {
            path: Some(PathBuf::from("/fake/bin/probe")),
            active: true,
            ..Default::default()
        };

        checker.check(&mut state).await.unwrap();
        assert!(state.active);
        assert!(checker.check(&mut state).await.is_err());
        assert!(!state.active);
    }
}
