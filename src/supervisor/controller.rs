//! Restart and failover controller.
//!
//! Single mode runs the primary once and falls back to the secondary once.
//! Restart mode runs the current service forever, toggling between primary
//! and secondary after each failure when a secondary exists.

use std::time::Duration;
use tracing::{debug, info, warn};

use super::checker::HealthChecker;
use super::runner::ProcessRunner;
use crate::error::{Result, SupervisorError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// One primary run, then at most one secondary run
    #[default]
    Single,
    /// Rerun the current service forever
    Restart,
}

/// Which configured service a run uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceSlot {
    Primary,
    Secondary,
}

impl ServiceSlot {
    pub fn other(self) -> Self {
        match self {
            ServiceSlot::Primary => ServiceSlot::Secondary,
            ServiceSlot::Secondary => ServiceSlot::Primary,
        }
    }
}

impl std::fmt::Display for ServiceSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceSlot::Primary => write!(f, "primary"),
            ServiceSlot::Secondary => write!(f, "secondary"),
        }
    }
}

/// Slot for the next restart-mode run. Only a failure with a secondary configured switches.
pub fn next_slot(current: ServiceSlot, failed: bool, has_secondary: bool) -> ServiceSlot {
    if failed && has_secondary {
        current.other()
    } else {
        current
    }
}

/// Outcome of one restart-mode iteration
#[derive(Debug)]
pub struct CycleReport {
    pub slot: ServiceSlot,
    pub result: Result<()>,
    pub next: ServiceSlot,
}

/// Outcome of a single-mode run
#[derive(Debug)]
pub struct SingleRunReport {
    pub primary: Result<()>,
    /// Set only when the primary failed and a secondary ran
    pub secondary: Option<Result<()>>,
}

impl SingleRunReport {
    pub fn fell_back(&self) -> bool {
        self.secondary.is_some()
    }

    /// Whether the last service that ran exited cleanly
    pub fn succeeded(&self) -> bool {
        match &self.secondary {
            Some(result) => result.is_ok(),
            None => self.primary.is_ok(),
        }
    }
}

/// Drives the primary/secondary runners with an optional shared checker
pub struct SupervisionController {
    primary: ProcessRunner,
    secondary: Option<ProcessRunner>,
    checker: Option<HealthChecker>,
    restart_delay: Duration,
    mode: RunMode,
    current: ServiceSlot,
    cycles: u64,
}

impl SupervisionController {
    pub fn new(primary: ProcessRunner) -> Self {
        Self {
            primary,
            secondary: None,
            checker: None,
            restart_delay: Duration::ZERO,
            mode: RunMode::Single,
            current: ServiceSlot::Primary,
            cycles: 0,
        }
    }

    pub fn with_secondary(mut self, secondary: Option<ProcessRunner>) -> Self {
        self.secondary = secondary;
        self
    }

    pub fn with_checker(mut self, checker: Option<HealthChecker>) -> Self {
        self.checker = checker;
        self
    }

    pub fn with_restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }

    pub fn with_mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    /// Service the next run will use
    pub fn current(&self) -> ServiceSlot {
        self.current
    }

    /// Completed restart-mode iterations
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn runner(&self, slot: ServiceSlot) -> Option<&ProcessRunner> {
        match slot {
            ServiceSlot::Primary => Some(&self.primary),
            ServiceSlot::Secondary => self.secondary.as_ref(),
        }
    }

    /// Run according to the configured mode. Restart mode never returns.
    ///
    /// Failures are logged, never returned: a single run ends after the
    /// fallback whatever its outcome.
    pub async fn run(&mut self) {
        match self.mode {
            RunMode::Single => {
                self.run_single().await;
            }
            RunMode::Restart => {
                info!("run service on restart mode");
                loop {
                    self.run_cycle().await;
                }
            }
        }
    }

    /// Run the primary once; on failure run the secondary once, if configured.
    pub async fn run_single(&mut self) -> SingleRunReport {
        info!("run service on single mode");
        let primary = self.run_slot(ServiceSlot::Primary).await;
        let secondary = match &primary {
            Ok(()) => None,
            Err(e) => {
                info!("service run error: {}", e);
                if self.secondary.is_some() {
                    info!("falling back to secondary service");
                    self.current = ServiceSlot::Secondary;
                    let result = self.run_slot(ServiceSlot::Secondary).await;
                    if let Err(e) = &result {
                        info!("secondary service run error: {}", e);
                    }
                    Some(result)
                } else {
                    None
                }
            }
        };
        SingleRunReport { primary, secondary }
    }

    /// One restart-mode iteration: run the current service, pick the next one,
    /// then sleep the restart delay whatever the outcome.
    pub async fn run_cycle(&mut self) -> CycleReport {
        let slot = self.current;
        let result = self.run_slot(slot).await;
        self.cycles += 1;

        if let Err(e) = &result {
            info!("service run error: {}", e);
        }

        let next = next_slot(slot, result.is_err(), self.secondary.is_some());
        if next != slot {
            warn!("switching from {} to {} service", slot, next);
        }
        self.current = next;

        if !self.restart_delay.is_zero() {
            debug!(
                "restarting in {}",
                humantime::format_duration(self.restart_delay)
            );
            tokio::time::sleep(self.restart_delay).await;
        }

        CycleReport { slot, result, next }
    }

    async fn run_slot(&mut self, slot: ServiceSlot) -> Result<()> {
        let checker = self.checker.as_ref();
        let runner = match slot {
            ServiceSlot::Primary => &mut self.primary,
            ServiceSlot::Secondary => self.secondary.as_mut().ok_or_else(|| {
                SupervisorError::Validation("no secondary service configured".to_string())
            })?,
        };

        info!(service = %slot, "running {}", runner.spec().program);
        runner.run(checker).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::fake::{FakeCheck, FakeExit, FakeLauncher, FakeProbe};
    use crate::supervisor::spec::{CheckerSpec, ServiceSpec};
    use std::sync::Arc;
    use std::time::Instant;

    fn runner(launcher: &FakeLauncher, program: &str) -> ProcessRunner {
        ProcessRunner::new(ServiceSpec::new(program), Arc::new(launcher.clone()))
    }

    fn controller(launcher: &FakeLauncher, secondary: bool) -> SupervisionController {
        SupervisionController::new(runner(launcher, "primary"))
            .with_secondary(secondary.then(|| runner(launcher, "secondary")))
            .with_mode(RunMode::Restart)
    }

    #[test]
    fn test_next_slot() {
        use ServiceSlot::*;
        assert_eq!(next_slot(Primary, true, true), Secondary);
        assert_eq!(next_slot(Secondary, true, true), Primary);
        assert_eq!(next_slot(Primary, false, true), Primary);
        assert_eq!(next_slot(Secondary, false, true), Secondary);
        assert_eq!(next_slot(Primary, true, false), Primary);
    }

    #[tokio::test]
    async fn test_failures_alternate_between_services() {
        let launcher = FakeLauncher::new()
            .program("primary", [FakeExit::Code(1)])
            .program("secondary", [FakeExit::Code(1)]);
        let mut controller = controller(&launcher, true);

        let mut slots = Vec::new();
        for _ in 0..5 {
            let report = controller.run_cycle().await;
            assert!(report.result.is_err());
            slots.push(report.slot);
        }

        use ServiceSlot::*;
        assert_eq!(slots, vec![Primary, Secondary, Primary, Secondary, Primary]);
        assert_eq!(
            launcher.spawned(),
            vec!["primary", "secondary", "primary", "secondary", "primary"]
        );
        assert_eq!(controller.cycles(), 5);
    }

    #[tokio::test]
    async fn test_without_secondary_primary_is_always_retried() {
        let launcher = FakeLauncher::new().program("primary", [FakeExit::Code(1)]);
        let mut controller = controller(&launcher, false);

        for _ in 0..4 {
            let report = controller.run_cycle().await;
            assert_eq!(report.slot, ServiceSlot::Primary);
            assert_eq!(report.next, ServiceSlot::Primary);
        }
        assert_eq!(launcher.spawned().len(), 4);
    }

    #[tokio::test]
    async fn test_success_keeps_current_service() {
        let launcher = FakeLauncher::new()
            .program("primary", [FakeExit::Code(1)])
            .program("secondary", [FakeExit::Code(0)]);
        let mut controller = controller(&launcher, true);

        controller.run_cycle().await;
        for _ in 0..3 {
            let report = controller.run_cycle().await;
            assert!(report.result.is_ok());
            assert_eq!(report.slot, ServiceSlot::Secondary);
        }
        assert_eq!(controller.current(), ServiceSlot::Secondary);
    }

    #[tokio::test]
    async fn test_missing_primary_counts_as_failure() {
        let launcher = FakeLauncher::new().program("secondary", [FakeExit::Code(0)]);
        let mut controller = controller(&launcher, true);

        let report = controller.run_cycle().await;
        assert!(matches!(
            report.result,
            Err(SupervisorError::NotFound { .. })
        ));
        assert_eq!(report.next, ServiceSlot::Secondary);
        assert!(launcher.spawned().is_empty());
    }

    #[tokio::test]
    async fn test_restart_delay_applies_after_success() {
        let launcher = FakeLauncher::new().program("primary", [FakeExit::Code(0)]);
        let mut controller =
            controller(&launcher, false).with_restart_delay(Duration::from_millis(40));

        let started = Instant::now();
        let report = controller.run_cycle().await;
        assert!(report.result.is_ok());
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_checker_stops_current_service_then_fails_over() {
        let launcher = FakeLauncher::new()
            .program("primary", [FakeExit::Hang])
            .program("secondary", [FakeExit::Code(0)]);
        let checker = HealthChecker::new(
            CheckerSpec::new("probe", "up").with_interval(Duration::from_millis(5)),
            Arc::new(FakeProbe::new([FakeCheck::stdout("down"), FakeCheck::stdout("up")])),
        );
        let mut controller = controller(&launcher, true).with_checker(Some(checker));

        let report = controller.run_cycle().await;
        assert!(matches!(
            report.result,
            Err(SupervisorError::RuntimeExit { .. })
        ));
        assert_eq!(report.next, ServiceSlot::Secondary);
        assert_eq!(launcher.kills(), 1);

        let report = controller.run_cycle().await;
        assert!(report.result.is_ok());
        assert_eq!(report.slot, ServiceSlot::Secondary);
    }

    #[tokio::test]
    async fn test_restart_mode_never_returns() {
        let launcher = FakeLauncher::new()
            .program("primary", [FakeExit::After(Duration::from_millis(5), 0)]);
        let mut controller = controller(&launcher, false);

        let outcome = tokio::time::timeout(Duration::from_millis(100), controller.run()).await;
        assert!(outcome.is_err());
        assert!(launcher.spawned().len() > 1);
    }

    #[tokio::test]
    async fn test_single_mode_success_skips_secondary() {
        let launcher = FakeLauncher::new()
            .program("primary", [FakeExit::Code(0)])
            .program("secondary", [FakeExit::Code(0)]);
        let mut controller = controller(&launcher, true).with_mode(RunMode::Single);

        let report = controller.run_single().await;
        assert!(report.succeeded());
        assert!(!report.fell_back());
        assert_eq!(launcher.spawned(), vec!["primary"]);
    }

    #[tokio::test]
    async fn test_single_mode_falls_back_once() {
        let launcher = FakeLauncher::new()
            .program("primary", [FakeExit::Code(1)])
            .program("secondary", [FakeExit::Code(3)]);
        let mut controller = controller(&launcher, true).with_mode(RunMode::Single);

        let report = controller.run_single().await;
        assert!(report.fell_back());
        assert!(!report.succeeded());
        assert!(matches!(
            report.secondary,
            Some(Err(SupervisorError::RuntimeExit { ref program, .. })) if program == "secondary"
        ));
        assert_eq!(launcher.spawned(), vec!["primary", "secondary"]);
        assert_eq!(controller.current(), ServiceSlot::Secondary);
    }

    #[tokio::test]
    async fn test_single_mode_without_secondary_reports_failure() {
        let launcher = FakeLauncher::new().program("primary", [FakeExit::Code(1)]);
        let mut controller = controller(&launcher, false).with_mode(RunMode::Single);

        let report = controller.run_single().await;
        assert!(report.primary.is_err());
        assert!(!report.fell_back());
        assert_eq!(launcher.spawned(), vec!["primary"]);
    }

    /// A failed single run, fallback included, still returns normally.
    #[tokio::test]
    async fn test_single_mode_failure_is_not_escalated() {
        let launcher = FakeLauncher::new()
            .program("primary", [FakeExit::Code(1)])
            .program("secondary", [FakeExit::SpawnError]);
        let mut controller = controller(&launcher, true).with_mode(RunMode::Single);

        tokio::time::timeout(Duration::from_secs(1), controller.run())
            .await
            .expect("single mode should finish");
        assert_eq!(launcher.spawned(), vec!["primary"]);
        assert_eq!(controller.current(), ServiceSlot::Secondary);
    }
}
