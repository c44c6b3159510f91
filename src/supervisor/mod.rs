//! Supervision core
//!
//! This module provides the process babysitting engine:
//! - Process runner owning one OS process at a time
//! - Health checker polling an external command
//! - Controller for restart and primary/secondary failover

pub mod checker;
pub mod controller;
#[cfg(any(test, feature = "test-util"))]
pub mod fake;
pub mod process;
pub mod runner;
pub mod spec;
pub mod stop;

pub use checker::{CheckerReport, CheckerRunState, HealthChecker};
pub use controller::{
    next_slot, CycleReport, RunMode, ServiceSlot, SingleRunReport, SupervisionController,
};
pub use process::{
    CheckProbe, CommandProbe, ExitOutcome, OsLauncher, ProbeOutput, ProcessHandle, ProcessLauncher,
};
pub use runner::{ProcessRunner, RunningProcess};
pub use spec::{split_options, CheckerSpec, LogSink, ServiceSpec};
pub use stop::{stop_channel, StopSignal, StopTrigger};
