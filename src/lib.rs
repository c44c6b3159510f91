pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod supervisor;
pub mod system;

pub use crate::config::AppConfig;
pub use error::{Result, SupervisorError};
pub use supervisor::{
    CheckerSpec, HealthChecker, LogSink, ProcessRunner, RunMode, ServiceSlot, ServiceSpec,
    SingleRunReport, SupervisionController,
};
