use config::{Config, Environment, File, Value};
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Result, SupervisorError};
use crate::supervisor::{
    split_options, CheckerSpec, HealthChecker, LogSink, ProcessRunner, RunMode, ServiceSpec,
    SupervisionController,
};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    pub service: ServiceConfig,
    #[serde(default)]
    pub checker: CheckerConfig,
    #[serde(default)]
    pub secondary: SecondaryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Primary command
    #[serde(default)]
    pub program: String,
    /// Primary command options.
    ///
    /// `SERVICEMON__SERVICE__ARGS` is split on commas, so an argument that
    /// itself contains a comma must come from the config file or the
    /// command line instead.
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra `KEY=VALUE` environment entries for both services.
    /// `SERVICEMON__SERVICE__ENV` is split on commas like `args`.
    #[serde(default)]
    pub env: Vec<String>,
    /// Restart after the service exits
    #[serde(default)]
    pub restart: bool,
    /// Pause after every run in restart mode
    #[serde(default, deserialize_with = "deserialize_duration")]
    pub restart_delay: Duration,
    /// File receiving service output and supervisor logs
    #[serde(default)]
    pub output: Option<PathBuf>,
    /// Open files limit to apply (0 = leave unchanged)
    #[serde(default)]
    pub open_files_limit: u64,
    /// Stay attached to the terminal
    #[serde(default)]
    pub foreground: bool,
    #[serde(default)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckerConfig {
    /// Checker command; no checker runs when unset
    #[serde(default)]
    pub command: Option<String>,
    /// Space-delimited checker options
    #[serde(default)]
    pub options: String,
    /// Exact stdout of a healthy check
    #[serde(default)]
    pub result: String,
    #[serde(default = "default_interval", deserialize_with = "deserialize_duration")]
    pub interval: Duration,
    /// Wait after service start before the first check
    #[serde(default, deserialize_with = "deserialize_duration")]
    pub delay: Duration,
    /// Per-check time limit (unset = unbounded)
    #[serde(default, deserialize_with = "deserialize_optional_duration")]
    pub timeout: Option<Duration>,
}

fn default_interval() -> Duration {
    Duration::from_secs(1)
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            command: None,
            options: String::new(),
            result: String::new(),
            interval: default_interval(),
            delay: Duration::ZERO,
            timeout: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SecondaryConfig {
    /// Secondary command; defaults to the primary command when only options are set
    #[serde(default)]
    pub command: Option<String>,
    /// Space-delimited secondary options
    #[serde(default)]
    pub options: Option<String>,
}

/// Parse "1s", "250ms", "1m 30s". Empty and "0" mean zero.
pub fn parse_duration(raw: &str) -> std::result::Result<Duration, humantime::DurationError> {
    let raw = raw.trim();
    if raw.is_empty() || raw == "0" {
        return Ok(Duration::ZERO);
    }
    humantime::parse_duration(raw)
}

fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let raw = String::deserialize(deserializer)?;
    parse_duration(&raw).map_err(|e| D::Error::custom(format!("invalid duration {:?}: {}", raw, e)))
}

fn deserialize_optional_duration<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => parse_duration(&raw)
            .map(Some)
            .map_err(|e| D::Error::custom(format!("invalid duration {:?}: {}", raw, e))),
    }
}

impl AppConfig {
    /// Load configuration from defaults, an optional file, the environment and `overrides`
    ///
    /// Later sources win: file < `SERVICEMON__*` environment < overrides.
    pub fn load(file: Option<&Path>, overrides: Vec<(&'static str, Value)>) -> Result<Self> {
        let mut builder = Config::builder()
            // Start with default values
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("service.restart", false)?
            .set_default("service.restart_delay", "0s")?
            .set_default("checker.interval", "1s")?
            .set_default("checker.delay", "0s")?;

        if let Some(file) = file {
            builder = builder.add_source(File::from(file).required(true));
        }

        // Override with environment variables (SERVICEMON__CHECKER__INTERVAL, etc.).
        // List keys split on "," with no escaping.
        builder = builder.add_source(
            Environment::with_prefix("SERVICEMON")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("service.args")
                .with_list_parse_key("service.env"),
        );

        for (key, value) in overrides {
            builder = builder.set_override(key, value)?;
        }

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.service.program.trim().is_empty() {
            errors.push("primary command is required".to_string());
        }

        for entry in &self.service.env {
            match entry.split_once('=') {
                Some((key, _)) if !key.is_empty() => {}
                _ => errors.push(format!("environment entry {:?} is not KEY=VALUE", entry)),
            }
        }

        if let Some(command) = &self.checker.command {
            if command.trim().is_empty() {
                errors.push("checker command is empty".to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(SupervisorError::Validation(errors.join("; ")))
        }
    }

    pub fn mode(&self) -> RunMode {
        if self.service.restart {
            RunMode::Restart
        } else {
            RunMode::Single
        }
    }

    pub fn primary_spec(&self, sink: &LogSink) -> ServiceSpec {
        ServiceSpec::new(self.service.program.clone())
            .with_args(self.service.args.iter().cloned())
            .with_env(self.service.env.iter().cloned())
            .with_sink(sink.clone())
    }

    /// Present when a secondary command or secondary options are configured
    pub fn secondary_spec(&self, sink: &LogSink) -> Option<ServiceSpec> {
        let command = self.secondary.command.as_deref().filter(|c| !c.is_empty());
        let options = self.secondary.options.as_deref().filter(|o| !o.is_empty());
        if command.is_none() && options.is_none() {
            return None;
        }

        let program = command.unwrap_or(&self.service.program);
        Some(
            ServiceSpec::new(program)
                .with_args(split_options(options.unwrap_or_default()))
                .with_env(self.service.env.iter().cloned())
                .with_sink(sink.clone()),
        )
    }

    pub fn checker_spec(&self) -> Option<CheckerSpec> {
        let command = self.checker.command.as_deref().filter(|c| !c.is_empty())?;
        Some(
            CheckerSpec::new(command, self.checker.result.clone())
                .with_options(self.checker.options.clone())
                .with_interval(self.checker.interval)
                .with_initial_delay(self.checker.delay)
                .with_timeout(self.checker.timeout),
        )
    }

    /// Controller over real OS processes
    pub fn controller(&self, sink: &LogSink) -> SupervisionController {
        let launcher: Arc<dyn crate::supervisor::ProcessLauncher> =
            Arc::new(crate::supervisor::OsLauncher);
        let primary = ProcessRunner::new(self.primary_spec(sink), launcher.clone());
        let secondary = self
            .secondary_spec(sink)
            .map(|spec| ProcessRunner::new(spec, launcher.clone()));

        SupervisionController::new(primary)
            .with_secondary(secondary)
            .with_checker(self.checker_spec().map(HealthChecker::os))
            .with_restart_delay(self.service.restart_delay)
            .with_mode(self.mode())
    }
}
