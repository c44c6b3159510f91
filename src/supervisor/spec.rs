//! Immutable inputs handed to the supervision core.

use std::fs::File;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

/// Destination for a supervised service's combined stdout/stderr.
///
/// The sink is shared by every run and never closed by the core; each spawn
/// duplicates the underlying descriptor.
#[derive(Debug, Clone, Default)]
pub enum LogSink {
    /// Services write to the supervisor's own stdout/stderr
    #[default]
    Inherit,
    /// Services append to an already opened file
    File(Arc<File>),
}

impl LogSink {
    pub fn file(file: File) -> Self {
        Self::File(Arc::new(file))
    }

    pub(crate) fn stdout(&self) -> std::io::Result<Stdio> {
        match self {
            Self::Inherit => Ok(Stdio::inherit()),
            Self::File(file) => Ok(Stdio::from(file.try_clone()?)),
        }
    }

    pub(crate) fn stderr(&self) -> std::io::Result<Stdio> {
        // Same destination as stdout; a second handle keeps the streams independent.
        self.stdout()
    }
}

/// One supervised command (primary or secondary role)
#[derive(Debug, Clone)]
pub struct ServiceSpec {
    /// Executable path or name looked up on PATH
    pub program: String,
    /// Arguments, in order
    pub args: Vec<String>,
    /// Extra `KEY=VALUE` entries appended to the inherited environment
    pub extra_env: Vec<String>,
    /// Where stdout and stderr go
    pub sink: LogSink,
}

impl ServiceSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            extra_env: Vec::new(),
            sink: LogSink::Inherit,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env<I, S>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_env = entries.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_sink(mut self, sink: LogSink) -> Self {
        self.sink = sink;
        self
    }
}

/// Health checker command and its polling schedule
#[derive(Debug, Clone)]
pub struct CheckerSpec {
    /// Checker executable name
    pub program: String,
    /// Space-delimited options; no quoting support
    pub options: String,
    /// Exact stdout a healthy check must produce
    pub expected: String,
    /// Pause between consecutive healthy checks
    pub interval: Duration,
    /// Pause between service start and the first check
    pub initial_delay: Duration,
    /// Upper bound for a single check; `None` waits indefinitely
    pub timeout: Option<Duration>,
}

impl CheckerSpec {
    pub fn new(program: impl Into<String>, expected: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            options: String::new(),
            expected: expected.into(),
            interval: Duration::from_secs(1),
            initial_delay: Duration::ZERO,
            timeout: None,
        }
    }

    pub fn with_options(mut self, options: impl Into<String>) -> Self {
        self.options = options.into();
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Options split on whitespace, as passed to the checker.
    pub fn args(&self) -> Vec<String> {
        split_options(&self.options)
    }
}

/// Split an option string on whitespace. Quoted segments are not recognized.
pub fn split_options(options: &str) -> Vec<String> {
    options.split_whitespace().map(str::to_string).collect()
}
