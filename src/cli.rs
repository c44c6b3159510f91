use clap::Parser;
use config::Value;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "servicemon")]
#[command(version = "v0.1.0")]
#[command(
    about = "Run a command, restart it when it exits, fail over to a secondary when it is unhealthy",
    long_about = None
)]
pub struct Cli {
    /// Verbose logging to stdout
    #[arg(short, long)]
    pub verbose: bool,

    /// Work in foreground
    #[arg(short, long)]
    pub foreground: bool,

    /// Restart after instance exit
    #[arg(short, long)]
    pub restart: bool,

    /// Restart delay, example: 1s
    #[arg(short = 'd', long)]
    pub restart_delay: Option<String>,

    /// Output file for service output and logs
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Additional env for services (KEY=VALUE), repeatable
    #[arg(short, long = "env")]
    pub env: Vec<String>,

    /// Command to check if the service is healthy; the service is stopped when it is not
    #[arg(short, long)]
    pub checker: Option<String>,

    /// Space-delimited checker options
    #[arg(long)]
    pub checker_options: Option<String>,

    /// Checker interval, example: 1s
    #[arg(short, long)]
    pub interval: Option<String>,

    /// Checker delay after service start, example: 1s
    #[arg(short = 'D', long)]
    pub delay: Option<String>,

    /// Healthy checker result (exact stdout)
    #[arg(short = 'R', long)]
    pub result: Option<String>,

    /// Upper bound for a single check, example: 5s
    #[arg(long)]
    pub checker_timeout: Option<String>,

    /// Set open files limit
    #[arg(short, long)]
    pub limit: Option<u64>,

    /// Secondary command, started when the primary service is not healthy
    #[arg(short, long = "secondary-cmd")]
    pub secondary_cmd: Option<String>,

    /// Secondary options; with no secondary command they apply to the primary command
    #[arg(short = 'O', long = "secondary-options", allow_hyphen_values = true)]
    pub secondary_options: Option<String>,

    /// Config file path (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Primary command
    pub command: Option<String>,

    /// Primary command options
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub options: Vec<String>,
}

impl Cli {
    /// Configuration overrides for every flag given on the command line
    pub fn overrides(&self) -> Vec<(&'static str, Value)> {
        let mut overrides: Vec<(&'static str, Value)> = Vec::new();

        if let Some(command) = &self.command {
            overrides.push(("service.program", command.clone().into()));
            overrides.push(("service.args", self.options.clone().into()));
        }
        if !self.env.is_empty() {
            overrides.push(("service.env", self.env.clone().into()));
        }

        let flags = [
            ("service.verbose", self.verbose),
            ("service.foreground", self.foreground),
            ("service.restart", self.restart),
        ];
        for (key, set) in flags {
            if set {
                overrides.push((key, true.into()));
            }
        }

        let strings = [
            ("service.restart_delay", &self.restart_delay),
            ("checker.command", &self.checker),
            ("checker.options", &self.checker_options),
            ("checker.interval", &self.interval),
            ("checker.delay", &self.delay),
            ("checker.result", &self.result),
            ("checker.timeout", &self.checker_timeout),
            ("secondary.command", &self.secondary_cmd),
            ("secondary.options", &self.secondary_options),
        ];
        for (key, value) in strings {
            if let Some(value) = value {
                overrides.push((key, value.clone().into()));
            }
        }

        if let Some(output) = &self.output {
            overrides.push(("service.output", output.display().to_string().into()));
        }
        if let Some(limit) = self.limit {
            overrides.push(("service.open_files_limit", (limit as i64).into()));
        }

        overrides
    }
}
