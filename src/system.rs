//! Process-level setup around the supervision core: output file, open-file
//! limit and detaching into the background.

use std::fs::OpenOptions;
use std::path::Path;
use tracing::{info, warn};

use crate::error::Result;
use crate::supervisor::LogSink;

/// Open `output` for appending (created with mode 0660), or inherit stdio when unset.
pub fn open_log_sink(output: Option<&Path>) -> Result<LogSink> {
    let Some(path) = output else {
        return Ok(LogSink::Inherit);
    };

    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o660);
    }
    Ok(LogSink::file(options.open(path)?))
}

/// Raise the soft open-files limit to `limit`, lifting the hard limit too if needed.
/// Failures are logged and otherwise ignored.
#[cfg(unix)]
pub fn raise_open_files_limit(limit: u64) {
    use nix::libc::rlim_t;
    use nix::sys::resource::{getrlimit, setrlimit, Resource};

    let (soft, hard) = match getrlimit(Resource::RLIMIT_NOFILE) {
        Ok(limits) => limits,
        Err(e) => {
            warn!("get rlimit error: {}", e);
            return;
        }
    };
    info!("program number of open files: cur={}, max={}", soft, hard);

    let soft = limit as rlim_t;
    let hard = hard.max(soft);
    if let Err(e) = setrlimit(Resource::RLIMIT_NOFILE, soft, hard) {
        warn!("set rlimit error: {}", e);
    }
    info!("open file limit {}", limit);
}

#[cfg(not(unix))]
pub fn raise_open_files_limit(limit: u64) {
    warn!("open file limit {} not supported on this platform", limit);
}

/// Detach from the controlling terminal, keeping the working directory.
///
/// Must run before the async runtime and any logging threads are started.
#[cfg(target_os = "linux")]
pub fn daemonize() -> Result<()> {
    nix::unistd::daemon(true, false).map_err(std::io::Error::from)?;
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn daemonize() -> Result<()> {
    eprintln!("background mode is not supported on this platform, running in foreground");
    Ok(())
}
