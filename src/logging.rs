use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::{Layered, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::config::LoggingConfig;
use crate::supervisor::LogSink;

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Subscriber built by [`build_subscriber`]
pub type LogSubscriber = Layered<BoxedLayer, Registry>;

/// Install the global subscriber.
///
/// With a file sink, supervisor logs share the file with the service output
/// through a non-blocking writer; keep the returned guard alive until exit
/// so buffered lines are flushed. Without one, logs go to stdout when
/// `verbose` and to stderr otherwise.
pub fn init_logging(
    config: &LoggingConfig,
    sink: &LogSink,
    verbose: bool,
) -> anyhow::Result<Option<WorkerGuard>> {
    let (subscriber, guard) = build_subscriber(config, sink, verbose)?;
    subscriber
        .try_init()
        .context("installing tracing subscriber")?;
    Ok(guard)
}

/// Build the subscriber without installing it.
pub fn build_subscriber(
    config: &LoggingConfig,
    sink: &LogSink,
    verbose: bool,
) -> anyhow::Result<(LogSubscriber, Option<WorkerGuard>)> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)
            .with_context(|| format!("invalid log level {:?}", config.level))?,
    };

    let (writer, guard, ansi) = match sink {
        LogSink::File(file) => {
            let file = file.try_clone().context("duplicating log file handle")?;
            let (non_blocking, guard) = tracing_appender::non_blocking(file);
            (BoxMakeWriter::new(non_blocking), Some(guard), false)
        }
        LogSink::Inherit if verbose => (BoxMakeWriter::new(std::io::stdout), None, true),
        LogSink::Inherit => (BoxMakeWriter::new(std::io::stderr), None, true),
    };

    let fmt = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(ansi)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    let layer: BoxedLayer = if config.json {
        fmt.json().with_filter(filter).boxed()
    } else {
        fmt.with_filter(filter).boxed()
    };

    Ok((tracing_subscriber::registry().with(layer), guard))
}
