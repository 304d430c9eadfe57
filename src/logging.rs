//! Log attachment: a per-worker file under the shared root plus stderr.

use std::fmt;

use chrono::Local;
use tracing::{Event, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

use crate::config::Verbosity;
use crate::error::ConfigError;
use crate::identity::WorkerIdentity;
use crate::workspace::Workspace;

/// Timestamp layout of log-file lines.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S,%3f";

impl Verbosity {
    /// Level filter applied to the log file.
    pub fn level_filter(self) -> LevelFilter {
        match self {
            Self::Silent => LevelFilter::OFF,
            Self::Debug => LevelFilter::DEBUG,
            Self::Info => LevelFilter::INFO,
        }
    }
}

/// Formats events as `<timestamp> - <message>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DashFormat;

impl<S, N> FormatEvent<S, N> for DashFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        write!(writer, "{} - ", Local::now().format(TIMESTAMP_FORMAT))?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Attach the worker's log file `<root>/<identity>.log` and a stderr layer.
///
/// The returned guard flushes the file writer when dropped; keep it alive
/// for the life of the process.
pub fn attach(
    workspace: &Workspace,
    identity: &WorkerIdentity,
    verbosity: Verbosity,
) -> Result<WorkerGuard, ConfigError> {
    let appender = tracing_appender::rolling::never(workspace.root(), identity.log_name());
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .event_format(DashFormat)
        .with_filter(verbosity.level_filter());

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        );

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .map_err(|e| ConfigError::Logging(e.to_string()))?;

    Ok(guard)
}
