use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Stderr, plus a daily rolling file when `log_dir` is given. Keep the
/// returned guard alive for the life of the process or buffered file lines
/// are lost.
pub fn init_logging(verbose: bool, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let level = if verbose { "debug" } else { "info" };
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "deskpilot.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(filter());
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_filter(filter()),
        )
        .with(file_layer)
        .try_init();

    Ok(guard)
}

/// RFC 3339, or a local wall-clock time such as `2026-03-01 09:30`.
pub fn parse_time(text: &str) -> Result<DateTime<Local>> {
    let text = text.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(text) {
        return Ok(t.with_timezone(&Local));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Local
                .from_local_datetime(&naive)
                .earliest()
                .ok_or_else(|| anyhow!("'{text}' does not exist in the local time zone"));
        }
    }
    Err(anyhow!(
        "unrecognised time '{text}', expected RFC 3339 or YYYY-MM-DD HH:MM"
    ))
}
