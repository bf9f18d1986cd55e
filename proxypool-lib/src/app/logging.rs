use std::{io::IsTerminal, path::Path, sync::OnceLock};

use anyhow::anyhow;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, Layer, filter::filter_fn, prelude::*};

use crate::config::def::LogLevel;

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warning => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Silent => LevelFilter::OFF,
        }
    }
}

struct LoggingGuard {
    _file_appender: Option<tracing_appender::non_blocking::WorkerGuard>,
}

static LOGGING_GUARD: OnceLock<Option<LoggingGuard>> = OnceLock::new();

/// Installs the global subscriber. Later calls are no-ops.
pub fn setup_logging(level: LogLevel, cwd: &str, log_file: Option<String>) {
    LOGGING_GUARD.get_or_init(|| {
        setup_logging_inner(level, cwd, log_file).unwrap_or_else(|e| {
            eprintln!("failed to setup logging: {e}");
            None
        })
    });
}

fn default_directive(level: LogLevel) -> String {
    format!("warn,proxypool={level}")
}

fn setup_logging_inner(
    level: LogLevel,
    cwd: &str,
    log_file: Option<String>,
) -> anyhow::Result<Option<LoggingGuard>> {
    let default_log_level = default_directive(level);
    let filter = EnvFilter::try_from_default_env()
        .inspect(|f| {
            eprintln!("using env log level: {f}");
        })
        .inspect_err(|_| {
            if let Ok(log_level) = std::env::var("RUST_LOG") {
                eprintln!("failed to parse log level from environment: {log_level}");
                eprintln!("using default log level: {default_log_level}");
            }
        })
        .unwrap_or(EnvFilter::new(&default_log_level));

    let (appender, guard) = match log_file {
        Some(log_file) => {
            let path = Path::new(&log_file);
            let log_path = if path.is_absolute() {
                path.to_path_buf()
            } else {
                Path::new(cwd).join(path)
            };
            let writer = std::fs::File::options()
                .create(true)
                .append(true)
                .open(log_path)?;
            let (non_blocking, guard) =
                tracing_appender::non_blocking::NonBlockingBuilder::default()
                    .buffered_lines_limit(16_000)
                    .lossy(true)
                    .thread_name("proxypool-logger-appender")
                    .finish(writer);
            (Some(non_blocking), Some(guard))
        }
        None => (None, None),
    };

    let exclude = filter_fn(|metadata| {
        !metadata.target().contains("tokio")
            && !metadata.target().contains("runtime")
    });

    let log_to_file_layer = appender.map(|x| {
        tracing_subscriber::fmt::Layer::new()
            .with_ansi(false)
            .compact()
            .with_file(true)
            .with_line_number(true)
            .with_level(true)
            .with_writer(x)
            .with_filter(exclude.clone())
    });
    let log_stdout_layer = tracing_subscriber::fmt::Layer::new()
        .with_ansi(std::io::stdout().is_terminal())
        .compact()
        .with_target(cfg!(debug_assertions))
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
        .with_thread_ids(cfg!(debug_assertions))
        .with_writer(std::io::stdout)
        .with_filter(exclude);

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(log_to_file_layer)
        .with(log_stdout_layer);

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|x| anyhow!("setup logging error: {}", x))?;

    Ok(Some(LoggingGuard {
        _file_appender: guard,
    }))
}
