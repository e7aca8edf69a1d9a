//! Tracing setup shared by the sync service binary and tests.
//!
//! Production-like environments write JSON lines to daily rotated files, with the service name
//! and instance id injected as top-level fields. Development writes pretty console output.

use snapsync_config::Environment;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::io::{self, Write};
use std::panic::PanicHookInfo;
use std::sync::{Once, OnceLock};
use thiserror::Error;
use tracing::subscriber::{SetGlobalDefaultError, set_global_default};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{self, InitError},
};
use tracing_log::{LogTracer, log_tracer::SetLoggerError};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{EnvFilter, FmtSubscriber, Registry, fmt, layer::SubscriberExt};

const SERVICE_KEY_IN_LOG: &str = "service";
const INSTANCE_KEY_IN_LOG: &str = "instance";

const LOG_DIR: &str = "logs";
const MAX_LOG_FILES: usize = 5;

#[derive(Debug, Error)]
pub enum TracingError {
    #[error("failed to build rolling file appender: {0}")]
    InitAppender(#[from] InitError),

    #[error("failed to init log tracer: {0}")]
    InitLogTracer(#[from] SetLoggerError),

    #[error("failed to set global default subscriber: {0}")]
    SetGlobalDefault(#[from] SetGlobalDefaultError),

    #[error("an io error occurred: {0}")]
    Io(#[from] io::Error),
}

/// Keeps buffered file logs alive until dropped.
#[must_use]
pub enum LogFlusher {
    Flusher(WorkerGuard),
    NullFlusher,
}

static SERVICE_NAME: OnceLock<String> = OnceLock::new();
static INSTANCE_ID: OnceLock<String> = OnceLock::new();

static INIT_TEST_TRACING: Once = Once::new();

/// Enables console tracing in tests when `ENABLE_TRACING` is set.
///
/// ```bash
/// ENABLE_TRACING=1 cargo test retries_then_succeeds
/// ```
pub fn init_test_tracing() {
    INIT_TEST_TRACING.call_once(|| {
        if std::env::var("ENABLE_TRACING").is_ok() {
            Environment::Dev.set();
            if let Ok(flusher) = init_tracing("test") {
                std::mem::forget(flusher);
            }
        }
    });
}

/// Initializes tracing for `app_name`, using `HOSTNAME` as the instance id when present.
pub fn init_tracing(app_name: &str) -> Result<LogFlusher, TracingError> {
    init_tracing_with_instance(app_name, std::env::var("HOSTNAME").ok())
}

/// Initializes tracing with an explicit instance id injected into every JSON log line.
pub fn init_tracing_with_instance(
    app_name: &str,
    instance: Option<String>,
) -> Result<LogFlusher, TracingError> {
    let _ = SERVICE_NAME.set(app_name.to_owned());
    if let Some(instance) = instance {
        let _ = INSTANCE_ID.set(instance);
    }

    // Route records emitted through the `log` facade by dependencies.
    LogTracer::init()?;

    let is_prod = Environment::load()?.is_prod();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let log_flusher = if is_prod {
        configure_prod_tracing(filter, app_name)?
    } else {
        configure_dev_tracing(filter)?
    };

    set_tracing_panic_hook();

    Ok(log_flusher)
}

/// Adds the service and instance fields to a JSON log line that lacks them.
///
/// Returns `None` when the line is not a JSON object or nothing was added.
fn inject_top_level_fields(
    line: &str,
    service: Option<&str>,
    instance: Option<&str>,
) -> Option<String> {
    let serde_json::Value::Object(mut map) = serde_json::from_str::<serde_json::Value>(line).ok()? else {
        return None;
    };

    let mut modified = false;
    for (key, value) in [(SERVICE_KEY_IN_LOG, service), (INSTANCE_KEY_IN_LOG, instance)] {
        if let Some(value) = value
            && !map.contains_key(key)
        {
            map.insert(key.to_owned(), serde_json::Value::String(value.to_owned()));
            modified = true;
        }
    }

    if !modified {
        return None;
    }

    let mut output = serde_json::to_string(&map).ok()?;
    if line.ends_with('\n') {
        output.push('\n');
    }

    Some(output)
}

struct FieldInjectingWriter<W> {
    inner: W,
}

impl<W: Write> Write for FieldInjectingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let injected = std::str::from_utf8(buf).ok().and_then(|line| {
            inject_top_level_fields(
                line,
                SERVICE_NAME.get().map(String::as_str),
                INSTANCE_ID.get().map(String::as_str),
            )
        });

        match injected {
            Some(output) => {
                self.inner.write_all(output.as_bytes())?;
                Ok(buf.len())
            }
            None => self.inner.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

fn configure_prod_tracing(filter: EnvFilter, app_name: &str) -> Result<LogFlusher, TracingError> {
    let file_appender = rolling::Builder::new()
        .filename_prefix(app_name)
        .filename_suffix("log")
        .rotation(rolling::Rotation::DAILY)
        .max_log_files(MAX_LOG_FILES)
        .build(LOG_DIR)?;

    let (file_appender, guard) = tracing_appender::non_blocking(file_appender);

    let format = fmt::format()
        .with_level(true)
        .with_ansi(false)
        .with_target(false);

    let subscriber = Registry::default().with(filter).with(
        fmt::layer()
            .event_format(format)
            .with_writer(move || FieldInjectingWriter {
                inner: file_appender.make_writer(),
            })
            .json()
            .with_current_span(true)
            .with_span_list(true),
    );

    set_global_default(subscriber)?;

    Ok(LogFlusher::Flusher(guard))
}

fn configure_dev_tracing(filter: EnvFilter) -> Result<LogFlusher, TracingError> {
    let format = fmt::format()
        .with_level(true)
        .with_ansi(true)
        .pretty()
        .with_line_number(false)
        .with_file(false)
        .with_target(true);

    let subscriber = FmtSubscriber::builder()
        .event_format(format)
        .with_env_filter(filter)
        .finish();

    set_global_default(subscriber)?;

    Ok(LogFlusher::NullFlusher)
}

fn set_tracing_panic_hook() {
    let prev_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        panic_hook(info);
        prev_hook(info);
    }));
}

/// Logs panics through tracing so they reach the log files in production.
fn panic_hook(panic_info: &PanicHookInfo) {
    let backtrace = Backtrace::capture();
    let (backtrace, note) = match backtrace.status() {
        BacktraceStatus::Captured => (Some(backtrace), None),
        BacktraceStatus::Disabled => (
            None,
            Some("run with RUST_BACKTRACE=1 to display backtraces"),
        ),
        _ => (None, Some("backtraces are not available")),
    };

    let payload = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
        s
    } else {
        "unknown panic payload"
    };

    let location = panic_info.location().map(|location| location.to_string());

    tracing::error!(
        panic.payload = payload,
        panic.location = location,
        panic.backtrace = backtrace.map(tracing::field::display),
        panic.note = note,
        "a panic occurred",
    );
}
