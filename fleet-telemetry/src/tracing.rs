use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::panic::PanicHookInfo;
use std::path::PathBuf;
use std::sync::Once;

use fleet_config::Environment;
use thiserror::Error;
use tracing::subscriber::{SetGlobalDefaultError, set_global_default};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{self, InitError};
use tracing_log::{LogTracer, log_tracer::SetLoggerError};
use tracing_subscriber::{EnvFilter, FmtSubscriber, Registry, fmt, layer::SubscriberExt};

/// Overrides the directory of the rolling log files.
const LOG_DIR_ENV_NAME: &str = "FLEET_LOG_DIR";

const DEFAULT_LOG_DIR: &str = "logs";

/// Number of daily log files kept on disk.
const MAX_LOG_FILES: usize = 7;

/// Used when `RUST_LOG` is unset. The kube client stack logs every request at `debug` and
/// connection churn at `info`, which drowns the cluster events.
const DEFAULT_FILTER: &str = "info,kube_client=warn,tower=warn,hyper_util=warn,rustls=warn";

#[derive(Debug, Error)]
pub enum TracingError {
    #[error("failed to build rolling file appender: {0}")]
    InitAppender(#[from] InitError),

    #[error("failed to init log tracer: {0}")]
    InitLogTracer(#[from] SetLoggerError),

    #[error("failed to set global default subscriber: {0}")]
    SetGlobalDefault(#[from] SetGlobalDefaultError),

    #[error("failed to determine the environment: {0}")]
    Environment(#[from] std::io::Error),
}

/// Flushes buffered log lines when dropped. Keep it alive in `main`.
#[must_use]
pub struct LogFlusher {
    _guard: Option<WorkerGuard>,
}

/// Where log records go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogOutput {
    /// JSON lines in daily rolling files, for environments read by log shippers.
    JsonFiles,
    /// Human-readable output on the terminal.
    Console,
}

impl LogOutput {
    fn for_environment(environment: Environment) -> Self {
        if environment.is_prod() {
            LogOutput::JsonFiles
        } else {
            LogOutput::Console
        }
    }
}

static INIT_TEST_TRACING: Once = Once::new();

/// Enables tracing output in tests when `ENABLE_TRACING` is set:
///
/// ```bash
/// ENABLE_TRACING=1 cargo test cluster_can_be_registered
/// ```
pub fn init_test_tracing() {
    INIT_TEST_TRACING.call_once(|| {
        if std::env::var("ENABLE_TRACING").is_err() {
            return;
        }

        let flusher = LogTracer::init()
            .map_err(TracingError::from)
            .and_then(|()| install_console_subscriber(env_filter()));
        if let Err(err) = flusher {
            eprintln!("failed to initialize test tracing: {err}");
        }
    });
}

/// Installs the global subscriber for `app_name` and forwards `log` records and panics to it.
///
/// Production writes JSON to `{FLEET_LOG_DIR or logs}/{app_name}.*.log`; other environments log
/// to the terminal. `RUST_LOG` overrides the default filter.
pub fn init_tracing(app_name: &str) -> Result<LogFlusher, TracingError> {
    LogTracer::init()?;

    let filter = env_filter();
    let flusher = match LogOutput::for_environment(Environment::load()?) {
        LogOutput::JsonFiles => install_json_file_subscriber(filter, app_name)?,
        LogOutput::Console => install_console_subscriber(filter)?,
    };

    install_panic_hook();

    Ok(flusher)
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

fn log_dir() -> PathBuf {
    std::env::var_os(LOG_DIR_ENV_NAME)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR))
}

fn install_json_file_subscriber(
    filter: EnvFilter,
    app_name: &str,
) -> Result<LogFlusher, TracingError> {
    let appender = rolling::Builder::new()
        .filename_prefix(app_name)
        .filename_suffix("log")
        .rotation(rolling::Rotation::DAILY)
        .max_log_files(MAX_LOG_FILES)
        .build(log_dir())?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let subscriber = Registry::default().with(filter).with(
        fmt::layer()
            .json()
            .with_ansi(false)
            .with_target(false)
            .with_current_span(true)
            .with_span_list(true)
            .with_writer(writer),
    );
    set_global_default(subscriber)?;

    Ok(LogFlusher {
        _guard: Some(guard),
    })
}

fn install_console_subscriber(filter: EnvFilter) -> Result<LogFlusher, TracingError> {
    let subscriber = FmtSubscriber::builder()
        .pretty()
        .with_ansi(true)
        .with_file(false)
        .with_line_number(false)
        .with_target(true)
        .with_env_filter(filter)
        .finish();
    set_global_default(subscriber)?;

    Ok(LogFlusher { _guard: None })
}

/// Reports panics as `error` events, then defers to the previously installed hook.
fn install_panic_hook() {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        log_panic(info);
        previous(info);
    }));
}

fn log_panic(info: &PanicHookInfo) {
    let backtrace = Backtrace::capture();
    let backtrace = match backtrace.status() {
        BacktraceStatus::Captured => Some(backtrace.to_string()),
        _ => None,
    };

    tracing::error!(
        panic.payload = panic_message(info.payload()),
        panic.location = info.location().map(|location| location.to_string()),
        panic.backtrace = backtrace,
        "a panic occurred",
    );
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic payload")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_production_logs_to_files() {
        assert_eq!(
            LogOutput::for_environment(Environment::Prod),
            LogOutput::JsonFiles
        );
        assert_eq!(
            LogOutput::for_environment(Environment::Dev),
            LogOutput::Console
        );
    }

    #[test]
    fn panic_messages_are_extracted_from_both_payload_kinds() {
        let borrowed: Box<dyn Any + Send> = Box::new("static message");
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned message"));
        let other: Box<dyn Any + Send> = Box::new(42u8);

        assert_eq!(panic_message(borrowed.as_ref()), "static message");
        assert_eq!(panic_message(owned.as_ref()), "owned message");
        assert_eq!(panic_message(other.as_ref()), "unknown panic payload");
    }
}
