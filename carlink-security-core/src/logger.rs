//! Bridge from the `log` facade to a logger supplied by the host application.

use std::sync::{Arc, OnceLock};

/// Receives log lines emitted by the security module.
///
/// Implemented on the host side (Kotlin, Swift) and installed once with
/// [`set_logger`]. Messages never contain key material or certificate
/// contents; handles, identities and fingerprints are logged.
///
/// ```rust
/// use carlink_security_core::{LogLevel, Logger};
///
/// struct Stdout;
///
/// impl Logger for Stdout {
///     fn log(&self, level: LogLevel, message: String) {
///         println!("[{level:?}] {message}");
///     }
/// }
/// ```
///
/// ## Kotlin
///
/// ```kotlin
/// object SecurityLog : Logger {
///     override fun log(level: LogLevel, message: String) {
///         Log.println(level.toPriority(), "CarlinkSecurity", message)
///     }
/// }
///
/// setLogger(SecurityLog) // once, from Application.onCreate
/// ```
#[uniffi::export(with_foreign)]
pub trait Logger: Sync + Send {
    /// Records `message` at `level`.
    fn log(&self, level: LogLevel, message: String);
}

/// Severity of a forwarded log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum LogLevel {
    /// Very detailed tracing.
    Trace,
    /// Debugging information.
    Debug,
    /// Lifecycle events such as context creation and release.
    Info,
    /// Rejected calls.
    Warn,
    /// Failures the host should surface.
    Error,
}

impl From<log::Level> for LogLevel {
    fn from(level: log::Level) -> Self {
        match level {
            log::Level::Error => Self::Error,
            log::Level::Warn => Self::Warn,
            log::Level::Info => Self::Info,
            log::Level::Debug => Self::Debug,
            log::Level::Trace => Self::Trace,
        }
    }
}

static HOST_LOGGER: OnceLock<Arc<dyn Logger>> = OnceLock::new();

/// `log::Log` implementation forwarding to [`HOST_LOGGER`].
struct ForeignLogger;

/// Debug and trace output of other crates (uniffi scaffolding, dependencies)
/// is dropped.
fn is_forwarded(metadata: &log::Metadata) -> bool {
    metadata.level() <= log::Level::Info || metadata.target().starts_with("carlink_security")
}

impl log::Log for ForeignLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        is_forwarded(metadata)
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        if let Some(logger) = HOST_LOGGER.get() {
            logger.log(record.level().into(), record.args().to_string());
        } else {
            eprintln!("[carlink-security] {}", record.args());
        }
    }

    fn flush(&self) {}
}

/// Installs `logger` as the destination of every module log line.
///
/// Only the first call takes effect; later calls are ignored, as is the call
/// when another `log` backend is already registered in the process.
#[uniffi::export]
pub fn set_logger(logger: Arc<dyn Logger>) {
    if HOST_LOGGER.set(logger).is_err() {
        eprintln!("[carlink-security] logger already set");
        return;
    }
    if let Err(err) = install() {
        eprintln!("[carlink-security] failed to install logger: {err}");
    }
}

fn install() -> Result<(), log::SetLoggerError> {
    static FORWARDER: ForeignLogger = ForeignLogger;
    log::set_logger(&FORWARDER)?;
    log::set_max_level(log::LevelFilter::Trace);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Capture(Mutex<Vec<(LogLevel, String)>>);

    impl Logger for Capture {
        fn log(&self, level: LogLevel, message: String) {
            self.0.lock().expect("capture").push((level, message));
        }
    }

    #[test]
    fn test_levels_map_one_to_one() {
        assert_eq!(LogLevel::from(log::Level::Error), LogLevel::Error);
        assert_eq!(LogLevel::from(log::Level::Warn), LogLevel::Warn);
        assert_eq!(LogLevel::from(log::Level::Info), LogLevel::Info);
        assert_eq!(LogLevel::from(log::Level::Debug), LogLevel::Debug);
        assert_eq!(LogLevel::from(log::Level::Trace), LogLevel::Trace);
    }

    #[test]
    fn test_foreign_debug_output_is_filtered() {
        let own = log::Metadata::builder()
            .level(log::Level::Debug)
            .target("carlink_security_core::module")
            .build();
        let foreign = log::Metadata::builder()
            .level(log::Level::Debug)
            .target("uniffi_core")
            .build();
        let foreign_warning = log::Metadata::builder()
            .level(log::Level::Warn)
            .target("uniffi_core")
            .build();
        assert!(is_forwarded(&own));
        assert!(!is_forwarded(&foreign));
        assert!(is_forwarded(&foreign_warning));
    }

    #[test]
    fn test_set_logger_forwards_records() {
        let capture = Arc::new(Capture::default());
        set_logger(capture.clone());
        log::info!(target: "carlink_security_core::tests", "context created");

        let lines = capture.0.lock().expect("capture");
        assert!(lines
            .iter()
            .any(|(level, message)| *level == LogLevel::Info && message == "context created"));
    }
}
