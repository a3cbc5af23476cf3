//! Structured diagnostics threaded through the engine by constructor
//! injection -- no component reaches for a process-wide logger.
//!
//! Log levels follow conventional severity: `debug` for per-event
//! correlation detail, `info` for lifecycle transitions, `warn` for
//! recovered failures, `error` only for conditions that prevent the
//! session from continuing to capture.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

/// A single structured log record.
pub struct Record<'a> {
    pub level: Level,
    pub message: &'a str,
    pub fields: &'a [(&'a str, &'a str)],
}

/// Diagnostic sink. Components hold an `Arc<dyn Logger>` (or omit one
/// entirely) rather than calling a global logging facade.
pub trait Logger: Send + Sync {
    fn log(&self, record: Record<'_>);

    fn debug(&self, message: &str, fields: &[(&str, &str)]) {
        self.log(Record {
            level: Level::Debug,
            message,
            fields,
        });
    }

    fn info(&self, message: &str, fields: &[(&str, &str)]) {
        self.log(Record {
            level: Level::Info,
            message,
            fields,
        });
    }

    fn warn(&self, message: &str, fields: &[(&str, &str)]) {
        self.log(Record {
            level: Level::Warn,
            message,
            fields,
        });
    }

    fn error(&self, message: &str, fields: &[(&str, &str)]) {
        self.log(Record {
            level: Level::Error,
            message,
            fields,
        });
    }
}

/// Default logger: forwards records to `tracing`, carrying the structured
/// fields through as `tracing` key-value pairs rather than a formatted
/// string.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, record: Record<'_>) {
        match record.level {
            Level::Debug => {
                tracing::debug!(fields = ?record.fields, "{}", record.message);
            }
            Level::Info => {
                tracing::info!(fields = ?record.fields, "{}", record.message);
            }
            Level::Warn => {
                tracing::warn!(fields = ?record.fields, "{}", record.message);
            }
            Level::Error => {
                tracing::error!(fields = ?record.fields, "{}", record.message);
            }
        }
    }
}

/// Handle threaded through session components. `None` means run silently --
/// not "fall back to a global logger".
pub type LoggerHandle = Option<std::sync::Arc<dyn Logger>>;

pub(crate) fn log(logger: &LoggerHandle, level: Level, message: &str, fields: &[(&str, &str)]) {
    if let Some(logger) = logger {
        logger.log(Record {
            level,
            message,
            fields,
        });
    }
}
