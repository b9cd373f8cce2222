use std::sync::Arc;

/// Log levels for the injected event sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Error messages
    Error,
    /// Warning messages
    Warn,
    /// Informational messages
    Info,
    /// Debug messages
    Debug,
}

impl LogLevel {
    /// Convert log level to string
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }
}

/// Type alias for log sink functions
///
/// The sink receives a log level and one line per significant event:
/// lifecycle transitions, node additions and failures, parse statistics,
/// write failures and runtime metadata.
pub type LogSink = Box<dyn Fn(LogLevel, &str) + Send + Sync>;

/// Logger that forwards events to an injected sink
#[derive(Clone)]
pub struct BridgeLogger {
    callback: Option<Arc<LogSink>>,
    min_level: LogLevel,
}

impl BridgeLogger {
    /// Create a new logger over a sink
    pub fn new(callback: Option<LogSink>, min_level: LogLevel) -> Self {
        Self {
            callback: callback.map(Arc::new),
            min_level,
        }
    }

    /// Create a logger with default console output
    pub fn console() -> Self {
        let callback: LogSink = Box::new(|level, message| {
            let timestamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f");
            match level {
                LogLevel::Error => eprintln!("[{}] ERROR: {}", timestamp, message),
                LogLevel::Warn => eprintln!("[{}] WARN: {}", timestamp, message),
                LogLevel::Info => println!("[{}] INFO: {}", timestamp, message),
                LogLevel::Debug => println!("[{}] DEBUG: {}", timestamp, message),
            }
        });
        Self::new(Some(callback), LogLevel::Info)
    }

    /// Create a logger that outputs nothing (disabled)
    pub fn disabled() -> Self {
        Self::new(None, LogLevel::Error)
    }

    /// Log a message at the specified level
    pub fn log(&self, level: LogLevel, message: &str) {
        if self.should_log(level) {
            if let Some(ref callback) = self.callback {
                callback(level, message);
            }
        }
    }

    /// Log an error message
    pub fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }

    /// Log a warning message
    pub fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message);
    }

    /// Log an info message
    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    /// Log a debug message
    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    /// Check if a message at the given level should be logged
    fn should_log(&self, level: LogLevel) -> bool {
        self.callback.is_some() && level as u8 <= self.min_level as u8
    }
}

impl Default for BridgeLogger {
    fn default() -> Self {
        Self::disabled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_sink_receives_events() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let captured = lines.clone();
        let sink: LogSink = Box::new(move |level, message| {
            captured
                .lock()
                .unwrap()
                .push(format!("{}: {}", level.as_str(), message));
        });
        let logger = BridgeLogger::new(Some(sink), LogLevel::Info);

        logger.info("server started");
        logger.warn("node skipped");
        logger.debug("not captured at info level");

        let lines = lines.lock().unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("server started"));
        assert!(lines[1].starts_with("WARN"));
    }

    #[test]
    fn test_disabled_logger_drops_everything() {
        let logger = BridgeLogger::disabled();
        // Nothing to assert beyond not panicking
        logger.error("dropped");
        logger.info("dropped");
    }
}
