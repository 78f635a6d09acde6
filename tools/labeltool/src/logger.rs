use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use std::io::Write;

/// Environment variable selecting the maximum log level.
pub const LOG_ENV: &str = "LABELTOOL_LOG";

pub struct StderrLogger {
    max_level: LevelFilter,
}

impl StderrLogger {
    #[must_use]
    pub const fn new(max_level: LevelFilter) -> Self {
        Self { max_level }
    }

    /// Level from [`LOG_ENV`], `info` if unset or unparsable.
    #[must_use]
    pub fn from_env() -> Self {
        let level = std::env::var(LOG_ENV)
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(LevelFilter::Info);
        Self::new(level)
    }

    /// Install as the global logger. Call once.
    ///
    /// # Errors
    /// A logger is already installed.
    pub fn init(self) -> Result<(), SetLoggerError> {
        let max_level = self.max_level;
        log::set_boxed_logger(Box::new(self))?;
        log::set_max_level(max_level);
        Ok(())
    }
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        // Format: "[LEVEL] target: message"
        let _ = writeln!(
            std::io::stderr().lock(),
            "[{}] {}: {}",
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}
