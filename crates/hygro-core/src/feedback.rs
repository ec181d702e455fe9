//! Status LED and the rotating text log
//!
//! Feedback is purely observational. Storage or pin failures are reported on
//! the console and otherwise ignored, they never change what the loop does.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::Write;

use embedded_hal::digital::OutputPin;
use embedded_sdmmc::TimeSource;
use log::{Level, LevelFilter};
use thiserror_no_std::Error;

use crate::config::LogConfig;
use crate::time::iso8601;

const RESET_BANNER: &str = "=== log reset ===\n";

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStoreError {
    #[error("log storage unavailable: {0}")]
    Unavailable(&'static str),
    #[error("log write failed: {0}")]
    Write(&'static str),
}

/// Append-only byte storage for log lines.
pub trait LogStore {
    /// Current size in bytes. A missing file is empty.
    fn len(&mut self) -> Result<u32, LogStoreError>;

    fn append(&mut self, bytes: &[u8]) -> Result<(), LogStoreError>;

    /// Drop all content.
    fn truncate(&mut self) -> Result<(), LogStoreError>;
}

/// Keeps the log in RAM. Handy when no card is fitted, and in tests.
#[derive(Debug, Default)]
pub struct MemoryLogStore {
    bytes: Vec<u8>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> &str {
        core::str::from_utf8(&self.bytes).unwrap_or("")
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.contents().lines()
    }
}

impl LogStore for MemoryLogStore {
    fn len(&mut self) -> Result<u32, LogStoreError> {
        Ok(self.bytes.len() as u32)
    }

    fn append(&mut self, bytes: &[u8]) -> Result<(), LogStoreError> {
        self.bytes.extend_from_slice(bytes);
        Ok(())
    }

    fn truncate(&mut self) -> Result<(), LogStoreError> {
        self.bytes.clear();
        Ok(())
    }
}

/// Formats lines and keeps a [`LogStore`] under its size limit.
///
/// The size check runs before each append, so the store may overshoot the
/// limit by at most one line before it is reset.
pub struct RotatingLog<S> {
    store: S,
    max_bytes: u32,
    level: LevelFilter,
    timestamps: bool,
}

impl<S: LogStore> RotatingLog<S> {
    pub fn new(store: S, config: &LogConfig<'_>) -> Self {
        Self {
            store,
            max_bytes: config.max_bytes,
            level: config.level,
            timestamps: config.timestamps,
        }
    }

    pub fn enabled(&self, level: Level) -> bool {
        level <= self.level
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Writes `[timestamp] [LEVEL] message`. Lines below the configured
    /// level are dropped and report success.
    pub fn write_line(
        &mut self,
        timestamp: Option<&str>,
        level: Level,
        message: &str,
    ) -> Result<(), LogStoreError> {
        if !self.enabled(level) {
            return Ok(());
        }

        if self.store.len()? > self.max_bytes {
            self.store.truncate()?;
            self.store.append(RESET_BANNER.as_bytes())?;
        }

        let mut line = String::with_capacity(message.len() + 40);
        if self.timestamps
            && let Some(ts) = timestamp
        {
            let _ = write!(line, "[{ts}] ");
        }
        let _ = writeln!(line, "[{level}] {message}");
        self.store.append(line.as_bytes())
    }
}

/// Where the loop reports progress: a log line sink and a status indicator.
pub trait FeedbackSink {
    fn log(&mut self, level: Level, message: &str);

    /// LED on for idle/success, off while sampling or after a failure.
    fn indicate(&mut self, on: bool);

    fn info(&mut self, message: &str) {
        self.log(Level::Info, message);
    }

    fn warn(&mut self, message: &str) {
        self.log(Level::Warn, message);
    }

    fn error(&mut self, message: &str) {
        self.log(Level::Error, message);
    }
}

/// LED plus rotating log, with every line mirrored to the console logger.
pub struct Feedback<L, S, C> {
    led: L,
    log: RotatingLog<S>,
    clock: C,
}

impl<L, S, C> Feedback<L, S, C>
where
    L: OutputPin,
    S: LogStore,
    C: TimeSource,
{
    pub fn new(led: L, log: RotatingLog<S>, clock: C) -> Self {
        Self { led, log, clock }
    }

    pub fn led(&self) -> &L {
        &self.led
    }

    pub fn log_store(&self) -> &S {
        self.log.store()
    }
}

impl<L, S, C> FeedbackSink for Feedback<L, S, C>
where
    L: OutputPin,
    S: LogStore,
    C: TimeSource,
{
    fn log(&mut self, level: Level, message: &str) {
        log::log!(level, "{}", message);

        let timestamp = iso8601(&self.clock.get_timestamp());
        if let Err(e) = self.log.write_line(Some(timestamp.as_str()), level, message) {
            log::warn!("log line dropped: {}", e);
        }
    }

    fn indicate(&mut self, on: bool) {
        let result = if on {
            self.led.set_high()
        } else {
            self.led.set_low()
        };
        if result.is_err() {
            log::warn!("status LED not responding");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogConfig;
    use crate::testing::{FakeLed, FixedClock};

    fn config(max_bytes: u32) -> LogConfig<'static> {
        LogConfig {
            max_bytes,
            ..LogConfig::DEFAULT
        }
    }

    #[test]
    fn test_line_format_with_timestamp() {
        let mut log = RotatingLog::new(MemoryLogStore::new(), &config(1024));
        log.write_line(Some("2025-01-01T00:00:00"), Level::Info, "booted")
            .unwrap();
        assert_eq!(
            log.store().contents(),
            "[2025-01-01T00:00:00] [INFO] booted\n"
        );
    }

    #[test]
    fn test_line_format_without_timestamps() {
        let cfg = LogConfig {
            timestamps: false,
            ..config(1024)
        };
        let mut log = RotatingLog::new(MemoryLogStore::new(), &cfg);
        log.write_line(Some("2025-01-01T00:00:00"), Level::Warn, "low battery")
            .unwrap();
        assert_eq!(log.store().contents(), "[WARN] low battery\n");
    }

    #[test]
    fn test_level_filter_drops_debug() {
        let mut log = RotatingLog::new(MemoryLogStore::new(), &config(1024));
        log.write_line(None, Level::Debug, "noise").unwrap();
        log.write_line(None, Level::Error, "boom").unwrap();
        assert_eq!(log.store().contents(), "[ERROR] boom\n");
    }

    #[test]
    fn test_rotation_resets_once_over_limit() {
        let mut log = RotatingLog::new(MemoryLogStore::new(), &config(30));
        log.write_line(None, Level::Info, "first line here").unwrap();
        log.write_line(None, Level::Info, "second").unwrap();
        // 37 bytes stored, over the limit
        log.write_line(None, Level::Info, "third").unwrap();

        let lines: Vec<&str> = log.store().lines().collect();
        assert_eq!(lines, ["=== log reset ===", "[INFO] third"]);
    }

    #[test]
    fn test_feedback_mirrors_led_and_log() {
        let mut feedback = Feedback::new(
            FakeLed::default(),
            RotatingLog::new(MemoryLogStore::new(), &config(1024)),
            FixedClock::at(1_735_689_600),
        );
        feedback.indicate(false);
        feedback.indicate(true);
        feedback.warn("wifi dropped");

        assert_eq!(feedback.led().history, [false, true]);
        assert_eq!(
            feedback.log_store().contents(),
            "[2025-01-01T00:00:00] [WARN] wifi dropped\n"
        );
    }
}
