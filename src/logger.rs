use log::{Level, LevelFilter, Log, Metadata, Record};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use time::OffsetDateTime;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;

const TIMESTAMP: &[BorrowedFormatItem<'static>] = format_description!("[hour]:[minute]:[second].[subsecond digits:3]");

pub enum LogOutput {
    Stdout,
    Stderr,
}

/// `log` backend writing colored lines to a standard stream and, optionally,
/// plain lines to a file
pub struct Logger {
    pub write_to_std: Option<LogOutput>,
    pub severity: Level,
    pub file: Option<Arc<Mutex<File>>>,
    pub enable_colors: bool,
}

impl Logger {
    /// Create a new logger. The file, when given, is appended to.
    pub fn new(
        file_path: Option<PathBuf>,
        severity: Option<Level>,
        write_to_std: Option<LogOutput>,
        enable_colors: bool,
    ) -> Self {
        let file = file_path.and_then(|path| {
            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            match OpenOptions::new().create(true).append(true).open(&path) {
                Ok(file) => Some(Arc::new(Mutex::new(file))),
                Err(e) => {
                    eprintln!("Cannot open log file {:?}: {}", path, e);
                    None
                }
            }
        });

        Logger {
            write_to_std,
            severity: severity.unwrap_or(Level::Info),
            file,
            enable_colors,
        }
    }

    fn timestamp() -> String {
        OffsetDateTime::now_utc().format(TIMESTAMP).unwrap_or_default()
    }

    /// Get color code for log level
    fn color(level: Level) -> &'static str {
        match level {
            Level::Error => "\x1b[31m", // Red
            Level::Warn => "\x1b[33m",  // Yellow
            Level::Info => "\x1b[36m",  // Cyan
            Level::Debug => "\x1b[35m", // Magenta
            Level::Trace => "\x1b[37m", // White
        }
    }

    /// Initialize from `LAYERWIKI_LOG` (falling back to `RUST_LOG`),
    /// `LAYERWIKI_LOG_FILE` and `NO_COLOR`
    pub fn init() -> Result<(), log::SetLoggerError> {
        let severity = std::env::var("LAYERWIKI_LOG")
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or_else(|_| "info".to_string())
            .parse::<Level>()
            .unwrap_or(Level::Info);

        let file_path = std::env::var_os("LAYERWIKI_LOG_FILE")
            .filter(|p| !p.is_empty())
            .map(PathBuf::from);
        let enable_colors = std::env::var_os("NO_COLOR").is_none();

        let logger = Logger::new(file_path, Some(severity), Some(LogOutput::Stderr), enable_colors);
        log::set_max_level(LevelFilter::Trace);
        log::set_logger(Box::leak(Box::new(logger)))?;
        Ok(())
    }
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.severity
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let timestamp = Self::timestamp();
        let level = record.level().as_str();
        let target = record.target();
        let args = record.args();

        if let Some(output) = &self.write_to_std {
            let line = if self.enable_colors {
                let color = Self::color(record.level());
                format!("{color}[{timestamp}] {level:<5}\x1b[0m {target}: {args}\n")
            } else {
                format!("[{timestamp}] {level:<5} {target}: {args}\n")
            };
            let _ = match output {
                LogOutput::Stdout => std::io::stdout().write_all(line.as_bytes()),
                LogOutput::Stderr => std::io::stderr().write_all(line.as_bytes()),
            };
        }

        // files never get color codes
        if let Some(file) = &self.file {
            if let Ok(mut guard) = file.lock() {
                let _ = writeln!(guard, "[{timestamp}] {level:<5} {target}: {args}");
            }
        }
    }

    fn flush(&self) {
        let _ = std::io::stdout().flush();
        let _ = std::io::stderr().flush();
        if let Some(file) = &self.file {
            if let Ok(mut guard) = file.lock() {
                let _ = guard.flush();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_sink_receives_plain_lines() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("logs/wiki.log");
        let logger = Logger::new(Some(path.clone()), Some(Level::Debug), None, true);
        logger.log(
            &Record::builder()
                .args(format_args!("indexed {}", "/a.html"))
                .level(Level::Info)
                .target("layerwiki::services")
                .build(),
        );
        logger.log(&Record::builder().args(format_args!("hidden")).level(Level::Trace).build());
        logger.flush();
        let written = std::fs::read_to_string(path).unwrap();
        assert!(written.contains("INFO  layerwiki::services: indexed /a.html"));
        assert!(!written.contains("hidden"));
        assert!(!written.contains("\x1b["));
    }
}
