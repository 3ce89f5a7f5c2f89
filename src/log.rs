//! Install log threaded explicitly through every component.
//!
//! A [`LogContext`] is created once by the host and handed by reference to the
//! installer, the guard, the tool runner and the cleanup agent. Every line is
//! forwarded to `tracing`; in addition the context can keep a durable install
//! log (a file next to the data directory) or an in-memory transcript, and can
//! echo error lines to stderr so a user running from a terminal sees them even
//! when no subscriber is installed.

use std::cell::RefCell;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use chrono::Local;
use tracing::{error, info};

use crate::error::{InstallError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Error => "ERROR",
        }
    }
}

#[derive(Debug)]
enum Sink {
    Discard,
    File(RefCell<File>),
    Memory(RefCell<Vec<String>>),
}

#[derive(Debug)]
pub struct LogContext {
    sink: Sink,
    echo_errors: bool,
    verbose: bool,
}

impl LogContext {
    /// Forwards to `tracing` only.
    pub fn new() -> Self {
        Self { sink: Sink::Discard, echo_errors: false, verbose: true }
    }
    /// Appends timestamped lines to `path`, creating it if needed.
    pub fn to_file(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(InstallError::io(path))?;
        Ok(Self { sink: Sink::File(RefCell::new(file)), echo_errors: false, verbose: true })
    }
    /// Keeps every line in memory; see [`LogContext::lines`].
    pub fn in_memory() -> Self {
        Self { sink: Sink::Memory(RefCell::new(Vec::new())), echo_errors: false, verbose: true }
    }
    pub fn echo_errors(mut self, echo: bool) -> Self {
        self.echo_errors = echo;
        self
    }
    /// When false, Info lines reach `tracing` but not the sink.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.record(Severity::Info, message.as_ref());
    }
    pub fn error(&self, message: impl AsRef<str>) {
        self.record(Severity::Error, message.as_ref());
    }

    fn record(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Info => info!(target: "puainstall", "{message}"),
            Severity::Error => error!(target: "puainstall", "{message}"),
        }
        if severity == Severity::Error && self.echo_errors {
            eprintln!("{message}");
        }
        if severity == Severity::Info && !self.verbose {
            return;
        }
        let line = format!(
            "{} [{}] {}",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            severity.as_str(),
            message
        );
        match &self.sink {
            Sink::Discard => (),
            Sink::File(file) => {
                // a broken log must never take the installer down with it
                let _ = writeln!(file.borrow_mut(), "{line}");
            }
            Sink::Memory(lines) => lines.borrow_mut().push(line),
        }
    }

    /// Lines captured by an in-memory context (empty for the other sinks).
    pub fn lines(&self) -> Vec<String> {
        match &self.sink {
            Sink::Memory(lines) => lines.borrow().clone(),
            _ => Vec::new(),
        }
    }
    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|l| l.contains(needle))
    }
}

impl Default for LogContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sink_keeps_both_severities() {
        let log = LogContext::in_memory();
        log.info("merging");
        log.error("rollback failed");
        let lines = log.lines();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("[INFO] merging"));
        assert!(lines[1].contains("[ERROR] rollback failed"));
    }

    #[test]
    fn quiet_context_drops_info_lines_from_sink() {
        let log = LogContext::in_memory().verbose(false);
        log.info("noise");
        log.error("signal");
        assert_eq!(log.lines().len(), 1);
        assert!(log.contains("signal"));
    }
}
