use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum InstallError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Environment error: {0}")]
    Environment(String),
    #[error("Parse error: {message}")]
    Parse { message: String, line: Option<usize> },
    #[error("File is locked by another process: {}", path.display())]
    Locked { path: PathBuf },
    #[error("Normalization compiler failed ({}): {stderr}", code.map_or_else(|| "no exit code".to_string(), |c| format!("exit code {c}")))]
    ToolFailure { code: Option<i32>, stderr: String },
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, InstallError>;

impl InstallError {
    pub fn parse(message: impl Into<String>, line: Option<usize>) -> Self {
        Self::Parse { message: message.into(), line }
    }
    /// Builds a closure suitable for `map_err` on an I/O result touching `path`.
    pub fn io(path: &Path) -> impl FnOnce(io::Error) -> Self + '_ {
        move |source| Self::Io { path: path.to_path_buf(), source }
    }
    /// True for the failure category a caller may retry after the lock holder goes away.
    pub fn is_locked(&self) -> bool {
        matches!(self, Self::Locked { .. })
    }
}

// Helper conversions
impl From<config::ConfigError> for InstallError {
    fn from(e: config::ConfigError) -> Self { Self::Config(e.to_string()) }
}
impl From<xml::reader::Error> for InstallError {
    // the reader's message already carries row and column
    fn from(e: xml::reader::Error) -> Self { Self::Parse { message: e.to_string(), line: None } }
}
