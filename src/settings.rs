//! Layered configuration: built-in defaults, then an optional `puainstall`
//! config file (any format the `config` crate understands), then
//! `PUAINSTALL_*` environment variables. Nested keys use `__`, e.g.
//! `PUAINSTALL_CLEANUP__CEILING_SECS=60`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::Result;

pub const DEFAULT_CONFIG_NAME: &str = "puainstall";
pub const ENV_PREFIX: &str = "PUAINSTALL";

/// `U_FILE_ACCESS_ERROR` as returned by the ICU tools.
pub const FILE_ACCESS_EXIT_CODE: i32 = 4;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// The shared Unicode data directory.
    pub data_dir: PathBuf,
    /// Versioned subdirectory of `data_dir` holding the binary tables.
    pub table_dir: String,
    pub overrides_file: String,
    pub canonical_overrides: String,
    pub compatibility_overrides: String,
    pub canonical_table: String,
    pub compatibility_table: String,
    /// Inputs preceding the generated overrides, relative to `data_dir`.
    pub canonical_bases: Vec<String>,
    pub compatibility_bases: Vec<String>,
    pub manifest: String,
    pub compiler: PathBuf,
    pub file_access_exit_code: i32,
    /// First word of the comment on generated override lines.
    pub tool_tag: String,
    pub cleanup: CleanupSettings,
    pub log: LogSettings,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CleanupSettings {
    pub poll_interval_ms: u64,
    pub ceiling_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub file: Option<PathBuf>,
    pub echo_errors: bool,
    pub quiet: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("icu"),
            table_dir: "icudt54l".to_string(),
            overrides_file: "UnicodeDataOverrides.txt".to_string(),
            canonical_overrides: "nfcOverrides.txt".to_string(),
            compatibility_overrides: "nfkcOverrides.txt".to_string(),
            canonical_table: "nfc.nrm".to_string(),
            compatibility_table: "nfkc.nrm".to_string(),
            canonical_bases: vec!["nfc.txt".to_string()],
            compatibility_bases: vec!["nfc.txt".to_string(), "nfkc.txt".to_string()],
            manifest: "PendingDeletions.txt".to_string(),
            compiler: PathBuf::from("gennorm2"),
            file_access_exit_code: FILE_ACCESS_EXIT_CODE,
            tool_tag: "puainstall".to_string(),
            cleanup: CleanupSettings::default(),
            log: LogSettings::default(),
        }
    }
}

impl Default for CleanupSettings {
    fn default() -> Self {
        Self { poll_interval_ms: 1000, ceiling_secs: 300 }
    }
}

impl CleanupSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
    pub fn ceiling(&self) -> Duration {
        Duration::from_secs(self.ceiling_secs)
    }
}

impl Settings {
    /// Loads `explicit` (which must exist) or else the optional default config file.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let file = match explicit {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_NAME).required(false),
        };
        let settings = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize::<Settings>()?;
        Ok(settings)
    }
}
