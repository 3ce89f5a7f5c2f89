use std::path::{Path, PathBuf};

use crate::error::{InstallError, Result};
use crate::fs::FileSystem;
use crate::settings::Settings;

/// Every path the installer touches inside the data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLayout {
    pub data_dir: PathBuf,
    pub table_dir: PathBuf,
    pub overrides: PathBuf,
    pub canonical_overrides: PathBuf,
    pub compatibility_overrides: PathBuf,
    pub canonical_table: PathBuf,
    pub compatibility_table: PathBuf,
    pub canonical_bases: Vec<PathBuf>,
    pub compatibility_bases: Vec<PathBuf>,
    pub manifest: PathBuf,
}

impl DataLayout {
    pub fn new(settings: &Settings) -> Self {
        let data = &settings.data_dir;
        let table_dir = data.join(&settings.table_dir);
        Self {
            data_dir: data.clone(),
            overrides: data.join(&settings.overrides_file),
            canonical_overrides: data.join(&settings.canonical_overrides),
            compatibility_overrides: data.join(&settings.compatibility_overrides),
            canonical_table: table_dir.join(&settings.canonical_table),
            compatibility_table: table_dir.join(&settings.compatibility_table),
            canonical_bases: settings.canonical_bases.iter().map(|b| data.join(b)).collect(),
            compatibility_bases: settings.compatibility_bases.iter().map(|b| data.join(b)).collect(),
            manifest: data.join(&settings.manifest),
            table_dir,
        }
    }

    /// Compiler inputs for the canonical table, lowest precedence first.
    pub fn canonical_inputs(&self) -> Vec<PathBuf> {
        let mut inputs = self.canonical_bases.clone();
        inputs.push(self.canonical_overrides.clone());
        inputs
    }

    /// Compiler inputs for the compatibility table; canonical overrides apply here too.
    pub fn compatibility_inputs(&self) -> Vec<PathBuf> {
        let mut inputs = self.compatibility_bases.clone();
        inputs.push(self.canonical_overrides.clone());
        inputs.push(self.compatibility_overrides.clone());
        inputs
    }

    /// Files an install rewrites, in the order it rewrites them.
    pub fn mutated_files(&self) -> [&Path; 5] {
        [
            &self.overrides,
            &self.canonical_overrides,
            &self.compatibility_overrides,
            &self.canonical_table,
            &self.compatibility_table,
        ]
    }

    pub fn verify<F: FileSystem>(&self, fs: &F) -> Result<()> {
        for dir in [&self.data_dir, &self.table_dir] {
            if !fs.is_dir(dir) {
                return Err(InstallError::Environment(format!(
                    "required directory {} does not exist",
                    dir.display()
                )));
            }
        }
        for base in self.canonical_bases.iter().chain(&self.compatibility_bases) {
            if !fs.exists(base) {
                return Err(InstallError::Environment(format!(
                    "normalization source {} does not exist",
                    base.display()
                )));
            }
        }
        Ok(())
    }
}
