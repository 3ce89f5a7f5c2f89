//! Top-level install, migrate and reset operations.
//!
//! Each operation verifies the data directory, then performs every mutation
//! inside one transaction: the override database is merged, both compiler
//! inputs are regenerated and both binary tables are rebuilt, or none of it
//! happens. Callers receive either the error (with everything already rolled
//! back) or, through [`PuaInstaller::run`], an [`InstallOutcome`] telling them
//! whether a retry makes sense.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::character::CharacterRecord;
use crate::error::{InstallError, Result};
use crate::fs::FileSystem;
use crate::layout::DataLayout;
use crate::log::LogContext;
use crate::merge::{MergeReport, MergeStamp, OverrideFileMerger};
use crate::normalize::NormalizationInputGenerator;
use crate::settings::{FILE_ACCESS_EXIT_CODE, Settings};
use crate::store::CustomCharacterStore;
use crate::tool::{ExternalToolRunner, NormalizationCompiler};
use crate::transaction::{TransactionalFileGuard, original_path, transaction};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    Ok,
    /// Some file in the data directory is held by another process; the caller may retry.
    Locked,
    Fatal(String),
}

impl<T> From<Result<T>> for InstallOutcome {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(_) => InstallOutcome::Ok,
            Err(e) if e.is_locked() => InstallOutcome::Locked,
            Err(e) => InstallOutcome::Fatal(e.to_string()),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InstallSummary {
    pub definitions: usize,
    pub merge: MergeReport,
    pub canonical_overrides: usize,
    pub compatibility_overrides: usize,
}

pub struct PuaInstaller<'a, F: FileSystem, C: NormalizationCompiler> {
    fs: &'a F,
    compiler: &'a C,
    layout: &'a DataLayout,
    log: &'a LogContext,
    tool_tag: String,
    file_access_code: i32,
}

impl<'a, F: FileSystem, C: NormalizationCompiler> PuaInstaller<'a, F, C> {
    pub fn new(fs: &'a F, compiler: &'a C, layout: &'a DataLayout, log: &'a LogContext) -> Self {
        Self {
            fs,
            compiler,
            layout,
            log,
            tool_tag: "puainstall".to_string(),
            file_access_code: FILE_ACCESS_EXIT_CODE,
        }
    }
    pub fn configured(mut self, settings: &Settings) -> Self {
        self.tool_tag = settings.tool_tag.clone();
        self.file_access_code = settings.file_access_exit_code;
        self
    }

    /// Installs every definition in the file at `definitions`.
    pub fn install_file(&self, definitions: &Path) -> Result<InstallSummary> {
        self.layout.verify(self.fs)?;
        let bytes = self.fs.read(definitions).map_err(InstallError::io(definitions))?;
        let store = CustomCharacterStore::from_reader(bytes.as_slice(), self.log)?;
        self.log.info(format!("Read {} definitions from {}", store.len(), definitions.display()));
        let source = source_name(definitions);
        transaction(self.fs, self.log, |guard| self.install_within(guard, &store, &source))
    }

    pub fn install_records(&self, records: &[CharacterRecord], source: &str) -> Result<InstallSummary> {
        self.layout.verify(self.fs)?;
        let store: CustomCharacterStore = records.iter().cloned().collect();
        transaction(self.fs, self.log, |guard| self.install_within(guard, &store, source))
    }

    /// Folds legacy definition files into `target` (whose own definitions win,
    /// then earlier legacy files over later ones) and installs the result.
    pub fn migrate(&self, legacy: &[PathBuf], target: &Path) -> Result<InstallSummary> {
        self.layout.verify(self.fs)?;
        let mut sources = Vec::with_capacity(legacy.len() + 1);
        if self.fs.exists(target) {
            sources.push(target.to_path_buf());
        }
        sources.extend(legacy.iter().cloned());
        let store = CustomCharacterStore::aggregate(self.fs, &sources, self.log)?;
        let xml = store.to_xml_bytes()?;
        let source = source_name(target);
        transaction(self.fs, self.log, |guard| {
            guard.create_checkpoint(target)?;
            self.fs.write(target, &xml).map_err(InstallError::io(target))?;
            self.log.info(format!("Wrote {} migrated definitions to {}", store.len(), target.display()));
            self.install_within(guard, &store, &source)
        })
    }

    /// Puts every file that has a preserved original back to that state.
    pub fn reset(&self) -> Result<usize> {
        self.layout.verify(self.fs)?;
        let runner = self.runner();
        transaction(self.fs, self.log, |guard| {
            let mut restored = 0;
            for path in self.layout.mutated_files() {
                let is_table = path == self.layout.canonical_table || path == self.layout.compatibility_table;
                if is_table && self.fs.exists(&original_path(path)) {
                    guard.create_checkpoint(path)?;
                    runner.remove_previous_output(path)?;
                }
                if guard.restore_original(path)? {
                    restored += 1;
                }
            }
            Ok(restored)
        })
    }

    /// [`PuaInstaller::install_file`] reduced to what a caller needs to decide on a retry.
    pub fn run(&self, definitions: &Path) -> InstallOutcome {
        InstallOutcome::from(self.install_file(definitions))
    }

    fn runner(&self) -> ExternalToolRunner<'a, F, C> {
        ExternalToolRunner::new(self.fs, self.compiler, self.log, self.file_access_code, &self.layout.manifest)
    }

    fn install_within(
        &self,
        guard: &mut TransactionalFileGuard<'_, F>,
        store: &CustomCharacterStore,
        source: &str,
    ) -> Result<InstallSummary> {
        let layout = self.layout;
        for path in layout.mutated_files() {
            guard.backup_original(path)?;
        }

        let pending = store.sorted_ascending();
        let stamp = MergeStamp::new(&self.tool_tag, source);
        guard.create_checkpoint(&layout.overrides)?;
        let merge = OverrideFileMerger::new(&stamp, self.log).merge_file(self.fs, &layout.overrides, &pending)?;

        guard.create_checkpoint(&layout.canonical_overrides)?;
        guard.create_checkpoint(&layout.compatibility_overrides)?;
        let inputs = NormalizationInputGenerator::new(self.log).generate_files(
            self.fs,
            &layout.overrides,
            &layout.canonical_overrides,
            &layout.compatibility_overrides,
        )?;

        guard.create_checkpoint(&layout.canonical_table)?;
        guard.create_checkpoint(&layout.compatibility_table)?;
        self.runner().build_tables(
            (layout.canonical_table.as_path(), layout.canonical_inputs().as_slice()),
            (layout.compatibility_table.as_path(), layout.compatibility_inputs().as_slice()),
        )?;

        info!(definitions = pending.len(), replaced = merge.replaced, "install complete");
        Ok(InstallSummary {
            definitions: pending.len(),
            merge,
            canonical_overrides: inputs.canonical_count,
            compatibility_overrides: inputs.compatibility_count,
        })
    }
}

fn source_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
