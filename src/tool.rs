//! Running the external normalization-table compiler.
//!
//! The compiler takes an output path and an ordered list of text inputs;
//! entries in later inputs override earlier ones with the same key. It is
//! run once for the canonical table and once for the compatibility table.
//!
//! A previous table may still be mapped by another process using the data
//! directory. Such a file cannot be deleted, but it can be renamed out of the
//! way; the new name goes into the deferred-deletion manifest so the cleanup
//! agent can delete it once this process is gone.

use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{info, warn};

use crate::error::{InstallError, Result};
use crate::fs::FileSystem;
use crate::log::LogContext;

/// What the compiler returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolExit {
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolExit {
    pub fn success() -> Self {
        Self { code: Some(0), stdout: String::new(), stderr: String::new() }
    }
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self { code: Some(code), stdout: String::new(), stderr: stderr.into() }
    }
}

pub trait NormalizationCompiler {
    /// Runs to completion; there is no timeout.
    fn compile(&self, output: &Path, inputs: &[PathBuf]) -> io::Result<ToolExit>;
}

/// The compiler as an external program: `<program> -o <output> <inputs...>`.
#[derive(Debug, Clone)]
pub struct ProcessCompiler {
    program: PathBuf,
}

impl ProcessCompiler {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self { program: program.into() }
    }
}

impl NormalizationCompiler for ProcessCompiler {
    fn compile(&self, output: &Path, inputs: &[PathBuf]) -> io::Result<ToolExit> {
        let result = Command::new(&self.program)
            .arg("-o")
            .arg(output)
            .args(inputs)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()?;
        Ok(ToolExit {
            code: result.status.code(),
            stdout: String::from_utf8_lossy(&result.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
        })
    }
}

/// Maps an exit to the error taxonomy: zero is success, the file-access
/// sentinel means some file was locked, anything else is a tool failure.
pub fn classify_exit(exit: &ToolExit, file_access_code: i32, output: &Path) -> Result<()> {
    match exit.code {
        Some(0) => Ok(()),
        Some(code) if code == file_access_code => Err(InstallError::Locked { path: output.to_path_buf() }),
        code => Err(InstallError::ToolFailure { code, stderr: exit.stderr.clone() }),
    }
}

/// A sibling name nobody else will pick, derived from the path, this process and the clock.
pub fn scratch_name(path: &Path, attempt: u32) -> PathBuf {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos()).unwrap_or_default();
    let mut hasher = blake3::Hasher::new();
    hasher.update(path.as_os_str().as_encoded_bytes());
    hasher.update(&std::process::id().to_le_bytes());
    hasher.update(&nanos.to_le_bytes());
    hasher.update(&attempt.to_le_bytes());
    let digest = hasher.finalize().to_hex();
    let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    path.with_file_name(format!("{stem}.{}.deleteme", &digest.as_str()[..16]))
}

pub struct ExternalToolRunner<'a, F: FileSystem, C: NormalizationCompiler> {
    fs: &'a F,
    compiler: &'a C,
    log: &'a LogContext,
    file_access_code: i32,
    manifest: PathBuf,
}

impl<'a, F: FileSystem, C: NormalizationCompiler> ExternalToolRunner<'a, F, C> {
    pub fn new(
        fs: &'a F,
        compiler: &'a C,
        log: &'a LogContext,
        file_access_code: i32,
        manifest: impl Into<PathBuf>,
    ) -> Self {
        Self { fs, compiler, log, file_access_code, manifest: manifest.into() }
    }

    /// Gets `path` out of the way before it is regenerated. A file that cannot
    /// be deleted is renamed and listed in the manifest instead.
    pub fn remove_previous_output(&self, path: &Path) -> Result<()> {
        if !self.fs.exists(path) {
            return Ok(());
        }
        let Err(e) = self.fs.remove(path) else {
            return Ok(());
        };
        warn!(path = %path.display(), error = %e, "delete failed, renaming instead");
        let mut attempt = 0;
        let renamed = loop {
            let candidate = scratch_name(path, attempt);
            if !self.fs.exists(&candidate) {
                break candidate;
            }
            attempt += 1;
        };
        self.fs.rename(path, &renamed).map_err(InstallError::io(path))?;
        let entry = format!("{}\n", renamed.display());
        self.fs.append(&self.manifest, entry.as_bytes()).map_err(InstallError::io(&self.manifest))?;
        self.log.info(format!(
            "{} is in use; moved to {} for deletion after exit",
            path.display(),
            renamed.display()
        ));
        Ok(())
    }

    /// Removes the previous `output`, runs the compiler and classifies its exit.
    pub fn build_table(&self, output: &Path, inputs: &[PathBuf]) -> Result<()> {
        self.remove_previous_output(output)?;
        let listed: Vec<String> = inputs.iter().map(|p| p.display().to_string()).collect();
        self.log.info(format!("Compiling {} from {}", output.display(), listed.join(", ")));
        let exit = self.compiler.compile(output, inputs).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => {
                InstallError::Environment(format!("normalization compiler could not be started: {e}"))
            }
            _ => InstallError::Io { path: output.to_path_buf(), source: e },
        })?;
        if !exit.stdout.trim().is_empty() {
            info!(output = %output.display(), stdout = %exit.stdout.trim(), "compiler output");
        }
        classify_exit(&exit, self.file_access_code, output)
    }

    /// Builds the canonical then the compatibility table.
    pub fn build_tables(
        &self,
        canonical: (&Path, &[PathBuf]),
        compatibility: (&Path, &[PathBuf]),
    ) -> Result<()> {
        self.build_table(canonical.0, canonical.1)?;
        self.build_table(compatibility.0, compatibility.1)
    }
}
