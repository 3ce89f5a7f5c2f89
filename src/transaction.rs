//! Backup-before-mutate and restore-on-failure for the shared data directory.
//!
//! Two kinds of sibling artifacts are written next to a live file:
//! * `<stem>_ORIGINAL<.ext>`: the pristine state before any customization.
//!   Created once and never overwritten, so repeated runs keep pointing at the
//!   true original.
//! * `<stem>_BAK<.ext>`: a checkpoint taken just before this run mutates the
//!   file.
//!
//! In both, a zero-length artifact stands for a file that did not exist.
//!
//! Checkpoints are recorded as an [`UndoLog`] during the forward pass. Commit
//! discards the log and its checkpoints; rollback is one function applied to
//! the log in reverse. Rollback never fails: anything that goes wrong while
//! restoring is logged so the error that triggered it stays the one reported.
//!
//! Files held open by another process may not be restorable; that is logged
//! and otherwise accepted.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{InstallError, Result};
use crate::fs::FileSystem;
use crate::log::LogContext;

pub const ORIGINAL_SUFFIX: &str = "_ORIGINAL";
pub const CHECKPOINT_SUFFIX: &str = "_BAK";

/// `dir/name.ext` becomes `dir/name<suffix>.ext`.
pub fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::new();
    if let Some(stem) = path.file_stem() {
        name.push(stem);
    }
    name.push(suffix);
    if let Some(ext) = path.extension() {
        name.push(".");
        name.push(ext);
    }
    path.with_file_name(name)
}

pub fn original_path(path: &Path) -> PathBuf {
    sibling_with_suffix(path, ORIGINAL_SUFFIX)
}

pub fn checkpoint_path(path: &Path) -> PathBuf {
    sibling_with_suffix(path, CHECKPOINT_SUFFIX)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoFrame {
    pub live: PathBuf,
    pub checkpoint: PathBuf,
    /// The live file did not exist when the checkpoint was taken.
    pub originally_absent: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UndoLog {
    frames: Vec<UndoFrame>,
}

impl UndoLog {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn push(&mut self, frame: UndoFrame) {
        self.frames.push(frame);
    }
    pub fn len(&self) -> usize {
        self.frames.len()
    }
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Restores every frame, newest first. Never fails.
pub fn rollback<F: FileSystem>(fs: &F, log: &LogContext, undo: UndoLog) {
    for frame in undo.frames.into_iter().rev() {
        if let Err(e) = fs.copy(&frame.checkpoint, &frame.live) {
            warn!(live = %frame.live.display(), error = %e, "restore failed");
            log.error(format!("Could not restore {}: {e}", frame.live.display()));
        }
        if frame.originally_absent {
            if let Err(e) = fs.remove(&frame.live) {
                warn!(live = %frame.live.display(), error = %e, "removal of new file failed");
                log.error(format!("Could not remove {}: {e}", frame.live.display()));
            }
        }
        if let Err(e) = fs.remove(&frame.checkpoint) {
            log.error(format!("Could not delete checkpoint {}: {e}", frame.checkpoint.display()));
        }
    }
}

/// Deletes every checkpoint; the live files are kept as they are.
pub fn commit<F: FileSystem>(fs: &F, log: &LogContext, undo: UndoLog) {
    for frame in undo.frames {
        if let Err(e) = fs.remove(&frame.checkpoint) {
            log.error(format!("Could not delete checkpoint {}: {e}", frame.checkpoint.display()));
        }
    }
}

pub struct TransactionalFileGuard<'a, F: FileSystem> {
    fs: &'a F,
    log: &'a LogContext,
    undo: UndoLog,
}

impl<'a, F: FileSystem> TransactionalFileGuard<'a, F> {
    pub fn new(fs: &'a F, log: &'a LogContext) -> Self {
        Self { fs, log, undo: UndoLog::new() }
    }

    pub fn fs(&self) -> &'a F {
        self.fs
    }
    pub fn log(&self) -> &'a LogContext {
        self.log
    }
    pub fn undo_log(&self) -> &UndoLog {
        &self.undo
    }

    /// Copies `path` to its `_ORIGINAL` sibling unless that already exists.
    /// Returns true when the original was recorded now. A missing `path` is
    /// recorded as a zero-length original. An original recorded by a
    /// transaction that rolls back is removed again.
    pub fn backup_original(&mut self, path: &Path) -> Result<bool> {
        let original = original_path(path);
        if self.fs.exists(&original) {
            return Ok(false);
        }
        self.create_checkpoint(&original)?;
        if self.fs.exists(path) {
            self.fs.copy(path, &original).map_err(InstallError::io(&original))?;
            self.log.info(format!("Preserved original {}", path.display()));
        } else {
            self.fs.write(&original, &[]).map_err(InstallError::io(&original))?;
            debug!(live = %path.display(), "original recorded as absent");
        }
        Ok(true)
    }

    /// Records the current state of `path` so a rollback can bring it back.
    /// Checkpointing the same path twice in one transaction keeps the first state.
    pub fn create_checkpoint(&mut self, path: &Path) -> Result<UndoFrame> {
        if let Some(frame) = self.undo.frames.iter().find(|f| f.live == path) {
            return Ok(frame.clone());
        }
        let checkpoint = checkpoint_path(path);
        let originally_absent = !self.fs.exists(path);
        if originally_absent {
            self.fs.write(&checkpoint, &[]).map_err(InstallError::io(&checkpoint))?;
        } else {
            self.fs.copy(path, &checkpoint).map_err(InstallError::io(&checkpoint))?;
        }
        debug!(live = %path.display(), absent = originally_absent, "checkpoint");
        let frame = UndoFrame { live: path.to_path_buf(), checkpoint, originally_absent };
        self.undo.push(frame.clone());
        Ok(frame)
    }

    /// Puts `path` back to its `_ORIGINAL` state, checkpointing first. A
    /// zero-length original removes `path`. Returns false when no original was
    /// ever preserved.
    pub fn restore_original(&mut self, path: &Path) -> Result<bool> {
        let original = original_path(path);
        let Some(len) = self.fs.len(&original) else {
            return Ok(false);
        };
        self.create_checkpoint(path)?;
        if len > 0 {
            self.fs.copy(&original, path).map_err(InstallError::io(path))?;
        } else if self.fs.exists(path) {
            self.fs.remove(path).map_err(InstallError::io(path))?;
        }
        self.log.info(format!("Restored {} from its original", path.display()));
        Ok(true)
    }

    pub fn commit_all(self) {
        let count = self.undo.len();
        commit(self.fs, self.log, self.undo);
        debug!(frames = count, "committed");
    }

    pub fn rollback_all(self) {
        let count = self.undo.len();
        self.log.info(format!("Rolling back {count} file(s)"));
        rollback(self.fs, self.log, self.undo);
    }
}

/// Runs `work` inside a guard: commit on `Ok`, rollback on `Err`. The error is
/// returned unchanged after the rollback.
pub fn transaction<F, T, W>(fs: &F, log: &LogContext, work: W) -> Result<T>
where
    F: FileSystem,
    W: FnOnce(&mut TransactionalFileGuard<'_, F>) -> Result<T>,
{
    let mut guard = TransactionalFileGuard::new(fs, log);
    match work(&mut guard) {
        Ok(value) => {
            guard.commit_all();
            Ok(value)
        }
        Err(e) => {
            log.error(format!("{e}"));
            guard.rollback_all();
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemoryFs;

    #[test]
    fn originals_taken_in_a_failed_transaction_are_removed() {
        let fs = MemoryFs::new();
        fs.insert("/icu/UnicodeDataOverrides.txt", "E000;A;Co;0;L;;;;;N;;;;;\n");
        let log = LogContext::new();
        let live = Path::new("/icu/UnicodeDataOverrides.txt");
        let absent = Path::new("/icu/nfcOverrides.txt");
        let result: Result<()> = transaction(&fs, &log, |guard| {
            assert!(guard.backup_original(live)?);
            assert!(guard.backup_original(absent)?);
            assert!(!guard.backup_original(live)?);
            Err(InstallError::Environment("stop".into()))
        });
        assert!(result.is_err());
        assert_eq!(fs.paths(), vec![PathBuf::from("/icu/UnicodeDataOverrides.txt")]);

        transaction(&fs, &log, |guard| guard.backup_original(live)).unwrap();
        assert_eq!(
            fs.paths(),
            vec![
                PathBuf::from("/icu/UnicodeDataOverrides.txt"),
                PathBuf::from("/icu/UnicodeDataOverrides_ORIGINAL.txt"),
            ]
        );
    }

    #[test]
    fn suffix_goes_before_the_extension() {
        assert_eq!(
            original_path(Path::new("/icu/UnicodeDataOverrides.txt")),
            PathBuf::from("/icu/UnicodeDataOverrides_ORIGINAL.txt")
        );
        assert_eq!(checkpoint_path(Path::new("/icu/nfc.nrm")), PathBuf::from("/icu/nfc_BAK.nrm"));
        assert_eq!(checkpoint_path(Path::new("/icu/README")), PathBuf::from("/icu/README_BAK"));
    }
}
