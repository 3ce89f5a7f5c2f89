//! Filesystem seam.
//!
//! Everything that mutates the data directory goes through [`FileSystem`], so
//! the whole transaction can run against [`MemoryFs`] in tests. [`MemoryFs`]
//! can also mark paths as locked, which mimics a file that another process has
//! mapped: it can be renamed and read but not deleted or overwritten.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

pub trait FileSystem {
    fn exists(&self, path: &Path) -> bool;
    fn is_dir(&self, path: &Path) -> bool;
    /// Size in bytes, `None` when the file does not exist.
    fn len(&self, path: &Path) -> Option<u64>;
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;
    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()>;
    fn append(&self, path: &Path, contents: &[u8]) -> io::Result<()>;
    /// Overwrites `to` if it exists.
    fn copy(&self, from: &Path, to: &Path) -> io::Result<()>;
    fn remove(&self, path: &Path) -> io::Result<()>;
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;
    /// Files directly inside `dir`, sorted by path.
    fn list(&self, dir: &Path) -> io::Result<Vec<PathBuf>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DiskFs;

impl FileSystem for DiskFs {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }
    fn len(&self, path: &Path) -> Option<u64> {
        fs::metadata(path).ok().filter(|m| m.is_file()).map(|m| m.len())
    }
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }
    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        fs::write(path, contents)
    }
    fn append(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        let mut file = fs::OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(contents)
    }
    fn copy(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::copy(from, to).map(|_| ())
    }
    fn remove(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }
    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }
    fn list(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

#[derive(Debug, Default)]
pub struct MemoryFs {
    files: RefCell<BTreeMap<PathBuf, Vec<u8>>>,
    dirs: RefCell<BTreeSet<PathBuf>>,
    locked: RefCell<BTreeSet<PathBuf>>,
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("{} does not exist", path.display()))
}

fn denied(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::PermissionDenied,
        format!("{} is in use by another process", path.display()),
    )
}

impl MemoryFs {
    pub fn new() -> Self {
        Self::default()
    }
    /// Seeds a file, creating its parent directories.
    pub fn insert(&self, path: impl AsRef<Path>, contents: impl AsRef<[u8]>) {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            let _ = self.create_dir_all(parent);
        }
        self.files.borrow_mut().insert(path.to_path_buf(), contents.as_ref().to_vec());
    }
    pub fn contents(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        self.files.borrow().get(path.as_ref()).cloned()
    }
    pub fn text(&self, path: impl AsRef<Path>) -> Option<String> {
        self.contents(path).map(|c| String::from_utf8_lossy(&c).into_owned())
    }
    /// Every file path currently present, in sorted order.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.files.borrow().keys().cloned().collect()
    }
    /// Marks a path as held open elsewhere: delete and overwrite fail, rename succeeds.
    pub fn lock(&self, path: impl AsRef<Path>) {
        self.locked.borrow_mut().insert(path.as_ref().to_path_buf());
    }
    pub fn unlock(&self, path: impl AsRef<Path>) {
        self.locked.borrow_mut().remove(path.as_ref());
    }
    fn is_locked(&self, path: &Path) -> bool {
        self.locked.borrow().contains(path)
    }
    fn parent_exists(&self, path: &Path) -> bool {
        match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => self.is_dir(parent),
            _ => true,
        }
    }
}

impl FileSystem for MemoryFs {
    fn exists(&self, path: &Path) -> bool {
        self.files.borrow().contains_key(path) || self.is_dir(path)
    }
    fn is_dir(&self, path: &Path) -> bool {
        self.dirs.borrow().contains(path)
    }
    fn len(&self, path: &Path) -> Option<u64> {
        self.files.borrow().get(path).map(|c| c.len() as u64)
    }
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.contents(path).ok_or_else(|| not_found(path))
    }
    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        if self.is_locked(path) {
            return Err(denied(path));
        }
        if !self.parent_exists(path) {
            return Err(not_found(path.parent().unwrap_or(path)));
        }
        self.files.borrow_mut().insert(path.to_path_buf(), contents.to_vec());
        Ok(())
    }
    fn append(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        if self.is_locked(path) {
            return Err(denied(path));
        }
        if !self.parent_exists(path) {
            return Err(not_found(path.parent().unwrap_or(path)));
        }
        self.files
            .borrow_mut()
            .entry(path.to_path_buf())
            .or_default()
            .extend_from_slice(contents);
        Ok(())
    }
    fn copy(&self, from: &Path, to: &Path) -> io::Result<()> {
        let contents = self.read(from)?;
        self.write(to, &contents)
    }
    fn remove(&self, path: &Path) -> io::Result<()> {
        if self.is_locked(path) {
            return Err(denied(path));
        }
        self.files.borrow_mut().remove(path).map(|_| ()).ok_or_else(|| not_found(path))
    }
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        if self.is_locked(to) {
            return Err(denied(to));
        }
        let contents = self.files.borrow_mut().remove(from).ok_or_else(|| not_found(from))?;
        self.files.borrow_mut().insert(to.to_path_buf(), contents);
        // the lock follows the open handle, not the name
        let mut locked = self.locked.borrow_mut();
        if locked.remove(from) {
            locked.insert(to.to_path_buf());
        }
        Ok(())
    }
    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        let mut dirs = self.dirs.borrow_mut();
        for ancestor in path.ancestors() {
            if ancestor.as_os_str().is_empty() {
                break;
            }
            dirs.insert(ancestor.to_path_buf());
        }
        Ok(())
    }
    fn list(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        if !self.is_dir(dir) {
            return Err(not_found(dir));
        }
        Ok(self.files.borrow().keys().filter(|p| p.parent() == Some(dir)).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locked_file_can_be_renamed_but_not_removed() {
        let fs = MemoryFs::new();
        fs.insert("/data/nfc.nrm", b"table");
        fs.lock("/data/nfc.nrm");
        assert!(fs.remove(Path::new("/data/nfc.nrm")).is_err());
        fs.rename(Path::new("/data/nfc.nrm"), Path::new("/data/old.nrm")).unwrap();
        assert!(!fs.exists(Path::new("/data/nfc.nrm")));
        assert!(fs.remove(Path::new("/data/old.nrm")).is_err());
        fs.unlock("/data/old.nrm");
        fs.remove(Path::new("/data/old.nrm")).unwrap();
    }

    #[test]
    fn writes_need_an_existing_directory() {
        let fs = MemoryFs::new();
        assert!(fs.write(Path::new("/nowhere/file.txt"), b"x").is_err());
        fs.create_dir_all(Path::new("/somewhere")).unwrap();
        fs.write(Path::new("/somewhere/file.txt"), b"x").unwrap();
        assert_eq!(fs.len(Path::new("/somewhere/file.txt")), Some(1));
    }
}
