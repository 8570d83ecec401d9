use std::{
    fs::{self, OpenOptions},
    io::Write,
    os::unix::fs::OpenOptionsExt,
    path::{Path, PathBuf},
};

use log::{debug, warn};

use crate::{Result, ResultExt};

/// Names never removed by [`cleanup_dir`].
const ALWAYS_KEPT: [&str; 1] = [".gitkeep"];

/// Creates `path` with mode `0o400` and writes `contents` to it.
///
/// The mode is applied by `open(2)` itself, so the file is never readable by
/// anyone but the owner, not even before the write completes. An existing
/// file at `path` is replaced. A file left incomplete by a failed write is
/// removed.
pub fn write_private_file(path: &Path, contents: &[u8]) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => debug!("Replacing existing credential file {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => (),
        Err(e) => return Err(e).context(format!("Removing stale {} failed", path.display())),
    }

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o400)
        .open(path)
        .context(format!("Creating {} failed", path.display()))?;
    let written = file.write_all(contents).and_then(|()| file.sync_all());
    drop(file);
    discard_on_error(path, written)
}

fn discard_on_error(path: &Path, written: std::io::Result<()>) -> Result<()> {
    if let Err(e) = written {
        if let Err(remove_err) = fs::remove_file(path) {
            warn!("Failed to remove partial file {}: {remove_err}", path.display());
        }
        return Err(e).context(format!("Writing {} failed", path.display()));
    }
    Ok(())
}

/// Creates `path` (and parents) restricted to the owner.
pub fn create_private_dir(path: &Path) -> Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(path)
        .context(format!("Creating directory {} failed", path.display()))
}

/// Removes every entry of `dir` except those named in `keep`.
///
/// Every entry is attempted; the first failure is returned after the sweep so
/// one stubborn file does not leave the rest behind. A missing `dir` is not an
/// error.
pub fn cleanup_dir(dir: &Path, keep: &[&str]) -> Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e).context(format!("Listing {} failed", dir.display())),
    };

    let mut first_error = None;
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if keep.contains(&name.as_ref()) || ALWAYS_KEPT.contains(&name.as_ref()) {
            continue;
        }

        let path = entry.path();
        let result = if entry.file_type()?.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        if let Err(e) = result {
            warn!("Failed to delete {}: {e}", path.display());
            first_error.get_or_insert(e);
        }
    }

    match first_error {
        Some(e) => Err(e).context(format!("Cleaning {} failed", dir.display())),
        None => Ok(()),
    }
}

/// A credential file that is deleted when dropped.
#[derive(Debug)]
pub struct PrivateFile {
    path: PathBuf,
}

impl PrivateFile {
    pub fn create(path: PathBuf, contents: &[u8]) -> Result<Self> {
        write_private_file(&path, contents)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PrivateFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove credential file {}: {e}", self.path.display());
            }
        }
    }
}

/// Regular files directly under `dir`, sorted by name.
pub fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).context(format!("Listing {} failed", dir.display()))? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// Subdirectories directly under `dir`, sorted by name.
pub fn list_subdirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(dir).context(format!("Listing {} failed", dir.display()))? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}
