use std::{
    fs::{self, File},
    io,
    path::{Path, PathBuf},
};

use log::debug;
use walkdir::WalkDir;
use zip::{write::SimpleFileOptions, CompressionMethod, ZipWriter};

use crate::{error_context, keepsake_error, utils::fs::list_subdirs, Result, ResultExt};

/// Zips every subdirectory of `backup_dir` into `backup_dir/<name>.zip`.
/// Returns the archives in name order.
pub fn archive_subdirs(backup_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut archives = Vec::new();
    for dir in list_subdirs(backup_dir)? {
        archives.push(zip_directory(&dir)?);
    }
    Ok(archives)
}

/// Writes `<dir>.zip` next to `dir`. Entries are prefixed with the directory
/// name, so the archive unpacks into a single folder.
#[error_context("Archiving {} failed", dir.display())]
pub fn zip_directory(dir: &Path) -> Result<PathBuf> {
    let name = dir
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            keepsake_error!(ArchiveError {
                description: format!("Cannot archive {}: no usable name", dir.display()),
            })
        })?;
    let target = dir.with_file_name(format!("{name}.zip"));
    debug!("Archiving {} to {}", dir.display(), target.display());

    let file = File::create(&target).context(format!("Creating {} failed", target.display()))?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    zip.add_directory(format!("{name}/"), options)?;
    for entry in WalkDir::new(dir).min_depth(1).sort_by_file_name() {
        let entry = entry?;
        let relative = entry.path().strip_prefix(dir).map_err(|e| {
            keepsake_error!(ArchiveError {
                description: format!("{}: {e}", entry.path().display()),
            })
        })?;
        let entry_name = std::iter::once(name.to_string())
            .chain(
                relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned()),
            )
            .collect::<Vec<_>>()
            .join("/");

        if entry.file_type().is_dir() {
            zip.add_directory(format!("{entry_name}/"), options)?;
        } else if entry.file_type().is_file() {
            zip.start_file(entry_name, options)?;
            let mut source = File::open(entry.path())
                .context(format!("Opening {} failed", entry.path().display()))?;
            io::copy(&mut source, &mut zip)?;
        }
    }
    zip.finish()?;
    Ok(target)
}

/// Size of an archive on disk, for log lines.
pub fn archive_size(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}
