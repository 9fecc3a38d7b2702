//! Filesystem primitives for the shared directory
//!
//! Everything operates on single-segment filenames inside one flat
//! directory. Listing and inbound payload handling both funnel through
//! [`is_valid_filename`] so path traversal can never reach the disk.

use std::io;
use std::path::{Path, PathBuf};

use filetime::FileTime;

use crate::message::Timestamp;

/// Check that a name is a safe single path segment.
///
/// Rejects empty names, anything containing `..`, path separators,
/// leading separators, and Windows drive prefixes (`X:`).
#[must_use]
pub fn is_valid_filename(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }
    if name.contains("..") {
        return false;
    }
    if name.contains('/') || name.contains('\\') {
        return false;
    }
    if name.starts_with('/') || name.starts_with('\\') {
        return false;
    }
    // Drive letter prefix, e.g. "C:\..." with the slash already rejected
    if name.len() >= 2 && name.as_bytes()[1] == b':' {
        return false;
    }
    true
}

/// Join a validated filename onto the shared directory.
#[must_use]
pub fn entry_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(name)
}

/// Read an entire file.
pub fn read_all(path: &Path) -> io::Result<Vec<u8>> {
    std::fs::read(path)
}

/// Write an entire file, truncating any existing content.
pub fn write_all(path: &Path, data: &[u8]) -> io::Result<()> {
    std::fs::write(path, data)
}

/// Size of a file in bytes.
pub fn file_size(path: &Path) -> io::Result<u64> {
    Ok(std::fs::symlink_metadata(path)?.len())
}

/// Modification time of a file.
///
/// Nanosecond precision where the platform provides it; filesystems
/// with coarser clocks report the sub-second part as zero.
pub fn mtime(path: &Path) -> io::Result<Timestamp> {
    let meta = std::fs::symlink_metadata(path)?;
    let ft = FileTime::from_last_modification_time(&meta);
    Ok(Timestamp {
        sec: ft.unix_seconds().max(0) as u64,
        nsec: ft.nanoseconds(),
    })
}

/// Set a file's modification time, leaving the access time untouched.
pub fn set_mtime(path: &Path, ts: Timestamp) -> io::Result<()> {
    let ft = FileTime::from_unix_time(ts.sec as i64, ts.nsec);
    filetime::set_file_mtime(path, ft)
}

/// True iff the path is a regular file. Symlinks, directories, and
/// special files all answer false.
#[must_use]
pub fn exists_regular(path: &Path) -> bool {
    std::fs::symlink_metadata(path)
        .map(|m| m.file_type().is_file())
        .unwrap_or(false)
}

/// True iff the path is a directory.
#[must_use]
pub fn is_directory(path: &Path) -> bool {
    path.is_dir()
}

/// Remove a file.
pub fn unlink(path: &Path) -> io::Result<()> {
    std::fs::remove_file(path)
}

/// List the regular files in a directory, non-recursively.
///
/// Directories, symlinks, special files, non-UTF-8 names, and names
/// failing [`is_valid_filename`] are dropped.
///
/// # Errors
/// Returns an error if the directory itself cannot be read.
pub fn list_regular(dir: &Path) -> io::Result<Vec<String>> {
    let mut files = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        // DirEntry::file_type does not follow symlinks
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if !file_type.is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            continue;
        };
        if is_valid_filename(&name) {
            files.push(name);
        }
    }

    Ok(files)
}
