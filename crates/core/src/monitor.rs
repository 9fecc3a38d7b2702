//! Periodic directory change detection
//!
//! The monitor diffs the shared directory against the snapshot taken
//! by the previous scan and classifies each file as created, modified,
//! or deleted. Files under suppression are invisible to the diff: a
//! write performed on behalf of a remote participant must not be
//! detected here and republished, or it would echo around the cluster
//! forever.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use color_eyre::Result;
use color_eyre::eyre::WrapErr;
use tracing::{debug, warn};

use crate::checksum::crc32_file;
use crate::fsops;
use crate::message::{FileMetadata, Timestamp};
use crate::tracker::SuppressionTracker;

/// Observed state of one file, as compared between scans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileState {
    pub size: u64,
    pub mtime: Timestamp,
    pub checksum: u32,
}

/// Result of one scan pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanDelta {
    pub created: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
}

impl ScanDelta {
    /// True when the scan observed no changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }
}

/// Polling monitor over one flat directory.
pub struct DirectoryMonitor {
    dir: PathBuf,
    tracker: Arc<SuppressionTracker>,
    previous: Mutex<HashMap<String, FileState>>,
}

impl DirectoryMonitor {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, tracker: Arc<SuppressionTracker>) -> Self {
        Self {
            dir: dir.into(),
            tracker,
            previous: Mutex::new(HashMap::new()),
        }
    }

    /// The monitored directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Diff the directory against the previous scan.
    ///
    /// A file that cannot be read or stat'd is skipped for this pass;
    /// it will surface on a later scan once readable again, or as a
    /// deletion if it disappears from the listing. A listing failure
    /// leaves the previous state untouched.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be listed.
    pub fn scan(&self) -> Result<ScanDelta> {
        let mut previous = self.previous.lock().unwrap();

        let names = fsops::list_regular(&self.dir)
            .wrap_err_with(|| format!("failed to list directory {}", self.dir.display()))?;

        let mut current: HashMap<String, FileState> = HashMap::with_capacity(names.len());
        for name in names {
            match self.probe(&name) {
                Some(state) => {
                    current.insert(name, state);
                }
                None => {
                    debug!("skipping unreadable file {name:?} for this scan");
                }
            }
        }

        let mut delta = ScanDelta::default();
        let mut next: HashMap<String, FileState> = HashMap::with_capacity(current.len());

        for (name, state) in current {
            if self.tracker.is_suppressed(&name) {
                // A remote update is in flight: do not classify, and
                // keep the pre-overwrite row so the file compares
                // against its old state once suppression ends.
                debug!("skipping suppressed file {name:?}");
                if let Some(old) = previous.get(&name) {
                    next.insert(name, old.clone());
                }
                continue;
            }

            match previous.get(&name) {
                None => delta.created.push(name.clone()),
                Some(old) if *old != state => delta.modified.push(name.clone()),
                _ => {}
            }
            next.insert(name, state);
        }

        for (name, old) in previous.iter() {
            if next.contains_key(name) {
                continue;
            }
            if self.tracker.is_suppressed(name) {
                // Withhold the deletion and retain the row
                next.insert(name.clone(), old.clone());
            } else {
                delta.deleted.push(name.clone());
            }
        }

        *previous = next;

        delta.created.sort();
        delta.modified.sort();
        delta.deleted.sort();

        Ok(delta)
    }

    /// Metadata for every regular file currently in the directory.
    ///
    /// Files that fail to read or stat are left out.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be listed.
    pub fn snapshot(&self) -> Result<Vec<FileMetadata>> {
        let _guard = self.previous.lock().unwrap();

        let names = fsops::list_regular(&self.dir)
            .wrap_err_with(|| format!("failed to list directory {}", self.dir.display()))?;

        let mut result = Vec::with_capacity(names.len());
        for name in names {
            if let Some(state) = self.probe(&name) {
                result.push(metadata_from_state(name, &state));
            }
        }
        result.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(result)
    }

    /// Metadata for a single file, or `None` if it is missing or
    /// unreadable.
    #[must_use]
    pub fn metadata_of(&self, name: &str) -> Option<FileMetadata> {
        let state = self.probe(name)?;
        Some(metadata_from_state(name.to_owned(), &state))
    }

    /// Record that a file was just installed on behalf of a remote
    /// participant, so the next scan does not re-detect the write.
    ///
    /// Callers invoke this while the name is still suppressed, after
    /// the bytes and mtime have landed on disk.
    pub fn note_applied(&self, name: &str, state: FileState) {
        self.previous.lock().unwrap().insert(name.to_owned(), state);
    }

    /// Record that a file was just unlinked on behalf of a remote
    /// participant, so the next scan does not republish the deletion.
    pub fn note_removed(&self, name: &str) {
        self.previous.lock().unwrap().remove(name);
    }

    fn probe(&self, name: &str) -> Option<FileState> {
        let path = fsops::entry_path(&self.dir, name);
        let size = fsops::file_size(&path).ok()?;
        let mtime = fsops::mtime(&path).ok()?;
        let checksum = match crc32_file(&path) {
            Ok(crc) => crc,
            Err(e) => {
                warn!("failed to checksum {}: {e}", path.display());
                return None;
            }
        };
        Some(FileState {
            size,
            mtime,
            checksum,
        })
    }
}

fn metadata_from_state(filename: String, state: &FileState) -> FileMetadata {
    FileMetadata {
        filename,
        size: state.size,
        mtime: state.mtime,
        checksum: state.checksum,
    }
}
