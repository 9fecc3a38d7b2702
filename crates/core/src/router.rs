//! Inbound payload routing and conflict policy
//!
//! One handler per topic. Each handler decides accept-or-reject on its
//! own, because cross-topic delivery order is not guaranteed: content
//! can arrive before the event that announced it and vice versa.
//! Failures are folded into the returned [`Disposition`] and logged,
//! never propagated back to the transport.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::checksum::crc32;
use crate::conflict::remote_wins;
use crate::fsops;
use crate::message::{DirectorySnapshot, FileContent, FileChunk, FileEvent, FileOp, Timestamp};
use crate::monitor::{DirectoryMonitor, FileState};
use crate::reassembly::{AssembledFile, ChunkError, ChunkProgress, ReassemblyBuffer};
use crate::tracker::SuppressionTracker;

/// Why an inbound payload could not be applied.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("declared size {declared} does not match payload length {actual}")]
    SizeMismatch { declared: u64, actual: u64 },

    #[error("content checksum mismatch: declared {declared:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { declared: u32, computed: u32 },

    #[error(transparent)]
    Chunk(#[from] ChunkError),

    #[error("i/o failure for {filename:?}: {source}")]
    Io {
        filename: String,
        #[source]
        source: std::io::Error,
    },
}

/// Outcome of handling one inbound payload.
#[derive(Debug)]
pub enum Disposition {
    /// Filename failed validation; payload dropped.
    InvalidFilename,
    /// CREATE for a file that already exists locally.
    AlreadyPresent,
    /// Event accepted; the bytes will arrive as content or chunks.
    AwaitingTransfer,
    /// The remote change lost the modification-time comparison.
    StaleRemote,
    /// DELETE (or stale chunk finalize) for a file not present locally.
    Missing,
    /// Bytes installed and timestamp restored.
    Applied,
    /// Local file unlinked on behalf of a remote DELETE.
    Deleted,
    /// Chunk stored; the transfer is still incomplete.
    ChunkPending { received: u32, total: u32 },
    /// Validation or I/O failure; details logged.
    Failed(RouterError),
}

/// Per-topic inbound handlers over one shared directory.
///
/// Constructed with everything it needs up front: the directory, the
/// suppression tracker, and the monitor whose previous-state map must
/// learn about remote-applied changes before suppression is lifted.
pub struct EventRouter {
    dir: PathBuf,
    tracker: Arc<SuppressionTracker>,
    monitor: Arc<DirectoryMonitor>,
    reassembly: ReassemblyBuffer,
}

impl EventRouter {
    #[must_use]
    pub fn new(
        dir: impl Into<PathBuf>,
        tracker: Arc<SuppressionTracker>,
        monitor: Arc<DirectoryMonitor>,
    ) -> Self {
        Self {
            dir: dir.into(),
            tracker,
            monitor,
            reassembly: ReassemblyBuffer::new(),
        }
    }

    /// Handle a change notification.
    pub fn handle_event(&self, event: &FileEvent) -> Disposition {
        if !fsops::is_valid_filename(&event.filename) {
            warn!("rejecting event with invalid filename {:?}", event.filename);
            return Disposition::InvalidFilename;
        }

        debug!("received {:?} event for {:?}", event.op, event.filename);

        match event.op {
            FileOp::Create => self.on_create(event),
            FileOp::Modify => self.on_modify(event),
            FileOp::Delete => self.on_delete(event),
        }
    }

    fn on_create(&self, event: &FileEvent) -> Disposition {
        let path = fsops::entry_path(&self.dir, &event.filename);
        if fsops::exists_regular(&path) {
            debug!("{:?} already exists locally, ignoring create", event.filename);
            return Disposition::AlreadyPresent;
        }

        // The bytes follow on the content or chunk topic; make sure the
        // monitor does not republish the incoming write.
        self.tracker.suppress(&event.filename);
        Disposition::AwaitingTransfer
    }

    fn on_modify(&self, event: &FileEvent) -> Disposition {
        let path = fsops::entry_path(&self.dir, &event.filename);
        if !fsops::exists_regular(&path) {
            debug!("{:?} missing locally, treating modify as create", event.filename);
            self.tracker.suppress(&event.filename);
            return Disposition::AwaitingTransfer;
        }

        let local = match fsops::mtime(&path) {
            Ok(ts) => ts,
            Err(e) => {
                error!("failed to stat {}: {e}", path.display());
                return Disposition::Failed(RouterError::Io {
                    filename: event.filename.clone(),
                    source: e,
                });
            }
        };

        if remote_wins(local, event.metadata.mtime) {
            debug!(
                "remote {:?} is newer ({} over {}), awaiting content",
                event.filename, event.metadata.mtime, local,
            );
            self.tracker.suppress(&event.filename);
            Disposition::AwaitingTransfer
        } else {
            info!(
                "local {:?} is newer or same ({} vs {}), ignoring modify",
                event.filename, local, event.metadata.mtime,
            );
            Disposition::StaleRemote
        }
    }

    fn on_delete(&self, event: &FileEvent) -> Disposition {
        let path = fsops::entry_path(&self.dir, &event.filename);
        if !fsops::exists_regular(&path) {
            debug!("{:?} already absent, ignoring delete", event.filename);
            return Disposition::Missing;
        }

        let local = match fsops::mtime(&path) {
            Ok(ts) => ts,
            Err(e) => {
                error!("failed to stat {}: {e}", path.display());
                return Disposition::Failed(RouterError::Io {
                    filename: event.filename.clone(),
                    source: e,
                });
            }
        };

        // The file no longer exists remotely, so the event timestamp
        // is the only remote time there is to compare against.
        if !remote_wins(local, event.emitted_at) {
            info!(
                "local {:?} is newer than the delete ({} vs {}), keeping it",
                event.filename, local, event.emitted_at,
            );
            return Disposition::StaleRemote;
        }

        self.tracker.suppress(&event.filename);
        match fsops::unlink(&path) {
            Ok(()) => {
                info!("deleted {:?} per remote event", event.filename);
                self.monitor.note_removed(&event.filename);
                self.tracker.resume(&event.filename);
                Disposition::Deleted
            }
            Err(e) => {
                error!("failed to delete {}: {e}", path.display());
                self.tracker.resume(&event.filename);
                Disposition::Failed(RouterError::Io {
                    filename: event.filename.clone(),
                    source: e,
                })
            }
        }
    }

    /// Handle a whole-file payload.
    ///
    /// Suppression for the filename is released on every exit path so
    /// a failed or rejected transfer can never wedge the monitor.
    pub fn handle_content(&self, content: &FileContent) -> Disposition {
        if !fsops::is_valid_filename(&content.filename) {
            warn!("rejecting content with invalid filename {:?}", content.filename);
            return Disposition::InvalidFilename;
        }

        let disposition = self.apply_content(content);
        self.tracker.resume(&content.filename);
        disposition
    }

    fn apply_content(&self, content: &FileContent) -> Disposition {
        if content.size != content.data.len() as u64 {
            error!(
                "size mismatch for {:?}: declared {}, payload {}",
                content.filename,
                content.size,
                content.data.len(),
            );
            return Disposition::Failed(RouterError::SizeMismatch {
                declared: content.size,
                actual: content.data.len() as u64,
            });
        }

        let computed = crc32(&content.data);
        if computed != content.checksum {
            error!(
                "checksum mismatch for {:?}: declared {:#010x}, computed {computed:#010x}",
                content.filename, content.checksum,
            );
            return Disposition::Failed(RouterError::ChecksumMismatch {
                declared: content.checksum,
                computed,
            });
        }

        self.install(
            &content.filename,
            content.mtime,
            content.checksum,
            &content.data,
        )
    }

    /// Handle one chunk of a large transfer.
    pub fn handle_chunk(&self, chunk: &FileChunk) -> Disposition {
        if !fsops::is_valid_filename(&chunk.filename) {
            warn!("rejecting chunk with invalid filename {:?}", chunk.filename);
            return Disposition::InvalidFilename;
        }

        match self.reassembly.accept(chunk) {
            Ok(ChunkProgress::Pending { received, total }) => {
                Disposition::ChunkPending { received, total }
            }
            Ok(ChunkProgress::Complete(file)) => {
                let disposition = self.finalize_assembled(&file);
                self.tracker.resume(&file.filename);
                disposition
            }
            Err(e) => {
                warn!("dropping chunk {} of {:?}: {e}", chunk.chunk_id, chunk.filename);
                if matches!(e, ChunkError::FileChecksum { .. }) {
                    // The transfer is dead, not just one chunk of it
                    self.tracker.resume(&chunk.filename);
                }
                Disposition::Failed(RouterError::Chunk(e))
            }
        }
    }

    fn finalize_assembled(&self, file: &AssembledFile) -> Disposition {
        // Integrity was verified during reassembly; only the conflict
        // policy and installation remain.
        self.install(&file.filename, file.mtime, file.checksum, &file.data)
    }

    /// Handle a peer's directory summary.
    ///
    /// Passive by design: the peer's own durable bulk push delivers
    /// the bytes, so missing entries are only reported, not requested.
    /// Local files absent from the snapshot are left alone.
    pub fn handle_snapshot(&self, snapshot: &DirectorySnapshot) -> Vec<String> {
        info!(
            "snapshot from participant {} with {} files",
            snapshot.participant_id, snapshot.file_count,
        );

        let mut missing = Vec::new();
        for entry in &snapshot.files {
            if !fsops::is_valid_filename(&entry.filename) {
                warn!(
                    "ignoring snapshot entry with invalid filename {:?}",
                    entry.filename,
                );
                continue;
            }
            let path = fsops::entry_path(&self.dir, &entry.filename);
            if !fsops::exists_regular(&path) {
                debug!("{:?} listed by peer but missing locally", entry.filename);
                missing.push(entry.filename.clone());
            }
        }

        if !missing.is_empty() {
            info!("{} files missing locally, awaiting peer transfers", missing.len());
        }
        missing
    }

    /// Write validated bytes to disk, restore the originator's mtime,
    /// and absorb the new state into the monitor before the caller
    /// lifts suppression.
    fn install(
        &self,
        filename: &str,
        remote_mtime: Timestamp,
        checksum: u32,
        data: &[u8],
    ) -> Disposition {
        let path = fsops::entry_path(&self.dir, filename);

        // Bulk-push transfers arrive without a preceding event, so no
        // suppression is active yet. Cover the write-and-absorb window
        // here; the calling handler resumes on every exit path.
        self.tracker.suppress(filename);

        if fsops::exists_regular(&path) {
            // Stat failures fall through to the write: if the local
            // file is unreadable there is nothing worth protecting.
            if let Ok(local) = fsops::mtime(&path) {
                if !remote_wins(local, remote_mtime) {
                    info!(
                        "local {filename:?} is newer or same ({local} vs {remote_mtime}), ignoring transfer",
                    );
                    return Disposition::StaleRemote;
                }
            }
        }

        if let Err(e) = fsops::write_all(&path, data) {
            error!("failed to write {}: {e}", path.display());
            return Disposition::Failed(RouterError::Io {
                filename: filename.to_owned(),
                source: e,
            });
        }

        if let Err(e) = fsops::set_mtime(&path, remote_mtime) {
            // The bytes landed; a missing timestamp only skews future
            // conflict comparisons toward this replica.
            warn!("failed to restore mtime on {}: {e}", path.display());
        }

        // Absorb what actually landed on disk so the next scan does
        // not republish the remote's own write.
        let applied_mtime = fsops::mtime(&path).unwrap_or(remote_mtime);
        self.monitor.note_applied(
            filename,
            FileState {
                size: data.len() as u64,
                mtime: applied_mtime,
                checksum,
            },
        );

        info!(
            "installed {filename:?} ({} bytes, checksum {checksum:#010x})",
            data.len(),
        );
        Disposition::Applied
    }
}
