//! Wire message types shared by all participants
//!
//! Four payload kinds travel the bus: `FileEvent` (change
//! notifications), `FileContent` (whole small files), `FileChunk`
//! (fragments of large files), and `DirectorySnapshot` (a "what I
//! have" summary). Field invariants are upheld by the encoder and
//! checked again by the receiving side.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A modification time as (seconds, nanoseconds) since the UNIX epoch.
///
/// The derived ordering is lexicographic: seconds first, then
/// nanoseconds. That ordering is the entire conflict policy.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Timestamp {
    /// Whole seconds since the epoch
    pub sec: u64,
    /// Sub-second nanoseconds, always < 1_000_000_000
    pub nsec: u32,
}

impl Timestamp {
    pub const ZERO: Self = Self { sec: 0, nsec: 0 };

    #[must_use]
    pub fn new(sec: u64, nsec: u32) -> Self {
        Self { sec, nsec }
    }

    /// The current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            sec: elapsed.as_secs(),
            nsec: elapsed.subsec_nanos(),
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.sec, self.nsec)
    }
}

/// Kind of change a `FileEvent` announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileOp {
    Create,
    Modify,
    Delete,
}

/// Per-file summary carried in events and snapshots.
///
/// `checksum` is the CRC32 of exactly `size` bytes; `mtime` is the
/// file's own modification time at capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub filename: String,
    pub size: u64,
    pub mtime: Timestamp,
    pub checksum: u32,
}

impl FileMetadata {
    /// Placeholder metadata for operations that carry none (DELETE).
    #[must_use]
    pub fn empty(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            size: 0,
            mtime: Timestamp::ZERO,
            checksum: 0,
        }
    }
}

/// A change notification.
///
/// `emitted_at` is the moment of publication and is the tiebreaker for
/// DELETE (the file no longer exists remotely, so its own mtime is
/// gone). CREATE and MODIFY tiebreak on `metadata.mtime` instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEvent {
    pub filename: String,
    pub op: FileOp,
    pub emitted_at: Timestamp,
    pub metadata: FileMetadata,
}

/// A whole small file. Invariant: `data.len() == size` and
/// `crc32(data) == checksum`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContent {
    pub filename: String,
    pub size: u64,
    pub checksum: u32,
    pub mtime: Timestamp,
    pub data: Bytes,
}

/// One fragment of a chunked transfer.
///
/// Every chunk of a logical transfer shares (total_chunks, file_size,
/// file_checksum, mtime); `chunk_checksum` covers only `data`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChunk {
    pub filename: String,
    pub chunk_id: u32,
    pub total_chunks: u32,
    pub file_size: u64,
    pub file_checksum: u32,
    pub mtime: Timestamp,
    pub chunk_checksum: u32,
    pub data: Bytes,
}

/// Summary of one participant's directory at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectorySnapshot {
    pub participant_id: String,
    pub taken_at: Timestamp,
    pub files: Vec<FileMetadata>,
    pub file_count: u32,
}

impl DirectorySnapshot {
    /// Build a snapshot, keeping `file_count` consistent with the list.
    #[must_use]
    pub fn new(participant_id: impl Into<String>, files: Vec<FileMetadata>) -> Self {
        let file_count = files.len() as u32;
        Self {
            participant_id: participant_id.into(),
            taken_at: Timestamp::now(),
            files,
            file_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_ordering_is_lexicographic() {
        let base = Timestamp::new(100, 500);

        assert!(Timestamp::new(101, 0) > base);
        assert!(Timestamp::new(100, 501) > base);
        assert!(Timestamp::new(100, 499) < base);
        assert!(Timestamp::new(99, 999_999_999) < base);
        assert_eq!(Timestamp::new(100, 500), base);
    }

    #[test]
    fn test_timestamp_display() {
        assert_eq!(Timestamp::new(1000, 42).to_string(), "1000.000000042");
    }

    #[test]
    fn test_snapshot_count_tracks_files() {
        let files = vec![
            FileMetadata::empty("a.txt"),
            FileMetadata::empty("b.txt"),
        ];
        let snapshot = DirectorySnapshot::new("participant-1", files);

        assert_eq!(snapshot.file_count, 2);
        assert_eq!(snapshot.files.len(), 2);
    }

    #[test]
    fn test_empty_metadata_is_zeroed() {
        let meta = FileMetadata::empty("gone.txt");
        assert_eq!(meta.size, 0);
        assert_eq!(meta.checksum, 0);
        assert_eq!(meta.mtime, Timestamp::ZERO);
    }
}
