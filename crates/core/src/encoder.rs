//! Outbound transfer framing
//!
//! Small files travel as one `FileContent`; anything at or above the
//! chunk threshold is split into fixed-size `FileChunk`s that the
//! receiving side reassembles. All integrity fields are filled here.

use bytes::Bytes;

use crate::checksum::crc32;
use crate::message::{FileChunk, FileContent, FileMetadata};

/// Files strictly smaller than this are sent whole.
pub const CHUNK_THRESHOLD: u64 = 10 * 1024 * 1024;

/// Size of every chunk except possibly the last.
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Frames produced for one file transfer.
#[derive(Debug, Clone)]
pub enum TransferFrames {
    Whole(FileContent),
    Chunked(Vec<FileChunk>),
}

/// Number of chunks a file of `size` bytes splits into.
#[must_use]
pub fn chunk_count(size: u64) -> u32 {
    size.div_ceil(CHUNK_SIZE as u64) as u32
}

/// Frame a file for publication.
///
/// The caller supplies the metadata captured together with the bytes;
/// the whole-file checksum in `metadata` must cover `data`.
#[must_use]
pub fn encode(metadata: &FileMetadata, data: Bytes) -> TransferFrames {
    if metadata.size < CHUNK_THRESHOLD {
        return TransferFrames::Whole(FileContent {
            filename: metadata.filename.clone(),
            size: metadata.size,
            checksum: metadata.checksum,
            mtime: metadata.mtime,
            data,
        });
    }

    let total_chunks = chunk_count(metadata.size);
    let mut chunks = Vec::with_capacity(total_chunks as usize);

    for chunk_id in 0..total_chunks {
        // Clamp against the actual byte count: a file that shrank
        // between stat and read yields short frames the receiver's
        // whole-file checksum then rejects
        let offset = (chunk_id as usize * CHUNK_SIZE).min(data.len());
        let end = (offset + CHUNK_SIZE).min(data.len());
        // Bytes::slice is a refcount bump, not a copy
        let chunk_data = data.slice(offset..end);

        chunks.push(FileChunk {
            filename: metadata.filename.clone(),
            chunk_id,
            total_chunks,
            file_size: metadata.size,
            file_checksum: metadata.checksum,
            mtime: metadata.mtime,
            chunk_checksum: crc32(&chunk_data),
            data: chunk_data,
        });
    }

    TransferFrames::Chunked(chunks)
}
