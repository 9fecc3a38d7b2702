//! Reassembly of chunked inbound transfers
//!
//! Chunks for a filename may arrive in any order; the first one seen
//! sizes the accumulator, and completion requires every index to have
//! landed. Per-chunk and whole-file checksums are verified here so the
//! router only ever sees validated bytes.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Mutex;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::checksum::crc32;
use crate::encoder::CHUNK_SIZE;
use crate::message::{FileChunk, Timestamp};

/// Why a chunk or a finished transfer was rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChunkError {
    #[error("chunk id {chunk_id} out of range (total_chunks {total_chunks})")]
    IdOutOfRange { chunk_id: u32, total_chunks: u32 },

    #[error("chunk {chunk_id} checksum mismatch: declared {declared:#010x}, computed {computed:#010x}")]
    ChunkChecksum {
        chunk_id: u32,
        declared: u32,
        computed: u32,
    },

    #[error("chunk {chunk_id} metadata disagrees with the transfer in progress")]
    MetadataMismatch { chunk_id: u32 },

    #[error("chunk {chunk_id} overruns the declared file size")]
    OutOfBounds { chunk_id: u32 },

    #[error("reassembled file checksum mismatch: declared {declared:#010x}, computed {computed:#010x}")]
    FileChecksum { declared: u32, computed: u32 },
}

/// Progress after accepting one chunk.
#[derive(Debug)]
pub enum ChunkProgress {
    /// Stored; more chunks outstanding.
    Pending { received: u32, total: u32 },
    /// Every chunk landed and the whole-file checksum verified.
    Complete(AssembledFile),
}

/// A fully reassembled, checksum-verified file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledFile {
    pub filename: String,
    pub size: u64,
    pub checksum: u32,
    pub mtime: Timestamp,
    pub data: Vec<u8>,
}

struct Accumulator {
    total_chunks: u32,
    file_size: u64,
    file_checksum: u32,
    mtime: Timestamp,
    data: Vec<u8>,
    received: Vec<bool>,
    received_count: u32,
}

impl Accumulator {
    fn new(chunk: &FileChunk) -> Self {
        Self {
            total_chunks: chunk.total_chunks,
            file_size: chunk.file_size,
            file_checksum: chunk.file_checksum,
            mtime: chunk.mtime,
            data: vec![0u8; chunk.file_size as usize],
            received: vec![false; chunk.total_chunks as usize],
            received_count: 0,
        }
    }

    fn matches(&self, chunk: &FileChunk) -> bool {
        self.total_chunks == chunk.total_chunks
            && self.file_size == chunk.file_size
            && self.file_checksum == chunk.file_checksum
            && self.mtime == chunk.mtime
    }
}

/// Per-filename accumulators for in-flight chunked transfers.
#[derive(Default)]
pub struct ReassemblyBuffer {
    transfers: Mutex<HashMap<String, Accumulator>>,
}

impl ReassemblyBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and store one chunk.
    ///
    /// A chunk whose shared transfer metadata disagrees with the
    /// accumulator is dropped, unless it carries a strictly newer
    /// mtime: then it announces a newer transfer of the same file and
    /// replaces the stale accumulator outright. Duplicate chunks with
    /// identical payloads are idempotent.
    ///
    /// On the final chunk the whole-file checksum is verified; a
    /// mismatch discards the accumulator and fails the transfer.
    pub fn accept(&self, chunk: &FileChunk) -> Result<ChunkProgress, ChunkError> {
        if chunk.total_chunks == 0 || chunk.chunk_id >= chunk.total_chunks {
            return Err(ChunkError::IdOutOfRange {
                chunk_id: chunk.chunk_id,
                total_chunks: chunk.total_chunks,
            });
        }

        let computed = crc32(&chunk.data);
        if computed != chunk.chunk_checksum {
            return Err(ChunkError::ChunkChecksum {
                chunk_id: chunk.chunk_id,
                declared: chunk.chunk_checksum,
                computed,
            });
        }

        let mut transfers = self.transfers.lock().unwrap();

        let acc = match transfers.entry(chunk.filename.clone()) {
            Entry::Occupied(mut entry) => {
                if !entry.get().matches(chunk) {
                    if chunk.mtime > entry.get().mtime {
                        info!(
                            "restarting reassembly of {:?} for a newer transfer ({} over {})",
                            chunk.filename,
                            chunk.mtime,
                            entry.get().mtime,
                        );
                        *entry.get_mut() = Accumulator::new(chunk);
                    } else {
                        return Err(ChunkError::MetadataMismatch {
                            chunk_id: chunk.chunk_id,
                        });
                    }
                }
                entry.into_mut()
            }
            Entry::Vacant(entry) => {
                info!(
                    "starting reassembly of {:?} ({} bytes, {} chunks)",
                    chunk.filename, chunk.file_size, chunk.total_chunks,
                );
                entry.insert(Accumulator::new(chunk))
            }
        };

        let offset = chunk.chunk_id as u64 * CHUNK_SIZE as u64;
        if offset + chunk.data.len() as u64 > acc.file_size {
            return Err(ChunkError::OutOfBounds {
                chunk_id: chunk.chunk_id,
            });
        }

        let start = offset as usize;
        acc.data[start..start + chunk.data.len()].copy_from_slice(&chunk.data);
        if !acc.received[chunk.chunk_id as usize] {
            acc.received[chunk.chunk_id as usize] = true;
            acc.received_count += 1;
        }

        debug!(
            "reassembly progress for {:?}: {}/{} chunks",
            chunk.filename, acc.received_count, acc.total_chunks,
        );

        if acc.received_count < acc.total_chunks {
            return Ok(ChunkProgress::Pending {
                received: acc.received_count,
                total: acc.total_chunks,
            });
        }

        // Complete: the accumulator comes out of the map either way
        let acc = transfers.remove(&chunk.filename).expect("accumulator present");
        let computed = crc32(&acc.data);
        if computed != acc.file_checksum {
            warn!(
                "discarding reassembled {:?}: file checksum mismatch",
                chunk.filename,
            );
            return Err(ChunkError::FileChecksum {
                declared: acc.file_checksum,
                computed,
            });
        }

        Ok(ChunkProgress::Complete(AssembledFile {
            filename: chunk.filename.clone(),
            size: acc.file_size,
            checksum: acc.file_checksum,
            mtime: acc.mtime,
            data: acc.data,
        }))
    }

    /// Number of transfers currently in flight.
    #[must_use]
    pub fn pending_transfers(&self) -> usize {
        self.transfers.lock().unwrap().len()
    }
}
