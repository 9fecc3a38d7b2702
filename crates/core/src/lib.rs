//! dircast-core: Core replication engine
//!
//! Provides change detection, transfer framing and reassembly,
//! conflict policy, and echo suppression for flat-directory
//! replication.

pub mod checksum;
pub mod conflict;
pub mod encoder;
pub mod fsops;
pub mod message;
pub mod monitor;
pub mod reassembly;
pub mod router;
pub mod tracker;

pub use encoder::{TransferFrames, CHUNK_SIZE, CHUNK_THRESHOLD};
pub use message::{
    DirectorySnapshot, FileChunk, FileContent, FileEvent, FileMetadata, FileOp, Timestamp,
};
pub use monitor::{DirectoryMonitor, FileState, ScanDelta};
pub use reassembly::ReassemblyBuffer;
pub use router::{Disposition, EventRouter};
pub use tracker::SuppressionTracker;
