//! dircast-engine: replication orchestration
//!
//! Wires the monitor, encoder, and router onto the transport: publish
//! an initial snapshot and bulk transfer at startup, then poll the
//! shared directory and publish every delta as an event plus the
//! file's bytes.

pub mod config;

pub use config::EngineConfig;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use bytes::Bytes;
use color_eyre::eyre::{bail, WrapErr};
use color_eyre::Result;
use tracing::{debug, error, info};
use uuid::Uuid;

use dircast_core::encoder::{self, TransferFrames};
use dircast_core::fsops;
use dircast_core::message::{
    DirectorySnapshot, FileChunk, FileContent, FileEvent, FileMetadata, FileOp, Timestamp,
};
use dircast_core::monitor::DirectoryMonitor;
use dircast_core::router::EventRouter;
use dircast_core::tracker::SuppressionTracker;
use dircast_transport::{
    PeerHandle, Sample, TopicWriter, DIRECTORY_SNAPSHOT, FILE_CHUNKS, FILE_CONTENT, FILE_EVENTS,
};

/// One participant: monitors a shared directory, publishes its
/// changes, and applies what peers publish.
pub struct ReplicationEngine {
    config: EngineConfig,
    participant_id: String,
    monitor: Arc<DirectoryMonitor>,
    publisher: Arc<Publisher>,
    peer: PeerHandle,
    running: Arc<AtomicBool>,
    scan_thread: Mutex<Option<JoinHandle<()>>>,
}

impl ReplicationEngine {
    /// Validate the shared directory and wire the inbound listeners.
    ///
    /// Listeners go live here, before any peer can have started its
    /// bulk push toward us; `start` only adds the outbound side.
    ///
    /// # Errors
    /// Fails if the path is not a directory or the transport refuses a
    /// topic registration.
    pub fn new(dir: impl Into<PathBuf>, peer: PeerHandle, config: EngineConfig) -> Result<Self> {
        let dir = dir.into();
        if !fsops::is_directory(&dir) {
            bail!("not a directory: {}", dir.display());
        }

        let tracker = Arc::new(SuppressionTracker::new());
        let monitor = Arc::new(DirectoryMonitor::new(&dir, Arc::clone(&tracker)));
        let router = Arc::new(EventRouter::new(&dir, tracker, Arc::clone(&monitor)));

        {
            let router = Arc::clone(&router);
            peer.subscribe(&FILE_EVENTS, move |sample: Sample<FileEvent>| {
                if let Some(event) = sample.into_data() {
                    router.handle_event(&event);
                }
            })?;
        }
        {
            let router = Arc::clone(&router);
            peer.subscribe(&FILE_CONTENT, move |sample: Sample<FileContent>| {
                if let Some(content) = sample.into_data() {
                    router.handle_content(&content);
                }
            })?;
        }
        {
            let router = Arc::clone(&router);
            peer.subscribe(&FILE_CHUNKS, move |sample: Sample<FileChunk>| {
                if let Some(chunk) = sample.into_data() {
                    router.handle_chunk(&chunk);
                }
            })?;
        }
        {
            let router = Arc::clone(&router);
            peer.subscribe(&DIRECTORY_SNAPSHOT, move |sample: Sample<DirectorySnapshot>| {
                if let Some(snapshot) = sample.into_data() {
                    router.handle_snapshot(&snapshot);
                }
            })?;
        }

        let publisher = Arc::new(Publisher {
            dir: dir.clone(),
            events: peer.writer(&FILE_EVENTS)?,
            snapshots: peer.writer(&DIRECTORY_SNAPSHOT)?,
            content: peer.writer(&FILE_CONTENT)?,
            chunks: peer.writer(&FILE_CHUNKS)?,
            chunk_delay: config.chunk_delay(),
        });

        Ok(Self {
            config,
            participant_id: Uuid::new_v4().to_string(),
            monitor,
            publisher,
            peer,
            running: Arc::new(AtomicBool::new(false)),
            scan_thread: Mutex::new(None),
        })
    }

    /// The id this participant stamps on its snapshots.
    #[must_use]
    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    /// Run the startup sequence and spawn the periodic scan loop.
    ///
    /// # Errors
    /// Fails on a second start, on an unreadable directory, or if the
    /// transport rejects the initial publications.
    pub fn start(&self) -> Result<()> {
        let mut thread_slot = self.scan_thread.lock().unwrap();
        if thread_slot.is_some() {
            bail!("engine already started");
        }

        info!(
            "participant {} starting, monitoring {}",
            self.participant_id,
            self.publisher.dir.display(),
        );

        if self.peer.wait_for_peer(self.config.discovery_timeout()) {
            info!("peer discovered");
        } else {
            info!("no other participants discovered yet, continuing");
        }

        // Seed the previous-state map so steady-state scans report only
        // real changes, then summarize the directory for the cluster.
        self.monitor
            .scan()
            .wrap_err("initial directory scan failed")?;
        let files = self
            .monitor
            .snapshot()
            .wrap_err("initial directory snapshot failed")?;

        let snapshot = DirectorySnapshot::new(self.participant_id.clone(), files.clone());
        self.publisher.snapshots.write(snapshot)?;
        info!("initial snapshot published: {} files", files.len());

        // Bulk push: bytes only, no events; peers that already hold a
        // newer copy reject on the timestamp comparison.
        for metadata in &files {
            self.publisher.publish_bytes(metadata);
        }

        self.running.store(true, Ordering::Relaxed);
        let running = Arc::clone(&self.running);
        let monitor = Arc::clone(&self.monitor);
        let publisher = Arc::clone(&self.publisher);
        let poll = self.config.poll_interval();

        let handle = std::thread::Builder::new()
            .name("dircast-scan".to_owned())
            .spawn(move || {
                while running.load(Ordering::Relaxed) {
                    std::thread::sleep(poll);
                    if !running.load(Ordering::Relaxed) {
                        break;
                    }

                    let delta = match monitor.scan() {
                        Ok(delta) => delta,
                        Err(e) => {
                            error!("directory scan failed: {e}");
                            continue;
                        }
                    };

                    for name in &delta.created {
                        info!("file create detected: {name:?}");
                        publisher.publish_change(&monitor, name, FileOp::Create);
                    }
                    for name in &delta.modified {
                        info!("file modify detected: {name:?}");
                        publisher.publish_change(&monitor, name, FileOp::Modify);
                    }
                    for name in &delta.deleted {
                        info!("file delete detected: {name:?}");
                        publisher.publish_delete(name);
                    }
                }
            })
            .wrap_err("failed to spawn scan thread")?;

        *thread_slot = Some(handle);
        Ok(())
    }

    /// Stop the scan loop and wait for it to exit.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.scan_thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    /// Block until the scan loop exits (it only exits via [`stop`]).
    ///
    /// [`stop`]: Self::stop
    pub fn wait(&self) {
        let handle = self.scan_thread.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl Drop for ReplicationEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Outbound side: frames and publishes one file per call.
struct Publisher {
    dir: PathBuf,
    events: TopicWriter<FileEvent>,
    snapshots: TopicWriter<DirectorySnapshot>,
    content: TopicWriter<FileContent>,
    chunks: TopicWriter<FileChunk>,
    chunk_delay: std::time::Duration,
}

impl Publisher {
    /// Publish a change event followed by the file's bytes.
    fn publish_change(&self, monitor: &DirectoryMonitor, name: &str, op: FileOp) {
        let Some(metadata) = monitor.metadata_of(name) else {
            error!("failed to read metadata for {name:?}, skipping publication");
            return;
        };

        let event = FileEvent {
            filename: metadata.filename.clone(),
            op,
            emitted_at: Timestamp::now(),
            metadata: metadata.clone(),
        };
        if let Err(e) = self.events.write(event) {
            error!("failed to publish {op:?} event for {name:?}: {e}");
            return;
        }

        self.publish_bytes(&metadata);
    }

    /// Publish a deletion notice. There are no bytes to send; the
    /// event timestamp is the deletion's tiebreaker on the far side.
    fn publish_delete(&self, name: &str) {
        let event = FileEvent {
            filename: name.to_owned(),
            op: FileOp::Delete,
            emitted_at: Timestamp::now(),
            metadata: FileMetadata::empty(name),
        };
        if let Err(e) = self.events.write(event) {
            error!("failed to publish delete event for {name:?}: {e}");
        }
    }

    /// Frame and publish one file's bytes, whole or chunked.
    fn publish_bytes(&self, metadata: &FileMetadata) {
        let path = fsops::entry_path(&self.dir, &metadata.filename);
        let data = match fsops::read_all(&path) {
            Ok(data) => Bytes::from(data),
            Err(e) => {
                error!("failed to read {}: {e}", path.display());
                return;
            }
        };

        match encoder::encode(metadata, data) {
            TransferFrames::Whole(content) => {
                debug!(
                    "publishing content for {:?} ({} bytes)",
                    metadata.filename, metadata.size,
                );
                if let Err(e) = self.content.write(content) {
                    error!("failed to publish content for {:?}: {e}", metadata.filename);
                }
            }
            TransferFrames::Chunked(chunks) => {
                info!(
                    "publishing {} chunks for {:?} ({} bytes)",
                    chunks.len(),
                    metadata.filename,
                    metadata.size,
                );
                for chunk in chunks {
                    if let Err(e) = self.chunks.write(chunk) {
                        error!("failed to publish chunk for {:?}: {e}", metadata.filename);
                        break;
                    }
                    // Keep the send side from flooding the transport
                    std::thread::sleep(self.chunk_delay);
                }
            }
        }
    }
}

/// Convenience for binaries: validate and normalize the shared
/// directory argument.
///
/// # Errors
/// Fails if the path does not name an existing directory.
pub fn validate_shared_dir(path: &Path) -> Result<PathBuf> {
    if !fsops::is_directory(path) {
        bail!("shared directory does not exist or is not a directory: {}", path.display());
    }
    Ok(path.to_path_buf())
}
