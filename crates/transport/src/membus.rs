//! In-process topic bus
//!
//! Each topic gets its own dispatcher thread: publications on one
//! topic reach subscribers in publication order, while distinct topics
//! deliver concurrently, which is exactly the ordering surface the
//! replication core is written against. Transient-local topics replay
//! retained samples to late-joining subscribers. A peer never hears
//! its own publications back.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use color_eyre::eyre::eyre;
use color_eyre::Result;
use tracing::{debug, trace};

use crate::{Durability, History, Sample, TopicSpec, RETAINED_SAMPLE_LIMIT};

/// Identity of one joined peer, used to suppress loopback delivery.
pub(crate) type PeerId = u64;

type Listener<T> = Box<dyn Fn(Sample<T>) + Send>;

enum Op<T> {
    Publish { data: T, origin: PeerId },
    Subscribe { listener: Listener<T>, owner: PeerId },
}

struct TopicCore<T> {
    tx: Sender<Op<T>>,
}

/// Shared bus state: the topic registry and peer accounting.
struct BusInner {
    topics: Mutex<HashMap<&'static str, Arc<dyn Any + Send + Sync>>>,
    peer_count: Mutex<usize>,
    discovered: Condvar,
    next_peer: AtomicU64,
}

/// An in-process pub/sub bus shared by every participant in the
/// process.
#[derive(Clone)]
pub struct MemBus {
    inner: Arc<BusInner>,
}

impl Default for MemBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MemBus {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                topics: Mutex::new(HashMap::new()),
                peer_count: Mutex::new(0),
                discovered: Condvar::new(),
                next_peer: AtomicU64::new(1),
            }),
        }
    }

    /// Join the bus as a new participant.
    #[must_use]
    pub fn join(&self) -> PeerHandle {
        let id = self.inner.next_peer.fetch_add(1, Ordering::Relaxed);
        {
            let mut count = self.inner.peer_count.lock().unwrap();
            *count += 1;
            self.inner.discovered.notify_all();
        }
        debug!("peer {id} joined the bus");
        PeerHandle {
            inner: Arc::clone(&self.inner),
            id,
        }
    }
}

impl BusInner {
    /// Find or create the dispatcher for a topic.
    fn topic_core<T: Clone + Send + 'static>(&self, spec: &TopicSpec) -> Result<Arc<TopicCore<T>>> {
        let mut topics = self.topics.lock().unwrap();

        if let Some(existing) = topics.get(spec.name) {
            return Arc::clone(existing)
                .downcast::<TopicCore<T>>()
                .map_err(|_| eyre!("topic {:?} already registered with another payload type", spec.name));
        }

        let core = Arc::new(spawn_dispatcher::<T>(*spec)?);
        topics.insert(spec.name, Arc::clone(&core) as Arc<dyn Any + Send + Sync>);
        Ok(core)
    }
}

/// Start the per-topic dispatcher thread and hand back its channel.
fn spawn_dispatcher<T: Clone + Send + 'static>(spec: TopicSpec) -> Result<TopicCore<T>> {
    let (tx, rx) = mpsc::channel::<Op<T>>();

    std::thread::Builder::new()
        .name(format!("bus:{}", spec.name))
        .spawn(move || {
            let mut listeners: Vec<(PeerId, Listener<T>)> = Vec::new();
            let mut retained: VecDeque<(PeerId, T)> = VecDeque::new();
            let replay = spec.qos.durability == Durability::TransientLocal;
            let depth = match spec.qos.history {
                History::KeepLast(n) => n,
                History::KeepAll => RETAINED_SAMPLE_LIMIT,
            };

            while let Ok(op) = rx.recv() {
                match op {
                    Op::Publish { data, origin } => {
                        trace!("topic {:?}: sample from peer {origin}", spec.name);
                        if replay {
                            retained.push_back((origin, data.clone()));
                            while retained.len() > depth {
                                retained.pop_front();
                            }
                        }
                        for (owner, listener) in &listeners {
                            if *owner != origin {
                                listener(Sample::valid(data.clone()));
                            }
                        }
                    }
                    Op::Subscribe { listener, owner } => {
                        if replay {
                            for (origin, data) in &retained {
                                if *origin != owner {
                                    listener(Sample::valid(data.clone()));
                                }
                            }
                        }
                        listeners.push((owner, listener));
                    }
                }
            }
        })
        .map_err(|e| eyre!("failed to spawn dispatcher for {:?}: {e}", spec.name))?;

    Ok(TopicCore { tx })
}

/// One participant's attachment to the bus.
pub struct PeerHandle {
    inner: Arc<BusInner>,
    id: PeerId,
}

impl PeerHandle {
    /// Create a writer for a topic.
    ///
    /// # Errors
    /// Fails if the topic name is already bound to a different payload
    /// type.
    pub fn writer<T: Clone + Send + 'static>(&self, spec: &TopicSpec) -> Result<TopicWriter<T>> {
        let core = self.inner.topic_core::<T>(spec)?;
        Ok(TopicWriter {
            tx: core.tx.clone(),
            origin: self.id,
            topic: spec.name,
        })
    }

    /// Subscribe a listener to a topic. The listener runs on the
    /// topic's dispatcher thread; retained samples are replayed first
    /// on transient-local topics.
    ///
    /// # Errors
    /// Fails if the topic name is already bound to a different payload
    /// type.
    pub fn subscribe<T, F>(&self, spec: &TopicSpec, listener: F) -> Result<()>
    where
        T: Clone + Send + 'static,
        F: Fn(Sample<T>) + Send + 'static,
    {
        let core = self.inner.topic_core::<T>(spec)?;
        core.tx
            .send(Op::Subscribe {
                listener: Box::new(listener),
                owner: self.id,
            })
            .map_err(|_| eyre!("topic {:?} dispatcher is gone", spec.name))
    }

    /// Block until at least one other peer has joined the bus, or the
    /// timeout elapses. Returns whether a peer was seen.
    #[must_use]
    pub fn wait_for_peer(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.inner.peer_count.lock().unwrap();
        loop {
            if *count >= 2 {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, result) = self
                .inner
                .discovered
                .wait_timeout(count, deadline - now)
                .unwrap();
            count = guard;
            if result.timed_out() && *count < 2 {
                return false;
            }
        }
    }
}

impl Drop for PeerHandle {
    fn drop(&mut self) {
        let mut count = self.inner.peer_count.lock().unwrap();
        *count = count.saturating_sub(1);
    }
}

/// Handle for publishing samples on one topic.
pub struct TopicWriter<T> {
    tx: Sender<Op<T>>,
    origin: PeerId,
    topic: &'static str,
}

impl<T: Clone + Send + 'static> TopicWriter<T> {
    /// Publish one sample.
    ///
    /// # Errors
    /// Fails if the topic dispatcher has shut down.
    pub fn write(&self, data: T) -> Result<()> {
        self.tx
            .send(Op::Publish {
                data,
                origin: self.origin,
            })
            .map_err(|_| eyre!("topic {:?} dispatcher is gone", self.topic))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;

    use crate::{FILE_CONTENT, FILE_EVENTS};

    #[test]
    fn test_delivery_between_peers() {
        let bus = MemBus::new();
        let writer_peer = bus.join();
        let reader_peer = bus.join();

        let (tx, rx) = channel();
        reader_peer
            .subscribe(&FILE_CONTENT, move |sample: Sample<String>| {
                tx.send(sample.into_data().unwrap()).unwrap();
            })
            .unwrap();

        let writer = writer_peer.writer::<String>(&FILE_CONTENT).unwrap();
        writer.write("hello".to_owned()).unwrap();

        assert_eq!(
            rx.recv_timeout(Duration::from_secs(1)).unwrap(),
            "hello"
        );
    }

    #[test]
    fn test_per_topic_ordering() {
        let bus = MemBus::new();
        let writer_peer = bus.join();
        let reader_peer = bus.join();

        let (tx, rx) = channel();
        reader_peer
            .subscribe(&FILE_CONTENT, move |sample: Sample<u32>| {
                tx.send(sample.into_data().unwrap()).unwrap();
            })
            .unwrap();

        let writer = writer_peer.writer::<u32>(&FILE_CONTENT).unwrap();
        for i in 0..100 {
            writer.write(i).unwrap();
        }

        for want in 0..100 {
            assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), want);
        }
    }

    #[test]
    fn test_no_loopback_delivery() {
        let bus = MemBus::new();
        let peer = bus.join();
        let other = bus.join();

        let (tx, rx) = channel();
        peer.subscribe(&FILE_CONTENT, move |sample: Sample<&'static str>| {
            tx.send(sample.into_data().unwrap()).unwrap();
        })
        .unwrap();

        peer.writer::<&'static str>(&FILE_CONTENT)
            .unwrap()
            .write("own")
            .unwrap();
        other
            .writer::<&'static str>(&FILE_CONTENT)
            .unwrap()
            .write("theirs")
            .unwrap();

        // Only the foreign sample arrives
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), "theirs");
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn test_transient_local_replays_to_late_joiner() {
        let bus = MemBus::new();
        let early = bus.join();

        let writer = early.writer::<u32>(&FILE_EVENTS).unwrap();
        writer.write(1).unwrap();
        writer.write(2).unwrap();

        // Joins after the publications
        let late = bus.join();
        let (tx, rx) = channel();
        late.subscribe(&FILE_EVENTS, move |sample: Sample<u32>| {
            tx.send(sample.into_data().unwrap()).unwrap();
        })
        .unwrap();

        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), 1);
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), 2);
    }

    #[test]
    fn test_volatile_does_not_replay() {
        let bus = MemBus::new();
        let early = bus.join();

        early
            .writer::<u32>(&FILE_CONTENT)
            .unwrap()
            .write(99)
            .unwrap();

        let late = bus.join();
        let (tx, rx) = channel();
        late.subscribe(&FILE_CONTENT, move |sample: Sample<u32>| {
            tx.send(sample.into_data().unwrap()).unwrap();
        })
        .unwrap();

        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn test_history_depth_bounds_replay() {
        let bus = MemBus::new();
        let early = bus.join();

        // DIRECTORY_SNAPSHOT keeps only the last sample
        let writer = early.writer::<u32>(&crate::DIRECTORY_SNAPSHOT).unwrap();
        for i in 0..5 {
            writer.write(i).unwrap();
        }

        let late = bus.join();
        let (tx, rx) = channel();
        late.subscribe(&crate::DIRECTORY_SNAPSHOT, move |sample: Sample<u32>| {
            tx.send(sample.into_data().unwrap()).unwrap();
        })
        .unwrap();

        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), 4);
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn test_wait_for_peer() {
        let bus = MemBus::new();
        let alone = bus.join();
        assert!(!alone.wait_for_peer(Duration::from_millis(50)));

        let bus2 = bus.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            bus2.join()
        });

        assert!(alone.wait_for_peer(Duration::from_secs(2)));
        let _other = handle.join().unwrap();
    }

    #[test]
    fn test_type_mismatch_is_an_error() {
        let bus = MemBus::new();
        let peer = bus.join();

        let _writer = peer.writer::<u32>(&FILE_CONTENT).unwrap();
        assert!(peer.writer::<String>(&FILE_CONTENT).is_err());
    }
}
