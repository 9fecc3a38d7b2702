//! dircast-transport: Topic pub/sub layer
//!
//! The replication core only assumes a transport that offers reliable
//! per-topic delivery, durability hints for late joiners, and a
//! per-sample validity flag. This crate pins that contract down as
//! types and ships an in-process bus that honors it; a networked
//! binding (the original system rode on DDS/RTPS) can be swapped in
//! behind the same topic specs.

pub mod membus;

pub use membus::{MemBus, PeerHandle, TopicWriter};

/// Delivery guarantee for a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reliability {
    /// Every sample reaches every subscriber, retransmitted on loss.
    Reliable,
    /// Samples may be dropped under pressure.
    BestEffort,
}

/// What a late-joining subscriber sees of earlier publications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Durability {
    /// No replay; only samples published after subscription.
    Volatile,
    /// Retained samples are replayed to new subscribers.
    TransientLocal,
}

/// How many samples a topic retains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum History {
    /// Keep only the most recent `n` samples.
    KeepLast(usize),
    /// Keep everything, bounded by [`RETAINED_SAMPLE_LIMIT`].
    KeepAll,
}

/// Hard cap on retained samples for `History::KeepAll` topics.
pub const RETAINED_SAMPLE_LIMIT: usize = 1000;

/// Quality-of-service profile for one topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QosProfile {
    pub reliability: Reliability,
    pub durability: Durability,
    pub history: History,
}

/// A named topic and its delivery profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopicSpec {
    pub name: &'static str,
    pub qos: QosProfile,
}

/// Change notifications; replayed to late joiners so a fresh peer
/// catches up on recent activity.
pub const FILE_EVENTS: TopicSpec = TopicSpec {
    name: "dircast/file-events",
    qos: QosProfile {
        reliability: Reliability::Reliable,
        durability: Durability::TransientLocal,
        history: History::KeepLast(100),
    },
};

/// Per-participant directory summaries; the latest one is replayed to
/// late joiners.
pub const DIRECTORY_SNAPSHOT: TopicSpec = TopicSpec {
    name: "dircast/directory-snapshot",
    qos: QosProfile {
        reliability: Reliability::Reliable,
        durability: Durability::TransientLocal,
        history: History::KeepLast(1),
    },
};

/// Whole small files; live subscribers only.
pub const FILE_CONTENT: TopicSpec = TopicSpec {
    name: "dircast/file-content",
    qos: QosProfile {
        reliability: Reliability::Reliable,
        durability: Durability::Volatile,
        history: History::KeepLast(1),
    },
};

/// Fragments of large files; every in-flight chunk is kept until
/// delivered, bounded by resource limits.
pub const FILE_CHUNKS: TopicSpec = TopicSpec {
    name: "dircast/file-chunks",
    qos: QosProfile {
        reliability: Reliability::Reliable,
        durability: Durability::Volatile,
        history: History::KeepAll,
    },
};

/// One received sample.
///
/// A sample without data only signals a topic state change; handlers
/// must check validity before use.
#[derive(Debug, Clone)]
pub struct Sample<T> {
    data: Option<T>,
}

impl<T> Sample<T> {
    /// A sample carrying payload data.
    #[must_use]
    pub fn valid(data: T) -> Self {
        Self { data: Some(data) }
    }

    /// A data-less sample.
    #[must_use]
    pub fn invalid() -> Self {
        Self { data: None }
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.data.is_some()
    }

    /// Take the payload, if any.
    #[must_use]
    pub fn into_data(self) -> Option<T> {
        self.data
    }
}
