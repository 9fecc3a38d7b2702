//! Last-writer-wins conflict policy
//!
//! Replication conflicts resolve by strict modification-time ordering;
//! ties favor the side that already holds the file.

use crate::message::Timestamp;

/// Should an incoming change overwrite the local state?
///
/// True only when the remote timestamp is strictly newer under
/// lexicographic (sec, nsec) ordering. Equal timestamps keep the
/// local copy, which is what lets a participant reject the echo of
/// its own write coming back from a peer.
#[must_use]
pub fn remote_wins(local: Timestamp, remote: Timestamp) -> bool {
    remote > local
}
