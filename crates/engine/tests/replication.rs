//! End-to-end replication scenarios: two engines over one in-process
//! bus, each on its own scratch directory.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use dircast_core::fsops;
use dircast_core::message::{FileEvent, Timestamp};
use dircast_engine::{EngineConfig, ReplicationEngine};
use dircast_transport::{MemBus, Sample, FILE_EVENTS};

fn test_config() -> EngineConfig {
    EngineConfig {
        poll_interval_ms: 25,
        discovery_timeout_secs: 0,
        chunk_delay_ms: 0,
    }
}

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    cond()
}

fn seed_file(dir: &Path, name: &str, data: &[u8], mtime: Timestamp) {
    let path = dir.join(name);
    std::fs::write(&path, data).unwrap();
    fsops::set_mtime(&path, mtime).unwrap();
}

/// Counts every FileEvent published by anyone on the bus. The probe's
/// peer handle must stay alive for the duration of the test.
fn event_probe(bus: &MemBus) -> (Arc<AtomicUsize>, dircast_transport::PeerHandle) {
    let probe = bus.join();
    let count = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&count);
    probe
        .subscribe(&FILE_EVENTS, move |sample: Sample<FileEvent>| {
            if sample.is_valid() {
                counter.fetch_add(1, Ordering::Relaxed);
            }
        })
        .unwrap();
    (count, probe)
}

#[test]
fn small_file_propagates_without_echo() {
    let bus = MemBus::new();
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();

    seed_file(dir_a.path(), "alpha.txt", &[0x48, 0x69], Timestamp::new(1000, 0));

    let (events, _probe) = event_probe(&bus);

    let engine_b = ReplicationEngine::new(dir_b.path(), bus.join(), test_config()).unwrap();
    let engine_a = ReplicationEngine::new(dir_a.path(), bus.join(), test_config()).unwrap();
    engine_b.start().unwrap();
    engine_a.start().unwrap();

    let target = dir_b.path().join("alpha.txt");
    assert!(
        wait_until(Duration::from_secs(10), || std::fs::read(&target)
            .map(|d| d == [0x48, 0x69])
            .unwrap_or(false)),
        "alpha.txt did not propagate to B"
    );
    assert_eq!(fsops::mtime(&target).unwrap(), Timestamp::new(1000, 0));

    // Let several scan periods pass: neither side may publish an
    // event for a file it received from the other
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(events.load(Ordering::Relaxed), 0, "replication echoed");

    engine_a.stop();
    engine_b.stop();
}

#[test]
fn large_file_chunks_and_reassembles() {
    let bus = MemBus::new();
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();

    // 10 MiB + 1 byte: eleven chunks, the last a single byte
    let size = 10 * 1024 * 1024 + 1;
    let data: Vec<u8> = (0..size).map(|i| (i % 253) as u8).collect();
    seed_file(dir_a.path(), "beta.bin", &data, Timestamp::new(1000, 0));

    let engine_b = ReplicationEngine::new(dir_b.path(), bus.join(), test_config()).unwrap();
    let engine_a = ReplicationEngine::new(dir_a.path(), bus.join(), test_config()).unwrap();
    engine_b.start().unwrap();
    engine_a.start().unwrap();

    let target = dir_b.path().join("beta.bin");
    assert!(
        wait_until(Duration::from_secs(30), || fsops::file_size(&target)
            .map(|s| s == size as u64)
            .unwrap_or(false)),
        "beta.bin did not finish reassembly at B"
    );
    assert_eq!(std::fs::read(&target).unwrap(), data);

    engine_a.stop();
    engine_b.stop();
}

#[test]
fn last_writer_wins_favors_newer_mtime() {
    let bus = MemBus::new();
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();

    seed_file(dir_a.path(), "gamma.txt", b"from A!", Timestamp::new(2000, 0));
    seed_file(dir_b.path(), "gamma.txt", b"from B!", Timestamp::new(1500, 0));

    let engine_b = ReplicationEngine::new(dir_b.path(), bus.join(), test_config()).unwrap();
    let engine_a = ReplicationEngine::new(dir_a.path(), bus.join(), test_config()).unwrap();
    engine_b.start().unwrap();
    engine_a.start().unwrap();

    let at_b = dir_b.path().join("gamma.txt");
    assert!(
        wait_until(Duration::from_secs(10), || std::fs::read(&at_b)
            .map(|d| d == b"from A!")
            .unwrap_or(false)),
        "B did not adopt A's newer file"
    );
    assert_eq!(fsops::mtime(&at_b).unwrap(), Timestamp::new(2000, 0));

    // A's copy was never overwritten by B's older push
    let at_a = dir_a.path().join("gamma.txt");
    assert_eq!(std::fs::read(&at_a).unwrap(), b"from A!");
    assert_eq!(fsops::mtime(&at_a).unwrap(), Timestamp::new(2000, 0));

    engine_a.stop();
    engine_b.stop();
}

#[test]
fn last_writer_wins_reversed() {
    let bus = MemBus::new();
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();

    // Same exchange with the mtimes swapped: B's copy must prevail
    seed_file(dir_a.path(), "gamma.txt", b"from A!", Timestamp::new(1500, 0));
    seed_file(dir_b.path(), "gamma.txt", b"from B!", Timestamp::new(2000, 0));

    let engine_b = ReplicationEngine::new(dir_b.path(), bus.join(), test_config()).unwrap();
    let engine_a = ReplicationEngine::new(dir_a.path(), bus.join(), test_config()).unwrap();
    engine_b.start().unwrap();
    engine_a.start().unwrap();

    let at_a = dir_a.path().join("gamma.txt");
    assert!(
        wait_until(Duration::from_secs(10), || std::fs::read(&at_a)
            .map(|d| d == b"from B!")
            .unwrap_or(false)),
        "A did not adopt B's newer file"
    );
    assert_eq!(fsops::mtime(&at_a).unwrap(), Timestamp::new(2000, 0));

    let at_b = dir_b.path().join("gamma.txt");
    assert_eq!(std::fs::read(&at_b).unwrap(), b"from B!");

    engine_a.stop();
    engine_b.stop();
}

#[test]
fn modification_propagates() {
    let bus = MemBus::new();
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();

    seed_file(dir_a.path(), "doc.txt", b"v1", Timestamp::new(1000, 0));
    seed_file(dir_b.path(), "doc.txt", b"v1", Timestamp::new(1000, 0));

    let engine_b = ReplicationEngine::new(dir_b.path(), bus.join(), test_config()).unwrap();
    let engine_a = ReplicationEngine::new(dir_a.path(), bus.join(), test_config()).unwrap();
    engine_b.start().unwrap();
    engine_a.start().unwrap();

    // Give both engines a steady-state scan, then modify at A. The
    // stamp is in the future so the edit wins the comparison even if
    // a scan catches the write before the stamp lands.
    let edited_at = Timestamp::new(4_000_000_000, 0);
    std::thread::sleep(Duration::from_millis(100));
    seed_file(dir_a.path(), "doc.txt", b"v2 edited", edited_at);

    let at_b = dir_b.path().join("doc.txt");
    assert!(
        wait_until(Duration::from_secs(10), || std::fs::read(&at_b)
            .map(|d| d == b"v2 edited")
            .unwrap_or(false)),
        "modification did not reach B"
    );
    assert!(
        wait_until(Duration::from_secs(10), || fsops::mtime(&at_b).unwrap() == edited_at),
        "edited mtime did not reach B"
    );

    engine_a.stop();
    engine_b.stop();
}

#[test]
fn deletion_propagates_once() {
    let bus = MemBus::new();
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();

    seed_file(dir_a.path(), "zeta.txt", b"bytes", Timestamp::new(1000, 0));
    seed_file(dir_b.path(), "zeta.txt", b"bytes", Timestamp::new(1000, 0));

    let (events, _probe) = event_probe(&bus);

    let engine_b = ReplicationEngine::new(dir_b.path(), bus.join(), test_config()).unwrap();
    let engine_a = ReplicationEngine::new(dir_a.path(), bus.join(), test_config()).unwrap();
    engine_b.start().unwrap();
    engine_a.start().unwrap();

    std::thread::sleep(Duration::from_millis(100));
    std::fs::remove_file(dir_a.path().join("zeta.txt")).unwrap();

    let at_b = dir_b.path().join("zeta.txt");
    assert!(
        wait_until(Duration::from_secs(10), || !at_b.exists()),
        "deletion did not reach B"
    );

    // B's unlink must not be re-detected and published back
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(
        events.load(Ordering::Relaxed),
        1,
        "expected exactly the one delete event"
    );

    engine_a.stop();
    engine_b.stop();
}

#[test]
fn creation_after_startup_propagates() {
    let bus = MemBus::new();
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();

    let engine_b = ReplicationEngine::new(dir_b.path(), bus.join(), test_config()).unwrap();
    let engine_a = ReplicationEngine::new(dir_a.path(), bus.join(), test_config()).unwrap();
    engine_b.start().unwrap();
    engine_a.start().unwrap();

    let created_at = Timestamp::new(4_000_000_000, 0);
    std::thread::sleep(Duration::from_millis(100));
    seed_file(dir_a.path(), "fresh.txt", b"hot off the press", created_at);

    let at_b = dir_b.path().join("fresh.txt");
    assert!(
        wait_until(Duration::from_secs(10), || std::fs::read(&at_b)
            .map(|d| d == b"hot off the press")
            .unwrap_or(false)),
        "created file did not reach B"
    );
    assert!(
        wait_until(Duration::from_secs(10), || fsops::mtime(&at_b).unwrap() == created_at),
        "created mtime did not reach B"
    );

    engine_a.stop();
    engine_b.stop();
}
