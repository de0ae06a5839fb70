//! Readers running alongside writers, snapshots, resizes and close.

use blockrep_backend::{
    Backend, BackendConfig, BackendError, BackendFactory, FileBackendFactory,
    MemoryBackendFactory,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::tempdir;

const SECTOR: usize = 4096;
const SECTORS: usize = 4;

fn memory_backend() -> Arc<dyn Backend> {
    MemoryBackendFactory::new(BackendConfig::new().volume_size(64 * 1024))
        .create("mem://concurrent")
        .unwrap()
}

/// Rewrites the first sectors with alternating whole-sector patterns until
/// `stop` is set.
fn spawn_pattern_writer(backend: Arc<dyn Backend>, stop: Arc<AtomicBool>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let patterns = [[0xAAu8; SECTOR], [0x55u8; SECTOR]];
        let mut round = 0usize;
        while !stop.load(Ordering::SeqCst) {
            for sector in 0..SECTORS {
                let pattern = &patterns[(round + sector) % 2];
                backend
                    .write_at((sector * SECTOR) as u64, pattern)
                    .unwrap();
            }
            round += 1;
        }
    })
}

fn assert_sectors_uniform(backend: &dyn Backend, rounds: usize) {
    for _ in 0..rounds {
        for sector in 0..SECTORS {
            let data = backend.read_at((sector * SECTOR) as u64, SECTOR).unwrap();
            let first = data[0];
            assert!(
                first == 0 || first == 0xAA || first == 0x55,
                "unexpected byte {first:#x} in sector {sector}"
            );
            assert!(
                data.iter().all(|&b| b == first),
                "sector {sector} mixes old and new contents"
            );
        }
    }
}

#[test]
fn readers_see_whole_sectors_during_writes() {
    let backend = memory_backend();
    let stop = Arc::new(AtomicBool::new(false));
    let writer = spawn_pattern_writer(Arc::clone(&backend), Arc::clone(&stop));

    let readers: Vec<_> = (0..3)
        .map(|_| {
            let backend = Arc::clone(&backend);
            thread::spawn(move || assert_sectors_uniform(backend.as_ref(), 200))
        })
        .collect();
    for reader in readers {
        reader.join().unwrap();
    }

    stop.store(true, Ordering::SeqCst);
    writer.join().unwrap();
}

#[test]
fn file_readers_see_whole_sectors_during_writes() {
    let dir = tempdir().unwrap();
    let address = dir.path().join("vol1").to_string_lossy().into_owned();
    let backend = FileBackendFactory::new(BackendConfig::new().volume_size(64 * 1024))
        .create(&address)
        .unwrap();
    let stop = Arc::new(AtomicBool::new(false));
    let writer = spawn_pattern_writer(Arc::clone(&backend), Arc::clone(&stop));

    let reader = {
        let backend = Arc::clone(&backend);
        thread::spawn(move || assert_sectors_uniform(backend.as_ref(), 50))
    };
    reader.join().unwrap();

    stop.store(true, Ordering::SeqCst);
    writer.join().unwrap();
    backend.close().unwrap();
}

#[test]
fn chain_readers_see_growing_prefixes() {
    let backend = memory_backend();
    let names: Vec<String> = (0..40).map(|i| format!("snap{i}")).collect();
    let done = Arc::new(AtomicBool::new(false));

    let reader = {
        let backend = Arc::clone(&backend);
        let names = names.clone();
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut seen = 0;
            while !done.load(Ordering::SeqCst) {
                let chain = backend.replica_chain().unwrap();
                assert!(chain.len() >= seen, "chain shrank from {seen} to {}", chain.len());
                assert_eq!(chain, names[..chain.len()]);
                seen = chain.len();
            }
        })
    };

    for name in &names {
        backend.snapshot(name, true, "t").unwrap();
    }
    done.store(true, Ordering::SeqCst);
    reader.join().unwrap();
    assert_eq!(backend.replica_chain().unwrap(), names);
}

#[test]
fn size_and_usage_stay_consistent_during_resize() {
    let backend = memory_backend();
    let sizes: Vec<u64> = (1..=16).map(|i| 64 * 1024 + i * 4096).collect();
    let done = Arc::new(AtomicBool::new(false));

    let reader = {
        let backend = Arc::clone(&backend);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut last_size = 0;
            let mut last_revision = 0;
            while !done.load(Ordering::SeqCst) {
                let size = backend.size().unwrap();
                assert_eq!(size % 4096, 0);
                assert!(size >= last_size, "size went back from {last_size} to {size}");
                last_size = size;

                let usage = backend.vol_usage().unwrap();
                assert_eq!(usage.total_bytes % usage.sector_size, 0);
                assert!(usage.total_bytes >= 64 * 1024);
                assert!(usage.revision_counter >= last_revision);
                last_revision = usage.revision_counter;
            }
        })
    };

    for (revision, &size) in sizes.iter().enumerate() {
        backend.resize("vol1", size).unwrap();
        backend.set_revision_counter(revision as u64 + 1).unwrap();
    }
    done.store(true, Ordering::SeqCst);
    reader.join().unwrap();

    assert_eq!(backend.size().unwrap(), *sizes.last().unwrap());
    assert_eq!(backend.vol_usage().unwrap().revision_counter, sizes.len() as u64);
}

#[test]
fn close_stops_concurrent_callers() {
    let backend = memory_backend();
    let workers: Vec<_> = (0..4)
        .map(|i| {
            let backend = Arc::clone(&backend);
            thread::spawn(move || loop {
                let result = if i % 2 == 0 {
                    backend.write_at(0, &[i as u8; 512]).map(|_| ())
                } else {
                    backend.revision_counter().map(|_| ())
                };
                match result {
                    Ok(()) => {}
                    Err(BackendError::Closed) => return,
                    Err(e) => panic!("unexpected error: {e}"),
                }
            })
        })
        .collect();

    thread::sleep(Duration::from_millis(50));
    backend.close().unwrap();
    for worker in workers {
        worker.join().unwrap();
    }
    assert!(matches!(backend.read_at(0, 1), Err(BackendError::Closed)));
}
