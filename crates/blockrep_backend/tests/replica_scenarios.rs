//! End-to-end replica scenarios against file-backed and faulty media.

use blockrep_backend::{
    Backend, BackendConfig, BackendError, BackendFactory, FileBackendFactory, MonitorEvent,
    Replica, ReplicaMode, ReplicaSet,
};
use blockrep_storage::{FaultyMedium, FileMedium, MemoryMedium};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::{tempdir, TempDir};

fn config() -> BackendConfig {
    BackendConfig::new()
        .volume_size(1 << 20)
        .ping_timeout(Duration::from_millis(200))
}

fn address(dir: &TempDir, name: &str) -> String {
    dir.path().join(name).to_string_lossy().into_owned()
}

#[test]
fn write_snapshot_checkpoint() {
    let dir = tempdir().unwrap();
    let vol1 = address(&dir, "vol1");
    let factory = FileBackendFactory::new(config());

    let backend = factory.create(&vol1).unwrap();
    assert_eq!(backend.revision_counter().unwrap(), 0);
    assert!(backend.replica_chain().unwrap().is_empty());

    assert_eq!(backend.write_at(0, &[0x5A; 4096]).unwrap(), 4096);
    backend.set_revision_counter(1).unwrap();
    backend
        .snapshot("snap1", true, "2024-01-01T00:00:00Z")
        .unwrap();
    backend.set_checkpoint("snap1").unwrap();

    assert_eq!(backend.revision_counter().unwrap(), 1);
    assert_eq!(backend.replica_chain().unwrap(), vec!["snap1"]);
    assert_eq!(backend.checkpoint().unwrap().as_deref(), Some("snap1"));
    assert!(Path::new(&vol1).join("snapshots").join("snap1.img").exists());

    backend.close().unwrap();
}

#[test]
fn second_create_on_live_address_fails() {
    let dir = tempdir().unwrap();
    let vol1 = address(&dir, "vol1");
    let factory = FileBackendFactory::new(config());

    let first = factory.create(&vol1).unwrap();
    assert!(matches!(
        factory.create(&vol1),
        Err(BackendError::AlreadyExists { .. })
    ));

    // The live backend is untouched.
    first.write_at(0, b"still mine").unwrap();
    assert_eq!(first.read_at(0, 10).unwrap(), b"still mine");
}

#[test]
fn counter_regression_is_rejected() {
    let dir = tempdir().unwrap();
    let backend = FileBackendFactory::new(config())
        .create(&address(&dir, "vol1"))
        .unwrap();

    backend.set_revision_counter(5).unwrap();
    assert!(matches!(
        backend.set_revision_counter(3),
        Err(BackendError::RevisionRegression { .. })
    ));
    assert_eq!(backend.revision_counter().unwrap(), 5);
}

#[test]
fn duplicate_snapshot_is_rejected() {
    let dir = tempdir().unwrap();
    let backend = FileBackendFactory::new(config())
        .create(&address(&dir, "vol1"))
        .unwrap();

    backend.snapshot("snap1", true, "t1").unwrap();
    assert!(matches!(
        backend.snapshot("snap1", false, "t2"),
        Err(BackendError::DuplicateSnapshot { .. })
    ));
    assert_eq!(backend.replica_chain().unwrap(), vec!["snap1"]);
    assert!(backend.snapshot_info("snap1").unwrap().user_created);
}

#[test]
fn leaving_error_requires_recovery() {
    let dir = tempdir().unwrap();
    let backend = FileBackendFactory::new(config())
        .create(&address(&dir, "vol1"))
        .unwrap();

    backend.set_replica_mode(ReplicaMode::Error).unwrap();
    assert!(matches!(
        backend.set_replica_mode(ReplicaMode::Normal),
        Err(BackendError::InvalidTransition {
            from: ReplicaMode::Error,
            to: ReplicaMode::Normal
        })
    ));

    backend.acknowledge_recovery(ReplicaMode::Rebuilding).unwrap();
    backend.set_rebuilding(false).unwrap();
    assert_eq!(backend.replica_mode().unwrap(), ReplicaMode::Normal);
}

#[test]
fn state_survives_reopen() {
    let dir = tempdir().unwrap();
    let vol1 = address(&dir, "vol1");
    let factory = FileBackendFactory::new(config());

    {
        let backend = factory.create(&vol1).unwrap();
        backend.write_at(8192, b"persistent").unwrap();
        backend.set_revision_counter(42).unwrap();
        backend.snapshot("snap1", true, "t1").unwrap();
        backend.snapshot("snap2", false, "t2").unwrap();
        backend.set_checkpoint("snap1").unwrap();
        backend.resize("vol1", 2 << 20).unwrap();
        backend.sync().unwrap();
        backend.close().unwrap();
    }

    let backend = factory.create(&vol1).unwrap();
    assert_eq!(backend.read_at(8192, 10).unwrap(), b"persistent");
    assert_eq!(backend.revision_counter().unwrap(), 42);
    assert_eq!(backend.replica_chain().unwrap(), vec!["snap1", "snap2"]);
    assert_eq!(backend.checkpoint().unwrap().as_deref(), Some("snap1"));
    assert_eq!(backend.size().unwrap(), 2 << 20);
    assert_eq!(backend.replica_mode().unwrap(), ReplicaMode::Normal);
}

#[test]
fn snapshot_capture_holds_point_in_time_data() {
    let dir = tempdir().unwrap();
    let vol1 = address(&dir, "vol1");
    let backend = FileBackendFactory::new(config()).create(&vol1).unwrap();

    backend.write_at(0, b"before").unwrap();
    backend.snapshot("snap1", true, "t").unwrap();
    backend.write_at(0, b"after!").unwrap();

    let captured = std::fs::read(Path::new(&vol1).join("snapshots").join("snap1.img")).unwrap();
    assert_eq!(&captured[..6], b"before");
    assert_eq!(backend.read_at(0, 6).unwrap(), b"after!");
}

#[test]
fn medium_failure_is_signalled_before_the_error_returns() {
    let dir = tempdir().unwrap();
    let medium = FaultyMedium::new(FileMedium::open(&dir.path().join("vol1")).unwrap());
    let faults = medium.faults();
    let replica = Replica::open("vol1", medium, &config()).unwrap();
    let rx = replica.monitor_channel().unwrap();

    replica.write_at(0, b"ok").unwrap();
    faults.fail_io(true);

    let err = replica.read_at(0, 2).unwrap_err();
    assert!(err.is_medium_failure());
    assert!(err.is_retryable());

    let events: Vec<_> = rx.try_iter().collect();
    assert_eq!(events.len(), 2);
    assert!(matches!(events[0], MonitorEvent::Failed { .. }));
    assert_eq!(
        events[1],
        MonitorEvent::ModeChanged {
            from: ReplicaMode::Normal,
            to: ReplicaMode::Error,
        }
    );
    assert!(matches!(
        replica.write_at(0, b"no"),
        Err(BackendError::ModeRejected { .. })
    ));
}

#[test]
fn stalled_medium_fails_ping() {
    let medium = FaultyMedium::new(MemoryMedium::new());
    let faults = medium.faults();
    let replica = Replica::open("mem://stall", medium, &config()).unwrap();
    let rx = replica.monitor_channel().unwrap();

    faults.stall_probe(Some(Duration::from_secs(1)));
    let err = replica.ping_response().unwrap_err();
    assert!(matches!(err, BackendError::Unresponsive { .. }));
    assert_eq!(replica.replica_mode().unwrap(), ReplicaMode::Error);
    assert!(matches!(rx.try_recv().unwrap(), MonitorEvent::Failed { .. }));
}

#[test]
fn rebuild_join_through_replica_set() {
    let dir = tempdir().unwrap();
    let factory = Arc::new(FileBackendFactory::new(config()));
    let set = ReplicaSet::new(factory);

    let healthy = set.attach(&address(&dir, "r1")).unwrap();
    let joining = set.attach_for_rebuild(&address(&dir, "r2")).unwrap();

    healthy.write_at(0, &[1; 4096]).unwrap();
    healthy.set_revision_counter(1).unwrap();

    // Catch up, then mark healthy.
    let data = healthy.read_at(0, 4096).unwrap();
    joining.write_at(0, &data).unwrap();
    joining.set_revision_counter(healthy.revision_counter().unwrap()).unwrap();
    joining.set_rebuilding(false).unwrap();

    assert_eq!(joining.replica_mode().unwrap(), ReplicaMode::Normal);
    assert!(set.check_health().is_empty());

    let events = set.drain_events();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|(address, _)| address.ends_with("r2")));

    set.shutdown().unwrap();
    assert!(set.is_empty());
}
