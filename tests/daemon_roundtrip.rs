//! Drives a real [`Daemon`] over a Unix socket end to end: a client
//! thread puts and gets an object through [`Store`] while the daemon
//! thread services it, mirroring the split between `phobosd` and a
//! library caller talking to it over the wire.

use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use phobos::adapters::fake::{FakeDeviceAdapter, FakeFilesystem, FakeIo, FakeLibrary};
use phobos::adapters::AdapterRegistry;
use phobos::config::Config;
use phobos::daemon::Daemon;
use phobos::model::{AdmStatus, Device, DeviceId, FsStatus, Medium, MediumFamily, MediumFlags, MediumId, MediumStats};
use phobos::scheduler::Scheduler;
use phobos::store::{SchedulerClient, SocketClient, Store};

fn fixture_scheduler() -> Scheduler {
    let mut library = FakeLibrary::new();
    let mut fs = FakeFilesystem::new(1 << 30);
    let drive_addr = "/dev/fake0";
    let medium_id = MediumId {
        family: MediumFamily::Dir,
        name: "med0".into(),
    };
    library.add_drive(drive_addr);
    library.add_slot("med0", "slot0");
    fs.format(drive_addr, &medium_id.to_string()).unwrap();

    let mut registry = AdapterRegistry::new();
    registry.register_library("fake", Box::new(library));
    registry.register_filesystem("fake", Box::new(fs));
    registry.register_io("fake", Box::new(FakeIo::new()));
    registry.register_device("fake", Box::new(FakeDeviceAdapter::new()));

    let mut scheduler = Scheduler::new("host1", 1, Config::default(), registry, "fake", "fake", "fake");

    let device_id = DeviceId {
        family: MediumFamily::Dir,
        serial: "drv0".into(),
    };
    scheduler.register_device(Device::new(device_id, "host1", "dir-drive", drive_addr));

    let medium = Medium {
        id: medium_id,
        model: "dir-medium".into(),
        fs_type: "posix".into(),
        addr_type: "path".into(),
        adm_status: AdmStatus::Unlocked,
        fs_status: FsStatus::Empty,
        flags: MediumFlags::default(),
        tags: vec![],
        stats: MediumStats {
            phys_free: 1 << 20,
            ..Default::default()
        },
        lock: None,
    };
    scheduler.mediums().insert(medium.id.to_string(), medium).unwrap();
    scheduler
}

#[test]
fn put_and_get_round_trip_over_a_real_socket() {
    let work_dir = tempfile::tempdir().unwrap();
    let original = std::env::current_dir().unwrap();
    std::env::set_current_dir(work_dir.path()).unwrap();

    let socket_dir = tempfile::tempdir().unwrap();
    let socket_path = socket_dir.path().join("lrs.sock");

    let mut daemon = Daemon::bind(&socket_path, fixture_scheduler()).unwrap();
    let stop = Arc::new(AtomicBool::new(false));
    let daemon_stop = Arc::clone(&stop);
    let daemon_thread = thread::spawn(move || daemon.run(&daemon_stop).unwrap());

    // Give the daemon a moment to reach its first poll iteration.
    thread::sleep(Duration::from_millis(50));

    let stream = UnixStream::connect(&socket_path).unwrap();
    let mut client = SocketClient::new(stream);
    let mut io = FakeIo::new();
    let store = Store::new();
    let data = b"round tripped over a unix socket".to_vec();

    let object = store
        .put(&mut client, &mut io, "obj-wire", MediumFamily::Dir, 1, vec![], &data)
        .unwrap();
    assert_eq!(object.state, phobos::model::ObjectState::Sync);

    let read_back = store.get(&mut client, &mut io, "obj-wire").unwrap();
    assert_eq!(read_back, data);

    stop.store(true, Ordering::Relaxed);
    daemon_thread.join().unwrap();
    std::env::set_current_dir(original).unwrap();
}

#[test]
fn ping_gets_a_pong_over_a_real_socket() {
    let socket_dir = tempfile::tempdir().unwrap();
    let socket_path = socket_dir.path().join("lrs.sock");

    let mut daemon = Daemon::bind(&socket_path, fixture_scheduler()).unwrap();
    let stop = Arc::new(AtomicBool::new(false));
    let daemon_stop = Arc::clone(&stop);
    let daemon_thread = thread::spawn(move || daemon.run(&daemon_stop).unwrap());
    thread::sleep(Duration::from_millis(50));

    let stream = UnixStream::connect(&socket_path).unwrap();
    let mut client = SocketClient::new(stream);
    let resp = client.call(phobos::codec::RequestBody::Ping).unwrap();
    assert!(matches!(resp, phobos::codec::ResponseBody::Pong));

    stop.store(true, Ordering::Relaxed);
    daemon_thread.join().unwrap();
}
