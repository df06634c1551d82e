//! Builds a [`Scheduler`] wired with in-memory fake adapters and a
//! handful of `dir`-family drives, the same shape `phobos`'s own unit
//! tests use, for the scenarios in this harness to drive end to end.

use phobos::adapters::fake::{FakeDeviceAdapter, FakeFilesystem, FakeIo, FakeLibrary};
use phobos::adapters::AdapterRegistry;
use phobos::config::Config;
use phobos::model::{AdmStatus, Device, DeviceId, FsStatus, Medium, MediumFamily, MediumFlags, MediumId, MediumStats};
use phobos::scheduler::Scheduler;

/// A scheduler with `n_devices` `dir` drives, each carrying a formatted,
/// `empty` medium with `capacity` bytes free.
pub fn build(n_devices: usize, capacity: u64) -> Scheduler {
    let mut library = FakeLibrary::new();
    let mut fs = FakeFilesystem::new(1 << 30);

    for n in 0..n_devices {
        let drive_addr = format!("/dev/fake{n}");
        let medium_id = MediumId {
            family: MediumFamily::Dir,
            name: format!("med{n}"),
        };
        library.add_drive(&drive_addr);
        library.add_slot(format!("med{n}"), format!("slot{n}"));
        fs.format(&drive_addr, &medium_id.to_string()).unwrap();
    }

    let mut registry = AdapterRegistry::new();
    registry.register_library("fake", Box::new(library));
    registry.register_filesystem("fake", Box::new(fs));
    registry.register_io("fake", Box::new(FakeIo::new()));
    registry.register_device("fake", Box::new(FakeDeviceAdapter::new()));

    let mut scheduler = Scheduler::new("harness-host", std::process::id(), Config::default(), registry, "fake", "fake", "fake");

    for n in 0..n_devices {
        let device_id = DeviceId {
            family: MediumFamily::Dir,
            serial: format!("drv{n}"),
        };
        scheduler.register_device(Device::new(device_id, "harness-host", "dir-drive", format!("/dev/fake{n}")));

        let medium = Medium {
            id: MediumId {
                family: MediumFamily::Dir,
                name: format!("med{n}"),
            },
            model: "dir-medium".into(),
            fs_type: "posix".into(),
            addr_type: "path".into(),
            adm_status: AdmStatus::Unlocked,
            fs_status: FsStatus::Empty,
            flags: MediumFlags::default(),
            tags: vec![],
            stats: MediumStats {
                phys_free: capacity,
                ..Default::default()
            },
            lock: None,
        };
        scheduler.mediums().insert(medium.id.to_string(), medium).unwrap();
    }
    scheduler
}
