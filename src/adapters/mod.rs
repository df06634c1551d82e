//! Adapter traits and their static registry.
//!
//! The original process loads these as dynamically-linked shared objects
//! behind a function-pointer table (Design Notes, "Polymorphic modules").
//! Here each capability set is a trait, and [`AdapterRegistry`] is the
//! "array of constructors keyed by `(kind, name)`" the Design Notes call
//! for: adapters are registered once at start-up (see `phobosd.rs`) and
//! looked up by name thereafter. A capability with no registered adapter
//! yields [`PhoError::NotSupported`], never a panic.

pub mod fake;

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{PhoError, PhoResult};

/// Status of one drive as seen by the library/robot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveStatus {
    pub addr: String,
    pub loaded: bool,
    pub loaded_label: Option<String>,
}

/// The tape-library (or equivalent robotic mover) capability set.
pub trait LibraryAdapter: Send + Sync + fmt::Debug {
    fn open(&mut self, lib_dev: &str) -> PhoResult<()>;
    fn close(&mut self) -> PhoResult<()>;
    /// Slot/drive address currently holding the medium with this label.
    fn lookup(&self, label: &str) -> PhoResult<String>;
    fn drive_lookup(&self, serial: &str) -> PhoResult<DriveStatus>;
    fn move_medium(&mut self, src_addr: &str, dst_addr: &str) -> PhoResult<()>;
    fn status(&self) -> PhoResult<Vec<DriveStatus>>;
    fn refresh(&mut self) -> PhoResult<()>;
}

/// Free/used space and access mode of a mounted filesystem root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DfInfo {
    pub used: u64,
    pub avail: u64,
    pub readonly: bool,
}

/// The per-backing-filesystem capability set.
pub trait FilesystemAdapter: Send + Sync + fmt::Debug {
    /// Formats the device and returns the usable space it reports.
    fn format(&mut self, device_path: &str, label: &str) -> PhoResult<DfInfo>;
    /// Idempotent: a no-op if `device_path` is already mounted at `root`.
    fn mount(&mut self, device_path: &str, root: &Path, label: &str) -> PhoResult<()>;
    fn umount(&mut self, device_path: &str, root: &Path) -> PhoResult<()>;
    fn df(&self, root: &Path) -> PhoResult<DfInfo>;
    fn get_label(&self, root: &Path) -> PhoResult<String>;
    fn mounted_at(&self, device_path: &str) -> PhoResult<Option<PathBuf>>;
}

/// An opaque I/O descriptor handed back by [`IoAdapter::open`] and
/// threaded through the rest of the calls for that transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IoDescriptor(pub u64);

/// The per-backing-filesystem byte-level I/O capability set.
pub trait IoAdapter: Send + Sync + fmt::Debug {
    fn open(&mut self, extent_key: &str, oid: &str, is_put: bool) -> PhoResult<IoDescriptor>;
    fn write(&mut self, iod: IoDescriptor, buf: &[u8]) -> PhoResult<usize>;
    fn read(&mut self, iod: IoDescriptor, buf: &mut [u8]) -> PhoResult<usize>;
    fn close(&mut self, iod: IoDescriptor) -> PhoResult<()>;
    fn set_xattr(&mut self, iod: IoDescriptor, key: &str, value: &[u8]) -> PhoResult<()>;
    fn get_xattr(&self, iod: IoDescriptor, key: &str) -> PhoResult<Vec<u8>>;
    fn medium_sync(&mut self, root: &Path) -> PhoResult<()>;
    fn preferred_io_size(&self, iod: IoDescriptor) -> PhoResult<usize>;
    fn delete(&mut self, loc: &str) -> PhoResult<()>;
}

/// Information the device adapter reports about a drive's raw path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub model: String,
    pub serial: String,
    pub loaded: bool,
}

/// Resolves device serials to kernel paths (`/dev/st0`, `/dev/changer`, …).
pub trait DeviceAdapter: Send + Sync + fmt::Debug {
    fn lookup(&self, serial: &str) -> PhoResult<String>;
    fn query(&self, path: &str) -> PhoResult<DeviceInfo>;
}

/// Static, name-keyed registry of every adapter the daemon was started
/// with. Populated once in `phobosd.rs`'s `main`, then passed around as
/// part of the explicit process [`crate::Context`] (Design Notes,
/// "Global process state") — no adapter is ever looked up through a
/// hidden global.
#[derive(Default)]
pub struct AdapterRegistry {
    libraries: HashMap<String, Box<dyn LibraryAdapter>>,
    filesystems: HashMap<String, Box<dyn FilesystemAdapter>>,
    io: HashMap<String, Box<dyn IoAdapter>>,
    devices: HashMap<String, Box<dyn DeviceAdapter>>,
}

impl fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("libraries", &self.libraries.keys().collect::<Vec<_>>())
            .field("filesystems", &self.filesystems.keys().collect::<Vec<_>>())
            .field("io", &self.io.keys().collect::<Vec<_>>())
            .field("devices", &self.devices.keys().collect::<Vec<_>>())
            .finish()
    }
}

macro_rules! adapter_slot {
    ($register:ident, $get:ident, $get_mut:ident, $map:ident, $trait:ident) => {
        pub fn $register(&mut self, name: impl Into<String>, adapter: Box<dyn $trait>) {
            self.$map.insert(name.into(), adapter);
        }

        pub fn $get(&self, name: &str) -> PhoResult<&dyn $trait> {
            self.$map
                .get(name)
                .map(|b| b.as_ref())
                .ok_or_else(|| PhoError::NotSupported(format!("no {} adapter named '{name}'", stringify!($trait))))
        }

        pub fn $get_mut(&mut self, name: &str) -> PhoResult<&mut (dyn $trait + 'static)> {
            self.$map
                .get_mut(name)
                .map(|b| b.as_mut())
                .ok_or_else(|| PhoError::NotSupported(format!("no {} adapter named '{name}'", stringify!($trait))))
        }
    };
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    adapter_slot!(register_library, library, library_mut, libraries, LibraryAdapter);
    adapter_slot!(
        register_filesystem,
        filesystem,
        filesystem_mut,
        filesystems,
        FilesystemAdapter
    );
    adapter_slot!(register_io, io, io_mut, io, IoAdapter);
    adapter_slot!(register_device, device, device_mut, devices, DeviceAdapter);
}
