//! In-memory fake adapters used by the core's own tests and by the
//! `phobos-tests` harness crate — no tape library or mounted
//! filesystem required.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::adapters::{
    DeviceAdapter, DeviceInfo, DfInfo, DriveStatus, FilesystemAdapter, IoAdapter, IoDescriptor,
    LibraryAdapter,
};
use crate::error::{PhoError, PhoResult};

/// A library with a fixed set of drives, each either empty or holding a
/// medium identified by its label. `move_medium` simply relabels slots.
#[derive(Debug, Default)]
pub struct FakeLibrary {
    drives: Mutex<HashMap<String, Option<String>>>,
    slots: Mutex<HashMap<String, Option<String>>>,
}

impl FakeLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_drive(&self, addr: impl Into<String>) {
        self.drives.lock().insert(addr.into(), None);
    }

    pub fn add_slot(&self, addr: impl Into<String>, label: impl Into<String>) {
        self.slots.lock().insert(addr.into(), Some(label.into()));
    }
}

impl LibraryAdapter for FakeLibrary {
    fn open(&mut self, _lib_dev: &str) -> PhoResult<()> {
        Ok(())
    }

    fn close(&mut self) -> PhoResult<()> {
        Ok(())
    }

    fn lookup(&self, label: &str) -> PhoResult<String> {
        let slots = self.slots.lock();
        slots
            .iter()
            .find(|(_, l)| l.as_deref() == Some(label))
            .map(|(addr, _)| addr.clone())
            .ok_or_else(|| PhoError::NotFound(format!("no slot holds medium '{label}'")))
    }

    fn drive_lookup(&self, serial: &str) -> PhoResult<DriveStatus> {
        let drives = self.drives.lock();
        let label = drives
            .get(serial)
            .ok_or_else(|| PhoError::NotFound(format!("no drive '{serial}'")))?;
        Ok(DriveStatus {
            addr: serial.to_string(),
            loaded: label.is_some(),
            loaded_label: label.clone(),
        })
    }

    fn move_medium(&mut self, src_addr: &str, dst_addr: &str) -> PhoResult<()> {
        let mut drives = self.drives.lock();
        let mut slots = self.slots.lock();

        let label = if let Some(l) = slots.get_mut(src_addr) {
            l.take()
        } else if let Some(l) = drives.get_mut(src_addr) {
            l.take()
        } else {
            return Err(PhoError::NotFound(format!("no source address '{src_addr}'")));
        };
        let Some(label) = label else {
            return Err(PhoError::Invalid(format!("source '{src_addr}' is empty")));
        };

        if let Some(slot) = drives.get_mut(dst_addr) {
            if slot.is_some() {
                return Err(PhoError::Busy(format!("drive '{dst_addr}' already loaded")));
            }
            *slot = Some(label);
        } else if let Some(slot) = slots.get_mut(dst_addr) {
            *slot = Some(label);
        } else {
            return Err(PhoError::NotFound(format!("no destination address '{dst_addr}'")));
        }
        Ok(())
    }

    fn status(&self) -> PhoResult<Vec<DriveStatus>> {
        Ok(self
            .drives
            .lock()
            .iter()
            .map(|(addr, label)| DriveStatus {
                addr: addr.clone(),
                loaded: label.is_some(),
                loaded_label: label.clone(),
            })
            .collect())
    }

    fn refresh(&mut self) -> PhoResult<()> {
        Ok(())
    }
}

/// A filesystem adapter backed by ordinary directories: `format` creates
/// the root, `mount`/`umount` just track which device path is bound to
/// which root, and `df` reports real `statvfs`-free-space-equivalent
/// numbers from the directory's size on disk. Suited to the `dir`
/// medium family and to exercising `tape`-shaped call sequences in
/// tests without real tape hardware.
#[derive(Debug, Default)]
pub struct FakeFilesystem {
    mounts: Mutex<HashMap<String, PathBuf>>,
    labels: Mutex<HashMap<PathBuf, String>>,
    capacity: u64,
}

impl FakeFilesystem {
    pub fn new(capacity: u64) -> Self {
        FakeFilesystem {
            mounts: Mutex::new(HashMap::new()),
            labels: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    fn dir_size(root: &Path) -> u64 {
        let mut total = 0u64;
        if let Ok(entries) = fs::read_dir(root) {
            for entry in entries.flatten() {
                if let Ok(meta) = entry.metadata() {
                    total += meta.len();
                }
            }
        }
        total
    }
}

impl FilesystemAdapter for FakeFilesystem {
    fn format(&mut self, device_path: &str, label: &str) -> PhoResult<DfInfo> {
        let root = PathBuf::from(device_path);
        fs::create_dir_all(&root).map_err(PhoError::Io)?;
        self.labels.lock().insert(root, label.to_string());
        Ok(DfInfo {
            used: 0,
            avail: self.capacity,
            readonly: false,
        })
    }

    fn mount(&mut self, device_path: &str, root: &Path, label: &str) -> PhoResult<()> {
        let mut mounts = self.mounts.lock();
        if let Some(existing) = mounts.get(device_path) {
            if existing == root {
                return Ok(());
            }
            return Err(PhoError::Busy(format!(
                "device '{device_path}' already mounted at {}",
                existing.display()
            )));
        }
        fs::create_dir_all(root).map_err(PhoError::Io)?;
        let actual_label = self
            .labels
            .lock()
            .get(&PathBuf::from(device_path))
            .cloned()
            .unwrap_or_default();
        if actual_label != label {
            return Err(PhoError::Invalid(format!(
                "label mismatch: expected '{label}', found '{actual_label}'"
            )));
        }
        mounts.insert(device_path.to_string(), root.to_path_buf());
        self.labels.lock().insert(root.to_path_buf(), actual_label);
        Ok(())
    }

    fn umount(&mut self, device_path: &str, root: &Path) -> PhoResult<()> {
        let mut mounts = self.mounts.lock();
        match mounts.get(device_path) {
            Some(r) if r == root => {
                mounts.remove(device_path);
                Ok(())
            }
            _ => Err(PhoError::Invalid(format!(
                "device '{device_path}' is not mounted at {}",
                root.display()
            ))),
        }
    }

    fn df(&self, root: &Path) -> PhoResult<DfInfo> {
        let used = Self::dir_size(root);
        Ok(DfInfo {
            used,
            avail: self.capacity.saturating_sub(used),
            readonly: false,
        })
    }

    fn get_label(&self, root: &Path) -> PhoResult<String> {
        self.labels
            .lock()
            .get(root)
            .cloned()
            .ok_or_else(|| PhoError::NotFound(format!("no label recorded for {}", root.display())))
    }

    fn mounted_at(&self, device_path: &str) -> PhoResult<Option<PathBuf>> {
        Ok(self.mounts.lock().get(device_path).cloned())
    }
}

struct OpenFile {
    path: PathBuf,
    xattrs: HashMap<String, Vec<u8>>,
}

/// Byte-level I/O against plain files, with xattrs emulated in memory
/// (the real adapter would call `setxattr(2)`/`getxattr(2)` via `nix`;
/// the fake keeps tests independent of the underlying filesystem's
/// xattr support).
#[derive(Default)]
pub struct FakeIo {
    next_id: Mutex<u64>,
    open: Mutex<HashMap<u64, OpenFile>>,
    files: Mutex<HashMap<u64, fs::File>>,
}

impl fmt::Debug for FakeIo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakeIo").finish_non_exhaustive()
    }
}

impl FakeIo {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IoAdapter for FakeIo {
    fn open(&mut self, extent_key: &str, _oid: &str, is_put: bool) -> PhoResult<IoDescriptor> {
        let path = PathBuf::from(extent_key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(PhoError::Io)?;
        }
        let file = fs::OpenOptions::new()
            .read(true)
            .write(is_put)
            .create(is_put)
            .truncate(is_put)
            .open(&path)
            .map_err(PhoError::Io)?;

        let mut next_id = self.next_id.lock();
        let id = *next_id;
        *next_id += 1;
        self.files.lock().insert(id, file);
        self.open.lock().insert(
            id,
            OpenFile {
                path,
                xattrs: HashMap::new(),
            },
        );
        Ok(IoDescriptor(id))
    }

    fn write(&mut self, iod: IoDescriptor, buf: &[u8]) -> PhoResult<usize> {
        use std::io::Write;
        let mut files = self.files.lock();
        let file = files
            .get_mut(&iod.0)
            .ok_or_else(|| PhoError::Invalid("unknown io descriptor".into()))?;
        file.write_all(buf).map_err(PhoError::Io)?;
        Ok(buf.len())
    }

    fn read(&mut self, iod: IoDescriptor, buf: &mut [u8]) -> PhoResult<usize> {
        use std::io::Read;
        let mut files = self.files.lock();
        let file = files
            .get_mut(&iod.0)
            .ok_or_else(|| PhoError::Invalid("unknown io descriptor".into()))?;
        file.read(buf).map_err(PhoError::Io)
    }

    fn close(&mut self, iod: IoDescriptor) -> PhoResult<()> {
        self.files.lock().remove(&iod.0);
        self.open.lock().remove(&iod.0);
        Ok(())
    }

    fn set_xattr(&mut self, iod: IoDescriptor, key: &str, value: &[u8]) -> PhoResult<()> {
        let mut open = self.open.lock();
        let entry = open
            .get_mut(&iod.0)
            .ok_or_else(|| PhoError::Invalid("unknown io descriptor".into()))?;
        entry.xattrs.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn get_xattr(&self, iod: IoDescriptor, key: &str) -> PhoResult<Vec<u8>> {
        let open = self.open.lock();
        let entry = open
            .get(&iod.0)
            .ok_or_else(|| PhoError::Invalid("unknown io descriptor".into()))?;
        entry
            .xattrs
            .get(key)
            .cloned()
            .ok_or_else(|| PhoError::NotFound(format!("no xattr '{key}'")))
    }

    fn medium_sync(&mut self, root: &Path) -> PhoResult<()> {
        // Real adapter would fsync every open fd under `root`; plain
        // files on the host filesystem are already durable once
        // `write_all` returns, so this is a no-op in the fake.
        let _ = root;
        Ok(())
    }

    fn preferred_io_size(&self, _iod: IoDescriptor) -> PhoResult<usize> {
        Ok(page_size::get())
    }

    fn delete(&mut self, loc: &str) -> PhoResult<()> {
        match fs::remove_file(loc) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(PhoError::NotFound(format!("no extent at '{loc}'")))
            }
            Err(e) => Err(PhoError::Io(e)),
        }
    }
}

/// Resolves a small fixed serial→path table, as a `udev`-free stand-in
/// for the real device adapter.
#[derive(Debug, Default)]
pub struct FakeDeviceAdapter {
    paths: HashMap<String, String>,
}

impl FakeDeviceAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, serial: impl Into<String>, path: impl Into<String>) {
        self.paths.insert(serial.into(), path.into());
    }
}

impl DeviceAdapter for FakeDeviceAdapter {
    fn lookup(&self, serial: &str) -> PhoResult<String> {
        self.paths
            .get(serial)
            .cloned()
            .ok_or_else(|| PhoError::NotFound(format!("no device with serial '{serial}'")))
    }

    fn query(&self, path: &str) -> PhoResult<DeviceInfo> {
        let serial = self
            .paths
            .iter()
            .find(|(_, p)| p.as_str() == path)
            .map(|(s, _)| s.clone())
            .ok_or_else(|| PhoError::NotFound(format!("no device at path '{path}'")))?;
        Ok(DeviceInfo {
            model: "fake-drive".to_string(),
            serial,
            loaded: true,
        })
    }
}
