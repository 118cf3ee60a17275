//! MTP driver
//!
//! Media-transfer devices identify objects by opaque handles, not
//! paths. The driver keeps a live `path -> handle` map built during
//! enumeration and updated after every successful mkdir/copy; when an
//! action executes, the parent handle is resolved from that map, which
//! is exactly the destination-set lookup the planner defers to
//! execution time.
//!
//! The protocol session itself sits behind [`PortableDevice`], a small
//! seam the driver logic is tested through. The real libmtp-backed
//! session lives behind the `mtp` cargo feature because it links a
//! system library; connecting without the feature reports the build
//! limitation.
//!
//! Exactly one storage object per device is assumed - every supported
//! reader exposes a single storage - and more than one is fatal.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use quillsync_core::domain::object_set::parent_of;
use quillsync_core::ports::Driver;
use quillsync_core::{ObjectInfo, ObjectRef, ObjectSet};

const DRIVER_NAME: &str = "mtp";

/// One object as reported by the protocol session.
#[derive(Debug, Clone)]
pub struct RawObject {
    pub name: String,
    pub handle: ObjectRef,
    pub is_folder: bool,
    pub is_file: bool,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

/// Raw portable-device session the driver drives. `parent = None`
/// addresses the storage root.
pub trait PortableDevice: Send + Sync {
    fn serial(&self) -> String;
    fn list_children(&self, parent: Option<&ObjectRef>) -> anyhow::Result<Vec<RawObject>>;
    fn create_folder(&self, parent: Option<&ObjectRef>, name: &str) -> anyhow::Result<ObjectRef>;
    fn delete_object(&self, handle: &ObjectRef) -> anyhow::Result<()>;
    fn send_file(
        &self,
        parent: Option<&ObjectRef>,
        name: &str,
        source: &Path,
        size: u64,
    ) -> anyhow::Result<ObjectRef>;
}

pub struct MtpDriver {
    device: Box<dyn PortableDevice>,
    serial: String,
    /// Device-relative path -> object handle, the live destination set.
    handles: Mutex<HashMap<String, ObjectRef>>,
}

impl MtpDriver {
    pub fn new(device: Box<dyn PortableDevice>) -> Self {
        let serial = device.serial();
        Self {
            device,
            serial,
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Connects to the first supported MTP device (or the one with the
    /// configured serial). Fails with the build limitation when the
    /// `mtp` feature is off.
    pub fn connect(serial: &str) -> anyhow::Result<Self> {
        backend::open(serial).map(Self::new)
    }

    fn parent_handle(&self, full_path: &str) -> anyhow::Result<Option<ObjectRef>> {
        match parent_of(full_path) {
            None => Ok(None), // directly under the storage root
            Some(parent) => {
                let handles = self.handles.lock().expect("handle map poisoned");
                handles
                    .get(parent)
                    .cloned()
                    .map(Some)
                    .ok_or_else(|| anyhow::anyhow!("parent folder '{parent}' unknown on device"))
            }
        }
    }

    fn handle_for(&self, obj: &ObjectInfo) -> anyhow::Result<ObjectRef> {
        if !obj.object_ref.is_empty() {
            return Ok(obj.object_ref.clone());
        }
        let handles = self.handles.lock().expect("handle map poisoned");
        handles
            .get(&obj.full_path)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("object '{}' unknown on device", obj.full_path))
    }
}

#[async_trait]
impl Driver for MtpDriver {
    fn name(&self) -> &'static str {
        DRIVER_NAME
    }

    fn unique_id(&self) -> String {
        self.serial.clone()
    }

    async fn enumerate(&self) -> anyhow::Result<ObjectSet> {
        let mut set = ObjectSet::new();
        let mut handles = HashMap::new();
        let mut queue: Vec<(Option<ObjectRef>, String)> = vec![(None, String::new())];

        while let Some((parent, prefix)) = queue.pop() {
            for raw in self.device.list_children(parent.as_ref())? {
                let full_path = if prefix.is_empty() {
                    raw.name.clone()
                } else {
                    format!("{prefix}/{}", raw.name)
                };
                if set.contains(&full_path) {
                    tracing::warn!(path = %full_path, "Duplicate path during device enumeration, ignoring");
                    continue;
                }
                let obj = ObjectInfo {
                    name: raw.name.clone(),
                    is_dir: raw.is_folder,
                    is_file: raw.is_file,
                    size: raw.size,
                    modified: raw.modified,
                    full_path: full_path.clone(),
                    object_ref: raw.handle.clone(),
                    ..ObjectInfo::default()
                };
                if raw.is_folder {
                    queue.push((Some(raw.handle.clone()), full_path.clone()));
                }
                handles.insert(full_path, raw.handle);
                set.insert(obj);
            }
        }

        *self.handles.lock().expect("handle map poisoned") = handles;
        Ok(set)
    }

    async fn mkdir(&self, obj: &ObjectInfo) -> anyhow::Result<()> {
        let parent = self.parent_handle(&obj.full_path)?;
        let handle = self.device.create_folder(parent.as_ref(), &obj.name)?;
        self.handles
            .lock()
            .expect("handle map poisoned")
            .insert(obj.full_path.clone(), handle);
        Ok(())
    }

    async fn remove(&self, obj: &ObjectInfo) -> anyhow::Result<()> {
        let handle = self.handle_for(obj)?;
        self.device.delete_object(&handle)?;
        self.handles
            .lock()
            .expect("handle map poisoned")
            .remove(&obj.full_path);
        Ok(())
    }

    async fn copy(&self, obj: &ObjectInfo) -> anyhow::Result<()> {
        let parent = self.parent_handle(&obj.full_path)?;
        let handle = self.device.send_file(
            parent.as_ref(),
            &obj.name,
            Path::new(&obj.object_name),
            obj.size,
        )?;
        self.handles
            .lock()
            .expect("handle map poisoned")
            .insert(obj.full_path.clone(), handle);
        Ok(())
    }

    async fn disconnect(&self) {
        // the session is released on drop
    }
}

// ---------------------------------------------------------------------------
// libmtp backend
// ---------------------------------------------------------------------------

#[cfg(feature = "mtp")]
mod backend {
    use std::path::Path;

    use chrono::{TimeZone, Utc};
    use libmtp_rs::device::raw::detect_raw_devices;
    use libmtp_rs::device::{MtpDevice, StorageSort};
    use libmtp_rs::object::filetypes::Filetype;
    use libmtp_rs::object::Object;
    use libmtp_rs::storage::{files::FileMetadata, AccessCapability, Parent};

    use quillsync_core::devices::{is_supported_device, Protocol};
    use quillsync_core::{ObjectRef, SyncError};

    use super::{PortableDevice, RawObject};

    pub struct LibMtpSession {
        device: MtpDevice,
        serial: String,
        storage_id: u32,
    }

    // the driver issues calls strictly serially
    unsafe impl Sync for LibMtpSession {}

    pub fn open(serial: &str) -> anyhow::Result<Box<dyn PortableDevice>> {
        let raw_devices = detect_raw_devices()?;
        for raw in raw_devices {
            let entry = raw.device_entry();
            if !is_supported_device(Protocol::Mtp, entry.vendor_id, entry.product_id) {
                continue;
            }
            let mut device = match raw.open_uncached() {
                Some(device) => device,
                None => continue,
            };
            let device_serial = device.serial_number().to_string();
            if !serial.is_empty() && !serial.eq_ignore_ascii_case(&device_serial) {
                continue;
            }

            device.update_storage(StorageSort::NotSorted)?;
            let pool = device.storage_pool();
            let mut storages = pool.iter();
            let Some((storage_id, storage)) = storages.next() else {
                return Err(SyncError::NoStorage.into());
            };
            if storages.next().is_some() {
                anyhow::bail!("more than one storage on the device, refusing to guess");
            }
            if storage.access_capability() != AccessCapability::ReadWrite {
                return Err(SyncError::NoAccess.into());
            }

            return Ok(Box::new(LibMtpSession {
                device,
                serial: device_serial,
                storage_id,
            }));
        }
        Err(SyncError::NoDevice.into())
    }

    fn handle_to_u32(handle: &ObjectRef) -> anyhow::Result<u32> {
        let bytes: [u8; 4] = handle
            .as_bytes()
            .try_into()
            .map_err(|_| anyhow::anyhow!("malformed object handle"))?;
        Ok(u32::from_be_bytes(bytes))
    }

    fn parent_of(handle: Option<&ObjectRef>) -> anyhow::Result<Parent> {
        Ok(match handle {
            None => Parent::Root,
            Some(handle) => Parent::Folder(handle_to_u32(handle)?),
        })
    }

    impl PortableDevice for LibMtpSession {
        fn serial(&self) -> String {
            self.serial.clone()
        }

        fn list_children(&self, parent: Option<&ObjectRef>) -> anyhow::Result<Vec<RawObject>> {
            let pool = self.device.storage_pool();
            let storage = pool
                .by_id(self.storage_id)
                .ok_or_else(|| anyhow::anyhow!("device storage disappeared"))?;
            let files = storage.files_and_folders(parent_of(parent)?);
            Ok(files
                .into_iter()
                .map(|file| {
                    let is_folder = matches!(file.ftype(), Filetype::Folder);
                    RawObject {
                        name: file.name().to_string(),
                        handle: ObjectRef::new(file.id().to_be_bytes().to_vec()),
                        is_folder,
                        is_file: !is_folder,
                        size: file.size(),
                        modified: Utc
                            .timestamp_opt(file.modification_date(), 0)
                            .single()
                            .unwrap_or_else(Utc::now),
                    }
                })
                .collect())
        }

        fn create_folder(
            &self,
            parent: Option<&ObjectRef>,
            name: &str,
        ) -> anyhow::Result<ObjectRef> {
            let pool = self.device.storage_pool();
            let storage = pool
                .by_id(self.storage_id)
                .ok_or_else(|| anyhow::anyhow!("device storage disappeared"))?;
            let (id, _) = storage
                .create_folder(name, parent_of(parent)?)
                .map_err(|e| anyhow::anyhow!("unable to create folder '{name}': {e}"))?;
            Ok(ObjectRef::new(id.to_be_bytes().to_vec()))
        }

        fn delete_object(&self, handle: &ObjectRef) -> anyhow::Result<()> {
            let id = handle_to_u32(handle)?;
            self.device
                .delete_object(id)
                .map_err(|e| anyhow::anyhow!("unable to delete object {id}: {e}"))
        }

        fn send_file(
            &self,
            parent: Option<&ObjectRef>,
            name: &str,
            source: &Path,
            size: u64,
        ) -> anyhow::Result<ObjectRef> {
            let pool = self.device.storage_pool();
            let storage = pool
                .by_id(self.storage_id)
                .ok_or_else(|| anyhow::anyhow!("device storage disappeared"))?;
            let metadata = FileMetadata {
                file_size: size,
                file_name: name,
                file_type: Filetype::Unknown,
                modification_date: Utc::now().timestamp(),
            };
            let file = storage
                .send_local_file(source, parent_of(parent)?, metadata)
                .map_err(|e| anyhow::anyhow!("unable to send '{}': {e}", source.display()))?;
            Ok(ObjectRef::new(file.id().to_be_bytes().to_vec()))
        }
    }
}

#[cfg(not(feature = "mtp"))]
mod backend {
    use super::PortableDevice;

    pub fn open(_serial: &str) -> anyhow::Result<Box<dyn PortableDevice>> {
        anyhow::bail!("this build does not include MTP support (rebuild with the `mtp` feature)")
    }
}
