//! USB mass-storage driver
//!
//! Finds a supported reader among the USB devices exposed through
//! sysfs, locates the mounted partition of its block device, and
//! delegates all file operations to the filesystem driver rooted at
//! the mount point. `disconnect` optionally performs a lazy unmount so
//! the device can be unplugged safely.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use walkdir::WalkDir;

use quillsync_core::devices::{is_supported_device, PnpDeviceId, Protocol};
use quillsync_core::ports::Driver;
use quillsync_core::{ObjectInfo, ObjectSet, SyncError};

use crate::fs::FsDriver;

const DRIVER_NAME: &str = "usb-storage";
const SYS_DEVICES: &str = "/sys/devices";
const PROC_MOUNTS: &str = "/proc/mounts";

pub struct UsbDriver {
    inner: FsDriver,
    id: PnpDeviceId,
    mount: String,
    eject: bool,
}

impl UsbDriver {
    /// Connects to the first supported mass-storage device, or to the
    /// one with the given serial when `serial` is non-empty. `eject`
    /// requests a lazy unmount on disconnect.
    pub fn connect(paths: &[&str], serial: &str, eject: bool) -> Result<Self, SyncError> {
        let (id, mount) = pick_device(Path::new(SYS_DEVICES), serial)?;
        tracing::debug!(device = %id, mount = %mount, "Connected to USB device");
        Ok(Self {
            inner: FsDriver::new(paths, Some(mount.as_str()), None),
            id,
            mount,
            eject,
        })
    }

    pub fn mount_point(&self) -> &str {
        &self.mount
    }
}

#[async_trait]
impl Driver for UsbDriver {
    fn name(&self) -> &'static str {
        DRIVER_NAME
    }

    fn unique_id(&self) -> String {
        self.id.serial.clone()
    }

    async fn enumerate(&self) -> anyhow::Result<ObjectSet> {
        self.inner.enumerate().await
    }

    async fn mkdir(&self, obj: &ObjectInfo) -> anyhow::Result<()> {
        self.inner.mkdir(obj).await
    }

    async fn remove(&self, obj: &ObjectInfo) -> anyhow::Result<()> {
        self.inner.remove(obj).await
    }

    async fn copy(&self, obj: &ObjectInfo) -> anyhow::Result<()> {
        self.inner.copy(obj).await
    }

    async fn disconnect(&self) {
        if !self.eject {
            return;
        }
        if let Err(e) = nix::mount::umount2(self.mount.as_str(), nix::mount::MntFlags::MNT_DETACH)
        {
            tracing::error!(mount = %self.mount, error = %e, "Unable to unmount device");
        }
    }
}

// ---------------------------------------------------------------------------
// sysfs discovery
// ---------------------------------------------------------------------------

fn pick_device(sys_root: &Path, serial: &str) -> Result<(PnpDeviceId, String), SyncError> {
    let mut picked: Option<(PnpDeviceId, String)> = None;

    for entry in WalkDir::new(sys_root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(_) => continue,
        };
        if !entry.file_type().is_file() || entry.file_name() != "idVendor" {
            continue;
        }
        let dev_path = match entry.path().parent() {
            Some(parent) => parent,
            None => continue,
        };
        let Some(id) = read_device_id(dev_path) else {
            continue;
        };

        let supported = is_supported_device(Protocol::Usb, id.vendor_id, id.product_id);
        tracing::debug!(device = %id, supported, "Driver Info");
        if !supported {
            continue;
        }
        if !serial.is_empty() {
            if !serial.eq_ignore_ascii_case(&id.serial) {
                continue;
            }
            // targeting a specific device
        } else if picked.is_some() {
            // first supported device wins
            continue;
        }

        match find_mount(dev_path) {
            Some(mount) => picked = Some((id, mount)),
            None => {
                tracing::warn!(device = %id, "Supported device found but its volume is not mounted")
            }
        }
        if !serial.is_empty() && picked.is_some() {
            break;
        }
    }

    picked.ok_or(SyncError::NoDevice)
}

fn read_device_id(dev_path: &Path) -> Option<PnpDeviceId> {
    Some(PnpDeviceId {
        vendor_id: read_sysfs_hex(&dev_path.join("idVendor"))?,
        product_id: read_sysfs_hex(&dev_path.join("idProduct"))?,
        bcd_device: read_sysfs_hex(&dev_path.join("bcdDevice"))?,
        serial: read_sysfs_string(&dev_path.join("serial"))?,
    })
}

fn read_sysfs_hex(path: &Path) -> Option<u16> {
    u16::from_str_radix(read_sysfs_string(path)?.as_str(), 16).ok()
}

fn read_sysfs_string(path: &Path) -> Option<String> {
    std::fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
}

/// Mount point of the device's first block partition. So far all
/// supported readers expose a single accessible partition.
fn find_mount(dev_path: &Path) -> Option<String> {
    for entry in WalkDir::new(dev_path).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(_) => continue,
        };
        let parts: Vec<&str> = entry.path().to_str()?.split('/').collect();
        if parts.len() < 2 || parts[parts.len() - 2] != "block" {
            continue;
        }
        let partition = format!("{}1", parts[parts.len() - 1]);
        let volume = PathBuf::from("/dev").join(&partition);
        let mounts = std::fs::read_to_string(PROC_MOUNTS).ok()?;
        return mount_point_for(&volume.to_string_lossy(), &mounts);
    }
    None
}

/// Looks a volume up in /proc/mounts content.
fn mount_point_for(volume: &str, mounts: &str) -> Option<String> {
    for line in mounts.lines() {
        let mut fields = line.split_whitespace();
        if fields.next() == Some(volume) {
            return fields.next().map(|s| s.to_string());
        }
    }
    None
}
