//! quillsync-transport - Driver adapters
//!
//! Implementations of the driver port for every way a device can be
//! reached:
//! - [`fs`] - plain directory trees; doubles as the source driver and
//!   as the back-end of the USB mount driver
//! - [`usb`] - USB mass-storage devices found through sysfs
//! - [`mtp`] - media-transfer-protocol devices (behind the `mtp`
//!   cargo feature, which links the system libmtp library)
//! - [`mail`] - delivery to the device's mail address over SMTP

pub mod fs;
pub mod mail;
pub mod mtp;
pub mod usb;

pub use fs::FsDriver;
pub use mail::MailDriver;
pub use mtp::MtpDriver;
pub use usb::UsbDriver;
