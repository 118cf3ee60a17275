//! quillsync-core - Domain model and ports
//!
//! The hub crate every other quillsync crate depends on:
//! - [`domain`] - `ObjectInfo`, the path-keyed `ObjectSet` algebra and
//!   the shared error kinds
//! - [`ports`] - the uniform driver contract every back-end implements
//!   plus the thumbnail-resolver seam
//! - [`config`] - typed YAML configuration with validation
//! - [`devices`] - transport protocols and the supported-device list
//!
//! ## Architecture
//!
//! Adapters (filesystem, USB mount, MTP, mail, history database) live
//! in their own crates and implement the ports defined here. The
//! reconciliation engine consumes only domain types and ports, so it
//! can be driven entirely by mocks in tests.

pub mod config;
pub mod devices;
pub mod domain;
pub mod ports;

pub use domain::errors::SyncError;
pub use domain::object_info::{ObjectInfo, ObjectRef};
pub use domain::object_set::ObjectSet;

/// Device-side directory holding book cover thumbnails.
pub const THUMBNAIL_FOLDER: &str = "system/thumbnails";
