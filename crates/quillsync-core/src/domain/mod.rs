//! Domain entities shared by every quillsync crate.

pub mod errors;
pub mod object_info;
pub mod object_set;

pub use errors::SyncError;
pub use object_info::{ObjectInfo, ObjectRef};
pub use object_set::ObjectSet;
