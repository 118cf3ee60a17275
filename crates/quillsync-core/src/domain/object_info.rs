//! ObjectInfo domain entity
//!
//! An `ObjectInfo` describes one file-system entry as observed on some
//! side of the sync: the local source tree, the device, or a persisted
//! history snapshot. Instances are created in bulk by driver
//! enumeration and synthetically by the planner when it describes an
//! action to perform.
//!
//! Paths are always forward-slash normalized. Which root a path is
//! relative to depends on the side that produced it: source paths are
//! absolute, device paths are device-relative, history paths are
//! source-relative.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// ObjectRef
// ============================================================================

/// Opaque transport-dependent object handle.
///
/// Protocol transports identify objects by handles the host cannot
/// interpret (numeric ids on one stack, wide-character strings on
/// another). The handle is carried as a raw byte sequence with a hex
/// string projection for JSON; it is compared for equality and passed
/// back to the owning driver, never parsed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectRef(Vec<u8>);

impl ObjectRef {
    /// Wraps raw handle bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Returns the raw handle bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns true when no handle has been assigned.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl Serialize for ObjectRef {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ObjectRef {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        if s.is_empty() {
            return Ok(Self::default());
        }
        let mut bytes = Vec::with_capacity(s.len() / 2);
        let raw = s.as_bytes();
        if raw.len() % 2 != 0 {
            return Err(serde::de::Error::custom("odd-length object reference"));
        }
        for pair in raw.chunks_exact(2) {
            let hi = hex_digit(pair[0]).ok_or_else(|| bad_digit::<D>(pair[0]))?;
            let lo = hex_digit(pair[1]).ok_or_else(|| bad_digit::<D>(pair[1]))?;
            bytes.push(hi << 4 | lo);
        }
        Ok(Self(bytes))
    }
}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

fn bad_digit<'de, D: serde::Deserializer<'de>>(b: u8) -> D::Error {
    serde::de::Error::custom(format!("invalid object reference digit {:#04x}", b))
}

// ============================================================================
// ObjectInfo
// ============================================================================

/// One observed file-system entry.
///
/// `is_dir` and `is_file` are mutually exclusive; both false marks an
/// opaque transport-functional object (a storage root, for example)
/// which is enumerated but never acted upon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectInfo {
    /// Leaf name.
    #[serde(rename = "file_name")]
    pub name: String,

    /// Content fingerprint (hex SHA-256), set only for regular files.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub persistent_id: String,

    pub is_dir: bool,
    pub is_file: bool,

    /// Last-modified instant.
    pub modified: DateTime<Utc>,

    /// Byte length, 0 for directories.
    pub size: u64,

    /// Forward-slash path, rooted per side.
    pub full_path: String,

    /// Handle assigned by a protocol transport, empty elsewhere.
    #[serde(default, skip_serializing_if = "ObjectRef::is_empty")]
    pub object_ref: ObjectRef,

    /// Copy source path; set on planner-synthesized copy subjects.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub object_name: String,

    /// Paired thumbnail artifact name on the device, empty when the
    /// book yielded none. Carried through history so a later removal
    /// can clean the thumbnail up.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub thumb_name: String,
}

impl Default for ObjectInfo {
    fn default() -> Self {
        Self {
            name: String::new(),
            persistent_id: String::new(),
            is_dir: false,
            is_file: false,
            modified: DateTime::UNIX_EPOCH,
            size: 0,
            full_path: String::new(),
            object_ref: ObjectRef::default(),
            object_name: String::new(),
            thumb_name: String::new(),
        }
    }
}

impl ObjectInfo {
    /// Creates a regular-file entry.
    pub fn file(full_path: impl Into<String>, size: u64, modified: DateTime<Utc>) -> Self {
        let full_path = full_path.into();
        Self {
            name: leaf_name(&full_path),
            is_file: true,
            size,
            modified,
            full_path,
            ..Self::default()
        }
    }

    /// Creates a directory entry.
    pub fn directory(full_path: impl Into<String>, modified: DateTime<Utc>) -> Self {
        let full_path = full_path.into();
        Self {
            name: leaf_name(&full_path),
            is_dir: true,
            modified,
            full_path,
            ..Self::default()
        }
    }

    /// True for entries that are neither file nor directory - opaque
    /// transport-functional objects the planner ignores.
    pub fn is_functional(&self) -> bool {
        !self.is_dir && !self.is_file
    }
}

fn leaf_name(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).to_string()
}
