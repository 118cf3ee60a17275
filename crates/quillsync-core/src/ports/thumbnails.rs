//! Thumbnail resolver port
//!
//! The source filesystem driver asks the resolver, during enumeration,
//! whether a book file yields a paired thumbnail artifact. The
//! resolver owns a scratch directory where produced bytes are parked
//! until the planner decides whether they travel to the device.

use std::path::Path;

/// Derives a device-side thumbnail artifact for a local book file.
pub trait ThumbnailResolver: Send + Sync {
    /// Returns the thumbnail file name when the book is a recognized
    /// non-personal container with an embedded product id, `None`
    /// otherwise. Must never fail loudly: parse problems downgrade to
    /// `None` so a malformed book cannot abort enumeration.
    fn extract(&self, path: &Path) -> Option<String>;
}
