//! quillsync-thumbs - Book cover thumbnail extraction
//!
//! For every local book in a recognized container format this crate
//! can derive the thumbnail artifact the device pairs with it: a JPEG
//! re-encoded at quality 75 with a 300 DPI JFIF density marker, named
//! `thumbnail_<ASIN>_<CDETYPE>_portrait.jpg`.
//!
//! Two container formats are understood:
//! - MOBI/AZW3 (PalmDB with EXTH metadata records)
//! - KFX (CONT container with binary-Ion metadata entities)
//!
//! Only purchased content (`EBOK` marker with a product id) yields a
//! thumbnail; personal documents, unsupported containers and malformed
//! files all downgrade to "no thumbnail". The parsers return explicit
//! errors for every malformed input - nothing in here panics on bad
//! bytes, and a parse failure never aborts source enumeration.

pub mod jfif;
pub mod kfx;
pub mod mobi;
pub mod resolver;

pub use resolver::Extractor;

/// An extracted thumbnail ready to be parked in the scratch directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thumb {
    /// Device-side file name, `thumbnail_<ASIN>_<CDETYPE>_portrait.jpg`.
    pub file_name: String,
    /// JPEG bytes, quality 75, JFIF density 300x300 DPI.
    pub jpeg: Vec<u8>,
}

/// Errors from thumbnail extraction.
///
/// All of them downgrade to "no thumbnail" at the resolver boundary;
/// the distinction only matters for logging.
#[derive(Debug, thiserror::Error)]
pub enum ThumbError {
    /// Structurally invalid container data.
    #[error("malformed container: {0}")]
    Malformed(String),

    /// Valid but unsupported container flavor (encryption, DRM,
    /// compression, version).
    #[error("unsupported container: {0}")]
    Unsupported(String),

    /// Embedded image could not be decoded or re-encoded.
    #[error("image processing failed: {0}")]
    Image(#[from] image::ImageError),
}

impl ThumbError {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        ThumbError::Malformed(msg.into())
    }
}

/// Builds the device-side thumbnail name. Empty when there is no
/// product id to name it after.
pub(crate) fn thumb_file_name(asin: &str, cde_type: &str) -> Option<String> {
    if asin.is_empty() {
        return None;
    }
    Some(format!("thumbnail_{asin}_{cde_type}_portrait.jpg"))
}
