//! Ports - interfaces implemented by adapter crates.

pub mod driver;
pub mod thumbnails;

pub use driver::Driver;
pub use thumbnails::ThumbnailResolver;
