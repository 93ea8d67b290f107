//! Pluggable image storage for uploaded pictures
//!
//! Saves an uploaded image under a name that collides with nothing already
//! stored, derives a shrink-only thumbnail next to it, and hands back a
//! public URL. The local filesystem backend serves its own directory; an
//! S3-compatible backend is available behind the same trait.

pub mod error;
pub mod fs;
pub mod mime;
pub mod models;
pub mod naming;
pub mod resize;
pub mod storage;
pub mod url;

pub use error::{Error, Result};
pub use models::{Config, ImageUpload, PathConfig, ThumbnailConfig};
pub use storage::{ImageStorage, LocalFileStore, ObjectStore};
