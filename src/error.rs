//! Error handling and custom error types
//!
//! Provides unified error handling across the crate using thiserror. The
//! save pipeline maps every failure onto one of the storage variants so the
//! caller can tell which step gave up.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid file name: {0:?}")]
    InvalidFileName(String),

    #[error("Failed to pick a unique name in {}: {source}", dir.display())]
    Naming {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No free name left for {base:?} in {}", dir.display())]
    NamesExhausted { dir: PathBuf, base: String },

    #[error("Failed to create directory {}: {source}", dir.display())]
    DirectoryCreate {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to copy {} to {}: {source}", from.display(), to.display())]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove temporary file {}: {source}", path.display())]
    Cleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Thumbnail error: {0}")]
    Thumbnail(String),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("S3/CDN error: {0}")]
    ObjectStore(String),

    #[error("Environment variable error: {0}")]
    EnvVar(#[from] dotenvy::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invariant violation: {0}")]
    Invariant(String),
}

pub type Result<T> = std::result::Result<T, Error>;
