//! Image storage backends
//!
//! Upload handling and URL resolution only ever see [`ImageStorage`]. The
//! local file store writes to disk and serves the directory itself; the
//! object store pushes to an S3-compatible bucket and redirects to its CDN.

pub mod local;
pub mod object;

pub use local::LocalFileStore;
pub use object::{MockObjectClient, ObjectClient, ObjectStore, S3ObjectClient};

use crate::models::{BackendConfig, Config, ImageUpload};
use crate::{resize, Error, Result};
use async_trait::async_trait;
use axum::Router;
use std::path::Path;
use tracing::{error, info, warn};

#[async_trait]
pub trait ImageStorage: Send + Sync {
    /// Persist the upload under a unique name and return its public URL.
    async fn save(&self, upload: ImageUpload) -> Result<String>;
    /// Never fails; anything that cannot be checked counts as missing.
    async fn exists(&self, path: &Path) -> bool;
    /// HTTP handler serving stored images.
    fn serve(&self) -> Router;
}

/// Stages of a save, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveStep {
    ResolveTarget,
    PickName,
    CreateDirectory,
    Copy,
    Cleanup,
    PublicUrl,
    Thumbnail,
}

impl SaveStep {
    /// Whether a failure here fails the whole save.
    pub fn is_fatal(self) -> bool {
        !matches!(self, Self::Cleanup | Self::Thumbnail)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::ResolveTarget => "resolve_target",
            Self::PickName => "pick_name",
            Self::CreateDirectory => "create_directory",
            Self::Copy => "copy",
            Self::Cleanup => "cleanup",
            Self::PublicUrl => "public_url",
            Self::Thumbnail => "thumbnail",
        }
    }

    /// Log a fatal failure at the step that detected it and hand it back.
    pub fn fail(self, err: Error) -> Error {
        debug_assert!(self.is_fatal(), "{} is best-effort", self.name());
        error!(step = self.name(), "Image save failed: {}", err);
        err
    }

    /// Log a best-effort failure; the save carries on.
    pub fn degrade(self, err: &Error) {
        debug_assert!(!self.is_fatal(), "{} is fatal", self.name());
        warn!(step = self.name(), "Image save degraded: {}", err);
    }
}

/// Build the backend selected by `config`.
pub async fn from_config(config: &Config) -> Result<Box<dyn ImageStorage>> {
    let resizer = resize::from_kind(&config.thumbnails.resizer);

    match &config.backend {
        BackendConfig::Local => {
            info!(
                "Storage backend: local filesystem at {}",
                config.paths.images_path.display()
            );
            Ok(Box::new(LocalFileStore::new(
                config.paths.clone(),
                config.thumbnails.clone(),
                resizer,
            )))
        }
        BackendConfig::S3(s3) => {
            info!("Storage backend: S3 bucket {} via {}", s3.bucket, s3.endpoint);
            Ok(Box::new(
                ObjectStore::new(s3, config.paths.clone(), config.thumbnails.clone(), resizer)
                    .await?,
            ))
        }
    }
}
