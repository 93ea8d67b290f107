//! Thumbnail resizing
//!
//! The resize primitive is a black box taking a source image, a destination
//! path, a target width and a shrink-only flag. It can be the pure-Rust
//! decoder/encoder or an external ImageMagick binary.

pub mod command;
pub mod mock;
pub mod processor;

pub use command::CommandResizer;
pub use mock::MockResizer;
pub use processor::ImageResizer;

use crate::models::{ResizerKind, ThumbnailConfig};
use crate::{Error, Result};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeSpec {
    pub width: u32,
    /// Never enlarge an image already narrower than `width`.
    pub shrink_only: bool,
}

impl From<&ThumbnailConfig> for ResizeSpec {
    fn from(config: &ThumbnailConfig) -> Self {
        Self {
            width: config.width,
            shrink_only: config.shrink_only,
        }
    }
}

#[async_trait]
pub trait Resizer: Send + Sync {
    async fn resize(&self, source: &Path, destination: &Path, spec: ResizeSpec) -> Result<()>;
}

pub fn from_kind(kind: &ResizerKind) -> Arc<dyn Resizer> {
    match kind {
        ResizerKind::Builtin => Arc::new(ImageResizer::new()),
        ResizerKind::ImageMagick { program } => Arc::new(CommandResizer::new(program.clone())),
    }
}

/// Run a resize, turning any failure or an overrun of `timeout` into
/// [`Error::Thumbnail`].
pub async fn resize_with_timeout(
    resizer: &dyn Resizer,
    source: &Path,
    destination: &Path,
    spec: ResizeSpec,
    timeout: Duration,
) -> Result<()> {
    match tokio::time::timeout(timeout, resizer.resize(source, destination, spec)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e @ Error::Thumbnail(_))) => Err(e),
        Ok(Err(e)) => Err(Error::Thumbnail(e.to_string())),
        Err(_elapsed) => Err(Error::Thumbnail(format!(
            "resize of {} timed out after {:?}",
            source.display(),
            timeout
        ))),
    }
}
