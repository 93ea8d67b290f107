//! S3-compatible image storage
//!
//! Objects are written through [`ObjectClient`], so the bucket can be a real
//! DigitalOcean Space or an in-memory mock.

pub mod client;
pub mod mock;

pub use client::S3ObjectClient;
pub use mock::MockObjectClient;

use super::{ImageStorage, SaveStep};
use crate::fs::{FileSystem, LocalFileSystem};
use crate::mime::detect_file_mime;
use crate::models::{ImageUpload, ObjectStoreConfig, PathConfig, ThumbnailConfig};
use crate::naming::{leaf_name, Candidates};
use crate::resize::{resize_with_timeout, ResizeSpec, Resizer};
use crate::url::normalize_separators;
use crate::{Error, Result};
use async_trait::async_trait;
use axum::http::Uri;
use axum::response::Redirect;
use axum::Router;
use chrono::{Local, NaiveDate};
use std::path::{Path, PathBuf, MAIN_SEPARATOR};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, info, warn};

#[async_trait]
pub trait ObjectClient: Send + Sync {
    /// Whether an object is stored under `key`.
    async fn head(&self, key: &str) -> Result<bool>;
    /// Upload the file at `path` as a publicly readable object.
    async fn put(&self, key: &str, path: &Path, content_type: &str) -> Result<()>;
}

/// Stores images in an S3-compatible bucket fronted by a CDN.
///
/// Object stores have no portable create-if-absent, so unique keys are
/// found by checking with `HeadObject`; two uploads of the same name racing
/// each other can still land on the same key.
pub struct ObjectStore {
    client: Arc<dyn ObjectClient>,
    base_url: String,
    paths: PathConfig,
    thumbnails: ThumbnailConfig,
    resizer: Arc<dyn Resizer>,
    fs: Arc<dyn FileSystem>,
    fixed_date: Option<NaiveDate>,
}

/// A resized thumbnail waiting in its own temp dir for upload.
struct StagedThumbnail {
    _dir: TempDir,
    path: PathBuf,
}

impl ObjectStore {
    pub async fn new(
        config: &ObjectStoreConfig,
        paths: PathConfig,
        thumbnails: ThumbnailConfig,
        resizer: Arc<dyn Resizer>,
    ) -> Result<Self> {
        let client = S3ObjectClient::new(config).await?;
        Ok(Self::with_client(
            Arc::new(client),
            &config.base_url,
            paths,
            thumbnails,
            resizer,
        ))
    }

    pub fn with_client(
        client: Arc<dyn ObjectClient>,
        base_url: &str,
        paths: PathConfig,
        thumbnails: ThumbnailConfig,
        resizer: Arc<dyn Resizer>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.to_string(),
            paths,
            thumbnails,
            resizer,
            fs: Arc::new(LocalFileSystem::new()),
            fixed_date: None,
        }
    }

    /// Filesystem used to remove upload temp files.
    pub fn with_file_system(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = fs;
        self
    }

    pub fn with_fixed_date(mut self, date: NaiveDate) -> Self {
        self.fixed_date = Some(date);
        self
    }

    fn get_public_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), key)
    }

    fn key_prefix(&self) -> String {
        let date = self
            .fixed_date
            .unwrap_or_else(|| Local::now().date_naive());
        let target = self.paths.target_dir(date);
        normalize_separators(&target.relative.to_string_lossy(), MAIN_SEPARATOR)
    }

    async fn unique_key(&self, prefix: &str, base_name: &str) -> Result<String> {
        for (_, name) in Candidates::new(base_name) {
            let key = object_key(prefix, &name);
            if !self.client.head(&key).await? {
                return Ok(key);
            }
        }

        Err(Error::NamesExhausted {
            dir: PathBuf::from(prefix),
            base: base_name.to_string(),
        })
    }

    async fn upload_file(&self, key: &str, path: &Path) -> Result<()> {
        let content_type = detect_file_mime(path).await?;
        self.client.put(key, path, content_type).await
    }

    /// Resize the upload locally while it is still on disk.
    async fn stage_thumbnail(&self, leaf: &str, source: &Path) -> Result<StagedThumbnail> {
        let dir = tempfile::Builder::new()
            .prefix("imagestore-thumb")
            .tempdir()?;
        let path = dir.path().join(leaf);

        resize_with_timeout(
            self.resizer.as_ref(),
            source,
            &path,
            ResizeSpec::from(&self.thumbnails),
            self.thumbnails.timeout,
        )
        .await?;

        Ok(StagedThumbnail { _dir: dir, path })
    }

    async fn upload_thumbnail(
        &self,
        prefix: &str,
        leaf: &str,
        staged: Result<StagedThumbnail>,
    ) -> Result<String> {
        let staged = staged?;
        let key = self
            .unique_key(prefix, &format!("{}{}", self.thumbnails.prefix, leaf))
            .await?;
        self.upload_file(&key, &staged.path).await?;
        Ok(key)
    }
}

fn object_key(prefix: &str, name: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix, name)
    }
}

/// Accepts a bare key, a key written as a local path, or a full public URL.
fn key_for_path(base_url: &str, path: &Path) -> String {
    let raw = normalize_separators(&path.to_string_lossy(), MAIN_SEPARATOR);
    let base_url = base_url.trim_end_matches('/');
    let key = raw.strip_prefix(base_url).unwrap_or(&raw);
    key.trim_start_matches('/').to_string()
}

/// Every request is answered with a redirect to the same path on the CDN.
fn redirect_router(base_url: &str) -> Router {
    let base_url = base_url.trim_end_matches('/').to_string();
    Router::new().fallback(move |uri: Uri| {
        let base_url = base_url.clone();
        async move { Redirect::temporary(&format!("{}{}", base_url, uri.path())) }
    })
}

#[async_trait]
impl ImageStorage for ObjectStore {
    /// The thumbnail is resized before the upload, while the temp file still
    /// exists, and only uploaded after cleanup.
    async fn save(&self, upload: ImageUpload) -> Result<String> {
        let ImageUpload {
            source_path,
            original_name,
        } = upload;

        let prefix = self.key_prefix();
        debug!(
            step = SaveStep::ResolveTarget.name(),
            "Uploading {} under {}",
            original_name,
            prefix
        );

        let leaf = leaf_name(&original_name).map_err(|e| SaveStep::PickName.fail(e))?;
        let key = self
            .unique_key(&prefix, &leaf)
            .await
            .map_err(|e| SaveStep::PickName.fail(e))?;

        let thumbnail = self.stage_thumbnail(&leaf, &source_path).await;

        self.upload_file(&key, &source_path)
            .await
            .map_err(|e| SaveStep::Copy.fail(e))?;

        if let Err(source) = self.fs.remove_file(&source_path).await {
            SaveStep::Cleanup.degrade(&Error::Cleanup {
                path: source_path.clone(),
                source,
            });
        }

        let url = self.get_public_url(&key);
        info!(
            step = SaveStep::PublicUrl.name(),
            "Uploaded {} as {}",
            original_name,
            url
        );

        match self.upload_thumbnail(&prefix, &leaf, thumbnail).await {
            Ok(thumb_key) => debug!(
                step = SaveStep::Thumbnail.name(),
                "Thumbnail uploaded as {}",
                thumb_key
            ),
            Err(e) => SaveStep::Thumbnail.degrade(&e),
        }

        Ok(url)
    }

    async fn exists(&self, path: &Path) -> bool {
        let key = key_for_path(&self.base_url, path);
        match self.client.head(&key).await {
            Ok(exists) => exists,
            Err(e) => {
                warn!("Could not check {}: {}; treating as missing", key, e);
                false
            }
        }
    }

    fn serve(&self) -> Router {
        redirect_router(&self.base_url)
    }
}
