use super::{ImageStorage, SaveStep};
use crate::fs::{FileSystem, LocalFileSystem};
use crate::models::{
    ImageUpload, PathConfig, StoredImage, TargetDirectory, ThumbnailConfig, ThumbnailMode,
};
use crate::naming::{leaf_name, UniqueNamer};
use crate::resize::{resize_with_timeout, ResizeSpec, Resizer};
use crate::url::{normalize_separators, path_for_url, public_url};
use crate::{Error, Result};
use async_trait::async_trait;
use axum::Router;
use chrono::{Local, NaiveDate};
use std::path::{Path, PathBuf, MAIN_SEPARATOR};
use std::sync::Arc;
use std::time::Duration;
use tower_http::services::ServeDir;
use tracing::{debug, info, warn};

/// Stores images on the local filesystem under `<images_path>/<YYYY>/<MM>`.
///
/// Names are reserved with an exclusive create before any bytes are
/// written, so concurrent uploads of the same file name never overwrite
/// each other.
pub struct LocalFileStore {
    paths: PathConfig,
    thumbnails: ThumbnailConfig,
    fs: Arc<dyn FileSystem>,
    resizer: Arc<dyn Resizer>,
    namer: UniqueNamer,
    fixed_date: Option<NaiveDate>,
}

impl LocalFileStore {
    pub fn new(paths: PathConfig, thumbnails: ThumbnailConfig, resizer: Arc<dyn Resizer>) -> Self {
        Self::with_file_system(paths, thumbnails, resizer, Arc::new(LocalFileSystem::new()))
    }

    pub fn with_file_system(
        paths: PathConfig,
        thumbnails: ThumbnailConfig,
        resizer: Arc<dyn Resizer>,
        fs: Arc<dyn FileSystem>,
    ) -> Self {
        Self {
            paths,
            thumbnails,
            namer: UniqueNamer::new(fs.clone()),
            fs,
            resizer,
            fixed_date: None,
        }
    }

    /// Always file into the directory for `date` instead of today's.
    pub fn with_fixed_date(mut self, date: NaiveDate) -> Self {
        self.fixed_date = Some(date);
        self
    }

    pub fn paths(&self) -> &PathConfig {
        &self.paths
    }

    pub fn target_dir(&self) -> TargetDirectory {
        let date = self
            .fixed_date
            .unwrap_or_else(|| Local::now().date_naive());
        self.paths.target_dir(date)
    }

    /// The file a URL returned by `save` points at.
    pub fn path_for_url(&self, url: &str) -> Option<PathBuf> {
        path_for_url(&self.paths, url)
    }

    /// Save an upload and report where everything ended up.
    pub async fn store(&self, upload: ImageUpload) -> Result<StoredImage> {
        let ImageUpload {
            source_path,
            original_name,
        } = upload;

        let target = self.target_dir();
        debug!(
            step = SaveStep::ResolveTarget.name(),
            "Saving {} into {}",
            original_name,
            target.absolute.display()
        );

        let leaf = leaf_name(&original_name).map_err(|e| SaveStep::PickName.fail(e))?;
        let candidate = self
            .namer
            .pick(&leaf, &target.absolute, 0)
            .await
            .map_err(|e| SaveStep::PickName.fail(e))?;

        self.fs
            .create_dir_all(&target.absolute)
            .await
            .map_err(|source| {
                SaveStep::CreateDirectory.fail(Error::DirectoryCreate {
                    dir: target.absolute.clone(),
                    source,
                })
            })?;

        let first_choice = candidate.path.clone();
        let stored = match self
            .namer
            .claim_from(&leaf, &target.absolute, candidate, SaveStep::Copy)
            .await
        {
            Ok(path) => path,
            Err(Error::Io(source)) => {
                return Err(SaveStep::Copy.fail(Error::Copy {
                    from: source_path,
                    to: first_choice,
                    source,
                }))
            }
            Err(e) => return Err(SaveStep::PickName.fail(e)),
        };

        if let Err(source) = self.fs.copy(&source_path, &stored).await {
            // The reserved placeholder must not pass for a saved image.
            if let Err(e) = self.fs.remove_file(&stored).await {
                warn!(
                    step = SaveStep::Copy.name(),
                    "Failed to remove placeholder {} after copy failure: {}",
                    stored.display(),
                    e
                );
            }
            return Err(SaveStep::Copy.fail(Error::Copy {
                from: source_path,
                to: stored,
                source,
            }));
        }

        if let Err(source) = self.fs.remove_file(&source_path).await {
            SaveStep::Cleanup.degrade(&Error::Cleanup {
                path: source_path.clone(),
                source,
            });
        }

        let relative = match stored.file_name() {
            Some(name) => target.relative.join(name),
            None => {
                return Err(SaveStep::PublicUrl.fail(Error::Invariant(format!(
                    "Stored path has no file name: {}",
                    stored.display()
                ))))
            }
        };
        let url = public_url(&self.paths.webroot, &relative);
        info!(
            step = SaveStep::PublicUrl.name(),
            "Saved {} as {}",
            original_name,
            url
        );

        let job = ThumbnailJob {
            namer: self.namer.clone(),
            fs: self.fs.clone(),
            resizer: self.resizer.clone(),
            name: format!("{}{}", self.thumbnails.prefix, leaf),
            dir: target.absolute,
            source: stored.clone(),
            spec: ResizeSpec::from(&self.thumbnails),
            timeout: self.thumbnails.timeout,
        };
        let thumbnail = match self.thumbnails.mode {
            ThumbnailMode::Inline => job.run_logged().await,
            ThumbnailMode::Detached => {
                tokio::spawn(job.run_logged());
                None
            }
        };

        Ok(StoredImage {
            url,
            path: stored,
            thumbnail,
        })
    }
}

/// Everything the thumbnail step needs, owned so it can outlive the save.
struct ThumbnailJob {
    namer: UniqueNamer,
    fs: Arc<dyn FileSystem>,
    resizer: Arc<dyn Resizer>,
    name: String,
    dir: PathBuf,
    source: PathBuf,
    spec: ResizeSpec,
    timeout: Duration,
}

impl ThumbnailJob {
    async fn run(&self) -> Result<PathBuf> {
        let destination = self
            .namer
            .claim(&self.name, &self.dir, SaveStep::Thumbnail)
            .await?;

        let resized = resize_with_timeout(
            self.resizer.as_ref(),
            &self.source,
            &destination,
            self.spec,
            self.timeout,
        )
        .await;

        if let Err(e) = resized {
            if let Err(remove) = self.fs.remove_file(&destination).await {
                debug!(
                    step = SaveStep::Thumbnail.name(),
                    "Could not remove unfinished thumbnail {}: {}",
                    destination.display(),
                    remove
                );
            }
            return Err(e);
        }

        Ok(destination)
    }

    async fn run_logged(self) -> Option<PathBuf> {
        match self.run().await {
            Ok(path) => {
                debug!(
                    step = SaveStep::Thumbnail.name(),
                    "Thumbnail written to {}",
                    path.display()
                );
                Some(path)
            }
            Err(e) => {
                SaveStep::Thumbnail.degrade(&e);
                None
            }
        }
    }
}

#[async_trait]
impl ImageStorage for LocalFileStore {
    async fn save(&self, upload: ImageUpload) -> Result<String> {
        Ok(self.store(upload).await?.url)
    }

    async fn exists(&self, path: &Path) -> bool {
        match self.fs.exists(path).await {
            Ok(exists) => exists,
            Err(e) => {
                warn!("Could not check {}: {}; treating as missing", path.display(), e);
                false
            }
        }
    }

    fn serve(&self) -> Router {
        let files = ServeDir::new(&self.paths.images_path);
        let mount = normalize_separators(&self.paths.images_rel_path, MAIN_SEPARATOR);
        let mount = mount.trim_matches('/');

        if mount.is_empty() {
            Router::new().fallback_service(files)
        } else {
            Router::new().nest_service(&format!("/{}", mount), files)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MockFileSystem;
    use crate::resize::MockResizer;
    use tempfile::{tempdir, TempDir};

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 9).unwrap()
    }

    fn store_in(dir: &TempDir, resizer: MockResizer) -> LocalFileStore {
        LocalFileStore::new(
            PathConfig::new("content/images", dir.path().join("images"), ""),
            ThumbnailConfig::default(),
            Arc::new(resizer),
        )
        .with_fixed_date(date())
    }

    fn upload(dir: &TempDir, name: &str) -> ImageUpload {
        let source = dir.path().join(format!("upload-{}.tmp", uuid::Uuid::new_v4()));
        std::fs::write(&source, b"\xFF\xD8\xFFfake jpeg").unwrap();
        ImageUpload::new(source, name)
    }

    #[tokio::test]
    async fn test_store_reports_paths() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir, MockResizer::new());

        let stored = store.store(upload(&dir, "cat.jpg")).await.unwrap();

        let month = dir.path().join("images").join("2024").join("03");
        assert_eq!(stored.url, "/content/images/2024/03/cat.jpg");
        assert_eq!(stored.path, month.join("cat.jpg"));
        assert_eq!(stored.thumbnail, Some(month.join("t_cat.jpg")));
    }

    #[tokio::test]
    async fn test_store_sanitizes_client_paths() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir, MockResizer::new());

        let stored = store
            .store(upload(&dir, "..\\..\\evil\\cat.jpg"))
            .await
            .unwrap();
        assert_eq!(stored.url, "/content/images/2024/03/cat.jpg");
    }

    #[tokio::test]
    async fn test_store_rejects_unusable_names() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir, MockResizer::new());
        let upload = upload(&dir, "photos/");
        let source = upload.source_path.clone();

        let err = store.store(upload).await.unwrap_err();
        assert!(matches!(err, Error::InvalidFileName(_)));
        assert!(source.exists());
    }

    #[tokio::test]
    async fn test_copy_failure_leaves_no_placeholder() {
        let dir = tempdir().unwrap();
        let store = LocalFileStore::with_file_system(
            PathConfig::new("content/images", dir.path().join("images"), ""),
            ThumbnailConfig::default(),
            Arc::new(MockResizer::new()),
            Arc::new(MockFileSystem::new().with_copy_failure(true)),
        )
        .with_fixed_date(date());

        let upload = upload(&dir, "cat.jpg");
        let source = upload.source_path.clone();
        let err = store.store(upload).await.unwrap_err();

        assert!(matches!(err, Error::Copy { .. }));
        assert!(source.exists());
        assert!(!store.target_dir().absolute.join("cat.jpg").exists());
    }

    #[tokio::test]
    async fn test_unwritable_directory_is_a_copy_failure() {
        let dir = tempdir().unwrap();
        let resizer = MockResizer::new();
        let store = LocalFileStore::with_file_system(
            PathConfig::new("content/images", dir.path().join("images"), ""),
            ThumbnailConfig::default(),
            Arc::new(resizer.clone()),
            Arc::new(MockFileSystem::new().with_create_new_failure(true)),
        )
        .with_fixed_date(date());

        let upload = upload(&dir, "cat.jpg");
        let source = upload.source_path.clone();
        let err = store.store(upload).await.unwrap_err();

        assert!(matches!(err, Error::Copy { .. }));
        assert!(source.exists());
        assert_eq!(resizer.get_call_count(), 0);
        assert_eq!(
            std::fs::read_dir(store.target_dir().absolute).unwrap().count(),
            0
        );
    }

    #[tokio::test]
    async fn test_missing_source_is_a_copy_failure() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir, MockResizer::new());

        let err = store
            .store(ImageUpload::new(dir.path().join("gone.tmp"), "cat.jpg"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Copy { .. }));
        assert!(!store.target_dir().absolute.join("cat.jpg").exists());
    }

    #[tokio::test]
    async fn test_naming_failure_is_fatal() {
        let dir = tempdir().unwrap();
        let store = LocalFileStore::with_file_system(
            PathConfig::new("content/images", dir.path().join("images"), ""),
            ThumbnailConfig::default(),
            Arc::new(MockResizer::new()),
            Arc::new(MockFileSystem::new().with_exists_failure(true)),
        )
        .with_fixed_date(date());

        let err = store.store(upload(&dir, "cat.jpg")).await.unwrap_err();
        assert!(matches!(err, Error::Naming { .. }));
    }

    #[tokio::test]
    async fn test_thumbnail_timeout_is_not_fatal() {
        let dir = tempdir().unwrap();
        let thumbnails = ThumbnailConfig {
            timeout: Duration::from_millis(20),
            ..ThumbnailConfig::default()
        };
        let store = LocalFileStore::new(
            PathConfig::new("content/images", dir.path().join("images"), ""),
            thumbnails,
            Arc::new(MockResizer::new().with_delay(Duration::from_secs(5))),
        )
        .with_fixed_date(date());

        let stored = store.store(upload(&dir, "cat.jpg")).await.unwrap();

        assert_eq!(stored.url, "/content/images/2024/03/cat.jpg");
        assert_eq!(stored.thumbnail, None);
        assert!(!store.target_dir().absolute.join("t_cat.jpg").exists());
    }

    #[tokio::test]
    async fn test_abandoned_builtin_resize_leaves_nothing_behind() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("upload.tmp");
        image::RgbImage::from_pixel(3000, 2000, image::Rgb([40, 120, 200]))
            .save_with_format(&source, image::ImageFormat::Png)
            .unwrap();

        let thumbnails = ThumbnailConfig {
            timeout: Duration::from_millis(1),
            ..ThumbnailConfig::default()
        };
        let store = LocalFileStore::new(
            PathConfig::new("content/images", dir.path().join("images"), ""),
            thumbnails,
            Arc::new(crate::resize::ImageResizer::new()),
        )
        .with_fixed_date(date());

        let stored = store
            .store(ImageUpload::new(source, "big.png"))
            .await
            .unwrap();
        assert_eq!(stored.thumbnail, None);

        // Wait for the abandoned blocking resize to finish and drop its output.
        let month = store.target_dir().absolute;
        let listing = || -> Vec<String> {
            let mut names: Vec<String> = std::fs::read_dir(&month)
                .unwrap()
                .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
                .collect();
            names.sort();
            names
        };
        for _ in 0..500 {
            if listing().len() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(listing(), vec!["big.png"]);
    }

    #[tokio::test]
    async fn test_detached_thumbnail_still_lands() {
        let dir = tempdir().unwrap();
        let thumbnails = ThumbnailConfig {
            mode: ThumbnailMode::Detached,
            ..ThumbnailConfig::default()
        };
        let store = LocalFileStore::new(
            PathConfig::new("content/images", dir.path().join("images"), ""),
            thumbnails,
            Arc::new(MockResizer::new()),
        )
        .with_fixed_date(date());

        let stored = store.store(upload(&dir, "cat.jpg")).await.unwrap();
        assert_eq!(stored.thumbnail, None);

        let thumb = store.target_dir().absolute.join("t_cat.jpg");
        for _ in 0..100 {
            if std::fs::read(&thumb).map(|b| !b.is_empty()).unwrap_or(false) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(std::fs::read(&thumb).unwrap(), b"\xFF\xD8\xFFfake jpeg");
    }

    #[tokio::test]
    async fn test_exists_swallows_errors() {
        let dir = tempdir().unwrap();
        let store = LocalFileStore::with_file_system(
            PathConfig::new("content/images", dir.path().join("images"), ""),
            ThumbnailConfig::default(),
            Arc::new(MockResizer::new()),
            Arc::new(MockFileSystem::new().with_exists_failure(true)),
        );

        assert!(!store.exists(dir.path()).await);
    }

    #[test]
    fn test_path_for_url_uses_images_path() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir, MockResizer::new());

        assert_eq!(
            store.path_for_url("/content/images/2024/03/cat.jpg"),
            Some(dir.path().join("images").join("2024").join("03").join("cat.jpg"))
        );
    }
}
