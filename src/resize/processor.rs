use super::{ResizeSpec, Resizer};
use crate::{Error, Result};
use async_trait::async_trait;
use image::{imageops::FilterType, DynamicImage, ImageFormat, ImageReader};
use little_exif::metadata::Metadata;
use std::path::Path;
use tempfile::TempPath;

/// Resizes in-process with the `image` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageResizer;

impl ImageResizer {
    pub fn new() -> Self {
        Self
    }

    fn target_dimensions(width: u32, height: u32, spec: ResizeSpec) -> Option<(u32, u32)> {
        if width == 0 || (spec.shrink_only && width <= spec.width) {
            return None;
        }

        let scaled = (u64::from(height) * u64::from(spec.width) / u64::from(width)).max(1);
        Some((spec.width, u32::try_from(scaled).unwrap_or(u32::MAX)))
    }

    fn resize_sync(
        source: &Path,
        staging: &Path,
        format: ImageFormat,
        spec: ResizeSpec,
    ) -> Result<()> {
        let image = ImageReader::open(source)?.with_guessed_format()?.decode()?;

        let image = match Self::target_dimensions(image.width(), image.height(), spec) {
            Some((width, height)) => image.resize_exact(width, height, FilterType::Lanczos3),
            None => image,
        };

        // JPEG has no alpha channel
        let image = match format {
            ImageFormat::Jpeg => DynamicImage::ImageRgb8(image.to_rgb8()),
            _ => image,
        };

        image.save_with_format(staging, format)?;

        // Strip EXIF to prevent stale orientation tags from confusing viewers
        if matches!(format, ImageFormat::Jpeg | ImageFormat::WebP) {
            if let Err(e) = Metadata::file_clear_metadata(&staging.to_path_buf()) {
                tracing::warn!("Failed to strip EXIF from {}: {}", staging.display(), e);
            }
        }

        Ok(())
    }

    /// A temp file next to `destination` with the same extension.
    ///
    /// It is deleted when dropped, so a resize abandoned by a timeout never
    /// leaves anything behind.
    fn staging_path(destination: &Path) -> Result<TempPath> {
        let dir = destination
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let suffix = destination
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();

        let file = tempfile::Builder::new()
            .prefix(".resize-")
            .suffix(&suffix)
            .tempfile_in(dir)?;
        Ok(file.into_temp_path())
    }
}

#[async_trait]
impl Resizer for ImageResizer {
    async fn resize(&self, source: &Path, destination: &Path, spec: ResizeSpec) -> Result<()> {
        let format = ImageFormat::from_path(destination)?;
        let staging = Self::staging_path(destination)?;

        // The blocking task owns the staging file until it finishes. If this
        // future is dropped first, the file goes with the task's result.
        let staging = tokio::task::spawn_blocking({
            let source = source.to_path_buf();
            move || Self::resize_sync(&source, &staging, format, spec).map(|()| staging)
        })
        .await
        .map_err(|e| Error::Invariant(format!("Resize task join error: {}", e)))??;

        staging.persist(destination).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    const SPEC: ResizeSpec = ResizeSpec {
        width: 1024,
        shrink_only: true,
    };

    fn write_test_image(dir: &TempDir, name: &str, width: u32, height: u32) -> PathBuf {
        let img = image::RgbaImage::from_pixel(width, height, image::Rgba([255, 0, 0, 255]));
        let path = dir.path().join(name);
        img.save_with_format(&path, ImageFormat::Png).unwrap();
        path
    }

    #[test]
    fn test_target_dimensions() {
        assert_eq!(ImageResizer::target_dimensions(2048, 1536, SPEC), Some((1024, 768)));
        assert_eq!(ImageResizer::target_dimensions(1024, 10, SPEC), None);
        assert_eq!(ImageResizer::target_dimensions(10, 10, SPEC), None);
        assert_eq!(ImageResizer::target_dimensions(4096, 1, SPEC), Some((1024, 1)));

        let grow = ResizeSpec {
            width: 100,
            shrink_only: false,
        };
        assert_eq!(ImageResizer::target_dimensions(10, 20, grow), Some((100, 200)));
    }

    #[tokio::test]
    async fn test_shrinks_wide_images() {
        let dir = TempDir::new().unwrap();
        let source = write_test_image(&dir, "wide.png", 2048, 512);
        let destination = dir.path().join("t_wide.png");

        ImageResizer::new()
            .resize(&source, &destination, SPEC)
            .await
            .unwrap();

        let thumb = image::open(&destination).unwrap();
        assert_eq!(thumb.width(), 1024);
        assert_eq!(thumb.height(), 256);
    }

    #[tokio::test]
    async fn test_never_enlarges_small_images() {
        let dir = TempDir::new().unwrap();
        let source = write_test_image(&dir, "small.png", 10, 10);
        let destination = dir.path().join("t_small.png");

        ImageResizer::new()
            .resize(&source, &destination, SPEC)
            .await
            .unwrap();

        let thumb = image::open(&destination).unwrap();
        assert_eq!(thumb.width(), 10);
        assert_eq!(thumb.height(), 10);
    }

    #[tokio::test]
    async fn test_writes_jpeg_from_alpha_source() {
        let dir = TempDir::new().unwrap();
        let source = write_test_image(&dir, "alpha.png", 1200, 600);
        let destination = dir.path().join("t_alpha.jpg");

        ImageResizer::new()
            .resize(&source, &destination, SPEC)
            .await
            .unwrap();

        let thumb = image::open(&destination).unwrap();
        assert_eq!(thumb.width(), 1024);
        assert_eq!(thumb.height(), 512);
    }

    #[tokio::test]
    async fn test_rejects_non_images() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("notes.png");
        std::fs::write(&source, b"definitely not an image").unwrap();

        let result = ImageResizer::new()
            .resize(&source, &dir.path().join("t_notes.png"), SPEC)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_leaves_only_the_destination_behind() {
        let dir = TempDir::new().unwrap();
        let source = write_test_image(&dir, "wide.png", 1600, 400);
        let destination = dir.path().join("t_wide.jpg");

        ImageResizer::new()
            .resize(&source, &destination, SPEC)
            .await
            .unwrap();

        let mut names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["t_wide.jpg", "wide.png"]);
    }

    #[tokio::test]
    async fn test_failed_resize_removes_staging_file() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("notes.png");
        std::fs::write(&source, b"definitely not an image").unwrap();

        let result = ImageResizer::new()
            .resize(&source, &dir.path().join("t_notes.png"), SPEC)
            .await;

        assert!(result.is_err());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
