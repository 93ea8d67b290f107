//! Data models and configuration
//!
//! Defines the upload/result types that flow through a storage backend and
//! the configuration values each backend is constructed with.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// An uploaded image waiting in a temporary file.
///
/// `save` consumes it: the temp file is removed once the image has been
/// copied into storage.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub source_path: PathBuf,
    pub original_name: String,
}

impl ImageUpload {
    pub fn new(source_path: impl Into<PathBuf>, original_name: impl Into<String>) -> Self {
        Self {
            source_path: source_path.into(),
            original_name: original_name.into(),
        }
    }
}

/// Outcome of a successful save on the local file store.
#[derive(Debug, Clone, Serialize)]
pub struct StoredImage {
    pub url: String,
    pub path: PathBuf,
    /// Only known when the thumbnail ran inline and succeeded.
    pub thumbnail: Option<PathBuf>,
}

/// Where images live on disk and how they are addressed over HTTP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathConfig {
    pub images_rel_path: String,
    pub images_path: PathBuf,
    pub webroot: String,
}

/// A dated storage directory, both as written to and as linked to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetDirectory {
    pub absolute: PathBuf,
    pub relative: PathBuf,
}

impl PathConfig {
    pub fn new(
        images_rel_path: impl Into<String>,
        images_path: impl Into<PathBuf>,
        webroot: impl Into<String>,
    ) -> Self {
        Self {
            images_rel_path: images_rel_path.into(),
            images_path: images_path.into(),
            webroot: webroot.into(),
        }
    }

    /// Images are bucketed by year and month of the upload.
    pub fn target_dir(&self, date: NaiveDate) -> TargetDirectory {
        let year = date.format("%Y").to_string();
        let month = date.format("%m").to_string();

        TargetDirectory {
            absolute: self.images_path.join(&year).join(&month),
            relative: Path::new(&self.images_rel_path).join(year).join(month),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThumbnailMode {
    /// `save` waits for the thumbnail attempt before returning.
    Inline,
    /// The thumbnail is spawned onto the runtime once the URL is known.
    Detached,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum ResizerKind {
    Builtin,
    ImageMagick { program: PathBuf },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThumbnailConfig {
    pub prefix: String,
    pub width: u32,
    pub shrink_only: bool,
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    pub mode: ThumbnailMode,
    pub resizer: ResizerKind,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            prefix: "t_".to_string(),
            width: 1024,
            shrink_only: true,
            timeout: Duration::from_secs(30),
            mode: ThumbnailMode::Inline,
            resizer: ResizerKind::Builtin,
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

// S3-compatible bucket settings
#[derive(Debug, Clone, Serialize)]
pub struct ObjectStoreConfig {
    #[serde(skip_serializing)]
    pub access_key_id: String,
    #[serde(skip_serializing)]
    pub secret_access_key: String,
    pub endpoint: String,
    pub bucket: String,
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum BackendConfig {
    Local,
    S3(ObjectStoreConfig),
}

// Configuration
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub paths: PathConfig,
    pub thumbnails: ThumbnailConfig,
    pub backend: BackendConfig,
}

impl Config {
    pub fn from_env() -> crate::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key/value source, falling back to defaults
    /// for everything optional.
    pub fn from_lookup<F>(lookup: F) -> crate::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let images_rel_path =
            lookup("IMAGES_REL_PATH").unwrap_or_else(|| "content/images".to_string());
        let images_path = match lookup("IMAGES_PATH") {
            Some(path) => PathBuf::from(path),
            None => std::env::current_dir()?.join(&images_rel_path),
        };
        let webroot = lookup("WEBROOT").unwrap_or_default();

        let defaults = ThumbnailConfig::default();
        let thumbnails = ThumbnailConfig {
            prefix: lookup("THUMBNAIL_PREFIX").unwrap_or(defaults.prefix),
            width: parse_or("THUMBNAIL_WIDTH", lookup("THUMBNAIL_WIDTH"), defaults.width)?,
            shrink_only: defaults.shrink_only,
            timeout: Duration::from_secs(parse_or(
                "THUMBNAIL_TIMEOUT_SECS",
                lookup("THUMBNAIL_TIMEOUT_SECS"),
                defaults.timeout.as_secs(),
            )?),
            mode: match lookup("THUMBNAIL_MODE").as_deref() {
                None | Some("inline") => ThumbnailMode::Inline,
                Some("detached") => ThumbnailMode::Detached,
                Some(other) => {
                    return Err(crate::Error::Config(format!(
                        "THUMBNAIL_MODE must be 'inline' or 'detached', got '{}'",
                        other
                    )))
                }
            },
            resizer: match lookup("RESIZER").as_deref() {
                None | Some("builtin") => ResizerKind::Builtin,
                Some("imagemagick") => ResizerKind::ImageMagick {
                    program: PathBuf::from(
                        lookup("IMAGEMAGICK_BIN").unwrap_or_else(|| "convert".to_string()),
                    ),
                },
                Some(other) => {
                    return Err(crate::Error::Config(format!(
                        "RESIZER must be 'builtin' or 'imagemagick', got '{}'",
                        other
                    )))
                }
            },
        };

        let backend = match lookup("STORAGE_BACKEND").as_deref() {
            None | Some("local") => BackendConfig::Local,
            Some("s3") => BackendConfig::S3(ObjectStoreConfig {
                access_key_id: required(&lookup, "CDN_ACCESS_KEY_ID")?,
                secret_access_key: required(&lookup, "CDN_SECRET_ACCESS_KEY")?,
                endpoint: lookup("CDN_ENDPOINT")
                    .unwrap_or_else(|| "https://nyc3.digitaloceanspaces.com".to_string()),
                bucket: lookup("CDN_BUCKET").unwrap_or_else(|| "images".to_string()),
                base_url: required(&lookup, "CDN_BASE_URL")?,
            }),
            Some(other) => {
                return Err(crate::Error::Config(format!(
                    "STORAGE_BACKEND must be 'local' or 's3', got '{}'",
                    other
                )))
            }
        };

        Ok(Self {
            paths: PathConfig::new(images_rel_path, images_path, webroot),
            thumbnails,
            backend,
        })
    }
}

fn required<F>(lookup: &F, key: &str) -> crate::Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).ok_or_else(|| crate::Error::Config(format!("{} not set", key)))
}

fn parse_or<T: std::str::FromStr>(key: &str, value: Option<String>, default: T) -> crate::Result<T> {
    match value {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| crate::Error::Config(format!("{} has invalid value '{}'", key, raw))),
    }
}
