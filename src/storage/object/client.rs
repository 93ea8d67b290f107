use super::ObjectClient;
use crate::models::ObjectStoreConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::{config::Region, types::ObjectCannedAcl, Client as S3Client};
use std::path::Path;
use tokio_retry::{strategy::FixedInterval, Retry};
use tracing::warn;

pub struct S3ObjectClient {
    client: S3Client,
    bucket: String,
}

impl S3ObjectClient {
    pub async fn new(config: &ObjectStoreConfig) -> Result<Self> {
        let credentials = aws_sdk_s3::config::Credentials::new(
            config.access_key_id.clone(),
            config.secret_access_key.clone(),
            None,
            None,
            "digital-ocean-spaces",
        );

        // Create custom config for DigitalOcean Spaces
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(Region::new("us-east-1")) // DigitalOcean Spaces doesn't really use regions
            .endpoint_url(config.endpoint.clone())
            .load()
            .await;

        Ok(Self {
            client: S3Client::new(&sdk_config),
            bucket: config.bucket.clone(),
        })
    }
}

#[async_trait]
impl ObjectClient for S3ObjectClient {
    async fn head(&self, key: &str) -> Result<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => Ok(false),
            Err(e) => Err(Error::ObjectStore(format!(
                "Failed to check {}: {}",
                key, e
            ))),
        }
    }

    async fn put(&self, key: &str, path: &Path, content_type: &str) -> Result<()> {
        let retry_strategy = FixedInterval::from_millis(500).take(2);

        let client = &self.client;
        let bucket = self.bucket.as_str();
        Retry::spawn(retry_strategy, move || async move {
            let body = ByteStream::from_path(path)
                .await
                .map_err(|e| Error::ObjectStore(format!("Failed to read {}: {}", path.display(), e)))?;

            client
                .put_object()
                .bucket(bucket)
                .key(key)
                .body(body)
                .content_type(content_type)
                .acl(ObjectCannedAcl::PublicRead)
                .send()
                .await
                .map_err(|e| {
                    warn!("Upload of {} failed: {}", key, e);
                    Error::ObjectStore(format!("Failed to upload file: {}", e))
                })?;

            Ok::<(), Error>(())
        })
        .await
    }
}
