use super::{ResizeSpec, Resizer};
use crate::Result;
use async_trait::async_trait;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Copies the source to the destination instead of resizing.
#[derive(Clone)]
pub struct MockResizer {
    call_count: Arc<Mutex<usize>>,
    should_fail: Arc<Mutex<bool>>,
    delay: Option<Duration>,
}

impl MockResizer {
    pub fn new() -> Self {
        Self {
            call_count: Arc::new(Mutex::new(0)),
            should_fail: Arc::new(Mutex::new(false)),
            delay: None,
        }
    }

    pub fn with_failure(self, should_fail: bool) -> Self {
        *self.should_fail.lock().unwrap() = should_fail;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn get_call_count(&self) -> usize {
        *self.call_count.lock().unwrap()
    }
}

impl Default for MockResizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Resizer for MockResizer {
    async fn resize(&self, source: &Path, destination: &Path, _spec: ResizeSpec) -> Result<()> {
        *self.call_count.lock().unwrap() += 1;

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if *self.should_fail.lock().unwrap() {
            return Err(crate::Error::Thumbnail("Mock failure".to_string()));
        }

        tokio::fs::copy(source, destination).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SPEC: ResizeSpec = ResizeSpec {
        width: 1024,
        shrink_only: true,
    };

    #[tokio::test]
    async fn test_mock_resizer_copies() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("cat.jpg");
        let destination = dir.path().join("t_cat.jpg");
        std::fs::write(&source, b"fake image").unwrap();

        let resizer = MockResizer::new();
        resizer.resize(&source, &destination, SPEC).await.unwrap();

        assert_eq!(std::fs::read(&destination).unwrap(), b"fake image");
        assert_eq!(resizer.get_call_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_resizer_failure() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("cat.jpg");
        std::fs::write(&source, b"fake image").unwrap();

        let resizer = MockResizer::new().with_failure(true);
        let result = resizer
            .resize(&source, &dir.path().join("t_cat.jpg"), SPEC)
            .await;

        assert!(result.is_err());
        assert!(!dir.path().join("t_cat.jpg").exists());
        assert_eq!(resizer.get_call_count(), 1);
    }
}
