use super::ObjectClient;
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// In-memory bucket keyed by object key.
#[derive(Clone, Default)]
pub struct MockObjectClient {
    objects: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    content_types: Arc<Mutex<HashMap<String, String>>>,
    head_count: Arc<Mutex<usize>>,
    fail_head: Arc<Mutex<bool>>,
    fail_put: Arc<Mutex<bool>>,
}

impl MockObjectClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_object(self, key: &str, content: &[u8]) -> Self {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), content.to_vec());
        self
    }

    pub fn with_head_failure(self, should_fail: bool) -> Self {
        *self.fail_head.lock().unwrap() = should_fail;
        self
    }

    pub fn with_put_failure(self, should_fail: bool) -> Self {
        *self.fail_put.lock().unwrap() = should_fail;
        self
    }

    pub fn get_objects(&self) -> HashMap<String, Vec<u8>> {
        self.objects.lock().unwrap().clone()
    }

    pub fn get_content_type(&self, key: &str) -> Option<String> {
        self.content_types.lock().unwrap().get(key).cloned()
    }

    pub fn get_head_count(&self) -> usize {
        *self.head_count.lock().unwrap()
    }
}

#[async_trait]
impl ObjectClient for MockObjectClient {
    async fn head(&self, key: &str) -> Result<bool> {
        *self.head_count.lock().unwrap() += 1;

        if *self.fail_head.lock().unwrap() {
            return Err(Error::ObjectStore(format!("Mock head failure for {}", key)));
        }
        Ok(self.objects.lock().unwrap().contains_key(key))
    }

    async fn put(&self, key: &str, path: &Path, content_type: &str) -> Result<()> {
        if *self.fail_put.lock().unwrap() {
            return Err(Error::ObjectStore(format!("Mock put failure for {}", key)));
        }

        let data = tokio::fs::read(path).await?;
        self.objects.lock().unwrap().insert(key.to_string(), data);
        self.content_types
            .lock()
            .unwrap()
            .insert(key.to_string(), content_type.to_string());
        Ok(())
    }
}
