use super::{FileSystem, LocalFileSystem};
use async_trait::async_trait;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Real local disk with switchable faults.
///
/// Each primitive delegates to [`LocalFileSystem`] unless the matching
/// failure has been enabled.
#[derive(Clone, Default)]
pub struct MockFileSystem {
    inner: LocalFileSystem,
    fail_exists: Arc<Mutex<bool>>,
    fail_create_dir: Arc<Mutex<bool>>,
    fail_create_new: Arc<Mutex<bool>>,
    fail_copy: Arc<Mutex<bool>>,
    fail_remove: Arc<Mutex<bool>>,
    phantom_claims: Arc<Mutex<usize>>,
    removed: Arc<Mutex<Vec<PathBuf>>>,
}

impl MockFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_exists_failure(self, should_fail: bool) -> Self {
        *self.fail_exists.lock().unwrap() = should_fail;
        self
    }

    pub fn with_create_dir_failure(self, should_fail: bool) -> Self {
        *self.fail_create_dir.lock().unwrap() = should_fail;
        self
    }

    /// Exclusive creates fail outright, as in a read-only directory.
    pub fn with_create_new_failure(self, should_fail: bool) -> Self {
        *self.fail_create_new.lock().unwrap() = should_fail;
        self
    }

    pub fn with_copy_failure(self, should_fail: bool) -> Self {
        *self.fail_copy.lock().unwrap() = should_fail;
        self
    }

    pub fn with_remove_failure(self, should_fail: bool) -> Self {
        *self.fail_remove.lock().unwrap() = should_fail;
        self
    }

    /// Make the next `count` exclusive creates report `AlreadyExists`, as if
    /// a concurrent writer had taken the name between check and create.
    pub fn with_phantom_claims(self, count: usize) -> Self {
        *self.phantom_claims.lock().unwrap() = count;
        self
    }

    /// Paths successfully removed so far.
    pub fn get_removed(&self) -> Vec<PathBuf> {
        self.removed.lock().unwrap().clone()
    }

    fn injected(operation: &str) -> io::Error {
        io::Error::new(
            ErrorKind::PermissionDenied,
            format!("Mock {} failure", operation),
        )
    }
}

#[async_trait]
impl FileSystem for MockFileSystem {
    async fn exists(&self, path: &Path) -> io::Result<bool> {
        if *self.fail_exists.lock().unwrap() {
            return Err(Self::injected("exists"));
        }
        self.inner.exists(path).await
    }

    async fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        if *self.fail_create_dir.lock().unwrap() {
            return Err(Self::injected("create_dir_all"));
        }
        self.inner.create_dir_all(path).await
    }

    async fn create_new(&self, path: &Path) -> io::Result<()> {
        {
            let mut phantom = self.phantom_claims.lock().unwrap();
            if *phantom > 0 {
                *phantom -= 1;
                return Err(io::Error::new(ErrorKind::AlreadyExists, "Mock claim race"));
            }
        }
        if *self.fail_create_new.lock().unwrap() {
            return Err(Self::injected("create_new"));
        }
        self.inner.create_new(path).await
    }

    async fn copy(&self, from: &Path, to: &Path) -> io::Result<u64> {
        if *self.fail_copy.lock().unwrap() {
            return Err(Self::injected("copy"));
        }
        self.inner.copy(from, to).await
    }

    async fn remove_file(&self, path: &Path) -> io::Result<()> {
        if *self.fail_remove.lock().unwrap() {
            return Err(Self::injected("remove_file"));
        }
        self.inner.remove_file(path).await?;
        self.removed.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }
}
