use super::FileSystem;
use async_trait::async_trait;
use std::io::{self, ErrorKind};
use std::path::Path;
use tokio::fs;

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileSystem;

impl LocalFileSystem {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FileSystem for LocalFileSystem {
    async fn exists(&self, path: &Path) -> io::Result<bool> {
        match fs::try_exists(path).await {
            Ok(exists) => Ok(exists),
            // A regular file where a directory should be means nothing can live below it.
            Err(e) if e.kind() == ErrorKind::NotADirectory => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path).await
    }

    async fn create_new(&self, path: &Path) -> io::Result<()> {
        fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await
            .map(|_| ())
    }

    async fn copy(&self, from: &Path, to: &Path) -> io::Result<u64> {
        fs::copy(from, to).await
    }

    async fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path).await
    }
}
