//! Filesystem primitives used by the local store
//!
//! Every primitive is asynchronous and reports a plain `io::Error`; callers
//! decide which pipeline failure it becomes.

pub mod local;
pub mod mock;

pub use local::LocalFileSystem;
pub use mock::MockFileSystem;

use async_trait::async_trait;
use std::io;
use std::path::Path;

#[async_trait]
pub trait FileSystem: Send + Sync {
    async fn exists(&self, path: &Path) -> io::Result<bool>;
    async fn create_dir_all(&self, path: &Path) -> io::Result<()>;
    /// Create an empty file, failing with `AlreadyExists` if anything is
    /// already at `path`.
    async fn create_new(&self, path: &Path) -> io::Result<()>;
    async fn copy(&self, from: &Path, to: &Path) -> io::Result<u64>;
    async fn remove_file(&self, path: &Path) -> io::Result<()>;
}
