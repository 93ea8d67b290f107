use super::{ResizeSpec, Resizer};
use crate::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Resizes by running an ImageMagick-compatible binary:
/// `<program> <source> -resize <geometry> <destination>`.
#[derive(Debug, Clone)]
pub struct CommandResizer {
    program: PathBuf,
}

impl CommandResizer {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// `1024x>` only shrinks images wider than 1024 pixels.
    fn geometry(spec: ResizeSpec) -> String {
        if spec.shrink_only {
            format!("{}x>", spec.width)
        } else {
            format!("{}x", spec.width)
        }
    }
}

#[async_trait]
impl Resizer for CommandResizer {
    async fn resize(&self, source: &Path, destination: &Path, spec: ResizeSpec) -> Result<()> {
        let program = self.program.display().to_string();
        tracing::debug!(
            "Running {} on {} -> {}",
            program,
            source.display(),
            destination.display()
        );

        // Killed if the caller's timeout drops this future.
        let output = Command::new(&self.program)
            .arg(source)
            .arg("-resize")
            .arg(Self::geometry(spec))
            .arg(destination)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::Thumbnail(format!("failed to spawn {}: {}", program, e)))?;

        if !output.status.success() {
            return Err(Error::Thumbnail(format!(
                "{} exited with {}: {}",
                program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(())
    }
}
