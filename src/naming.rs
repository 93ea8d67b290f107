//! Collision-free file names
//!
//! A base name like `cat.jpg` is tried as-is, then as `cat-1.jpg`,
//! `cat-2.jpg` and so on. If the numbered range is used up a handful of
//! random tokens are tried before giving up.

use crate::fs::FileSystem;
use crate::storage::SaveStep;
use crate::{Error, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

const MAX_NUMBERED: usize = 1000;
const MAX_RANDOM: usize = 8;

/// Reduce an uploaded name to its last path component.
///
/// Browsers occasionally send full client paths, with either separator.
pub fn leaf_name(original: &str) -> Result<String> {
    let leaf = original.rsplit(&['/', '\\'][..]).next().unwrap_or("");

    match leaf {
        "" | "." | ".." => Err(Error::InvalidFileName(original.to_string())),
        leaf => Ok(leaf.to_string()),
    }
}

/// The ordered sequence of names tried for one base name.
#[derive(Debug, Clone)]
pub struct Candidates {
    stem: String,
    extension: Option<String>,
    index: usize,
}

impl Candidates {
    pub fn new(base_name: &str) -> Self {
        let (stem, extension) = match base_name.rfind('.') {
            Some(dot) if dot > 0 => (
                base_name[..dot].to_string(),
                Some(base_name[dot + 1..].to_string()),
            ),
            _ => (base_name.to_string(), None),
        };

        Self {
            stem,
            extension,
            index: 0,
        }
    }

    pub fn starting_at(mut self, index: usize) -> Self {
        self.index = index;
        self
    }

    fn with_token(&self, token: &str) -> String {
        match &self.extension {
            Some(ext) => format!("{}-{}.{}", self.stem, token, ext),
            None => format!("{}-{}", self.stem, token),
        }
    }
}

impl Iterator for Candidates {
    /// Position in the sequence and the candidate name.
    type Item = (usize, String);

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.index;
        let name = match index {
            0 => match &self.extension {
                Some(ext) => format!("{}.{}", self.stem, ext),
                None => self.stem.clone(),
            },
            n if n <= MAX_NUMBERED => self.with_token(&n.to_string()),
            n if n <= MAX_NUMBERED + MAX_RANDOM => {
                self.with_token(&Uuid::new_v4().simple().to_string())
            }
            _ => return None,
        };

        self.index += 1;
        Some((index, name))
    }
}

/// A free name found by polling, not yet reserved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub index: usize,
    pub path: PathBuf,
}

#[derive(Clone)]
pub struct UniqueNamer {
    fs: Arc<dyn FileSystem>,
}

impl UniqueNamer {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self { fs }
    }

    /// First name in `dir` that nothing currently occupies.
    ///
    /// Only polls; two callers racing on the same base name can both be
    /// handed the same answer. Use [`UniqueNamer::claim`] to reserve.
    pub async fn unique_name(&self, base_name: &str, dir: &Path) -> Result<PathBuf> {
        Ok(self.pick(base_name, dir, 0).await?.path)
    }

    /// Find and atomically reserve a free name, leaving an empty file there.
    pub async fn claim(&self, base_name: &str, dir: &Path, step: SaveStep) -> Result<PathBuf> {
        let candidate = self.pick(base_name, dir, 0).await?;
        self.claim_from(base_name, dir, candidate, step).await
    }

    pub async fn pick(&self, base_name: &str, dir: &Path, from: usize) -> Result<Candidate> {
        for (index, name) in Candidates::new(base_name).starting_at(from) {
            let path = dir.join(name);
            let taken = self.fs.exists(&path).await.map_err(|source| Error::Naming {
                dir: dir.to_path_buf(),
                source,
            })?;

            if !taken {
                return Ok(Candidate { index, path });
            }
        }

        Err(Error::NamesExhausted {
            dir: dir.to_path_buf(),
            base: base_name.to_string(),
        })
    }

    /// Reserve `candidate` with an exclusive create, moving further along the
    /// sequence each time another writer got there first.
    ///
    /// A create that fails for any reason other than the name being taken is
    /// returned as [`Error::Io`].
    pub async fn claim_from(
        &self,
        base_name: &str,
        dir: &Path,
        candidate: Candidate,
        step: SaveStep,
    ) -> Result<PathBuf> {
        let mut candidate = candidate;

        loop {
            match self.fs.create_new(&candidate.path).await {
                Ok(()) => return Ok(candidate.path),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    debug!(
                        step = step.name(),
                        "{} was taken before it could be claimed, moving on",
                        candidate.path.display()
                    );
                    candidate = self.pick(base_name, dir, candidate.index + 1).await?;
                }
                Err(e) => return Err(Error::Io(e)),
            }
        }
    }
}
