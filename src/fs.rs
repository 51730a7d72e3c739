//! Filesystem access used by staleness checks and the executor.
//! Indirected as a trait so tests can swap in an in-memory filesystem.

use crate::hash::{self, Hash};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// MTime info gathered for a file.  This also models "file is absent".
/// It's not using an Option<> just because it makes the code using it easier
/// to follow.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MTime {
    Missing,
    Stamp(SystemTime),
}

pub trait FileSystem: Sync {
    /// stat() a path, producing its MTime.
    fn stat(&self, path: &str) -> std::io::Result<MTime>;
    /// Hash a file's contents.  None for things that aren't regular files,
    /// e.g. directories used as outputs.
    fn content_hash(&self, path: &str) -> std::io::Result<Option<Hash>>;
    /// Create the directories leading up to path.
    fn create_parent_dirs(&self, path: &str) -> std::io::Result<()>;
}

/// The real filesystem, with relative paths resolved against a root (the
/// directory commands run in).
pub struct RealFileSystem {
    root: PathBuf,
}

impl RealFileSystem {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        RealFileSystem { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolve(&self, path: &str) -> PathBuf {
        // join() replaces the root when path is absolute.
        self.root.join(path)
    }
}

impl FileSystem for RealFileSystem {
    fn stat(&self, path: &str) -> std::io::Result<MTime> {
        Ok(match std::fs::metadata(self.resolve(path)) {
            Ok(meta) => MTime::Stamp(meta.modified()?),
            Err(err) => {
                if err.kind() == std::io::ErrorKind::NotFound {
                    MTime::Missing
                } else {
                    return Err(err);
                }
            }
        })
    }

    fn content_hash(&self, path: &str) -> std::io::Result<Option<Hash>> {
        let path = self.resolve(path);
        if !std::fs::metadata(&path)?.is_file() {
            return Ok(None);
        }
        let file = std::fs::File::open(&path)?;
        Ok(Some(hash::hash_reader(std::io::BufReader::new(file))?))
    }

    fn create_parent_dirs(&self, path: &str) -> std::io::Result<()> {
        match self.resolve(path).parent() {
            Some(parent) => std::fs::create_dir_all(parent),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stat_and_hash() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let fs = RealFileSystem::new(dir.path());
        assert_eq!(fs.stat("a.txt")?, MTime::Missing);

        std::fs::write(dir.path().join("a.txt"), "hello")?;
        std::fs::write(dir.path().join("b.txt"), "hello")?;
        assert!(matches!(fs.stat("a.txt")?, MTime::Stamp(_)));
        assert_eq!(fs.content_hash("a.txt")?, fs.content_hash("b.txt")?);

        std::fs::write(dir.path().join("b.txt"), "goodbye")?;
        assert_ne!(fs.content_hash("a.txt")?, fs.content_hash("b.txt")?);
        assert_eq!(fs.content_hash(".")?, None);

        fs.create_parent_dirs("sub/dir/out.txt")?;
        assert!(dir.path().join("sub/dir").is_dir());
        Ok(())
    }
}
