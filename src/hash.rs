//! Fingerprints: what we remember about a file to tell whether it changed.
//!
//! A fingerprint is the file's mtime plus, when content hashing is enabled,
//! a hash of its bytes.  With hashes on both sides the hashes decide, so
//! touching a file without changing it doesn't cause a rebuild.

use crate::fs::{FileSystem, MTime};
use rustc_hash::FxHasher;
use std::hash::Hasher;
use std::io::Read;

/// Hash value of some content (a file, a command line).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Hash(pub u64);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub mtime: MTime,
    pub hash: Option<Hash>,
}

impl Fingerprint {
    pub fn missing() -> Self {
        Fingerprint {
            mtime: MTime::Missing,
            hash: None,
        }
    }

    pub fn exists(&self) -> bool {
        self.mtime != MTime::Missing
    }

    /// Whether two fingerprints describe the same file state.
    pub fn matches(&self, other: &Fingerprint) -> bool {
        match (self.hash, other.hash) {
            (Some(a), Some(b)) => a == b,
            _ => self.mtime == other.mtime,
        }
    }
}

/// Compute the current fingerprint of a path.
pub fn fingerprint(
    fs: &dyn FileSystem,
    path: &str,
    hash_content: bool,
) -> std::io::Result<Fingerprint> {
    let mtime = fs.stat(path)?;
    let hash = match mtime {
        MTime::Stamp(_) if hash_content => fs.content_hash(path)?,
        _ => None,
    };
    Ok(Fingerprint { mtime, hash })
}

const UNIT_SEPARATOR: u8 = 0x1F;

/// Read into buf until it is full or the reader is exhausted.
fn fill(r: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

/// Hash of a reader's content.  FxHasher output depends on how the bytes are
/// split across write() calls, so content is always fed in full buffers.
pub fn hash_reader(mut r: impl Read) -> std::io::Result<Hash> {
    let mut hasher = FxHasher::default();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = fill(&mut r, &mut buf)?;
        hasher.write(&buf[..n]);
        if n < buf.len() {
            break;
        }
    }
    hasher.write_u8(UNIT_SEPARATOR);
    Ok(Hash(hasher.finish()))
}

/// Hash of a command line, recorded so that editing a command reruns it.
pub fn hash_cmdline(cmdline: &str) -> Hash {
    let mut hasher = FxHasher::default();
    hasher.write(cmdline.as_bytes());
    hasher.write_u8(UNIT_SEPARATOR);
    Hash(hasher.finish())
}
