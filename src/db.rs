//! The state file stores information about previous runs for determining
//! which outputs are up to date.
//!
//! For every output produced by a command that succeeded, we record the
//! output's own fingerprint, a hash of the command line that produced it,
//! and the fingerprints of that command's inputs at the time it ran.
//!
//! On disk (little-endian): the magic "psibuild state\n", a u32 version,
//! a u32 record count, then the records.  Strings are a u32 length plus
//! UTF-8 bytes.  A fingerprint is a tag byte (0 missing, 1 stamped), for
//! stamped files u64 seconds and u32 nanoseconds since the epoch, then a
//! flag byte and, if set, a u64 content hash.

use crate::fs::MTime;
use crate::hash::{Fingerprint, Hash};
use anyhow::{anyhow, bail};
use rustc_hash::FxHashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

const MAGIC: &[u8] = b"psibuild state\n";
const VERSION: u32 = 1;

/// Upper bound on a single string, to fail fast on garbage.
const MAX_STRING: usize = 1 << 20;

/// What was recorded about one output path.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub fingerprint: Fingerprint,
    /// Hash of the command line that produced the output.
    pub command: Hash,
    /// Inputs and extra dependencies of the producing command, as they were
    /// when it ran.
    pub inputs: Vec<(String, Fingerprint)>,
}

impl Record {
    pub fn input(&self, path: &str) -> Option<&Fingerprint> {
        self.inputs
            .iter()
            .find(|(name, _)| name == path)
            .map(|(_, fp)| fp)
    }
}

/// Recorded state, keyed by output path.
#[derive(Debug, Default, Clone)]
pub struct RunState {
    records: FxHashMap<String, Record>,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<&Record> {
        self.records.get(path)
    }

    pub fn insert(&mut self, path: String, record: Record) {
        self.records.insert(path, record);
    }

    pub fn remove(&mut self, path: &str) -> Option<Record> {
        self.records.remove(path)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Record)> {
        self.records.iter()
    }

    /// Drop the records of paths for which keep returns false.
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.records.retain(|path, _| keep(path));
    }
}

struct Reader<R: Read> {
    r: R,
}

impl<R: Read> Reader<R> {
    fn read_bytes<const N: usize>(&mut self) -> std::io::Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.r.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn read_u8(&mut self) -> std::io::Result<u8> {
        Ok(self.read_bytes::<1>()?[0])
    }

    fn read_u32(&mut self) -> std::io::Result<u32> {
        Ok(u32::from_le_bytes(self.read_bytes()?))
    }

    fn read_u64(&mut self) -> std::io::Result<u64> {
        Ok(u64::from_le_bytes(self.read_bytes()?))
    }

    fn read_str(&mut self) -> anyhow::Result<String> {
        let len = self.read_u32()? as usize;
        if len > MAX_STRING {
            bail!("string length {} too large", len);
        }
        let mut buf = vec![0u8; len];
        self.r.read_exact(&mut buf)?;
        Ok(String::from_utf8(buf)?)
    }

    fn read_fingerprint(&mut self) -> anyhow::Result<Fingerprint> {
        let mtime = match self.read_u8()? {
            0 => MTime::Missing,
            1 => {
                let secs = self.read_u64()?;
                let nanos = self.read_u32()?;
                if nanos >= 1_000_000_000 {
                    bail!("bad nanoseconds {}", nanos);
                }
                MTime::Stamp(SystemTime::UNIX_EPOCH + Duration::new(secs, nanos))
            }
            tag => bail!("bad mtime tag {}", tag),
        };
        let hash = match self.read_u8()? {
            0 => None,
            1 => Some(Hash(self.read_u64()?)),
            flag => bail!("bad hash flag {}", flag),
        };
        Ok(Fingerprint { mtime, hash })
    }

    fn at_eof(&mut self) -> std::io::Result<bool> {
        let mut buf = [0u8; 1];
        Ok(self.r.read(&mut buf)? == 0)
    }
}

fn read_state<R: Read>(r: R) -> anyhow::Result<RunState> {
    let mut r = Reader { r };
    let mut magic = vec![0u8; MAGIC.len()];
    r.r.read_exact(&mut magic)?;
    if magic != MAGIC {
        bail!("not a state file");
    }
    let version = r.read_u32()?;
    if version != VERSION {
        bail!("unsupported version {}", version);
    }

    let mut state = RunState::new();
    let count = r.read_u32()?;
    for _ in 0..count {
        let path = r.read_str()?;
        let fingerprint = r.read_fingerprint()?;
        let command = Hash(r.read_u64()?);
        let n = r.read_u32()?;
        let mut inputs = Vec::new();
        for _ in 0..n {
            let name = r.read_str()?;
            inputs.push((name, r.read_fingerprint()?));
        }
        state.insert(
            path,
            Record {
                fingerprint,
                command,
                inputs,
            },
        );
    }
    if !r.at_eof()? {
        bail!("trailing data");
    }
    Ok(state)
}

/// Read the state file.  A missing file is an empty state.
pub fn read(path: &Path) -> anyhow::Result<RunState> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(RunState::new()),
        Err(err) => return Err(anyhow!("open {}: {}", path.display(), err)),
    };
    read_state(BufReader::new(file)).map_err(|err| anyhow!("read {}: {}", path.display(), err))
}

/// Read the state file, treating an unreadable one as empty.  Forgetting
/// state only means rebuilding more than necessary, so the problem is
/// returned as a warning rather than an error.
pub fn open(path: &Path) -> (RunState, Option<String>) {
    match read(path) {
        Ok(state) => (state, None),
        Err(err) => (RunState::new(), Some(format!("{}; starting from scratch", err))),
    }
}

struct Writer<W: Write> {
    w: W,
}

impl<W: Write> Writer<W> {
    fn write_u8(&mut self, v: u8) -> std::io::Result<()> {
        self.w.write_all(&[v])
    }

    fn write_u32(&mut self, v: u32) -> std::io::Result<()> {
        self.w.write_all(&v.to_le_bytes())
    }

    fn write_u64(&mut self, v: u64) -> std::io::Result<()> {
        self.w.write_all(&v.to_le_bytes())
    }

    fn write_len(&mut self, len: usize) -> anyhow::Result<()> {
        let len = u32::try_from(len).map_err(|_| anyhow!("too many entries"))?;
        Ok(self.write_u32(len)?)
    }

    fn write_str(&mut self, s: &str) -> anyhow::Result<()> {
        if s.len() > MAX_STRING {
            bail!("path too long: {:?}...", s.chars().take(40).collect::<String>());
        }
        self.write_len(s.len())?;
        Ok(self.w.write_all(s.as_bytes())?)
    }

    fn write_fingerprint(&mut self, fp: &Fingerprint) -> std::io::Result<()> {
        match fp.mtime {
            MTime::Missing => self.write_u8(0)?,
            MTime::Stamp(t) => {
                // Pre-epoch times are clamped; they only ever cause a rebuild.
                let since = t.duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default();
                self.write_u8(1)?;
                self.write_u64(since.as_secs())?;
                self.write_u32(since.subsec_nanos())?;
            }
        }
        match fp.hash {
            None => self.write_u8(0),
            Some(Hash(h)) => {
                self.write_u8(1)?;
                self.write_u64(h)
            }
        }
    }
}

fn write_state<W: Write>(w: W, state: &RunState) -> anyhow::Result<W> {
    let mut w = Writer { w };
    w.w.write_all(MAGIC)?;
    w.write_u32(VERSION)?;
    w.write_len(state.len())?;

    let mut paths: Vec<&String> = state.records.keys().collect();
    paths.sort();
    for path in paths {
        let record = &state.records[path];
        w.write_str(path)?;
        w.write_fingerprint(&record.fingerprint)?;
        w.write_u64(record.command.0)?;
        w.write_len(record.inputs.len())?;
        for (name, fp) in &record.inputs {
            w.write_str(name)?;
            w.write_fingerprint(fp)?;
        }
    }
    Ok(w.w)
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Write the state file atomically: write a temporary file next to it, then
/// rename it over the old one, so a crash leaves the previous state intact.
pub fn write(path: &Path, state: &RunState) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let tmp = temp_path(path);
    let file = File::create(&tmp).map_err(|err| anyhow!("create {}: {}", tmp.display(), err))?;
    let mut w = write_state(BufWriter::new(file), state)?;
    w.flush()?;
    let file = w.into_inner().map_err(|err| anyhow!("write {}: {}", tmp.display(), err))?;
    file.sync_all()?;
    std::fs::rename(&tmp, path)
        .map_err(|err| anyhow!("rename {} to {}: {}", tmp.display(), path.display(), err))?;
    Ok(())
}
