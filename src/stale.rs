//! Deciding which commands need to run.
//!
//! Every file involved is fingerprinted up front (in parallel), then a single
//! pass in execution order compares each command against what the state file
//! recorded about its outputs.

use crate::densemap::DenseMap;
use crate::db::RunState;
use crate::fs::FileSystem;
use crate::graph::{FileId, Graph, NodeId};
use crate::hash::{self, Fingerprint};
use anyhow::anyhow;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use std::fmt;

/// Why a command is dirty.  Checked in the order listed; the first match is
/// reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reason {
    Forced,
    NoOutputs,
    MissingOutput(String),
    NoRecord(String),
    /// The output changed since it was recorded, e.g. edited by hand.
    OutputModified(String),
    CommandChanged,
    /// The set of inputs differs from the one the output was built from.
    InputsChanged,
    InputModified(String),
    /// A command this one depends on is dirty; holds that command's id.
    UpstreamDirty(String),
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reason::Forced => write!(f, "forced"),
            Reason::NoOutputs => write!(f, "no outputs"),
            Reason::MissingOutput(path) => write!(f, "output {} missing", path),
            Reason::NoRecord(path) => write!(f, "no previous record of {}", path),
            Reason::OutputModified(path) => write!(f, "output {} modified", path),
            Reason::CommandChanged => write!(f, "command line changed"),
            Reason::InputsChanged => write!(f, "set of inputs changed"),
            Reason::InputModified(path) => write!(f, "input {} changed", path),
            Reason::UpstreamDirty(id) => write!(f, "upstream {} dirty", id),
        }
    }
}

/// The outcome of a staleness check over a set of commands.
pub struct Plan {
    /// Commands considered, in execution order.
    pub order: Vec<NodeId>,
    reasons: FxHashMap<NodeId, Reason>,
    /// Current fingerprints of every file the commands touch.
    pub fingerprints: FxHashMap<String, Fingerprint>,
}

impl Plan {
    pub fn is_dirty(&self, id: NodeId) -> bool {
        self.reasons.contains_key(&id)
    }

    pub fn reason(&self, id: NodeId) -> Option<&Reason> {
        self.reasons.get(&id)
    }

    pub fn dirty_count(&self) -> usize {
        self.reasons.len()
    }

    /// Dirty commands with their reasons, in execution order.
    pub fn dirty(&self) -> impl Iterator<Item = (NodeId, &Reason)> + '_ {
        self.order
            .iter()
            .filter_map(|&id| self.reasons.get(&id).map(|reason| (id, reason)))
    }
}

pub struct StalenessOracle<'a> {
    graph: &'a Graph,
    fs: &'a dyn FileSystem,
    state: &'a RunState,
    force: bool,
    hash_content: bool,
}

impl<'a> StalenessOracle<'a> {
    pub fn new(graph: &'a Graph, fs: &'a dyn FileSystem, state: &'a RunState) -> Self {
        StalenessOracle {
            graph,
            fs,
            state,
            force: false,
            hash_content: false,
        }
    }

    /// Treat every command as dirty.
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Fingerprint file contents, not just mtimes.
    pub fn hash_content(mut self, hash_content: bool) -> Self {
        self.hash_content = hash_content;
        self
    }

    /// Check the given commands and everything they depend on.  An empty
    /// list means every command.
    pub fn plan(&self, wanted: &[NodeId]) -> anyhow::Result<Plan> {
        let order = if wanted.is_empty() {
            self.graph.order()?.to_vec()
        } else {
            self.graph.closure(wanted)?
        };
        let fingerprints = self.fingerprint_all(&order)?;

        let mut reasons = FxHashMap::default();
        for &id in &order {
            if let Some(reason) = self.check(id, &fingerprints, &reasons) {
                reasons.insert(id, reason);
            }
        }
        Ok(Plan {
            order,
            reasons,
            fingerprints,
        })
    }

    fn fingerprint_all(&self, order: &[NodeId]) -> anyhow::Result<FxHashMap<String, Fingerprint>> {
        let mut seen: DenseMap<FileId, bool> = DenseMap::new_sized(self.graph.file_ids().count(), false);
        let mut paths: Vec<&str> = Vec::new();
        for &id in order {
            let node = self.graph.node(id);
            for fid in node.dirtying_ins().chain(node.outs.iter().copied()) {
                if !seen[fid] {
                    seen[fid] = true;
                    paths.push(&self.graph.file(fid).name);
                }
            }
        }

        paths
            .par_iter()
            .map(|&path| {
                hash::fingerprint(self.fs, path, self.hash_content)
                    .map(|fp| (path.to_owned(), fp))
                    .map_err(|err| anyhow!("stat {}: {}", path, err))
            })
            .collect()
    }

    fn check(
        &self,
        id: NodeId,
        fingerprints: &FxHashMap<String, Fingerprint>,
        reasons: &FxHashMap<NodeId, Reason>,
    ) -> Option<Reason> {
        let spec = self.graph.spec(id);
        let current = |path: &str| fingerprints.get(path).copied().unwrap_or_else(Fingerprint::missing);

        if self.force {
            return Some(Reason::Forced);
        }
        if spec.outputs.is_empty() {
            return Some(Reason::NoOutputs);
        }
        if let Some(out) = spec.outputs.iter().find(|out| !current(out).exists()) {
            return Some(Reason::MissingOutput(out.clone()));
        }

        let mut records = Vec::with_capacity(spec.outputs.len());
        for out in &spec.outputs {
            match self.state.get(out) {
                Some(record) => records.push((out, record)),
                None => return Some(Reason::NoRecord(out.clone())),
            }
        }
        for &(out, record) in &records {
            if !record.fingerprint.matches(&current(out)) {
                return Some(Reason::OutputModified(out.clone()));
            }
        }
        let command = hash::hash_cmdline(&spec.cmdline);
        if records.iter().any(|(_, record)| record.command != command) {
            return Some(Reason::CommandChanged);
        }
        let ins: Vec<&str> = spec.dirtying_ins().collect();
        for (_, record) in &records {
            if record.inputs.len() != ins.len() || ins.iter().any(|path| record.input(path).is_none()) {
                return Some(Reason::InputsChanged);
            }
        }
        for path in &ins {
            let now = current(path);
            for (_, record) in &records {
                if record.input(path).map_or(true, |then| !then.matches(&now)) {
                    return Some(Reason::InputModified((*path).to_owned()));
                }
            }
        }

        self.graph
            .upstream(id)
            .iter()
            .find(|&&up| reasons.contains_key(&up))
            .map(|&up| Reason::UpstreamDirty(self.graph.spec(up).id.clone()))
    }
}
