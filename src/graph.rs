//! The build graph, a graph between files and commands.
//!
//! Commands are nodes; an edge A -> B exists when some output of A is an
//! input or extra dependency of B.  Files are interned by canonical path.

use crate::canon::canon_path;
use crate::command::CommandSpec;
use crate::densemap::{self, DenseMap};
use crate::error::{Error, Result};
use rustc_hash::FxHashMap;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Id for File nodes in the Graph.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct FileId(u32);
impl densemap::Index for FileId {
    fn index(&self) -> usize {
        self.0 as usize
    }
}
impl From<usize> for FileId {
    fn from(u: usize) -> FileId {
        FileId(u as u32)
    }
}

/// Id for command nodes in the Graph.  Ids are handed out in insertion
/// order, which is also the tie-break order for scheduling.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct NodeId(u32);
impl densemap::Index for NodeId {
    fn index(&self) -> usize {
        self.0 as usize
    }
}
impl From<usize> for NodeId {
    fn from(u: usize) -> NodeId {
        NodeId(u as u32)
    }
}

/// A single file referenced as part of a build.
#[derive(Debug)]
pub struct File {
    /// Canonical path to the file.
    pub name: String,
    /// The command that produces this file, if any.
    pub producer: Option<NodeId>,
    /// Commands that read this file.
    pub consumers: Vec<NodeId>,
}

/// A command as placed in the graph.
#[derive(Debug)]
pub struct Node {
    pub spec: CommandSpec,
    pub ins: Vec<FileId>,
    pub extras: Vec<FileId>,
    pub outs: Vec<FileId>,
}

impl Node {
    /// Files that, if changed, invalidate the outputs.
    pub fn dirtying_ins(&self) -> impl Iterator<Item = FileId> + '_ {
        self.ins.iter().chain(self.extras.iter()).copied()
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

#[derive(Default)]
pub struct Graph {
    files: DenseMap<FileId, File>,
    file_to_id: FxHashMap<String, FileId>,
    nodes: DenseMap<NodeId, Node>,
    node_to_id: FxHashMap<String, NodeId>,
    /// Edges, valid after link().
    upstream: DenseMap<NodeId, Vec<NodeId>>,
    downstream: DenseMap<NodeId, Vec<NodeId>>,
    order: Vec<NodeId>,
    linked: bool,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up (or intern) the id for a path.
    pub fn file_id(&mut self, name: &str) -> FileId {
        let canon = canon_path(name);
        if let Some(&id) = self.file_to_id.get(&canon) {
            return id;
        }
        let id = self.files.push(File {
            name: canon.clone(),
            producer: None,
            consumers: Vec::new(),
        });
        self.file_to_id.insert(canon, id);
        id
    }

    pub fn lookup_file(&self, name: &str) -> Option<FileId> {
        self.file_to_id.get(&canon_path(name)).copied()
    }

    pub fn file(&self, id: FileId) -> &File {
        &self.files[id]
    }

    pub fn file_ids(&self) -> impl Iterator<Item = FileId> {
        self.files.all_ids()
    }

    /// Register a command.  Fails if another command already produces one of
    /// its outputs or has its id, or if it reads one of its own outputs.  On
    /// failure the graph is left unchanged.
    pub fn add(&mut self, mut spec: CommandSpec) -> Result<NodeId> {
        for paths in [&mut spec.inputs, &mut spec.outputs, &mut spec.extra_depends] {
            for path in paths.iter_mut() {
                *path = canon_path(path.as_str());
            }
        }
        if let Some(path) = spec.dirtying_ins().find(|&p| spec.outputs.iter().any(|o| o == p)) {
            return Err(Error::SelfDependency {
                id: spec.id.clone(),
                path: path.to_owned(),
            });
        }
        for out in &spec.outputs {
            let producer = self
                .lookup_file(out)
                .and_then(|fid| self.files[fid].producer);
            if let Some(first) = producer {
                return Err(Error::DuplicateOutput {
                    path: out.clone(),
                    first: self.nodes[first].spec.id.clone(),
                    second: spec.id.clone(),
                });
            }
        }
        if self.node_to_id.contains_key(&spec.id) {
            return Err(Error::DuplicateId(spec.id));
        }

        let id = self.nodes.next_id();
        let ins: Vec<FileId> = spec.inputs.iter().map(|p| self.file_id(p)).collect();
        let extras: Vec<FileId> = spec.extra_depends.iter().map(|p| self.file_id(p)).collect();
        let outs: Vec<FileId> = spec.outputs.iter().map(|p| self.file_id(p)).collect();
        for &fid in &outs {
            self.files[fid].producer = Some(id);
        }
        for &fid in ins.iter().chain(extras.iter()) {
            let consumers = &mut self.files[fid].consumers;
            if !consumers.contains(&id) {
                consumers.push(id);
            }
        }
        self.node_to_id.insert(spec.id.clone(), id);
        self.nodes.push(Node {
            spec,
            ins,
            extras,
            outs,
        });
        self.linked = false;
        Ok(id)
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn spec(&self, id: NodeId) -> &CommandSpec {
        &self.nodes[id].spec
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        self.nodes.all_ids()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Find a command by its id.
    pub fn lookup_node(&self, id: &str) -> Option<NodeId> {
        self.node_to_id.get(id).copied()
    }

    /// Resolve a requested target, either a command id or an output path,
    /// to the command that builds it.
    pub fn target(&self, name: &str) -> Result<NodeId> {
        if let Some(id) = self.lookup_node(name) {
            return Ok(id);
        }
        self.lookup_file(name)
            .and_then(|fid| self.files[fid].producer)
            .ok_or_else(|| Error::UnknownTarget(name.to_owned()))
    }

    /// (Re)compute edges and the execution order.  Fails if the commands
    /// form a cycle.
    pub fn link(&mut self) -> Result<()> {
        let n = self.nodes.len();
        let mut upstream: DenseMap<NodeId, Vec<NodeId>> = DenseMap::new_sized(n, Vec::new());
        let mut downstream: DenseMap<NodeId, Vec<NodeId>> = DenseMap::new_sized(n, Vec::new());
        for (id, node) in self.nodes.iter() {
            for fid in node.dirtying_ins() {
                // add() rejects commands that read their own outputs.
                let Some(producer) = self.files[fid].producer else {
                    continue;
                };
                if !upstream[id].contains(&producer) {
                    upstream[id].push(producer);
                    downstream[producer].push(id);
                }
            }
        }

        self.linked = false;
        self.order.clear();
        if let Some(cycle) = find_cycle(&downstream) {
            return Err(Error::CycleDetected(
                cycle
                    .into_iter()
                    .map(|id| self.nodes[id].spec.id.clone())
                    .collect(),
            ));
        }

        // Kahn's algorithm; the heap hands out the lowest ready id first so
        // independent commands keep their insertion order.
        let mut pending: DenseMap<NodeId, usize> = DenseMap::new_sized(n, 0);
        let mut ready = BinaryHeap::new();
        for id in self.nodes.all_ids() {
            pending[id] = upstream[id].len();
            if pending[id] == 0 {
                ready.push(Reverse(id));
            }
        }
        let mut order = Vec::with_capacity(n);
        while let Some(Reverse(id)) = ready.pop() {
            order.push(id);
            for &next in &downstream[id] {
                pending[next] -= 1;
                if pending[next] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }

        self.upstream = upstream;
        self.downstream = downstream;
        self.order = order;
        self.linked = true;
        Ok(())
    }

    pub fn is_linked(&self) -> bool {
        self.linked
    }

    /// Fails if commands were added since the last link(), in which case
    /// the edges and the order don't cover them.
    pub fn check_linked(&self) -> Result<()> {
        match self.linked {
            true => Ok(()),
            false => Err(Error::Unlinked),
        }
    }

    /// Commands that must finish before id.  Requires link().
    pub fn upstream(&self, id: NodeId) -> &[NodeId] {
        &self.upstream[id]
    }

    /// Commands that read an output of id.  Requires link().
    pub fn downstream(&self, id: NodeId) -> &[NodeId] {
        &self.downstream[id]
    }

    /// Node ids with every node after all of its upstream nodes.
    pub fn order(&self) -> Result<&[NodeId]> {
        self.check_linked()?;
        Ok(&self.order)
    }

    pub fn topological_order(&self) -> Result<Vec<&CommandSpec>> {
        Ok(self.order()?.iter().map(|&id| self.spec(id)).collect())
    }

    /// Commands whose inputs are all source files.
    pub fn root_ids(&self) -> Result<Vec<NodeId>> {
        Ok(self
            .order()?
            .iter()
            .copied()
            .filter(|&id| self.upstream[id].is_empty())
            .collect())
    }

    pub fn roots(&self) -> Result<Vec<&CommandSpec>> {
        Ok(self.root_ids()?.into_iter().map(|id| self.spec(id)).collect())
    }

    /// The given nodes plus everything they depend on, in execution order.
    pub fn closure(&self, wanted: &[NodeId]) -> Result<Vec<NodeId>> {
        let order = self.order()?;
        let mut marked: DenseMap<NodeId, bool> = DenseMap::new_sized(self.nodes.len(), false);
        let mut stack: Vec<NodeId> = wanted.to_vec();
        while let Some(id) = stack.pop() {
            if marked[id] {
                continue;
            }
            marked[id] = true;
            stack.extend_from_slice(&self.upstream[id]);
        }
        Ok(order.iter().copied().filter(|&id| marked[id]).collect())
    }
}

/// Depth-first search for a cycle, returning its path with the first node
/// repeated at the end.
fn find_cycle(downstream: &DenseMap<NodeId, Vec<NodeId>>) -> Option<Vec<NodeId>> {
    let mut marks = DenseMap::new_sized(downstream.len(), Mark::Unvisited);
    let mut stack = Vec::new();
    for id in downstream.all_ids() {
        if marks[id] == Mark::Unvisited {
            if let Some(cycle) = visit(id, downstream, &mut marks, &mut stack) {
                return Some(cycle);
            }
        }
    }
    None
}

fn visit(
    id: NodeId,
    downstream: &DenseMap<NodeId, Vec<NodeId>>,
    marks: &mut DenseMap<NodeId, Mark>,
    stack: &mut Vec<NodeId>,
) -> Option<Vec<NodeId>> {
    marks[id] = Mark::InProgress;
    stack.push(id);
    for &next in &downstream[id] {
        match marks[next] {
            Mark::InProgress => {
                if let Some(start) = stack.iter().position(|&s| s == next) {
                    let mut cycle = stack[start..].to_vec();
                    cycle.push(next);
                    return Some(cycle);
                }
            }
            Mark::Unvisited => {
                if let Some(cycle) = visit(next, downstream, marks, stack) {
                    return Some(cycle);
                }
            }
            Mark::Done => {}
        }
    }
    stack.pop();
    marks[id] = Mark::Done;
    None
}
