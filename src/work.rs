//! Runs the dirty subset of the graph, in dependency order.
//!
//! The Work struct is the single owner of the run's mutable state: the
//! state of each command, the state file contents, and the fingerprints
//! gathered along the way.  Processes run on Runner threads, which only
//! report back.

use crate::command::CommandSpec;
use crate::db::{Record, RunState};
use crate::densemap::DenseMap;
use crate::fs::{FileSystem, RealFileSystem};
use crate::graph::{Graph, NodeId};
use crate::hash::{self, Fingerprint};
use crate::process::{Limits, Termination};
use crate::progress::Progress;
use crate::stale::{Plan, StalenessOracle};
use crate::task::{FinishedTask, Runner};
use crate::{signal, trace};
use rustc_hash::FxHashMap;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fmt;
use std::time::Duration;

/// The state of a command during a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeState {
    /// Not part of this run.
    Unknown,
    /// Dirty, waiting to run.
    Pending,
    Running,
    Succeeded,
    Failed,
    /// Clean; nothing to do.
    Skipped,
    /// Never run because something it depends on failed.
    Blocked,
}

const STATE_COUNT: usize = 7;

impl NodeState {
    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeState::Unknown => "unknown",
            NodeState::Pending => "pending",
            NodeState::Running => "running",
            NodeState::Succeeded => "succeeded",
            NodeState::Failed => "failed",
            NodeState::Skipped => "skipped",
            NodeState::Blocked => "blocked",
        };
        f.write_str(name)
    }
}

/// Counts of commands in each state, for progress display.
#[derive(Clone, Default, Debug)]
pub struct StateCounts([usize; STATE_COUNT]);

impl StateCounts {
    pub fn add(&mut self, state: NodeState, delta: isize) {
        let count = &mut self.0[state.index()];
        *count = count.saturating_add_signed(delta);
    }

    pub fn get(&self, state: NodeState) -> usize {
        self.0[state.index()]
    }

    /// Commands that are part of this run.
    pub fn total(&self) -> usize {
        self.0[NodeState::Unknown.index() + 1..].iter().sum()
    }

    /// Commands whose fate is decided.
    pub fn finished(&self) -> usize {
        self.get(NodeState::Succeeded)
            + self.get(NodeState::Failed)
            + self.get(NodeState::Skipped)
            + self.get(NodeState::Blocked)
    }
}

/// Per-command state, keeping the counts in sync.
struct NodeStates {
    states: DenseMap<NodeId, NodeState>,
    counts: StateCounts,
}

impl NodeStates {
    fn new(size: usize) -> Self {
        let mut counts = StateCounts::default();
        counts.add(NodeState::Unknown, size as isize);
        NodeStates {
            states: DenseMap::new_sized(size, NodeState::Unknown),
            counts,
        }
    }

    fn get(&self, id: NodeId) -> NodeState {
        self.states[id]
    }

    fn set(&mut self, id: NodeId, state: NodeState) {
        let prev = std::mem::replace(&mut self.states[id], state);
        self.counts.add(prev, -1);
        self.counts.add(state, 1);
    }
}

/// Why a command failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailReason {
    Exit(i32),
    Signal(i32),
    Timeout(Duration),
    Interrupted,
    MissingInput(String),
    /// The command succeeded but didn't produce this output.
    MissingOutput(String),
    /// The process couldn't be started.
    Spawn(String),
}

impl fmt::Display for FailReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailReason::Exit(code) => write!(f, "exit status {}", code),
            FailReason::Signal(sig) => write!(f, "killed by signal {}", sig),
            FailReason::Timeout(dur) => write!(f, "timed out after {:?}", dur),
            FailReason::Interrupted => write!(f, "interrupted"),
            FailReason::MissingInput(path) => write!(f, "missing input {}", path),
            FailReason::MissingOutput(path) => write!(f, "missing output {}", path),
            FailReason::Spawn(err) => write!(f, "couldn't start: {}", err),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Failure {
    pub id: NodeId,
    pub reason: FailReason,
    pub output: Vec<u8>,
}

/// The result of a run.
#[derive(Debug)]
pub struct Summary {
    /// Final state of every command in the run, in execution order.
    pub states: Vec<(NodeId, NodeState)>,
    /// Commands whose process was started.
    pub ran: usize,
    pub failures: Vec<Failure>,
    pub interrupted: bool,
}

impl Summary {
    pub fn state(&self, id: NodeId) -> Option<NodeState> {
        self.states
            .iter()
            .find(|&&(sid, _)| sid == id)
            .map(|&(_, state)| state)
    }

    pub fn count(&self, state: NodeState) -> usize {
        self.states.iter().filter(|&&(_, s)| s == state).count()
    }

    pub fn success(&self) -> bool {
        self.failures.is_empty()
            && !self.interrupted
            && self
                .states
                .iter()
                .all(|&(_, s)| matches!(s, NodeState::Succeeded | NodeState::Skipped))
    }
}

#[derive(Debug, Clone)]
pub struct Options {
    pub parallelism: usize,
    /// Stop starting commands after this many failures; 0 means never stop.
    pub keep_going: usize,
    /// Run everything regardless of recorded state.
    pub force: bool,
    /// Fingerprint file contents, not just mtimes.
    pub hash_content: bool,
    /// Log why each dirty command runs.
    pub explain: bool,
    /// How long running commands get to finish after an interrupt.
    pub grace: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            parallelism: 1,
            keep_going: 0,
            force: false,
            hash_content: false,
            explain: false,
            grace: Duration::from_secs(5),
        }
    }
}

pub struct Work<'a> {
    graph: &'a Graph,
    fs: &'a RealFileSystem,
    state: &'a mut RunState,
    progress: &'a mut dyn Progress,
    options: Options,
    wanted: Vec<NodeId>,
    plan: Option<Plan>,
    states: NodeStates,
    /// Current fingerprints, updated as commands produce outputs.
    fingerprints: FxHashMap<String, Fingerprint>,
    /// Dirty commands not yet run, and how many of their upstream commands
    /// are still unfinished.
    waiting_on: FxHashMap<NodeId, usize>,
    ready: BinaryHeap<Reverse<NodeId>>,
    runner: Runner,
    ran: usize,
    failures: Vec<Failure>,
}

impl<'a> Work<'a> {
    pub fn new(
        graph: &'a Graph,
        fs: &'a RealFileSystem,
        state: &'a mut RunState,
        progress: &'a mut dyn Progress,
        options: Options,
    ) -> Self {
        let runner = Runner::new(options.parallelism, fs.root().to_path_buf());
        Work {
            graph,
            fs,
            state,
            progress,
            options,
            wanted: Vec::new(),
            plan: None,
            states: NodeStates::new(graph.len()),
            fingerprints: FxHashMap::default(),
            waiting_on: FxHashMap::default(),
            ready: BinaryHeap::new(),
            runner,
            ran: 0,
            failures: Vec::new(),
        }
    }

    /// Request a command, and with it everything it depends on.
    pub fn want_node(&mut self, id: NodeId) {
        self.plan = None;
        if !self.wanted.contains(&id) {
            self.wanted.push(id);
        }
    }

    /// Request a target by output path or command id.
    pub fn want_file(&mut self, name: &str) -> crate::error::Result<()> {
        let id = self.graph.target(name)?;
        self.want_node(id);
        Ok(())
    }

    /// Request every command.  This is also what happens when nothing was
    /// requested.
    pub fn want_all(&mut self) {
        self.plan = None;
        self.wanted.clear();
    }

    /// Take the current plan, computing it if needed.
    fn take_plan(&mut self) -> anyhow::Result<Plan> {
        if let Some(plan) = self.plan.take() {
            return Ok(plan);
        }
        trace::scope("stale::plan", || {
            StalenessOracle::new(self.graph, self.fs, self.state)
                .force(self.options.force)
                .hash_content(self.options.hash_content)
                .plan(&self.wanted)
        })
    }

    /// Determine which of the wanted commands are dirty.
    pub fn plan(&mut self) -> anyhow::Result<&Plan> {
        let plan = self.take_plan()?;
        Ok(self.plan.insert(plan))
    }

    /// Run the dirty commands.
    pub fn run(&mut self) -> anyhow::Result<Summary> {
        let plan = self.take_plan()?;
        self.prepare(&plan);

        let mut stopped = false;
        loop {
            if !stopped && self.should_stop() {
                stopped = true;
            }
            while !stopped && self.runner.can_start_more() {
                match self.ready.pop() {
                    Some(Reverse(id)) => self.start(id),
                    None => break,
                }
                if self.should_stop() {
                    stopped = true;
                }
            }
            self.progress.update(&self.states.counts);
            if !self.runner.is_running() {
                break;
            }
            if let Some(task) = self.runner.wait(Duration::from_millis(500)) {
                self.task_finished(task);
            }
        }
        self.progress.update(&self.states.counts);

        let summary = Summary {
            states: plan
                .order
                .iter()
                .map(|&id| (id, self.states.get(id)))
                .collect(),
            ran: self.ran,
            failures: std::mem::take(&mut self.failures),
            interrupted: signal::interrupted(),
        };
        self.plan = Some(plan);
        Ok(summary)
    }

    fn should_stop(&self) -> bool {
        signal::interrupted()
            || (self.options.keep_going > 0 && self.failures.len() >= self.options.keep_going)
    }

    /// Set up initial states from the plan.
    fn prepare(&mut self, plan: &Plan) {
        self.fingerprints = plan.fingerprints.clone();
        for &id in &plan.order {
            match plan.reason(id) {
                None => self.states.set(id, NodeState::Skipped),
                Some(reason) => {
                    if self.options.explain {
                        self.progress
                            .log(&format!("explain: {}: {}", self.graph.spec(id).id, reason));
                    }
                    self.states.set(id, NodeState::Pending);
                    let waiting = self
                        .graph
                        .upstream(id)
                        .iter()
                        .filter(|&&up| plan.is_dirty(up))
                        .count();
                    if waiting == 0 {
                        self.ready.push(Reverse(id));
                    } else {
                        self.waiting_on.insert(id, waiting);
                    }
                }
            }
        }
    }

    fn current(&self, path: &str) -> Fingerprint {
        self.fingerprints
            .get(path)
            .copied()
            .unwrap_or_else(Fingerprint::missing)
    }

    fn start(&mut self, id: NodeId) {
        let spec = self.graph.spec(id);
        if let Some(path) = spec.dirtying_ins().find(|path| !self.current(path).exists()) {
            let reason = FailReason::MissingInput(path.to_owned());
            self.progress
                .log(&format!("failed: {}: {}", spec.message(), reason));
            self.fail(id, reason, Vec::new());
            return;
        }
        for out in &spec.outputs {
            if let Err(err) = self.fs.create_parent_dirs(out) {
                let reason = FailReason::Spawn(format!("create directory for {}: {}", out, err));
                self.progress
                    .log(&format!("failed: {}: {}", spec.message(), reason));
                self.fail(id, reason, Vec::new());
                return;
            }
        }

        self.states.set(id, NodeState::Running);
        self.progress.task_started(id, spec);
        let limits = Limits {
            timeout: spec.timeout,
            grace: self.options.grace,
        };
        self.runner.start(id, spec.cmdline.clone(), limits);
        self.ran += 1;
    }

    fn task_finished(&mut self, task: FinishedTask) {
        let id = task.id;
        let spec = self.graph.spec(id);
        trace::write_complete(&spec.id, task.tid + 1, task.span.0, task.span.1);

        let (termination, output) = match task.result {
            Ok(result) => (result.termination, result.output),
            Err(err) => {
                let reason = FailReason::Spawn(err);
                self.progress.task_finished(id, spec, Some(&reason), &[]);
                self.fail(id, reason, Vec::new());
                return;
            }
        };
        let failure = match termination {
            Termination::Success => self.record(spec).err(),
            Termination::Exit(code) => Some(FailReason::Exit(code)),
            Termination::Signal(sig) => Some(FailReason::Signal(sig)),
            Termination::Interrupted => Some(FailReason::Interrupted),
            Termination::TimedOut => Some(FailReason::Timeout(spec.timeout.unwrap_or_default())),
        };
        self.progress
            .task_finished(id, spec, failure.as_ref(), &output);
        match failure {
            Some(reason) => self.fail(id, reason, output),
            None => self.succeed(id),
        }
    }

    /// Fingerprint a successful command's outputs and record them.
    fn record(&mut self, spec: &CommandSpec) -> Result<(), FailReason> {
        let mut outputs = Vec::with_capacity(spec.outputs.len());
        for out in &spec.outputs {
            let fp = hash::fingerprint(self.fs, out, self.options.hash_content)
                .unwrap_or_else(|_| Fingerprint::missing());
            if !fp.exists() {
                return Err(FailReason::MissingOutput(out.clone()));
            }
            outputs.push((out, fp));
        }

        let inputs: Vec<(String, Fingerprint)> = spec
            .dirtying_ins()
            .map(|path| (path.to_owned(), self.current(path)))
            .collect();
        let command = hash::hash_cmdline(&spec.cmdline);
        for (out, fp) in outputs {
            self.fingerprints.insert(out.clone(), fp);
            self.state.insert(
                out.clone(),
                Record {
                    fingerprint: fp,
                    command,
                    inputs: inputs.clone(),
                },
            );
        }
        Ok(())
    }

    fn succeed(&mut self, id: NodeId) {
        self.states.set(id, NodeState::Succeeded);
        for &down in self.graph.downstream(id) {
            if let Some(waiting) = self.waiting_on.get_mut(&down) {
                *waiting -= 1;
                if *waiting == 0 {
                    self.waiting_on.remove(&down);
                    self.ready.push(Reverse(down));
                }
            }
        }
    }

    /// Mark a command failed, forget its outputs, and block everything
    /// downstream of it.
    fn fail(&mut self, id: NodeId, reason: FailReason, output: Vec<u8>) {
        self.states.set(id, NodeState::Failed);
        for out in &self.graph.spec(id).outputs {
            self.state.remove(out);
        }
        self.failures.push(Failure { id, reason, output });

        let mut stack: Vec<NodeId> = self.graph.downstream(id).to_vec();
        while let Some(down) = stack.pop() {
            if self.states.get(down) != NodeState::Pending {
                continue;
            }
            self.states.set(down, NodeState::Blocked);
            self.waiting_on.remove(&down);
            stack.extend_from_slice(self.graph.downstream(down));
        }
    }
}
