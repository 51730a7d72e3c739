//! Runs command lines on background threads, up to a parallelism limit.
//! Knows nothing about the graph; the executor decides what to start.

use crate::graph::NodeId;
use crate::process::{self, Limits, Termination};
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::{Duration, Instant};

/// Report from a command thread.
pub struct FinishedTask {
    /// Lane the command ran in, for laying out the trace.
    pub tid: usize,
    pub id: NodeId,
    pub span: (Instant, Instant),
    /// Err if the process couldn't be run at all.
    pub result: Result<TaskResult, String>,
}

/// How a command's process ended.
pub struct TaskResult {
    pub termination: Termination,
    /// Combined stdout and stderr.
    pub output: Vec<u8>,
}

/// Hands out small integers to concurrently running commands, lowest free
/// first, so the trace shows one row per degree of parallelism.
#[derive(Default)]
struct Lanes {
    next: usize,
    free: Vec<usize>,
}

impl Lanes {
    fn claim(&mut self) -> usize {
        if let Some(pos) = (0..self.free.len()).min_by_key(|&i| self.free[i]) {
            return self.free.swap_remove(pos);
        }
        self.next += 1;
        self.next - 1
    }

    fn release(&mut self, lane: usize) {
        self.free.push(lane);
    }
}

pub struct Runner {
    tx: mpsc::Sender<FinishedTask>,
    rx: mpsc::Receiver<FinishedTask>,
    /// Commands started and not yet collected by wait().
    in_flight: usize,
    lanes: Lanes,
    parallelism: usize,
    /// Working directory for every command.
    dir: PathBuf,
}

impl Runner {
    pub fn new(parallelism: usize, dir: PathBuf) -> Self {
        let (tx, rx) = mpsc::channel();
        Runner {
            tx,
            rx,
            in_flight: 0,
            lanes: Lanes::default(),
            parallelism: parallelism.max(1),
            dir,
        }
    }

    pub fn can_start_more(&self) -> bool {
        self.in_flight < self.parallelism
    }

    pub fn is_running(&self) -> bool {
        self.in_flight != 0
    }

    pub fn start(&mut self, id: NodeId, cmdline: String, limits: Limits) {
        let tid = self.lanes.claim();
        let tx = self.tx.clone();
        let dir = self.dir.clone();
        std::thread::spawn(move || {
            let begin = Instant::now();
            let result = match process::run_command(&cmdline, &dir, &limits) {
                Ok((termination, output)) => Ok(TaskResult {
                    termination,
                    output,
                }),
                Err(err) => Err(err.to_string()),
            };
            // Fails only once the Runner is gone, and then nobody cares.
            let _ = tx.send(FinishedTask {
                tid,
                id,
                span: (begin, Instant::now()),
                result,
            });
        });
        self.in_flight += 1;
    }

    /// Collect the next finished command, or None if dur passes first.
    pub fn wait(&mut self, dur: Duration) -> Option<FinishedTask> {
        // self.tx keeps the channel connected, so only timeouts fail here.
        let task = self.rx.recv_timeout(dur).ok()?;
        self.lanes.release(task.tid);
        self.in_flight -= 1;
        Some(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_up_to_parallelism() {
        let mut runner = Runner::new(2, PathBuf::from("."));
        let limits = Limits {
            timeout: None,
            grace: Duration::from_secs(5),
        };
        assert!(!runner.is_running());
        runner.start(NodeId::from(0), "echo a".to_owned(), limits);
        runner.start(NodeId::from(1), "exit 1".to_owned(), limits);
        assert!(!runner.can_start_more());

        let mut finished = Vec::new();
        while runner.is_running() {
            if let Some(task) = runner.wait(Duration::from_millis(100)) {
                let result = task.result.unwrap();
                finished.push((task.id, result.termination, result.output));
            }
        }
        finished.sort_by_key(|(id, _, _)| *id);
        assert_eq!(
            finished,
            vec![
                (NodeId::from(0), Termination::Success, b"a\n".to_vec()),
                (NodeId::from(1), Termination::Exit(1), Vec::new()),
            ]
        );
        assert!(runner.can_start_more());
    }

    #[test]
    fn lanes_reuse_lowest() {
        let mut lanes = Lanes::default();
        assert_eq!(lanes.claim(), 0);
        assert_eq!(lanes.claim(), 1);
        assert_eq!(lanes.claim(), 2);
        lanes.release(2);
        lanes.release(0);
        assert_eq!(lanes.claim(), 0);
        assert_eq!(lanes.claim(), 2);
        assert_eq!(lanes.claim(), 3);
    }
}
