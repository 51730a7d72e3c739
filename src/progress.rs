//! Reporting a run to the user as it happens.

use crate::command::CommandSpec;
use crate::graph::NodeId;
use crate::terminal;
use crate::work::{FailReason, NodeState, StateCounts};
use std::io::Write;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Receives notifications from the executor.
pub trait Progress {
    /// Counts of commands per state changed.
    fn update(&mut self, counts: &StateCounts);

    /// A command's process was spawned.
    fn task_started(&mut self, id: NodeId, spec: &CommandSpec);

    /// A command's process exited.  `failure` is None when it succeeded.
    fn task_finished(
        &mut self,
        id: NodeId,
        spec: &CommandSpec,
        failure: Option<&FailReason>,
        output: &[u8],
    );

    /// Print a line that stays on screen, above any status display.
    fn log(&mut self, msg: &str);
}

/// Copy a finished command's output to stdout, newline-terminated.
fn write_output(out: &mut impl Write, output: &[u8]) -> std::io::Result<()> {
    if output.is_empty() {
        return Ok(());
    }
    out.write_all(output)?;
    if !output.ends_with(b"\n") {
        out.write_all(b"\n")?;
    }
    Ok(())
}

fn failure_line(spec: &CommandSpec, reason: &FailReason) -> String {
    format!("failed: {}: {}", spec.message(), reason)
}

/// Line-at-a-time output, for pipes and dumb terminals.
#[derive(Default)]
pub struct DumbConsoleProgress {
    /// Print command lines instead of descriptions.
    verbose: bool,
    /// Last command announced; its output needs no second header.
    last_started: Option<NodeId>,
}

impl DumbConsoleProgress {
    pub fn new(verbose: bool) -> Self {
        DumbConsoleProgress {
            verbose,
            last_started: None,
        }
    }
}

impl Progress for DumbConsoleProgress {
    fn update(&mut self, _counts: &StateCounts) {}

    fn task_started(&mut self, id: NodeId, spec: &CommandSpec) {
        let line = match self.verbose {
            true => spec.cmdline.as_str(),
            false => spec.message(),
        };
        self.log(line);
        self.last_started = Some(id);
    }

    fn task_finished(
        &mut self,
        id: NodeId,
        spec: &CommandSpec,
        failure: Option<&FailReason>,
        output: &[u8],
    ) {
        if let Some(reason) = failure {
            self.log(&failure_line(spec, reason));
        } else if !output.is_empty() && self.last_started != Some(id) {
            // Other commands were announced since; say whose output this is.
            self.log(spec.message());
        }
        let _ = write_output(&mut std::io::stdout().lock(), output);
    }

    fn log(&mut self, msg: &str) {
        println!("{}", msg);
    }
}

/// A command currently running, as shown in the status display.
struct Running {
    id: NodeId,
    since: Instant,
    message: String,
}

/// What the status display shows.
#[derive(Default)]
struct Status {
    counts: StateCounts,
    /// Oldest first.
    running: Vec<Running>,
}

/// Most running commands listed individually.
const MAX_LISTED: usize = 8;

/// Width of the progress bar, in columns.
const BAR_WIDTH: usize = 40;

impl Status {
    /// Render the display as lines of text.
    fn render(&self, now: Instant, cols: usize) -> Vec<String> {
        let counts = &self.counts;
        let mut summary = format!(
            "[{}] {}/{} done, ",
            progress_bar(counts, BAR_WIDTH),
            counts.finished(),
            counts.total()
        );
        let failed = counts.get(NodeState::Failed);
        if failed > 0 {
            summary.push_str(&format!("{} failed, ", failed));
        }
        summary.push_str(&format!("{} running", self.running.len()));

        let mut lines = vec![summary];
        for task in self.running.iter().take(MAX_LISTED) {
            let secs = now.saturating_duration_since(task.since).as_secs();
            lines.push(task_message(&task.message, secs, cols));
        }
        if self.running.len() > MAX_LISTED {
            lines.push(format!("...and {} more", self.running.len() - MAX_LISTED));
        }
        lines
    }
}

/// Status shared with the redraw thread.
struct Screen {
    status: Status,
    verbose: bool,
    /// Status changed since the last redraw.
    stale: bool,
    shutdown: bool,
}

impl Screen {
    /// Wipe the status display, leaving the cursor where it began.
    fn clear(&self, out: &mut impl Write) {
        // \r first: ctl-c may have echoed onto the current line.
        let _ = out.write_all(b"\r\x1b[J");
    }

    fn redraw(&mut self) {
        let mut out = std::io::stdout().lock();
        self.clear(&mut out);
        let cols = terminal::get_cols().unwrap_or(80);
        let lines = self.status.render(Instant::now(), cols);
        for line in &lines {
            let _ = writeln!(out, "{}", line);
        }
        // Back up over what we drew, so the next write replaces it.
        let _ = write!(out, "\x1b[{}A", lines.len());
        let _ = out.flush();
        self.stale = false;
    }

    fn log(&mut self, msg: &str) {
        let mut out = std::io::stdout().lock();
        self.clear(&mut out);
        let _ = writeln!(out, "{}", msg);
    }
}

/// Status display for terminals: a progress bar and the running commands,
/// redrawn in place beneath the log lines.
pub struct FancyConsoleProgress {
    screen: Arc<(Mutex<Screen>, Condvar)>,
}

/// Coalesce bursts of changes into one redraw.
const REDRAW_DELAY: Duration = Duration::from_millis(50);

/// Redraw at least this often, so running times tick up.
const REDRAW_INTERVAL: Duration = Duration::from_millis(500);

fn redraw_loop(screen: Arc<(Mutex<Screen>, Condvar)>) {
    let (lock, changed) = &*screen;
    loop {
        match lock.lock() {
            Ok(guard) => {
                let Ok((guard, _)) =
                    changed.wait_timeout_while(guard, REDRAW_INTERVAL, |s| !s.stale && !s.shutdown)
                else {
                    return;
                };
                if guard.shutdown {
                    return;
                }
            }
            Err(_) => return,
        }
        std::thread::sleep(REDRAW_DELAY);
        match lock.lock() {
            Ok(mut screen) if !screen.shutdown => screen.redraw(),
            _ => return,
        }
    }
}

impl FancyConsoleProgress {
    pub fn new(verbose: bool) -> Self {
        let screen = Arc::new((
            Mutex::new(Screen {
                status: Status::default(),
                verbose,
                stale: false,
                shutdown: false,
            }),
            Condvar::new(),
        ));
        std::thread::spawn({
            let screen = screen.clone();
            move || redraw_loop(screen)
        });
        FancyConsoleProgress { screen }
    }

    /// Modify the screen and wake the redraw thread.
    fn change(&self, f: impl FnOnce(&mut Screen)) {
        let (lock, changed) = &*self.screen;
        if let Ok(mut screen) = lock.lock() {
            f(&mut screen);
            screen.stale = true;
            changed.notify_one();
        }
    }
}

impl Progress for FancyConsoleProgress {
    fn update(&mut self, counts: &StateCounts) {
        self.change(|screen| screen.status.counts = counts.clone());
    }

    fn task_started(&mut self, id: NodeId, spec: &CommandSpec) {
        self.change(|screen| {
            if screen.verbose {
                screen.log(&spec.cmdline);
            }
            screen.status.running.push(Running {
                id,
                since: Instant::now(),
                message: spec.message().to_owned(),
            });
        });
    }

    fn task_finished(
        &mut self,
        id: NodeId,
        spec: &CommandSpec,
        failure: Option<&FailReason>,
        output: &[u8],
    ) {
        self.change(|screen| {
            screen.status.running.retain(|task| task.id != id);
            match failure {
                Some(reason) => screen.log(&failure_line(spec, reason)),
                None if !output.is_empty() => screen.log(spec.message()),
                None => {}
            }
            let _ = write_output(&mut std::io::stdout().lock(), output);
        });
    }

    fn log(&mut self, msg: &str) {
        self.change(|screen| screen.log(msg));
    }
}

impl Drop for FancyConsoleProgress {
    fn drop(&mut self) {
        let (lock, changed) = &*self.screen;
        if let Ok(mut screen) = lock.lock() {
            screen.clear(&mut std::io::stdout().lock());
            screen.shutdown = true;
            changed.notify_one();
        }
    }
}

/// One line describing a running command: its message, flattened and cut to
/// fit in cols, plus its running time once that gets noticeable.
fn task_message(message: &str, secs: u64, cols: usize) -> String {
    let elapsed = match secs {
        0..=2 => String::new(),
        n => format!(" ({}s)", n),
    };
    let flat: String = message.chars().filter(|&c| c != '\n').collect();
    let room = cols.saturating_sub(elapsed.len());
    let mut line = if flat.chars().count() < room {
        flat
    } else {
        let mut cut: String = flat.chars().take(room.saturating_sub(3)).collect();
        cut.push_str("...");
        cut
    };
    line.push_str(&elapsed);
    line
}

/// Draw counts as a bar of `width` columns: '=' for finished commands, '-'
/// for running ones, blank for pending ones.  A nonzero count always gets at
/// least one column while there is room.
fn progress_bar(counts: &StateCounts, width: usize) -> String {
    let total = counts.total();
    if total == 0 {
        return " ".repeat(width);
    }
    let segments = [
        ('=', counts.finished()),
        ('-', counts.get(NodeState::Running)),
        (' ', counts.get(NodeState::Pending)),
    ];
    let mut bar = String::with_capacity(width);
    let mut cumulative = 0;
    for (fill, count) in segments {
        cumulative += count;
        let mut end = cumulative * width / total;
        if count > 0 && end == bar.len() {
            end = (end + 1).min(width);
        }
        while bar.len() < end {
            bar.push(fill);
        }
    }
    bar
}
