//! Runs a command line as a subprocess.
//!
//! The child gets /dev/null as stdin and a single pipe for both stdout and
//! stderr, so its output is collected interleaved the way it would appear on
//! a terminal.  It runs in its own process group, so a timeout or an
//! interrupt can kill everything it spawned in one go.

use crate::signal;
use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::FromRawFd;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// How often the watchdog checks for timeouts and interrupts.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Success,
    /// Exited with a nonzero status.
    Exit(i32),
    /// Killed by a signal we didn't send.
    Signal(i32),
    /// Killed once the interrupt grace period ran out.
    Interrupted,
    /// Killed for exceeding its timeout.
    TimedOut,
}

/// Limits on how long a command may run.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub timeout: Option<Duration>,
    /// How long to let a command finish after SIGINT before killing it.
    pub grace: Duration,
}

/// A pipe whose ends are close-on-exec, so that concurrently spawned
/// children don't inherit them and hold our read end open.
#[cfg(target_os = "linux")]
fn pipe() -> std::io::Result<(File, File)> {
    let mut fds: [libc::c_int; 2] = [0; 2];
    // Safety: pipe2() fills in two fresh descriptors, which we then own.
    unsafe {
        if libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) < 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok((File::from_raw_fd(fds[0]), File::from_raw_fd(fds[1])))
    }
}

/// Without pipe2 there is a window in which another thread's spawn can
/// inherit the descriptors.
#[cfg(not(target_os = "linux"))]
fn pipe() -> std::io::Result<(File, File)> {
    let mut fds: [libc::c_int; 2] = [0; 2];
    // Safety: pipe() fills in two fresh descriptors, which we then own.
    unsafe {
        if libc::pipe(fds.as_mut_ptr()) < 0 {
            return Err(std::io::Error::last_os_error());
        }
        let files = (File::from_raw_fd(fds[0]), File::from_raw_fd(fds[1]));
        for fd in fds {
            if libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) < 0 {
                return Err(std::io::Error::last_os_error());
            }
        }
        Ok(files)
    }
}

/// Watch a running process group, killing it on timeout or after an
/// interrupt plus grace period.  Returns how it was killed, if it was.
fn watch(pgid: libc::pid_t, limits: &Limits, done: &AtomicBool) -> Option<Termination> {
    let start = Instant::now();
    let mut interrupted_at: Option<Instant> = None;
    while !done.load(Ordering::SeqCst) {
        let now = Instant::now();
        let mut verdict = None;
        if limits.timeout.map_or(false, |t| now.duration_since(start) >= t) {
            verdict = Some(Termination::TimedOut);
        } else if signal::interrupted() {
            let since = *interrupted_at.get_or_insert(now);
            if now.duration_since(since) >= limits.grace {
                verdict = Some(Termination::Interrupted);
            }
        }
        if verdict.is_some() {
            // Safety: the child isn't reaped until after we return, so pgid
            // can't have been reused.
            unsafe {
                libc::kill(-pgid, libc::SIGKILL);
            }
            return verdict;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
    None
}

/// Run cmdline with /bin/sh in dir, returning how it ended and its output.
/// An Err means the process couldn't be run at all.
pub fn run_command(
    cmdline: &str,
    dir: &Path,
    limits: &Limits,
) -> anyhow::Result<(Termination, Vec<u8>)> {
    let (mut reader, writer) = pipe()?;
    let mut cmd = Command::new("/bin/sh");
    cmd.arg("-c")
        .arg(cmdline)
        .current_dir(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::from(writer.try_clone()?))
        .stderr(Stdio::from(writer))
        .process_group(0);
    let mut child = cmd.spawn()?;
    // The Command holds our copies of the write end; the read below only
    // sees EOF once they are closed.
    drop(cmd);
    let pgid = child.id() as libc::pid_t;

    let done = AtomicBool::new(false);
    let (killed, output) = std::thread::scope(|s| {
        let watchdog = s.spawn(|| watch(pgid, limits, &done));
        let mut output = Vec::new();
        let read = reader.read_to_end(&mut output);
        done.store(true, Ordering::SeqCst);
        let killed = watchdog.join().unwrap_or(None);
        (killed, read.map(|_| output))
    });
    let status = child.wait()?;
    let mut output = output?;

    let termination = match killed {
        Some(Termination::TimedOut) => {
            if let Some(timeout) = limits.timeout {
                write!(output, "timed out after {:?}", timeout)?;
            }
            Termination::TimedOut
        }
        Some(killed) => {
            write!(output, "interrupted")?;
            killed
        }
        None if status.success() => Termination::Success,
        None => match (status.code(), status.signal()) {
            (Some(code), _) => Termination::Exit(code),
            (None, Some(sig)) => {
                write!(output, "signal {}", sig)?;
                Termination::Signal(sig)
            }
            (None, None) => Termination::Exit(-1),
        },
    };
    Ok((termination, output))
}
