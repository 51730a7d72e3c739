//! Chrome trace output.
//!
//! Load the written file in chrome://tracing or https://ui.perfetto.dev.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::Mutex;
use std::time::Instant;

static TRACE: Mutex<Option<Trace>> = Mutex::new(None);

struct Trace {
    start: Instant,
    w: BufWriter<File>,
}

impl Trace {
    fn new(path: &str) -> std::io::Result<Self> {
        let mut w = BufWriter::new(File::create(path)?);
        writeln!(w, "[")?;
        Ok(Trace {
            start: Instant::now(),
            w,
        })
    }

    /// Write a complete ("X") event.
    fn write_complete(
        &mut self,
        name: &str,
        tid: usize,
        start: Instant,
        end: Instant,
    ) -> std::io::Result<()> {
        write!(
            self.w,
            "{{ \"pid\": 0, \"tid\": {}, \"name\": {:?}, \"ts\": {}, \"ph\": \"X\", \"dur\": {} }}",
            tid,
            name,
            start.duration_since(self.start).as_micros(),
            end.duration_since(start).as_micros(),
        )
    }

    fn close(&mut self) -> std::io::Result<()> {
        self.write_complete("main", 0, self.start, Instant::now())?;
        writeln!(self.w, "\n]")?;
        self.w.flush()
    }
}

pub fn open(path: &str) -> std::io::Result<()> {
    let trace = Trace::new(path)?;
    if let Ok(mut global) = TRACE.lock() {
        *global = Some(trace);
    }
    Ok(())
}

pub fn enabled() -> bool {
    TRACE.lock().map(|t| t.is_some()).unwrap_or(false)
}

/// Record a span that already happened, e.g. a task that ran on another
/// thread.  tid separates concurrent spans into lanes.
pub fn write_complete(name: &str, tid: usize, start: Instant, end: Instant) {
    if let Ok(mut global) = TRACE.lock() {
        if let Some(t) = global.as_mut() {
            // Trace output is best-effort.
            let _ = t
                .write_complete(name, tid, start, end)
                .and_then(|_| writeln!(t.w, ","));
        }
    }
}

/// Run f, recording how long it took.
#[inline]
pub fn scope<T>(name: &'static str, f: impl FnOnce() -> T) -> T {
    if !enabled() {
        return f();
    }
    let start = Instant::now();
    let result = f();
    write_complete(name, 0, start, Instant::now());
    result
}

pub fn close() -> std::io::Result<()> {
    if let Ok(mut global) = TRACE.lock() {
        if let Some(mut t) = global.take() {
            return t.close();
        }
    }
    Ok(())
}
