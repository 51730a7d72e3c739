pub mod canon;
pub mod command;
pub mod db;
mod densemap;
mod error;
mod eval;
pub mod fs;
pub mod graph;
pub mod hash;
pub mod load;
pub mod parse;
pub mod pathmodel;
pub mod process;
pub mod progress;
pub mod registry;
pub mod run;
pub mod scanner;
mod signal;
mod smallmap;
pub mod stale;
mod task;
mod terminal;
pub mod trace;
pub mod work;

pub use error::{Error, Result};

#[cfg(not(any(windows, target_arch = "wasm32")))]
use jemallocator::Jemalloc;

#[cfg(not(any(windows, target_arch = "wasm32")))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;
