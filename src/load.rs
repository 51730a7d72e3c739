//! Graph loading: runs build file parsing and constructs the build graph
//! from it.

use crate::graph::{Graph, NodeId};
use crate::parse::{Parser, Statement};
use crate::registry::{Registry, Settings};
use crate::trace;
use anyhow::{anyhow, bail};
use std::path::Path;

/// Name of the state file, placed in builddir.
pub const STATE_FILENAME: &str = ".psibuild_state";

/// State loaded by read().
pub struct State {
    pub graph: Graph,
    /// Commands named by `default` statements; empty means everything.
    pub default: Vec<NodeId>,
    /// Value of the top-level `builddir` binding.
    pub builddir: Option<String>,
}

impl State {
    /// Where the state file lives, relative to the working directory.
    pub fn state_path(&self) -> String {
        match &self.builddir {
            Some(dir) if !dir.is_empty() => format!("{}/{}", dir.trim_end_matches('/'), STATE_FILENAME),
            _ => STATE_FILENAME.to_owned(),
        }
    }
}

/// Parse a build file's content into a linked graph.
pub fn parse(filename: &Path, mut content: Vec<u8>, registry: &Registry) -> anyhow::Result<State> {
    if !content.ends_with(b"\n") {
        content.push(b'\n');
    }
    content.push(0);

    let mut graph = Graph::new();
    let mut default_paths = Vec::new();
    let mut parser = Parser::new(&content);
    loop {
        let stmt = match parser
            .read()
            .map_err(|err| anyhow!(parser.format_parse_error(filename, err)))?
        {
            None => break,
            Some(s) => s,
        };
        match stmt {
            Statement::Default(paths) => default_paths.extend(paths),
            Statement::Decl(decl) => {
                let settings = match parser.vars.get("interpreter") {
                    Some(interpreter) if !interpreter.is_empty() => Settings {
                        interpreter: interpreter.clone(),
                    },
                    _ => Settings::default(),
                };
                let located = |err| anyhow!("{}:{}: {}", filename.display(), decl.line, err);
                let spec = registry.construct(&decl, &settings).map_err(located)?;
                graph.add(spec).map_err(located)?;
            }
        }
    }
    let builddir = parser.vars.get("builddir").cloned();

    trace::scope("graph::link", || graph.link())
        .map_err(|err| anyhow!("{}: {}", filename.display(), err))?;

    let mut default = Vec::new();
    for path in &default_paths {
        match graph.target(path) {
            Ok(id) => default.push(id),
            Err(err) => bail!("{}: default: {}", filename.display(), err),
        }
    }

    Ok(State {
        graph,
        default,
        builddir,
    })
}

/// Load a build file and return the linked build graph.
pub fn read(filename: &Path, registry: &Registry) -> anyhow::Result<State> {
    let bytes = trace::scope("fs::read", || std::fs::read(filename))
        .map_err(|err| anyhow!("read {}: {}", filename.display(), err))?;
    trace::scope("load::parse", || parse(filename, bytes, registry))
}
