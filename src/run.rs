use anyhow::anyhow;
use argh::FromArgs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::db;
use crate::fs::RealFileSystem;
use crate::graph::NodeId;
use crate::load;
use crate::progress::{DumbConsoleProgress, FancyConsoleProgress, Progress};
use crate::registry::Registry;
use crate::{signal, terminal, trace, work};

/// psibuild, an incremental runner for analysis scripts and external programs.
#[derive(FromArgs)]
struct Opts {
    /// chdir before running
    #[argh(option, short = 'C')]
    chdir: Option<String>,

    /// input build file [default=build.psi]
    #[argh(option, short = 'f', default = "String::from(\"build.psi\")")]
    file: String,

    /// debugging tools, "-d list" to list
    #[argh(option, short = 'd')]
    debug: Vec<String>,

    /// subcommands, "-t list" to list
    #[argh(option, short = 't')]
    tool: Option<String>,

    /// parallelism [default from system]
    #[argh(option, short = 'j')]
    parallelism: Option<usize>,

    /// stop after N failures, 0 means never stop [default=0]
    #[argh(option, short = 'k', default = "0")]
    keep_going: usize,

    /// run every command regardless of recorded state
    #[argh(switch, short = 'B')]
    force: bool,

    /// print what would run, without running it
    #[argh(switch, short = 'n')]
    dry_run: bool,

    /// fingerprint file contents, not just modification times
    #[argh(switch)]
    hash: bool,

    /// state file path [default=builddir/.psibuild_state]
    #[argh(option)]
    state: Option<String>,

    /// seconds commands get to finish after ctl-c [default=5]
    #[argh(option, default = "5.0")]
    grace: f64,

    /// print executed command lines
    #[argh(switch, short = 'v')]
    verbose: bool,

    /// targets to run, by output path or command id
    #[argh(positional)]
    targets: Vec<String>,
}

/// Exit code when loading the build file failed.
const EXIT_LOAD: i32 = 2;

fn print_tool_list() {
    println!("subcommands:");
    println!("  kinds    list registered command kinds");
    println!("  targets  list commands and their outputs");
}

fn run_tool(tool: &str, state: &load::State, registry: &Registry) -> anyhow::Result<()> {
    match tool {
        "kinds" => {
            for (name, kind) in registry.kinds() {
                println!("{:10} {}", name, kind.description);
            }
        }
        "targets" => {
            for spec in state.graph.topological_order()? {
                println!("{}: {}", spec.id, spec.outputs.join(" "));
            }
        }
        _ => anyhow::bail!("unknown -t {:?}, use -t list to list", tool),
    }
    Ok(())
}

fn run_impl() -> anyhow::Result<i32> {
    let opts: Opts = argh::from_env();

    let mut explain = false;
    for debug in &opts.debug {
        match debug.as_str() {
            "list" => {
                println!("debug tools:");
                println!("  explain  print why each command is dirty");
                println!("  trace    generate json performance trace");
                return Ok(1);
            }
            "explain" => explain = true,
            "trace" => trace::open("trace.json")?,
            _ => anyhow::bail!("unknown -d {:?}, use -d list to list", debug),
        }
    }
    if opts.tool.as_deref() == Some("list") {
        print_tool_list();
        return Ok(1);
    }
    if !opts.grace.is_finite() || opts.grace < 0.0 {
        anyhow::bail!("invalid --grace {}", opts.grace);
    }

    if let Some(dir) = &opts.chdir {
        let dir = Path::new(dir);
        std::env::set_current_dir(dir).map_err(|err| anyhow!("chdir {:?}: {}", dir, err))?;
    }

    let registry = Registry::default();
    let state = match trace::scope("load::read", || {
        load::read(Path::new(&opts.file), &registry)
    }) {
        Ok(state) => state,
        Err(err) => {
            println!("psibuild: error: {}", err);
            return Ok(EXIT_LOAD);
        }
    };

    if let Some(tool) = &opts.tool {
        run_tool(tool, &state, &registry)?;
        return Ok(0);
    }

    signal::register_sigint();

    let mut progress: Box<dyn Progress> = if terminal::use_fancy() {
        Box::new(FancyConsoleProgress::new(opts.verbose))
    } else {
        Box::new(DumbConsoleProgress::new(opts.verbose))
    };

    let state_path = PathBuf::from(opts.state.clone().unwrap_or_else(|| state.state_path()));
    let (mut run_state, warning) = trace::scope("db::open", || db::open(&state_path));
    if let Some(warning) = warning {
        progress.log(&format!("psibuild: warning: {}", warning));
    }

    let fs = RealFileSystem::new(std::env::current_dir()?);
    let parallelism = match opts.parallelism {
        Some(0) => anyhow::bail!("invalid -j 0"),
        Some(n) => n,
        None => usize::from(std::thread::available_parallelism()?),
    };
    let options = work::Options {
        parallelism,
        keep_going: opts.keep_going,
        force: opts.force,
        hash_content: opts.hash,
        explain,
        grace: Duration::from_secs_f64(opts.grace),
    };

    let mut work = work::Work::new(&state.graph, &fs, &mut run_state, progress.as_mut(), options);
    if !opts.targets.is_empty() {
        for name in &opts.targets {
            if let Err(err) = work.want_file(name) {
                println!("psibuild: error: {}", err);
                return Ok(EXIT_LOAD);
            }
        }
    } else if !state.default.is_empty() {
        for &id in &state.default {
            work.want_node(id);
        }
    } else {
        work.want_all();
    }

    if opts.dry_run {
        let plan = work.plan()?;
        for &id in &plan.order {
            let name = &state.graph.spec(id).id;
            match plan.reason(id) {
                Some(reason) => println!("dirty {}: {}", name, reason),
                None => println!("clean {}", name),
            }
        }
        return Ok(0);
    }

    let summary = trace::scope("work.run", || work.run())?;
    drop(work);
    // Drop the fancy progress first, so its status lines are cleared.
    drop(progress);

    // Forget outputs that no command produces any more.
    let graph = &state.graph;
    run_state.retain(|path| {
        graph
            .lookup_file(path)
            .map_or(false, |fid| graph.file(fid).producer.is_some())
    });
    trace::scope("db::write", || db::write(&state_path, &run_state))?;

    let name = |id: NodeId| &state.graph.spec(id).id;
    if summary.interrupted {
        println!("psibuild: interrupted");
    }
    if !summary.failures.is_empty() {
        let failed: Vec<&str> = summary
            .failures
            .iter()
            .map(|failure| name(failure.id).as_str())
            .collect();
        println!(
            "psibuild: {} failed: {}",
            if failed.len() == 1 { "command" } else { "commands" },
            failed.join(", ")
        );
    }
    if !summary.success() {
        return Ok(1);
    }
    match summary.ran {
        // Special case: don't print numbers when no work done.
        0 => println!("psibuild: no work to do"),
        n => println!("psibuild: ran {} tasks, now up to date", n),
    }
    Ok(0)
}

pub fn run() -> i32 {
    let code = match run_impl() {
        Ok(code) => code,
        Err(err) => {
            println!("psibuild: error: {}", err);
            1
        }
    };
    if let Err(err) = trace::close() {
        println!("psibuild: error: writing trace: {}", err);
    }
    code
}
