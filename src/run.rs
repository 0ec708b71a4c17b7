//! The command-line entry point: flag parsing, manifest and log loading,
//! and driving a build to completion.

use std::time::Instant;

use anyhow::{anyhow, bail};

use crate::build_log::BuildLog;
use crate::builder::{BuildConfig, Builder, DebugFlags, Interrupted};
use crate::deps_log::DepsLog;
use crate::disk::RealDiskInterface;
use crate::graph::NodeId;
use crate::load;
use crate::runner::RealCommandRunner;
use crate::signal;
use crate::status::StatusPrinter;
use crate::trace;

const BUILD_LOG_FILENAME: &str = ".ninja_log";
const DEPS_LOG_FILENAME: &str = ".ninja_deps";

#[derive(argh::FromArgs)] // this struct generates the flags and --help output
/// knit, a ninja-compatible build system
struct Opts {
    /// chdir before running
    #[argh(option, short = 'C')]
    chdir: Option<String>,

    /// input build file [default=build.ninja]
    #[argh(option, short = 'f', default = "String::from(\"build.ninja\")")]
    build_file: String,

    /// debugging tools; use -d list to list
    #[argh(option, short = 'd')]
    debug: Vec<String>,

    /// subcommands; use -t list to list
    #[argh(option, short = 't')]
    tool: Option<String>,

    /// parallelism [default uses system thread count]
    #[argh(option, short = 'j')]
    parallelism: Option<usize>,

    /// keep going until N jobs fail (0 means infinity) [default=1]
    #[argh(option, short = 'k', default = "1")]
    keep_going: usize,

    /// do not start new jobs if the load average is greater than N
    #[argh(option, short = 'l')]
    max_load_average: Option<f64>,

    /// warning flags; use -w list to list
    #[argh(option, short = 'w')]
    warnings: Vec<String>,

    /// print executed command lines
    #[argh(switch, short = 'v')]
    verbose: bool,

    /// targets to build
    #[argh(positional)]
    targets: Vec<String>,
}

fn default_parallelism() -> anyhow::Result<usize> {
    // The reference tool uses processors plus a small constant; the
    // difference is in the noise.
    let par = std::thread::available_parallelism()?;
    Ok(usize::from(par))
}

fn run_impl() -> anyhow::Result<i32> {
    let opts: Opts = argh::from_env();

    let mut flags = DebugFlags::default();
    let mut stats = false;
    for debug in &opts.debug {
        match debug.as_str() {
            "list" => {
                println!("debugging tools:");
                println!("  explain      explain what caused a command to run");
                println!("  keepdepfile  don't delete depfiles after reading them");
                println!("  keeprsp      don't delete response files on success");
                println!("  stats        print phase timings on exit");
                println!("  trace        generate a chrome trace in trace.json");
                return Ok(1);
            }
            "explain" => flags.explain = true,
            "keepdepfile" => flags.keep_depfile = true,
            "keeprsp" => flags.keep_rspfile = true,
            "stats" => stats = true,
            "trace" => trace::open("trace.json")?,
            _ => bail!("unknown -d {:?}, use -d list to list", debug),
        }
    }

    let mut depfile_distinct_targets_err = false;
    for warning in &opts.warnings {
        match warning.as_str() {
            "list" => {
                println!("warning flags:");
                println!("  depfilemulti={{err,warn}}  depfile names multiple outputs");
                return Ok(1);
            }
            "depfilemulti=err" => depfile_distinct_targets_err = true,
            "depfilemulti=warn" => depfile_distinct_targets_err = false,
            _ => bail!("unknown warning flag {:?}, use -w list to list", warning),
        }
    }

    if let Some(tool) = &opts.tool {
        match tool.as_str() {
            "list" => {
                println!("subcommands:");
                println!("  (none yet)");
                return Ok(1);
            }
            _ => bail!("unknown -t {:?}, use -t list to list", tool),
        }
    }

    if let Some(dir) = &opts.chdir {
        std::env::set_current_dir(dir).map_err(|err| anyhow!("chdir {:?}: {}", dir, err))?;
    }

    let config = BuildConfig {
        parallelism: match opts.parallelism {
            Some(parallelism) => parallelism,
            None => default_parallelism()?,
        },
        failures_allowed: if opts.keep_going == 0 {
            usize::MAX
        } else {
            opts.keep_going
        },
        max_load_average: opts.max_load_average.unwrap_or(0.0),
        depfile_distinct_targets_err,
    };

    signal::register_sigint();

    let load_start = Instant::now();
    let disk = RealDiskInterface {};
    let mut graph = trace::scope("load", || load::read(&disk, &opts.build_file))?;

    let mut build_log = BuildLog::new();
    if let Some(warning) = build_log.load(BUILD_LOG_FILENAME)? {
        eprintln!("knit: warning: {}", warning);
    }
    let mut deps_log = DepsLog::new();
    if let Some(warning) = deps_log.load(DEPS_LOG_FILENAME, &mut graph)? {
        eprintln!("knit: warning: {}", warning);
    }
    build_log.open_for_write(BUILD_LOG_FILENAME, |output| {
        graph
            .lookup_node(output)
            .map_or(false, |node| graph.node(node).in_edge.is_some())
    })?;
    deps_log.open_for_write(DEPS_LOG_FILENAME, &graph, |node| {
        graph
            .node(node)
            .in_edge
            .map_or(false, |edge| graph.edge(edge).deps_type.is_some())
    })?;
    let load_time = load_start.elapsed();

    // With no targets on the command line, fall back to the manifest's
    // defaults, then to the graph's roots.
    let fallback_targets: Vec<NodeId> = if opts.targets.is_empty() {
        let targets = if !graph.defaults.is_empty() {
            graph.defaults.clone()
        } else {
            graph.root_nodes()
        };
        if targets.is_empty() && !graph.edges.is_empty() {
            bail!("could not determine root nodes of build graph");
        }
        targets
    } else {
        Vec::new()
    };

    let mut status = StatusPrinter::new(opts.verbose)?;
    let mut builder = Builder::new(
        &mut graph,
        &config,
        &flags,
        &mut build_log,
        &mut deps_log,
        &disk,
        &mut status,
    );

    let build_start = Instant::now();
    trace::scope("scan", || -> anyhow::Result<()> {
        if opts.targets.is_empty() {
            for &target in &fallback_targets {
                builder.add_target(target)?;
            }
        } else {
            for name in &opts.targets {
                builder.add_target_by_name(name)?;
            }
        }
        Ok(())
    })?;

    if builder.already_up_to_date() {
        println!("knit: no work to do");
    } else {
        let mut runner = RealCommandRunner::new(config.parallelism, config.max_load_average);
        let ran = trace::scope("build", || builder.build(&mut runner))?;
        println!(
            "knit: ran {} task{}, now up to date",
            ran,
            if ran == 1 { "" } else { "s" }
        );
    }

    drop(builder);
    build_log.close();
    deps_log.close();

    if stats {
        eprintln!(
            "knit: load {:.3}s, build {:.3}s",
            load_time.as_secs_f64(),
            build_start.elapsed().as_secs_f64()
        );
    }
    Ok(0)
}

pub fn run() -> anyhow::Result<i32> {
    let result = run_impl();
    let _ = trace::close();
    match result {
        Err(err) if err.downcast_ref::<Interrupted>().is_some() => {
            println!("knit: {}", err);
            Ok(2)
        }
        other => other,
    }
}
