//! The top-level build loop: pull ready edges from the plan, hand them to
//! the command runner, and apply the results (restat, discovered deps, log
//! updates) as they come back.

use std::path::Path;

use anyhow::{anyhow, bail};

use crate::build_log::BuildLog;
use crate::canon::canon_path;
use crate::clparser;
use crate::depfile;
use crate::deps_log::DepsLog;
use crate::disk::{parent_dir, DiskInterface};
use crate::graph::{DepsType, EdgeId, Graph, MTime, NodeId};
use crate::hash;
use crate::plan::{EdgeResult, Plan};
use crate::process::Termination;
use crate::runner::{CommandResult, CommandRunner};
use crate::scan::DepScan;
use crate::scanner::Scanner;
use crate::signal;
use crate::status::Progress;

/// Knobs passed to a build, fixed at startup.
#[derive(Clone)]
pub struct BuildConfig {
    pub parallelism: usize,
    /// How many failing commands to tolerate before giving up.
    pub failures_allowed: usize,
    /// Don't start new commands while the 1-minute load average exceeds
    /// this; zero or negative disables the check.
    pub max_load_average: f64,
    /// Error (rather than warn) when a depfile names multiple outputs.
    pub depfile_distinct_targets_err: bool,
}

impl Default for BuildConfig {
    fn default() -> BuildConfig {
        BuildConfig {
            parallelism: 1,
            failures_allowed: 1,
            max_load_average: 0.0,
            depfile_distinct_targets_err: false,
        }
    }
}

/// Debug switches settable from the command line before the build starts.
#[derive(Clone, Default)]
pub struct DebugFlags {
    pub explain: bool,
    pub keep_depfile: bool,
    pub keep_rspfile: bool,
}

/// Marker error for SIGINT, so the entry point can exit with code 2.
#[derive(Debug)]
pub struct Interrupted;

impl std::fmt::Display for Interrupted {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "interrupted by user")
    }
}

impl std::error::Error for Interrupted {}

pub struct Builder<'a> {
    graph: &'a mut Graph,
    config: &'a BuildConfig,
    flags: &'a DebugFlags,
    build_log: &'a mut BuildLog,
    deps_log: &'a mut DepsLog,
    disk: &'a dyn DiskInterface,
    status: &'a mut dyn Progress,
    plan: Plan,
    commands_run: usize,
}

impl<'a> Builder<'a> {
    pub fn new(
        graph: &'a mut Graph,
        config: &'a BuildConfig,
        flags: &'a DebugFlags,
        build_log: &'a mut BuildLog,
        deps_log: &'a mut DepsLog,
        disk: &'a dyn DiskInterface,
        status: &'a mut dyn Progress,
    ) -> Builder<'a> {
        Builder {
            graph,
            config,
            flags,
            build_log,
            deps_log,
            disk,
            status,
            plan: Plan::new(),
            commands_run: 0,
        }
    }

    /// Split the borrow of self into the scan context and the plan, so the
    /// plan can call back into scanning.
    fn scan_and_plan(&mut self) -> (DepScan<'_>, &mut Plan) {
        (
            DepScan {
                graph: &mut *self.graph,
                disk: self.disk,
                build_log: &*self.build_log,
                deps_log: &*self.deps_log,
                flags: self.flags,
                depfile_distinct_targets_err: self.config.depfile_distinct_targets_err,
            },
            &mut self.plan,
        )
    }

    pub fn add_target_by_name(&mut self, name: &str) -> anyhow::Result<NodeId> {
        let canon = canon_path(name);
        let node = match self.graph.lookup_node(&canon) {
            Some(node) => node,
            None => bail!("unknown target '{}'", name),
        };
        self.add_target(node)?;
        Ok(node)
    }

    /// Add a target to the build, scanning its dependencies.
    pub fn add_target(&mut self, node: NodeId) -> anyhow::Result<()> {
        {
            let (mut scan, _) = self.scan_and_plan();
            scan.recompute_dirty(node)?;
        }
        self.plan.add_target(self.graph, node)?;
        Ok(())
    }

    /// True when the added targets need nothing done.
    pub fn already_up_to_date(&self) -> bool {
        !self.plan.more_to_do()
    }

    /// Run the build.  Returns the number of commands executed.  It is a
    /// bug to call this when already_up_to_date().
    pub fn build(&mut self, runner: &mut dyn CommandRunner) -> anyhow::Result<usize> {
        debug_assert!(!self.already_up_to_date());
        self.status.plan_has_total_edges(self.plan.command_edge_count());
        self.status.build_started();

        let result = self.build_loop(runner);
        if result.is_err() {
            if let Err(cleanup_err) = self.cleanup(runner) {
                eprintln!("knit: error during cleanup: {}", cleanup_err);
            }
        }
        self.status.build_finished();
        result.map(|()| self.commands_run)
    }

    fn build_loop(&mut self, runner: &mut dyn CommandRunner) -> anyhow::Result<()> {
        let mut pending = 0usize;
        let mut failures_allowed = self.config.failures_allowed;

        while self.plan.more_to_do() {
            // Start as much work as the runner will take.
            if failures_allowed > 0 && runner.can_run_more() {
                if let Some(edge) = self.plan.find_work(self.graph) {
                    if self.graph.edge(edge).is_phony() {
                        let (mut scan, plan) = self.scan_and_plan();
                        plan.edge_finished(&mut scan, edge, EdgeResult::Succeeded)?;
                    } else {
                        self.start_edge(edge, runner)?;
                        pending += 1;
                    }
                    continue;
                }
            }

            // Reap a finished command.
            if pending > 0 {
                let mut result = match runner.wait_for_command() {
                    Some(result) => result,
                    None => bail!(Interrupted),
                };
                if signal::was_interrupted() || result.termination == Termination::Interrupted {
                    bail!(Interrupted);
                }
                pending -= 1;
                let success = self.finish_command(&mut result)?;
                if !success {
                    failures_allowed = failures_allowed.saturating_sub(1);
                }
                continue;
            }

            // Nothing running and nothing startable: we're stuck.
            if failures_allowed == 0 {
                if self.config.failures_allowed > 1 {
                    bail!("subcommands failed");
                }
                bail!("subcommand failed");
            }
            if failures_allowed < self.config.failures_allowed {
                bail!("cannot make progress due to previous errors");
            }
            bail!("stuck [this is a bug]");
        }
        Ok(())
    }

    /// Prepare an edge to run: output directories, response file, status.
    fn start_edge(&mut self, edge: EdgeId, runner: &mut dyn CommandRunner) -> anyhow::Result<()> {
        self.commands_run += 1;

        for i in 0..self.graph.edge(edge).outs.len() {
            let out = self.graph.edge(edge).outs[i];
            let name = self.graph.node(out).name.clone();
            if let Some(dir) = parent_dir(&name) {
                self.disk.make_dirs(dir)?;
            }
        }

        if let Some(rspfile) = self.graph.edge(edge).rspfile.clone() {
            if let Some(dir) = parent_dir(&rspfile.path) {
                self.disk.make_dirs(dir)?;
            }
            self.disk.write_file(&rspfile.path, &rspfile.content)?;
        }

        self.status.edge_started(edge, self.graph.edge(edge));
        let cmdline = self
            .graph
            .edge(edge)
            .cmdline
            .clone()
            .expect("non-phony edge has a command");
        let console = self.graph.edge(edge).use_console();
        runner
            .start_command(edge, cmdline, console)
            .map_err(|err| anyhow!("command failed to start: {}", err))
    }

    /// Apply a finished command's results: deps extraction, restat, plan
    /// propagation, log updates.  Returns whether the command succeeded.
    pub fn finish_command(&mut self, result: &mut CommandResult) -> anyhow::Result<bool> {
        let edge = result.edge;
        let mut success = result.termination == Termination::Success;

        // Pull discovered dependencies out of the result first; for msvc
        // that also filters the user-visible output.
        let deps_type = self.graph.edge(edge).deps_type;
        let mut deps_nodes = Vec::new();
        if let Some(deps_type) = deps_type {
            match self.extract_deps(edge, deps_type, result) {
                Ok(nodes) => deps_nodes = nodes,
                Err(err) => {
                    if success {
                        success = false;
                        result.termination = Termination::Failure;
                        if !result.output.is_empty() && !result.output.ends_with(b"\n") {
                            result.output.push(b'\n');
                        }
                        result.output.extend_from_slice(err.to_string().as_bytes());
                        result.output.push(b'\n');
                    }
                }
            }
        }

        let (start_time, end_time) =
            self.status
                .edge_finished(edge, self.graph.edge(edge), success, &result.output);

        if !success {
            let (mut scan, plan) = self.scan_and_plan();
            plan.edge_finished(&mut scan, edge, EdgeResult::Failed)?;
            return Ok(false);
        }

        if !deps_nodes.is_empty() {
            self.graph.insert_discovered_ins(edge, &deps_nodes);
        }

        // Restat the outputs.  A restat rule that left an output untouched
        // propagates the clean state into the plan.
        let restat = self.graph.edge(edge).restat;
        let mut output_mtime = MTime::Missing;
        let mut node_cleaned = false;
        for i in 0..self.graph.edge(edge).outs.len() {
            let out = self.graph.edge(edge).outs[i];
            let name = self.graph.node(out).name.clone();
            let old_mtime = self.graph.node(out).mtime_or_missing();
            let new_mtime = self.disk.stat(&name)?;
            self.graph.node_mut(out).mtime = Some(new_mtime);
            if new_mtime > output_mtime {
                output_mtime = new_mtime;
            }
            if restat && new_mtime == old_mtime {
                let (mut scan, plan) = self.scan_and_plan();
                plan.clean_node(&mut scan, out)?;
                node_cleaned = true;
            }
        }

        if node_cleaned {
            // Record the newest input mtime instead of the untouched
            // output's, so the next invocation compares inputs against when
            // we last ran.
            let mut restat_mtime = MTime::Missing;
            for i in 0..self.graph.edge(edge).dirtying_ins().len() {
                let input = self.graph.edge(edge).dirtying_ins()[i];
                let name = self.graph.node(input).name.clone();
                let input_mtime = self.disk.stat(&name)?;
                if input_mtime > restat_mtime {
                    restat_mtime = input_mtime;
                }
            }
            if deps_type.is_none() {
                if let Some(depfile) = self.graph.edge(edge).depfile.clone() {
                    let depfile_mtime = self.disk.stat(&depfile)?;
                    if depfile_mtime > restat_mtime {
                        restat_mtime = depfile_mtime;
                    }
                }
            }
            output_mtime = restat_mtime;
            // Cancellation may have shrunk the plan.
            self.status.plan_has_total_edges(self.plan.command_edge_count());
        }

        {
            let (mut scan, plan) = self.scan_and_plan();
            plan.edge_finished(&mut scan, edge, EdgeResult::Succeeded)?;
        }

        // The response file did its job.
        if !self.flags.keep_rspfile {
            if let Some(rspfile) = self.graph.edge(edge).rspfile.clone() {
                self.disk.remove_file(&rspfile.path)?;
            }
        }

        // Log the command against each of its outputs.
        let command_hash = {
            let e = self.graph.edge(edge);
            hash::hash_command(
                e.cmdline.as_deref().expect("ran edge has a command"),
                e.rspfile.as_ref(),
            )
        };
        for i in 0..self.graph.edge(edge).outs.len() {
            let out = self.graph.edge(edge).outs[i];
            let name = self.graph.node(out).name.clone();
            self.build_log
                .record(&name, command_hash, start_time, end_time, output_mtime)?;
        }

        // And the discovered deps against the primary output.
        if deps_type.is_some() {
            let out = self.graph.edge(edge).outs[0];
            let name = self.graph.node(out).name.clone();
            let deps_mtime = self.disk.stat(&name)?;
            self.deps_log
                .record_deps(self.graph, out, deps_mtime, &deps_nodes)?;
        }

        Ok(true)
    }

    fn extract_deps(
        &mut self,
        edge: EdgeId,
        deps_type: DepsType,
        result: &mut CommandResult,
    ) -> anyhow::Result<Vec<NodeId>> {
        match deps_type {
            DepsType::Msvc => {
                let prefix = self.graph.edge(edge).msvc_deps_prefix.clone();
                let output = String::from_utf8_lossy(&result.output).into_owned();
                let parsed = clparser::parse(&output, prefix.as_deref());
                result.output = parsed.filtered_output.into_bytes();
                let mut nodes = Vec::new();
                for include in parsed.includes {
                    nodes.push(self.graph.node_id(&canon_path(include)));
                }
                Ok(nodes)
            }
            DepsType::Gcc => {
                let depfile = match self.graph.edge(edge).depfile.clone() {
                    Some(depfile) => depfile,
                    None => bail!("edge with deps=gcc but no depfile makes no sense"),
                };
                let mut bytes = match self.disk.read_file(&depfile)? {
                    Some(bytes) => bytes,
                    None => bail!("{} not found after successful command", depfile),
                };
                bytes.push(0);
                let mut scanner = Scanner::new(&bytes);
                let parsed = depfile::parse(&mut scanner)
                    .map_err(|err| anyhow!(scanner.format_parse_error(Path::new(&depfile), err)))?;
                if parsed.distinct_targets {
                    if self.config.depfile_distinct_targets_err {
                        bail!("depfile has multiple output paths");
                    }
                    self.status.log("warning: depfile has multiple output paths");
                }
                let mut nodes = Vec::new();
                for input in &parsed.ins {
                    nodes.push(self.graph.node_id(&canon_path(input.as_str())));
                }
                if !self.flags.keep_depfile {
                    self.disk.remove_file(&depfile)?;
                }
                Ok(nodes)
            }
        }
    }

    /// Clean up after an interrupt or fatal error: delete outputs the
    /// still-running commands had already touched, keep the rest.
    fn cleanup(&mut self, runner: &mut dyn CommandRunner) -> anyhow::Result<()> {
        let active = runner.get_active_edges();
        runner.abort();
        for edge in active {
            let depfile = self.graph.edge(edge).depfile.clone();
            for i in 0..self.graph.edge(edge).outs.len() {
                let out = self.graph.edge(edge).outs[i];
                let name = self.graph.node(out).name.clone();
                // Only delete an output the command modified; with a
                // depfile we can't tell, so always delete.
                let old_mtime = self.graph.node(out).mtime_or_missing();
                let new_mtime = self.disk.stat(&name)?;
                if depfile.is_some() || old_mtime != new_mtime {
                    self.disk.remove_file(&name)?;
                }
            }
            if let Some(depfile) = depfile {
                self.disk.remove_file(&depfile)?;
            }
        }
        Ok(())
    }
}
