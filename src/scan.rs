//! Dirtiness analysis: given a target, walk everything it transitively
//! depends on and decide which edges have stale outputs, loading discovered
//! dependencies (depfiles, deps log, dyndep files) along the way.

use std::path::Path;

use anyhow::{anyhow, bail};

use crate::build_log::BuildLog;
use crate::builder::DebugFlags;
use crate::canon::canon_path;
use crate::depfile;
use crate::deps_log::DepsLog;
use crate::disk::DiskInterface;
use crate::dyndep::{self, DyndepFile};
use crate::graph::{EdgeId, Graph, MTime, NodeId, VisitMark};
use crate::hash;
use crate::scanner::Scanner;

/// Print a dirtiness reason when -d explain is on.
macro_rules! explain {
    ($self:ident, $($args:tt)*) => {
        if $self.flags.explain {
            eprintln!("knit explain: {}", format!($($args)*));
        }
    };
}

/// The collaborators dirtiness computation needs.  Constructed transiently
/// by the builder; the plan also calls back into it while a build runs.
pub struct DepScan<'a> {
    pub graph: &'a mut Graph,
    pub disk: &'a dyn DiskInterface,
    pub build_log: &'a BuildLog,
    pub deps_log: &'a DepsLog,
    pub flags: &'a DebugFlags,
    /// Error (rather than warn) when a depfile names multiple outputs.
    pub depfile_distinct_targets_err: bool,
}

impl<'a> DepScan<'a> {
    /// Mark the subgraph reachable from `node` through in-edges with
    /// accurate dirty state.
    pub fn recompute_dirty(&mut self, node: NodeId) -> anyhow::Result<()> {
        let mut stack = Vec::new();
        self.recompute_node_dirty(node, &mut stack)
    }

    fn stat_if_necessary(&mut self, node: NodeId) -> anyhow::Result<()> {
        if self.graph.node(node).status_known() {
            return Ok(());
        }
        let mtime = self.disk.stat(&self.graph.node(node).name)?;
        self.graph.node_mut(node).mtime = Some(mtime);
        Ok(())
    }

    fn recompute_node_dirty(
        &mut self,
        node: NodeId,
        stack: &mut Vec<NodeId>,
    ) -> anyhow::Result<()> {
        let edge = match self.graph.node(node).in_edge {
            None => {
                // A leaf: dirty when missing.
                if self.graph.node(node).status_known() {
                    return Ok(());
                }
                self.stat_if_necessary(node)?;
                let exists = self.graph.node(node).exists();
                if !exists {
                    explain!(
                        self,
                        "{} has no in-edge and is missing",
                        self.graph.node(node).name
                    );
                }
                self.graph.node_mut(node).dirty = !exists;
                return Ok(());
            }
            Some(edge) => edge,
        };

        match self.graph.edge(edge).mark {
            VisitMark::Done => return Ok(()),
            VisitMark::InStack => return self.cycle_error(node, stack),
            VisitMark::None => {}
        }
        self.graph.edge_mut(edge).mark = VisitMark::InStack;
        stack.push(node);

        let mut dirty = false;
        {
            let edge = self.graph.edge_mut(edge);
            edge.outputs_ready = true;
            edge.deps_missing = false;
        }

        if !self.graph.edge(edge).deps_loaded {
            // First encounter with this edge: if a dyndep file feeds it and
            // is already available, apply it before considering inputs.
            if let Some(dyndep_node) = self.graph.edge(edge).dyndep {
                if self.graph.node(dyndep_node).dyndep_pending {
                    self.recompute_node_dirty(dyndep_node, stack)?;
                    let ready = match self.graph.node(dyndep_node).in_edge {
                        None => true,
                        Some(producer) => self.graph.edge(producer).outputs_ready,
                    };
                    if ready {
                        self.load_dyndeps(dyndep_node)?;
                    }
                }
            }
        }

        // Load output mtimes so we can compare them to the most recent
        // input below.
        for i in 0..self.graph.edge(edge).outs.len() {
            let out = self.graph.edge(edge).outs[i];
            self.stat_if_necessary(out)?;
        }

        if !self.graph.edge(edge).deps_loaded {
            self.graph.edge_mut(edge).deps_loaded = true;
            if !self.load_deps(edge)? {
                // Missing dep info: rebuild to regenerate it.
                dirty = true;
                self.graph.edge_mut(edge).deps_missing = true;
            }
        }

        // Visit all inputs; we're dirty if any non-order-only input is
        // dirty, and otherwise track the most recent input for the output
        // comparisons.
        let mut most_recent_input: Option<NodeId> = None;
        let mut i = 0;
        while i < self.graph.edge(edge).ins.len() {
            let input = self.graph.edge(edge).ins[i];
            self.recompute_node_dirty(input, stack)?;

            if let Some(in_edge) = self.graph.node(input).in_edge {
                // If an input is not ready, neither are our outputs.
                if !self.graph.edge(in_edge).outputs_ready {
                    self.graph.edge_mut(edge).outputs_ready = false;
                }
            }

            if !self.graph.edge(edge).is_order_only(i) {
                if self.graph.node(input).dirty {
                    explain!(self, "{} is dirty", self.graph.node(input).name);
                    dirty = true;
                } else {
                    let mtime = self.graph.node(input).mtime_or_missing();
                    let newest = most_recent_input.map(|n| self.graph.node(n).mtime_or_missing());
                    if newest.map_or(true, |newest| mtime > newest) {
                        most_recent_input = Some(input);
                    }
                }
            }
            i += 1;
        }

        // We may also be dirty due to output state: missing outputs,
        // out-of-date outputs, a changed command line.
        if !dirty {
            dirty = self.recompute_outputs_dirty(edge, most_recent_input);
        }

        if dirty {
            for i in 0..self.graph.edge(edge).outs.len() {
                let out = self.graph.edge(edge).outs[i];
                self.graph.node_mut(out).dirty = true;
            }
            self.graph.edge_mut(edge).outputs_ready = false;
        }

        self.graph.edge_mut(edge).mark = VisitMark::Done;
        debug_assert_eq!(stack.last(), Some(&node));
        stack.pop();
        Ok(())
    }

    fn cycle_error(&self, node: NodeId, stack: &[NodeId]) -> anyhow::Result<()> {
        let edge = self.graph.node(node).in_edge;
        // Report the cycle from where it closes, naming the revisited node
        // rather than whichever sibling output happened to start the walk.
        let start = stack
            .iter()
            .position(|&n| self.graph.node(n).in_edge == edge)
            .unwrap_or(0);
        let mut names: Vec<&str> = stack[start..]
            .iter()
            .map(|&n| self.graph.node(n).name.as_str())
            .collect();
        names[0] = self.graph.node(node).name.as_str();
        let first = names[0];
        bail!("dependency cycle: {} -> {}", names.join(" -> "), first);
    }

    /// Load the dyndep file provided by `node` and apply it to the graph.
    pub fn load_dyndeps(&mut self, node: NodeId) -> anyhow::Result<DyndepFile> {
        explain!(self, "loading dyndep file '{}'", self.graph.node(node).name);
        dyndep::load_dyndeps(self.graph, self.disk, node)
    }

    /// Bring in an edge's discovered dependencies.  Ok(false) means the
    /// info is missing or stale and the edge must rerun to regenerate it.
    fn load_deps(&mut self, edge: EdgeId) -> anyhow::Result<bool> {
        if self.graph.edge(edge).deps_type.is_some() {
            return self.load_deps_from_log(edge);
        }
        if let Some(path) = self.graph.edge(edge).depfile.clone() {
            return self.load_depfile(edge, &path);
        }
        Ok(true)
    }

    fn load_deps_from_log(&mut self, edge: EdgeId) -> anyhow::Result<bool> {
        let output = self.graph.edge(edge).outs[0];
        let deps = match self.deps_log.lookup(output) {
            Some(deps) => deps,
            None => {
                explain!(
                    self,
                    "deps for '{}' are missing",
                    self.graph.node(output).name
                );
                return Ok(false);
            }
        };
        if self.graph.node(output).mtime_or_missing() > deps.mtime {
            explain!(
                self,
                "stored deps info out of date for '{}'",
                self.graph.node(output).name
            );
            return Ok(false);
        }
        let ins = deps.ins.clone();
        for &input in &ins {
            self.graph.ensure_dep_loader_in_edge(input);
        }
        self.graph.insert_discovered_ins(edge, &ins);
        Ok(true)
    }

    fn load_depfile(&mut self, edge: EdgeId, path: &str) -> anyhow::Result<bool> {
        let mut bytes = match self.disk.read_file(path)? {
            Some(bytes) => bytes,
            None => {
                explain!(self, "depfile '{}' is missing", path);
                return Ok(false);
            }
        };
        bytes.push(0);
        let mut scanner = Scanner::new(&bytes);
        let parsed = depfile::parse(&mut scanner)
            .map_err(|err| anyhow!(scanner.format_parse_error(Path::new(path), err)))?;
        if parsed.distinct_targets {
            if self.depfile_distinct_targets_err {
                bail!("depfile has multiple output paths");
            }
            eprintln!("knit: warning: depfile has multiple output paths");
        }

        let first_output = self.graph.edge(edge).outs[0];
        let depfile_out = canon_path(parsed.out.as_str());
        if self.graph.node(first_output).name != depfile_out {
            bail!(
                "expected depfile '{}' to mention '{}', got '{}'",
                path,
                self.graph.node(first_output).name,
                parsed.out
            );
        }

        let mut ins = Vec::with_capacity(parsed.ins.len());
        for input in &parsed.ins {
            let id = self.graph.node_id(&canon_path(input.as_str()));
            self.graph.ensure_dep_loader_in_edge(id);
            ins.push(id);
        }
        self.graph.insert_discovered_ins(edge, &ins);
        Ok(true)
    }

    /// Whether any of the edge's outputs is out of date relative to its
    /// inputs, recorded command, or existence.  Also refreshes phony output
    /// mtimes.  The inputs must already have accurate state.
    pub fn recompute_outputs_dirty(
        &mut self,
        edge: EdgeId,
        most_recent_input: Option<NodeId>,
    ) -> bool {
        let command_hash = self.edge_command_hash(edge);
        for i in 0..self.graph.edge(edge).outs.len() {
            let out = self.graph.edge(edge).outs[i];
            if self.recompute_output_dirty(edge, most_recent_input, command_hash, out) {
                return true;
            }
        }
        false
    }

    /// The fingerprint the build log stores for this edge's command.
    pub fn edge_command_hash(&self, edge: EdgeId) -> Option<u64> {
        let edge = self.graph.edge(edge);
        edge.cmdline
            .as_ref()
            .map(|cmdline| hash::hash_command(cmdline, edge.rspfile.as_ref()))
    }

    fn recompute_output_dirty(
        &mut self,
        edge_id: EdgeId,
        most_recent_input: Option<NodeId>,
        command_hash: Option<u64>,
        output: NodeId,
    ) -> bool {
        let (is_phony, by_dep_loader, no_ins, restat, generator) = {
            let edge = self.graph.edge(edge_id);
            (
                edge.is_phony(),
                edge.generated_by_dep_loader,
                edge.ins.is_empty(),
                edge.restat,
                edge.generator,
            )
        };

        if is_phony {
            if by_dep_loader {
                // Stand-in for a discovered dependency: its absence is
                // exactly what should force the consumer to rebuild.
                let missing = !self.graph.node(output).exists();
                if missing {
                    explain!(
                        self,
                        "discovered dependency {} is missing",
                        self.graph.node(output).name
                    );
                }
                return missing;
            }
            if no_ins {
                // An aliasing phony with no inputs never goes out of date,
                // even with no file behind it.
                return false;
            }
            // Phony edges don't write output; give the node the newest
            // input's mtime so dependents compare against that.
            if let Some(input) = most_recent_input {
                let input_mtime = self.graph.node(input).mtime_or_missing();
                let out_node = self.graph.node_mut(output);
                if out_node.mtime_or_missing() < input_mtime {
                    out_node.mtime = Some(input_mtime);
                }
            }
            return false;
        }

        if !self.graph.node(output).exists() {
            explain!(
                self,
                "output {} doesn't exist",
                self.graph.node(output).name
            );
            return true;
        }

        let out_name = self.graph.node(output).name.clone();
        let mut output_mtime = self.graph.node(output).mtime_or_missing();
        let input_mtime = most_recent_input.map(|n| self.graph.node(n).mtime_or_missing());
        let logged: Option<(u64, MTime)> = self
            .build_log
            .lookup(&out_name)
            .map(|entry| (entry.command_hash, entry.mtime));

        if let Some(input_mtime) = input_mtime {
            if output_mtime < input_mtime {
                // A restat rule may have recorded a newer effective mtime
                // than the unchanged file's own.
                let mut used_restat = false;
                if restat {
                    if let Some((_, logged_mtime)) = logged {
                        output_mtime = logged_mtime;
                        used_restat = true;
                    }
                }
                if output_mtime < input_mtime {
                    explain!(
                        self,
                        "{}output {} older than most recent input {}",
                        if used_restat { "restat of " } else { "" },
                        out_name,
                        self.graph.node(most_recent_input.unwrap()).name
                    );
                    return true;
                }
            }
        }

        match logged {
            Some((logged_hash, logged_mtime)) => {
                if !generator && Some(logged_hash) != command_hash {
                    explain!(self, "command line changed for {}", out_name);
                    return true;
                }
                if let Some(input_mtime) = input_mtime {
                    if logged_mtime < input_mtime {
                        explain!(
                            self,
                            "recorded mtime of {} older than most recent input",
                            out_name
                        );
                        return true;
                    }
                }
            }
            None => {
                if !generator {
                    explain!(self, "command line not found in log for {}", out_name);
                    return true;
                }
            }
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{load_manifest, VirtualDisk};

    struct ScanFixture {
        graph: Graph,
        disk: VirtualDisk,
        build_log: BuildLog,
        deps_log: DepsLog,
        flags: DebugFlags,
    }

    impl ScanFixture {
        fn new(manifest: &str) -> ScanFixture {
            ScanFixture {
                graph: load_manifest(manifest),
                disk: VirtualDisk::new(),
                build_log: BuildLog::new(),
                deps_log: DepsLog::new(),
                flags: DebugFlags::default(),
            }
        }

        /// Record a build-log entry matching the edge's current command.
        fn log_command(&mut self, output: &str) {
            let node = self.graph.lookup_node(output).unwrap();
            let edge = self.graph.node(node).in_edge.unwrap();
            let e = self.graph.edge(edge);
            let hash = hash::hash_command(e.cmdline.as_ref().unwrap(), e.rspfile.as_ref());
            let mtime = self.disk.mtime(output);
            self.build_log.record(output, hash, 0, 1, mtime).unwrap();
        }

        fn scan(&mut self, target: &str) -> anyhow::Result<NodeId> {
            let node = self.graph.lookup_node(target).unwrap();
            let mut scan = DepScan {
                graph: &mut self.graph,
                disk: &self.disk,
                build_log: &self.build_log,
                deps_log: &self.deps_log,
                flags: &self.flags,
                depfile_distinct_targets_err: false,
            };
            scan.recompute_dirty(node)?;
            Ok(node)
        }

        fn dirty(&self, name: &str) -> bool {
            self.graph.node(self.graph.lookup_node(name).unwrap()).dirty
        }
    }

    const CAT_CHAIN: &str = "
rule cat
  command = cat $in > $out
build mid: cat in
build out: cat mid
";

    #[test]
    fn missing_output_is_dirty() {
        let mut fx = ScanFixture::new(CAT_CHAIN);
        fx.disk.add_file("in", "");
        fx.scan("out").unwrap();
        assert!(fx.dirty("mid"));
        assert!(fx.dirty("out"));
    }

    #[test]
    fn up_to_date_chain_is_clean() {
        let mut fx = ScanFixture::new(CAT_CHAIN);
        fx.disk.add_file("in", "");
        fx.disk.add_file("mid", "");
        fx.disk.add_file("out", "");
        fx.log_command("mid");
        fx.log_command("out");
        let out = fx.scan("out").unwrap();
        assert!(!fx.dirty("mid"));
        assert!(!fx.dirty("out"));
        let edge = fx.graph.node(out).in_edge.unwrap();
        assert!(fx.graph.edge(edge).outputs_ready);
    }

    #[test]
    fn newer_input_is_dirty() {
        let mut fx = ScanFixture::new(CAT_CHAIN);
        fx.disk.add_file("in", "");
        fx.disk.add_file("mid", "");
        fx.disk.add_file("out", "");
        fx.log_command("mid");
        fx.log_command("out");
        // "in" now has the newest mtime, so mid (and transitively out) are
        // stale.
        fx.disk.touch("in");
        fx.scan("out").unwrap();
        assert!(fx.dirty("mid"));
        assert!(fx.dirty("out"));
    }

    #[test]
    fn command_change_is_dirty() {
        let mut fx = ScanFixture::new(CAT_CHAIN);
        fx.disk.add_file("in", "");
        fx.disk.add_file("mid", "");
        fx.disk.add_file("out", "");
        // Log a hash that doesn't match the manifest's command.
        let mid_mtime = fx.disk.mtime("mid");
        fx.build_log.record("mid", 0xdead, 0, 1, mid_mtime).unwrap();
        fx.log_command("out");
        fx.scan("out").unwrap();
        assert!(fx.dirty("mid"));
    }

    #[test]
    fn missing_log_entry_is_dirty() {
        let mut fx = ScanFixture::new(CAT_CHAIN);
        fx.disk.add_file("in", "");
        fx.disk.add_file("mid", "");
        fx.disk.add_file("out", "");
        fx.log_command("out");
        fx.scan("out").unwrap();
        assert!(fx.dirty("mid"));
    }

    #[test]
    fn order_only_input_does_not_dirty() {
        let mut fx = ScanFixture::new(
            "
rule cc
  command = cc $in -o $out
build foo.o: cc foo.c || otherfile
",
        );
        fx.disk.add_file("foo.c", "");
        fx.disk.add_file("foo.o", "");
        fx.disk.add_file("otherfile", "");
        fx.log_command("foo.o");
        fx.disk.touch("otherfile");
        fx.scan("foo.o").unwrap();
        assert!(!fx.dirty("foo.o"));
    }

    #[test]
    fn phony_alias_with_no_inputs_is_clean() {
        let mut fx = ScanFixture::new("build alias: phony\n");
        fx.scan("alias").unwrap();
        assert!(!fx.dirty("alias"));
        let node = fx.graph.lookup_node("alias").unwrap();
        let edge = fx.graph.node(node).in_edge.unwrap();
        assert!(fx.graph.edge(edge).outputs_ready);
    }

    #[test]
    fn phony_propagates_input_dirtiness_and_mtime() {
        let mut fx = ScanFixture::new(
            "
rule cat
  command = cat $in > $out
build gen: cat src
build alias: phony gen
",
        );
        fx.disk.add_file("src", "");
        fx.scan("alias").unwrap();
        assert!(fx.dirty("alias"));
    }

    #[test]
    fn missing_depfile_is_dirty() {
        let mut fx = ScanFixture::new(
            "
rule cc
  command = cc -c $in -o $out
  depfile = $out.d
build foo.o: cc foo.c
",
        );
        fx.disk.add_file("foo.c", "");
        fx.disk.add_file("foo.o", "");
        fx.log_command("foo.o");
        fx.scan("foo.o").unwrap();
        assert!(fx.dirty("foo.o"));
        let node = fx.graph.lookup_node("foo.o").unwrap();
        let edge = fx.graph.node(node).in_edge.unwrap();
        assert!(fx.graph.edge(edge).deps_missing);
    }

    #[test]
    fn depfile_discovered_header_dirties() {
        let mut fx = ScanFixture::new(
            "
rule cc
  command = cc -c $in -o $out
  depfile = $out.d
build foo.o: cc foo.c
",
        );
        fx.disk.add_file("foo.c", "");
        fx.disk.add_file("foo.o", "");
        fx.disk.add_file("foo.o.d", "foo.o: foo.h\n");
        fx.log_command("foo.o");
        // Header is newer than the output.
        fx.disk.add_file("foo.h", "");
        fx.scan("foo.o").unwrap();
        assert!(fx.dirty("foo.o"));
    }

    #[test]
    fn depfile_missing_header_dirties_without_error() {
        let mut fx = ScanFixture::new(
            "
rule cc
  command = cc -c $in -o $out
  depfile = $out.d
build foo.o: cc foo.c
",
        );
        fx.disk.add_file("foo.c", "");
        fx.disk.add_file("foo.o", "");
        fx.disk.add_file("foo.o.d", "foo.o: gone.h\n");
        fx.log_command("foo.o");
        fx.scan("foo.o").unwrap();
        assert!(fx.dirty("foo.o"));
        // The missing header grew a stand-in producer, so the plan won't
        // report "no known rule to make it".
        let header = fx.graph.lookup_node("gone.h").unwrap();
        assert!(fx.graph.node(header).in_edge.is_some());
    }

    #[test]
    fn depfile_wrong_output_errors() {
        let mut fx = ScanFixture::new(
            "
rule cc
  command = cc -c $in -o $out
  depfile = $out.d
build foo.o: cc foo.c
",
        );
        fx.disk.add_file("foo.c", "");
        fx.disk.add_file("foo.o", "");
        fx.disk.add_file("foo.o.d", "bar.o: foo.h\n");
        let err = fx.scan("foo.o").unwrap_err();
        assert_eq!(
            err.to_string(),
            "expected depfile 'foo.o.d' to mention 'foo.o', got 'bar.o'"
        );
    }

    #[test]
    fn restat_survivor_is_clean() {
        let mut fx = ScanFixture::new(
            "
rule gen
  command = gen $in > $out
  restat = 1
build header: gen header.in
",
        );
        fx.disk.add_file("header", "");
        fx.disk.add_file("header.in", "");
        // The output on disk is older than the input, but the log recorded
        // the newest-input mtime after the last restat run.
        let node = fx.graph.lookup_node("header").unwrap();
        let edge = fx.graph.node(node).in_edge.unwrap();
        let e = fx.graph.edge(edge);
        let hash = hash::hash_command(e.cmdline.as_ref().unwrap(), e.rspfile.as_ref());
        fx.build_log
            .record("header", hash, 0, 1, fx.disk.mtime("header.in"))
            .unwrap();
        fx.scan("header").unwrap();
        assert!(!fx.dirty("header"));
    }

    #[test]
    fn dependency_cycle_reported() {
        let mut fx = ScanFixture::new(
            "
rule cat
  command = cat $in > $out
build a: cat b
build b: cat a
",
        );
        let err = fx.scan("a").unwrap_err();
        assert_eq!(err.to_string(), "dependency cycle: a -> b -> a");
    }

    #[test]
    fn dyndep_cycle_reported() {
        let mut fx = ScanFixture::new(
            "
rule touch
  command = touch $out
build out: touch || dd
  dyndep = dd
build mid: touch out
",
        );
        // The dyndep file is on disk and introduces mid as an input of
        // out, closing a cycle through mid's dependency on out.
        fx.disk
            .add_file("dd", "ninja_dyndep_version = 1\nbuild out: dyndep | mid\n");
        let err = fx.scan("out").unwrap_err();
        assert_eq!(err.to_string(), "dependency cycle: out -> mid -> out");
    }

    #[test]
    fn stored_deps_outdated_is_dirty() {
        let mut fx = ScanFixture::new(
            "
rule cc
  command = cc -c $in -o $out
  deps = gcc
  depfile = $out.d
build foo.o: cc foo.c
",
        );
        fx.disk.add_file("foo.c", "");
        // Record deps, then make the output newer than the recorded mtime.
        let out = fx.graph.lookup_node("foo.o").unwrap();
        let header = fx.graph.node_id("foo.h");
        fx.disk.add_file("foo.h", "");
        fx.deps_log
            .record_deps(&fx.graph, out, MTime::Stamp(1), &[header])
            .unwrap();
        fx.disk.add_file("foo.o", "");
        fx.log_command("foo.o");
        fx.scan("foo.o").unwrap();
        assert!(fx.dirty("foo.o"));
    }

    #[test]
    fn deps_log_satisfies_scan() {
        let mut fx = ScanFixture::new(
            "
rule cc
  command = cc -c $in -o $out
  deps = gcc
  depfile = $out.d
build foo.o: cc foo.c
",
        );
        fx.disk.add_file("foo.c", "");
        fx.disk.add_file("foo.h", "");
        fx.disk.add_file("foo.o", "");
        let out = fx.graph.lookup_node("foo.o").unwrap();
        let header = fx.graph.node_id("foo.h");
        fx.deps_log
            .record_deps(&fx.graph, out, fx.disk.mtime("foo.o"), &[header])
            .unwrap();
        fx.log_command("foo.o");
        fx.scan("foo.o").unwrap();
        assert!(!fx.dirty("foo.o"));
        // The discovered input landed in the implicit section.
        let edge = fx.graph.node(out).in_edge.unwrap();
        assert!(fx.graph.edge(edge).dirtying_ins().contains(&header));
    }
}
