//! The build plan: which edges we intend to run this invocation, which are
//! ready, and how pool capacity gates them.  The builder drives this state
//! machine; the dependency scan is called back into when restat results or
//! dyndep files change what the graph looks like mid-build.

use std::collections::{HashMap, HashSet};

use anyhow::bail;

use crate::dyndep::DyndepFile;
use crate::graph::{EdgeId, Graph, NodeId};
use crate::scan::DepScan;

/// What we intend for an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Want {
    /// We don't need to run the edge, but a dependent may.
    Nothing,
    /// We want to run the edge but haven't handed it to the runner yet.
    ToStart,
    /// The edge was admitted for execution and we're waiting on it.
    ToFinish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeResult {
    Failed,
    Succeeded,
}

#[derive(Default)]
pub struct Plan {
    /// Edges we have looked at.  Membership means the edge was reached by
    /// the target walk; the Want value says whether we will run it.
    want: HashMap<EdgeId, Want>,
    /// Wanted edges whose inputs are all produced, awaiting pool admission.
    ready: HashSet<EdgeId>,
    /// Wanted edges that aren't phony.
    command_edges: usize,
    /// All wanted edges not yet finished.
    wanted_edges: usize,
}

impl Plan {
    pub fn new() -> Plan {
        Plan::default()
    }

    /// Whether there's more work to be done.
    pub fn more_to_do(&self) -> bool {
        self.wanted_edges > 0 && self.command_edges > 0
    }

    pub fn command_edge_count(&self) -> usize {
        self.command_edges
    }

    pub fn want_for(&self, edge: EdgeId) -> Option<Want> {
        self.want.get(&edge).copied()
    }

    /// Clears want and ready sets; the graph and logs are untouched.
    pub fn reset(&mut self) {
        self.want.clear();
        self.ready.clear();
        self.command_edges = 0;
        self.wanted_edges = 0;
    }

    /// Add a target (and its dirty ancestry) to the plan.  Returns false
    /// when the target needs nothing done.
    pub fn add_target(&mut self, graph: &Graph, node: NodeId) -> anyhow::Result<bool> {
        self.add_sub_target(graph, node, None, None)
    }

    fn add_sub_target(
        &mut self,
        graph: &Graph,
        node: NodeId,
        dependent: Option<NodeId>,
        mut dyndep_walk: Option<&mut HashSet<EdgeId>>,
    ) -> anyhow::Result<bool> {
        let edge = match graph.node(node).in_edge {
            None => {
                if graph.node(node).dirty {
                    let referenced = match dependent {
                        Some(dependent) => {
                            format!(", needed by '{}',", graph.node(dependent).name)
                        }
                        None => String::new(),
                    };
                    bail!(
                        "'{}'{} missing and no known rule to make it",
                        graph.node(node).name,
                        referenced
                    );
                }
                return Ok(false);
            }
            Some(edge) => edge,
        };

        if graph.edge(edge).outputs_ready {
            return Ok(false);
        }

        let newly_added = !self.want.contains_key(&edge);
        if newly_added {
            self.want.insert(edge, Want::Nothing);
        }
        let want = *self.want.get(&edge).unwrap();

        // During a dyndep walk an already-admitted edge is left alone; it
        // will be re-examined when it finishes.
        if dyndep_walk.is_some() && want == Want::ToFinish {
            return Ok(false);
        }

        if graph.node(node).dirty && want == Want::Nothing {
            self.want.insert(edge, Want::ToStart);
            self.edge_wanted(graph, edge);
            if dyndep_walk.is_none() && graph.all_inputs_ready(edge) {
                self.schedule_work(graph, edge);
            }
        }

        if let Some(walk) = dyndep_walk.as_deref_mut() {
            walk.insert(edge);
        }

        if !newly_added {
            return Ok(true);
        }

        for i in 0..graph.edge(edge).ins.len() {
            let input = graph.edge(edge).ins[i];
            self.add_sub_target(graph, input, Some(node), dyndep_walk.as_deref_mut())?;
        }
        Ok(true)
    }

    fn edge_wanted(&mut self, graph: &Graph, edge: EdgeId) {
        self.wanted_edges += 1;
        if !graph.edge(edge).is_phony() {
            self.command_edges += 1;
        }
    }

    /// Queue a wanted edge whose inputs are satisfied.  Pool capacity is
    /// accounted later, when find_work admits it.
    fn schedule_work(&mut self, graph: &Graph, edge: EdgeId) {
        if self.ready.contains(&edge) || graph.pool(graph.edge(edge).pool).delays(edge) {
            return;
        }
        self.ready.insert(edge);
    }

    /// Pop an edge eligible to run.  Edges whose pool is full are parked in
    /// the pool's delayed queue; a later slot release re-promotes them.
    pub fn find_work(&mut self, graph: &mut Graph) -> Option<EdgeId> {
        while let Some(&edge) = self.ready.iter().next() {
            self.ready.remove(&edge);
            // Restat cancellation may have unwanted the edge after it was
            // queued.
            if self.want_for(edge) != Some(Want::ToStart) {
                continue;
            }
            let pool = graph.edge(edge).pool;
            if graph.pool(pool).should_delay() {
                graph.pool_mut(pool).delay_edge(edge);
                continue;
            }
            graph.pool_mut(pool).edge_scheduled();
            self.want.insert(edge, Want::ToFinish);
            return Some(edge);
        }
        None
    }

    /// Mark an edge as done (successfully or not): release its pool slot,
    /// and on success propagate readiness to dependents.
    pub fn edge_finished(
        &mut self,
        scan: &mut DepScan,
        edge: EdgeId,
        result: EdgeResult,
    ) -> anyhow::Result<()> {
        let want = self.want_for(edge).expect("finished edge must be in plan");

        // Free the pool slot and promote one delayed edge.
        if want == Want::ToFinish {
            let pool = scan.graph.edge(edge).pool;
            scan.graph.pool_mut(pool).edge_finished();
            if let Some(delayed) = scan.graph.pool_mut(pool).pop_delayed() {
                self.ready.insert(delayed);
            }
        }

        if result != EdgeResult::Succeeded {
            // Outputs stay dirty; dependents stay wanted, so the builder
            // can report it cannot make progress.
            return Ok(());
        }

        if want != Want::Nothing {
            self.wanted_edges -= 1;
        }
        self.want.remove(&edge);
        scan.graph.edge_mut(edge).outputs_ready = true;

        for i in 0..scan.graph.edge(edge).outs.len() {
            let out = scan.graph.edge(edge).outs[i];
            self.node_finished(scan, out)?;
        }
        Ok(())
    }

    fn node_finished(&mut self, scan: &mut DepScan, node: NodeId) -> anyhow::Result<()> {
        // If this node provides dyndep info, load it now.
        if scan.graph.node(node).dyndep_pending {
            let ddf = scan.load_dyndeps(node)?;
            self.dyndeps_loaded(scan, node, &ddf)?;
        }

        for oe in scan.graph.node(node).out_edges.clone() {
            if !self.want.contains_key(&oe) {
                continue;
            }
            self.edge_maybe_ready(scan, oe)?;
        }
        Ok(())
    }

    fn edge_maybe_ready(&mut self, scan: &mut DepScan, edge: EdgeId) -> anyhow::Result<()> {
        if !scan.graph.all_inputs_ready(edge) {
            return Ok(());
        }
        match self.want_for(edge) {
            Some(Want::ToStart) => self.schedule_work(scan.graph, edge),
            Some(Want::Nothing) => {
                // We don't need to run this edge, but a dependent may need
                // one of its outputs; mark it done.
                self.edge_finished(scan, edge, EdgeResult::Succeeded)?;
            }
            // Already running, or unknown.
            _ => {}
        }
        Ok(())
    }

    /// A restat rule left `node` unchanged: propagate the clean state
    /// through dependents, dropping edges from the plan when none of their
    /// inputs remain dirty.
    pub fn clean_node(&mut self, scan: &mut DepScan, node: NodeId) -> anyhow::Result<()> {
        scan.graph.node_mut(node).dirty = false;

        for oe in scan.graph.node(node).out_edges.clone() {
            let want = match self.want_for(oe) {
                None | Some(Want::Nothing) => continue,
                Some(want) => want,
            };
            // Don't cancel an edge whose dep info still needs regenerating.
            if scan.graph.edge(oe).deps_missing {
                continue;
            }
            let all_inputs_clean = scan
                .graph
                .edge(oe)
                .dirtying_ins()
                .iter()
                .all(|&input| !scan.graph.node(input).dirty);
            if !all_inputs_clean {
                continue;
            }

            let most_recent_input = {
                let mut best: Option<NodeId> = None;
                for &input in scan.graph.edge(oe).dirtying_ins() {
                    let mtime = scan.graph.node(input).mtime_or_missing();
                    if best.map_or(true, |b| mtime > scan.graph.node(b).mtime_or_missing()) {
                        best = Some(input);
                    }
                }
                best
            };
            if !scan.recompute_outputs_dirty(oe, most_recent_input) {
                debug_assert_eq!(want, Want::ToStart, "cannot cancel a running edge");
                for out in scan.graph.edge(oe).outs.clone() {
                    self.clean_node(scan, out)?;
                }
                self.want.insert(oe, Want::Nothing);
                self.wanted_edges -= 1;
                if !scan.graph.edge(oe).is_phony() {
                    self.command_edges -= 1;
                }
            }
        }
        Ok(())
    }

    /// Account for graph changes made by a freshly loaded dyndep file:
    /// recompute dirtiness downstream of `node`, pull newly discovered
    /// inputs into the plan, and re-check readiness of affected edges.
    pub fn dyndeps_loaded(
        &mut self,
        scan: &mut DepScan,
        node: NodeId,
        ddf: &DyndepFile,
    ) -> anyhow::Result<()> {
        self.refresh_dyndep_dependents(scan, node)?;

        // Walk the edges with new dyndep info that something in the plan
        // already depends on.
        let mut roots: Vec<EdgeId> = Vec::new();
        for &edge in ddf.keys() {
            if scan.graph.edge(edge).outputs_ready {
                continue;
            }
            if !self.want.contains_key(&edge) {
                continue;
            }
            roots.push(edge);
        }

        let mut dyndep_walk: HashSet<EdgeId> = HashSet::new();
        for edge in roots {
            let dependent = scan.graph.edge(edge).outs[0];
            for input in ddf[&edge].implicit_ins.clone() {
                self.add_sub_target(scan.graph, input, Some(dependent), Some(&mut dyndep_walk))?;
            }
        }

        // See if any part of the walked subgraph is now ready.
        for edge in dyndep_walk {
            if !self.want.contains_key(&edge) {
                continue;
            }
            self.edge_maybe_ready(scan, edge)?;
        }
        Ok(())
    }

    /// Rescan everything downstream of a dyndep node: new inputs/outputs
    /// may have made edges dirty that weren't before.
    fn refresh_dyndep_dependents(
        &mut self,
        scan: &mut DepScan,
        node: NodeId,
    ) -> anyhow::Result<()> {
        // Clear the visit marks so the dependents get rescanned.
        let mut dependents: HashSet<NodeId> = HashSet::new();
        self.unmark_dependents(scan.graph, node, &mut dependents);

        for &dependent in &dependents {
            scan.recompute_dirty(dependent)?;
            if !scan.graph.node(dependent).dirty {
                continue;
            }
            let edge = scan
                .graph
                .node(dependent)
                .in_edge
                .expect("a dyndep dependent must be generated");
            debug_assert!(!scan.graph.edge(edge).outputs_ready);
            let want = self
                .want_for(edge)
                .expect("dyndep dependents were already walked");
            if want == Want::Nothing {
                self.want.insert(edge, Want::ToStart);
                self.edge_wanted(scan.graph, edge);
            }
        }
        Ok(())
    }

    fn unmark_dependents(&self, graph: &mut Graph, node: NodeId, dependents: &mut HashSet<NodeId>) {
        for oe in graph.node(node).out_edges.clone() {
            if !self.want.contains_key(&oe) {
                continue;
            }
            if graph.edge(oe).mark == crate::graph::VisitMark::None {
                continue;
            }
            graph.edge_mut(oe).mark = crate::graph::VisitMark::None;
            for out in graph.edge(oe).outs.clone() {
                if dependents.insert(out) {
                    self.unmark_dependents(graph, out, dependents);
                }
            }
        }
    }
}
