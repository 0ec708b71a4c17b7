//! The build graph: nodes (files) and edges (the commands that produce
//! them), owned by a central arena and addressed by integer ids so the
//! node<->edge cycles are plain data.

use std::collections::HashMap;
use std::collections::VecDeque;

use anyhow::bail;

use crate::densemap::{self, DenseMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);
impl densemap::Index for NodeId {
    fn index(&self) -> usize {
        self.0
    }
}
impl From<usize> for NodeId {
    fn from(u: usize) -> NodeId {
        NodeId(u)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeId(usize);
impl densemap::Index for EdgeId {
    fn index(&self) -> usize {
        self.0
    }
}
impl From<usize> for EdgeId {
    fn from(u: usize) -> EdgeId {
        EdgeId(u)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolId(usize);
impl densemap::Index for PoolId {
    fn index(&self) -> usize {
        self.0
    }
}
impl From<usize> for PoolId {
    fn from(u: usize) -> PoolId {
        PoolId(u)
    }
}

/// The unnamed pool edges land in when they don't ask for one; unbounded.
pub const DEFAULT_POOL: PoolId = PoolId(0);
/// The predefined depth-1 pool whose single running edge owns the terminal.
pub const CONSOLE_POOL: PoolId = PoolId(1);

/// File modification time, as cached per invocation.  Missing orders before
/// any on-disk stamp, so "newest input" comparisons treat absent files
/// uniformly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MTime {
    Missing,
    /// Nanoseconds since the unix epoch; whatever resolution the platform
    /// delivers is preserved.
    Stamp(u64),
}

impl MTime {
    pub fn from_nanos(nanos: u64) -> MTime {
        if nanos == 0 {
            MTime::Missing
        } else {
            MTime::Stamp(nanos)
        }
    }

    pub fn nanos(&self) -> u64 {
        match self {
            MTime::Missing => 0,
            MTime::Stamp(n) => *n,
        }
    }
}

/// A file referenced by the graph: source, intermediate, or output.
/// Created on first reference and never freed.
#[derive(Debug)]
pub struct Node {
    pub name: String,
    /// The one edge producing this node, if any.
    pub in_edge: Option<EdgeId>,
    /// All edges consuming this node.
    pub out_edges: Vec<EdgeId>,
    /// stat() result, filled in lazily over the course of a build.
    pub mtime: Option<MTime>,
    pub dirty: bool,
    /// Set when some edge names this node in a dyndep binding and the file
    /// has not been loaded yet.
    pub dyndep_pending: bool,
}

impl Node {
    fn new(name: String) -> Node {
        Node {
            name,
            in_edge: None,
            out_edges: Vec::new(),
            mtime: None,
            dirty: false,
            dyndep_pending: false,
        }
    }

    pub fn exists(&self) -> bool {
        matches!(self.mtime, Some(MTime::Stamp(_)))
    }

    /// Whether stat() has run for this node this invocation.
    pub fn status_known(&self) -> bool {
        self.mtime.is_some()
    }

    pub fn mtime_or_missing(&self) -> MTime {
        self.mtime.unwrap_or(MTime::Missing)
    }
}

/// A named concurrency bucket.  Depth 0 means unbounded.
#[derive(Debug)]
pub struct Pool {
    pub name: String,
    pub depth: usize,
    current_use: usize,
    /// Edges admitted to the pool but waiting for a free slot.
    delayed: VecDeque<EdgeId>,
}

impl Pool {
    fn new(name: String, depth: usize) -> Pool {
        Pool {
            name,
            depth,
            current_use: 0,
            delayed: VecDeque::new(),
        }
    }

    pub fn should_delay(&self) -> bool {
        self.depth != 0 && self.current_use >= self.depth
    }

    pub fn edge_scheduled(&mut self) {
        if self.depth != 0 {
            self.current_use += 1;
            debug_assert!(self.current_use <= self.depth);
        }
    }

    pub fn edge_finished(&mut self) {
        if self.depth != 0 {
            debug_assert!(self.current_use > 0);
            self.current_use -= 1;
        }
    }

    pub fn current_use(&self) -> usize {
        self.current_use
    }

    pub fn delay_edge(&mut self, id: EdgeId) {
        self.delayed.push_back(id);
    }

    pub fn pop_delayed(&mut self) -> Option<EdgeId> {
        self.delayed.pop_front()
    }

    pub fn delays(&self, id: EdgeId) -> bool {
        self.delayed.contains(&id)
    }
}

/// Where an edge is in the current scan's depth-first walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitMark {
    None,
    InStack,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepsType {
    Gcc,
    Msvc,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RspFile {
    pub path: String,
    pub content: String,
}

/// A build statement: a command producing outputs from inputs.
#[derive(Debug)]
pub struct Edge {
    /// Inputs, ordered explicit then implicit then order-only.
    pub ins: Vec<NodeId>,
    pub implicit_ins: usize,
    pub order_only_ins: usize,
    /// Outputs, ordered explicit then implicit.
    pub outs: Vec<NodeId>,
    pub implicit_outs: usize,

    /// None for phony edges, which have nothing to run.
    pub cmdline: Option<String>,
    pub desc: Option<String>,
    pub depfile: Option<String>,
    pub deps_type: Option<DepsType>,
    pub msvc_deps_prefix: Option<String>,
    pub rspfile: Option<RspFile>,
    pub restat: bool,
    pub generator: bool,
    pub pool: PoolId,
    /// A node whose contents, once built, add inputs/outputs to this edge.
    pub dyndep: Option<NodeId>,

    pub outputs_ready: bool,
    pub deps_loaded: bool,
    pub deps_missing: bool,
    /// Phony edge synthesized to stand in for a depfile-discovered file.
    pub generated_by_dep_loader: bool,
    pub mark: VisitMark,
}

impl Default for Edge {
    fn default() -> Edge {
        Edge {
            ins: Vec::new(),
            implicit_ins: 0,
            order_only_ins: 0,
            outs: Vec::new(),
            implicit_outs: 0,
            cmdline: None,
            desc: None,
            depfile: None,
            deps_type: None,
            msvc_deps_prefix: None,
            rspfile: None,
            restat: false,
            generator: false,
            pool: DEFAULT_POOL,
            dyndep: None,
            outputs_ready: false,
            deps_loaded: false,
            deps_missing: false,
            generated_by_dep_loader: false,
            mark: VisitMark::None,
        }
    }
}

impl Edge {
    pub fn is_phony(&self) -> bool {
        self.cmdline.is_none()
    }

    /// The inputs whose changes make this edge stale: explicit and implicit,
    /// but not order-only.
    pub fn dirtying_ins(&self) -> &[NodeId] {
        &self.ins[..self.ins.len() - self.order_only_ins]
    }

    pub fn order_only_ins(&self) -> &[NodeId] {
        &self.ins[self.ins.len() - self.order_only_ins..]
    }

    pub fn explicit_ins(&self) -> &[NodeId] {
        &self.ins[..self.ins.len() - self.order_only_ins - self.implicit_ins]
    }

    pub fn is_order_only(&self, input_index: usize) -> bool {
        input_index >= self.ins.len() - self.order_only_ins
    }

    pub fn use_console(&self) -> bool {
        self.pool == CONSOLE_POOL
    }
}

/// The arena owning all nodes, edges, and pools.  All inter-object
/// relations are ids into these maps.
#[derive(Debug)]
pub struct Graph {
    pub nodes: DenseMap<NodeId, Node>,
    pub edges: DenseMap<EdgeId, Edge>,
    pub pools: DenseMap<PoolId, Pool>,
    node_by_name: HashMap<String, NodeId>,
    pool_by_name: HashMap<String, PoolId>,
    pub defaults: Vec<NodeId>,
}

impl Default for Graph {
    fn default() -> Graph {
        Graph::new()
    }
}

impl Graph {
    pub fn new() -> Graph {
        let mut pools = DenseMap::new();
        let mut pool_by_name = HashMap::new();
        let default = pools.push(Pool::new(String::new(), 0));
        debug_assert!(default == DEFAULT_POOL);
        pool_by_name.insert(String::new(), default);
        let console = pools.push(Pool::new("console".to_string(), 1));
        debug_assert!(console == CONSOLE_POOL);
        pool_by_name.insert("console".to_string(), console);
        Graph {
            nodes: DenseMap::new(),
            edges: DenseMap::new(),
            pools,
            node_by_name: HashMap::new(),
            pool_by_name,
            defaults: Vec::new(),
        }
    }

    /// Look up a node by (canonical) name, creating it on first reference.
    pub fn node_id(&mut self, name: &str) -> NodeId {
        if let Some(&id) = self.node_by_name.get(name) {
            return id;
        }
        let id = self.nodes.push(Node::new(name.to_string()));
        self.node_by_name.insert(name.to_string(), id);
        id
    }

    pub fn lookup_node(&self, name: &str) -> Option<NodeId> {
        self.node_by_name.get(name).copied()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        self.nodes.get_mut(id)
    }

    pub fn edge(&self, id: EdgeId) -> &Edge {
        self.edges.get(id)
    }

    pub fn edge_mut(&mut self, id: EdgeId) -> &mut Edge {
        self.edges.get_mut(id)
    }

    pub fn pool(&self, id: PoolId) -> &Pool {
        self.pools.get(id)
    }

    pub fn pool_mut(&mut self, id: PoolId) -> &mut Pool {
        self.pools.get_mut(id)
    }

    pub fn pool_named(&self, name: &str) -> Option<PoolId> {
        self.pool_by_name.get(name).copied()
    }

    pub fn add_pool(&mut self, name: &str, depth: usize) -> anyhow::Result<PoolId> {
        if self.pool_by_name.contains_key(name) {
            bail!("duplicate pool '{}'", name);
        }
        let id = self.pools.push(Pool::new(name.to_string(), depth));
        self.pool_by_name.insert(name.to_string(), id);
        Ok(id)
    }

    /// Install an edge, claiming its outputs and registering with its
    /// inputs.  Each output may be claimed by only one edge.
    pub fn add_edge(&mut self, edge: Edge) -> anyhow::Result<EdgeId> {
        let id = self.edges.next_id();
        for &out in &edge.outs {
            let node = self.nodes.get_mut(out);
            if node.in_edge.is_some() {
                bail!("multiple rules generate {}", node.name);
            }
            node.in_edge = Some(id);
        }
        for &input in &edge.ins {
            self.nodes.get_mut(input).out_edges.push(id);
        }
        if let Some(dyndep) = edge.dyndep {
            self.nodes.get_mut(dyndep).dyndep_pending = true;
        }
        self.edges.push(edge);
        Ok(id)
    }

    /// Append inputs discovered from a depfile or the deps log to an edge's
    /// implicit section, deduplicated against the inputs already present.
    pub fn insert_discovered_ins(&mut self, id: EdgeId, deps: &[NodeId]) {
        let edge = self.edges.get(id);
        // Dedup against the dirtying inputs only: a discovered dependency
        // that was merely order-only still needs to start mattering for
        // dirtiness.
        let mut fresh: Vec<NodeId> = Vec::new();
        for &dep in deps {
            if !edge.dirtying_ins().contains(&dep) && !fresh.contains(&dep) {
                fresh.push(dep);
            }
        }
        if fresh.is_empty() {
            return;
        }
        let edge = self.edges.get_mut(id);
        let pos = edge.ins.len() - edge.order_only_ins;
        for (i, &dep) in fresh.iter().enumerate() {
            edge.ins.insert(pos + i, dep);
        }
        edge.implicit_ins += fresh.len();
        for &dep in &fresh {
            self.nodes.get_mut(dep).out_edges.push(id);
        }
    }

    /// Give a discovered dependency with no producer a stand-in phony
    /// in-edge, so a reference to it doesn't abort the build with "no known
    /// rule" while its absence still reads as dirty.
    pub fn ensure_dep_loader_in_edge(&mut self, node: NodeId) {
        if self.nodes.get(node).in_edge.is_some() {
            return;
        }
        let edge = Edge {
            outs: vec![node],
            generated_by_dep_loader: true,
            ..Edge::default()
        };
        let id = self.edges.push(edge);
        self.nodes.get_mut(node).in_edge = Some(id);
    }

    /// True when every input of the edge has been produced (or needs no
    /// producing).
    pub fn all_inputs_ready(&self, id: EdgeId) -> bool {
        self.edges.get(id).ins.iter().all(|&input| {
            match self.nodes.get(input).in_edge {
                None => true,
                Some(in_edge) => self.edges.get(in_edge).outputs_ready,
            }
        })
    }

    /// Outputs that nothing consumes; the fallback build targets when the
    /// manifest names no defaults.
    pub fn root_nodes(&self) -> Vec<NodeId> {
        let mut roots = Vec::new();
        for edge in self.edges.values() {
            if edge.generated_by_dep_loader {
                continue;
            }
            for &out in &edge.outs {
                if self.nodes.get(out).out_edges.is_empty() {
                    roots.push(out);
                }
            }
        }
        roots
    }
}
