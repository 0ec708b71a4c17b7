//! Dynamic dependency files: late-binding declarations that add implicit
//! inputs and outputs to edges already in the graph.
//!
//! A dyndep file looks like:
//! ```text
//! ninja_dyndep_version = 1
//! build out | extra.out: dyndep | extra.in
//!   restat = 1
//! ```

use std::collections::HashMap;
use std::path::Path;

use anyhow::{anyhow, bail};

use crate::canon::canon_path;
use crate::disk::DiskInterface;
use crate::eval::{EvalString, Vars};
use crate::graph::{EdgeId, Graph, NodeId};
use crate::parse::{Parser, Statement};

/// What a dyndep file declares for one edge.
#[derive(Debug)]
pub struct Dyndeps {
    pub implicit_ins: Vec<NodeId>,
    pub implicit_outs: Vec<NodeId>,
    pub restat: bool,
    used: bool,
}

/// The parsed contents of a dyndep file: edge -> additional dependencies.
pub type DyndepFile = HashMap<EdgeId, Dyndeps>;

/// Read and apply a node's dyndep file.  The graph is updated in place;
/// the parsed file is returned so the plan can walk the additions.
pub fn load_dyndeps(
    graph: &mut Graph,
    disk: &dyn DiskInterface,
    node: NodeId,
) -> anyhow::Result<DyndepFile> {
    graph.node_mut(node).dyndep_pending = false;

    let path = graph.node(node).name.clone();
    let mut bytes = match disk.read_file(&path)? {
        Some(bytes) => bytes,
        None => bail!("loading '{}': No such file or directory", path),
    };
    bytes.push(0);
    let mut ddf = parse(graph, &path, &bytes)?;

    // Update each edge that names this node as its dyndep binding.
    for out_edge in graph.node(node).out_edges.clone() {
        if graph.edge(out_edge).dyndep != Some(node) {
            continue;
        }
        let dyndeps = match ddf.get_mut(&out_edge) {
            Some(dyndeps) => dyndeps,
            None => bail!(
                "'{}' not mentioned in its dyndep file '{}'",
                graph.node(graph.edge(out_edge).outs[0]).name,
                path
            ),
        };
        dyndeps.used = true;
        update_edge(graph, out_edge, out_edge_dyndeps(&ddf, out_edge))?;
    }

    // Reject entries for edges that don't bind this file.
    for (&edge, dyndeps) in ddf.iter() {
        if !dyndeps.used {
            bail!(
                "dyndep file '{}' mentions output '{}' whose build statement does not have a dyndep binding for the file",
                path,
                graph.node(graph.edge(edge).outs[0]).name
            );
        }
    }

    Ok(ddf)
}

// Borrow helper: update_edge needs the Dyndeps by value while the map stays
// intact for the caller's walk.
fn out_edge_dyndeps(ddf: &DyndepFile, edge: EdgeId) -> (Vec<NodeId>, Vec<NodeId>, bool) {
    let dyndeps = &ddf[&edge];
    (
        dyndeps.implicit_ins.clone(),
        dyndeps.implicit_outs.clone(),
        dyndeps.restat,
    )
}

/// Splice one edge's dyndep-discovered inputs and outputs into the graph.
/// Output collisions are detected here, at load time.
fn update_edge(
    graph: &mut Graph,
    id: EdgeId,
    (implicit_ins, implicit_outs, restat): (Vec<NodeId>, Vec<NodeId>, bool),
) -> anyhow::Result<()> {
    if restat {
        graph.edge_mut(id).restat = true;
    }

    for &out in &implicit_outs {
        let node = graph.node_mut(out);
        if node.in_edge.is_some() {
            bail!("multiple rules generate {}", node.name);
        }
        node.in_edge = Some(id);
    }
    let edge = graph.edge_mut(id);
    edge.outs.extend_from_slice(&implicit_outs);
    edge.implicit_outs += implicit_outs.len();

    let pos = {
        let edge = graph.edge(id);
        edge.ins.len() - edge.order_only_ins
    };
    let edge = graph.edge_mut(id);
    for (i, &input) in implicit_ins.iter().enumerate() {
        edge.ins.insert(pos + i, input);
    }
    edge.implicit_ins += implicit_ins.len();
    for &input in &implicit_ins {
        graph.node_mut(input).out_edges.push(id);
    }

    Ok(())
}

fn eval_path(graph: &mut Graph, vars: &Vars, path: &EvalString<&str>) -> NodeId {
    graph.node_id(&canon_path(path.evaluate(&[vars])))
}

fn parse(graph: &mut Graph, filename: &str, bytes: &[u8]) -> anyhow::Result<DyndepFile> {
    let mut parser = Parser::new(bytes);
    let mut vars = Vars::default();
    let mut saw_version = false;
    let mut ddf = DyndepFile::new();
    loop {
        let stmt = match parser
            .read()
            .map_err(|err| anyhow!(parser.format_parse_error(Path::new(filename), err)))?
        {
            None => break,
            Some(stmt) => stmt,
        };
        match stmt {
            Statement::VarDef(name, value) => {
                let value = value.evaluate(&[&vars]);
                if name == "ninja_dyndep_version" {
                    if !matches!(value.as_str(), "1" | "1.0") {
                        bail!("unsupported 'ninja_dyndep_version = {}'", value);
                    }
                    saw_version = true;
                } else {
                    vars.insert(name, value);
                }
            }
            Statement::Build(build) => {
                if !saw_version {
                    bail!("expected 'ninja_dyndep_version = ...'");
                }
                if build.rule != "dyndep" {
                    bail!("expected build statement to use rule 'dyndep'");
                }
                if build.explicit_outs != 1 {
                    bail!("dyndep files must list exactly one explicit output");
                }
                if build.explicit_ins != 0 {
                    bail!("dyndep files must not list explicit inputs");
                }
                if build.order_only_ins != 0 {
                    bail!("dyndep files must not list order-only inputs");
                }
                let mut restat = false;
                for (name, value) in build.vars.iter() {
                    match *name {
                        "restat" => restat = !value.evaluate(&[&vars]).is_empty(),
                        name => bail!("unexpected variable {:?}", name),
                    }
                }

                let out = eval_path(graph, &vars, &build.outs[0]);
                let edge = match graph.node(out).in_edge {
                    Some(edge) => edge,
                    None => bail!("no build statement exists for '{}'", graph.node(out).name),
                };
                if ddf.contains_key(&edge) {
                    bail!("multiple statements for '{}'", graph.node(out).name);
                }
                let mut implicit_outs = Vec::new();
                for path in &build.outs[1..] {
                    implicit_outs.push(eval_path(graph, &vars, path));
                }
                let mut implicit_ins = Vec::new();
                for path in &build.ins {
                    implicit_ins.push(eval_path(graph, &vars, path));
                }
                ddf.insert(
                    edge,
                    Dyndeps {
                        implicit_ins,
                        implicit_outs,
                        restat,
                        used: false,
                    },
                );
            }
            _ => bail!("unexpected statement in dyndep file '{}'", filename),
        }
    }
    if !saw_version {
        bail!("expected 'ninja_dyndep_version = ...'");
    }
    Ok(ddf)
}
