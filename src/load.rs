//! Loads build manifests into a Graph: evaluates variables, instantiates
//! rules into edges, and wires up pools, dyndep bindings, and defaults.

use std::borrow::Cow;
use std::path::Path;

use anyhow::{anyhow, bail};

use crate::canon::canon_path;
use crate::disk::DiskInterface;
use crate::eval::{Env, EvalString, Vars};
use crate::graph::{DepsType, Edge, Graph, NodeId, RspFile, DEFAULT_POOL};
use crate::parse::{self, Parser, Statement};
use crate::smallmap::SmallMap;

/// A rule as the loader stores it: unevaluated bindings, expanded per edge.
struct Rule {
    vars: SmallMap<String, EvalString<String>>,
}

/// The `$in`/`$out` specials and the build statement's own bindings; what a
/// rule binding may refer to besides globals.
struct EdgeLocals<'a> {
    build_vars: &'a SmallMap<&'a str, String>,
    in_str: String,
    in_newline: String,
    out_str: String,
}

impl Env for EdgeLocals<'_> {
    fn get_var(&self, var: &str) -> Option<Cow<str>> {
        match var {
            "in" => Some(Cow::Borrowed(self.in_str.as_str())),
            "in_newline" => Some(Cow::Borrowed(self.in_newline.as_str())),
            "out" => Some(Cow::Borrowed(self.out_str.as_str())),
            _ => self
                .build_vars
                .get(var)
                .map(|val| Cow::Borrowed(val.as_str())),
        }
    }
}

/// Full lookup scope for one edge's bindings: locals, then the rule's own
/// bindings (expanded against the locals), then globals.
struct EdgeScope<'a> {
    locals: EdgeLocals<'a>,
    rule: &'a Rule,
    globals: &'a Vars,
}

impl Env for EdgeScope<'_> {
    fn get_var(&self, var: &str) -> Option<Cow<str>> {
        if let Some(val) = self.locals.get_var(var) {
            return Some(val);
        }
        if let Some(binding) = self.rule.vars.get(var) {
            return Some(Cow::Owned(binding.evaluate(&[&self.locals, self.globals])));
        }
        self.globals.get_var(var)
    }
}

pub struct Loader {
    graph: Graph,
    vars: Vars,
    rules: SmallMap<String, Rule>,
}

impl Default for Loader {
    fn default() -> Loader {
        Loader::new()
    }
}

impl Loader {
    pub fn new() -> Loader {
        let mut rules = SmallMap::default();
        rules.insert(
            "phony".to_string(),
            Rule {
                vars: SmallMap::default(),
            },
        );
        Loader {
            graph: Graph::new(),
            vars: Vars::default(),
            rules,
        }
    }

    pub fn into_graph(self) -> Graph {
        self.graph
    }

    pub fn read_file(&mut self, disk: &dyn DiskInterface, path: &str) -> anyhow::Result<()> {
        let mut bytes = match disk.read_file(path)? {
            Some(bytes) => bytes,
            None => bail!("read {}: file not found", path),
        };
        bytes.push(0);
        self.parse(disk, path, &bytes)
    }

    pub fn parse_text(
        &mut self,
        disk: &dyn DiskInterface,
        filename: &str,
        text: &str,
    ) -> anyhow::Result<()> {
        let mut bytes = text.as_bytes().to_vec();
        bytes.push(0);
        self.parse(disk, filename, &bytes)
    }

    fn parse(
        &mut self,
        disk: &dyn DiskInterface,
        filename: &str,
        bytes: &[u8],
    ) -> anyhow::Result<()> {
        let mut parser = Parser::new(bytes);
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
                    let value = value.evaluate(&[&self.vars]);
                    self.vars.insert(name, value);
                }
                Statement::Rule(rule) => {
                    if self.rules.get(rule.name).is_some() {
                        bail!("duplicate rule '{}'", rule.name);
                    }
                    let mut vars = SmallMap::default();
                    for (name, value) in rule.vars.into_iter() {
                        vars.insert(name.to_string(), value.into_owned());
                    }
                    self.rules.insert(rule.name.to_string(), Rule { vars });
                }
                Statement::Pool(pool) => {
                    self.graph.add_pool(pool.name, pool.depth)?;
                }
                Statement::Default(paths) => {
                    for path in paths {
                        let name = canon_path(path.evaluate(&[&self.vars]));
                        let node = match self.graph.lookup_node(&name) {
                            Some(node) => node,
                            None => bail!("unknown target '{}'", name),
                        };
                        self.graph.defaults.push(node);
                    }
                }
                Statement::Include(path) => {
                    let path = path.evaluate(&[&self.vars]);
                    self.read_file(disk, &path)?;
                }
                Statement::Build(build) => self.add_build(build)?,
            }
        }
        Ok(())
    }

    fn add_build(&mut self, build: parse::Build) -> anyhow::Result<()> {
        if self.rules.get(build.rule).is_none() {
            bail!("unknown rule '{}'", build.rule);
        }
        if build.outs.is_empty() {
            bail!("expected at least one output for rule '{}'", build.rule);
        }
        let is_phony = build.rule == "phony";

        // Build-level bindings may refer to earlier ones and to globals.
        let mut build_vars: SmallMap<&str, String> = SmallMap::default();
        for (name, value) in build.vars.iter() {
            let value = value.evaluate(&[&build_vars, &self.vars]);
            build_vars.insert(*name, value);
        }

        let mut outs: Vec<NodeId> = Vec::new();
        for path in &build.outs {
            let name = canon_path(path.evaluate(&[&build_vars, &self.vars]));
            outs.push(self.graph.node_id(&name));
        }
        let mut ins: Vec<NodeId> = Vec::new();
        for path in &build.ins {
            let name = canon_path(path.evaluate(&[&build_vars, &self.vars]));
            ins.push(self.graph.node_id(&name));
        }

        let mut implicit_ins = build.implicit_ins;
        let mut order_only_ins = build.order_only_ins;
        if is_phony {
            // A phony that names itself as input ("build a: phony a") is an
            // old idiom for "always clean"; drop the self-reference.
            let mut filtered = Vec::with_capacity(ins.len());
            for (i, &input) in ins.iter().enumerate() {
                if outs.contains(&input) {
                    if i >= build.explicit_ins + build.implicit_ins {
                        order_only_ins -= 1;
                    } else if i >= build.explicit_ins {
                        implicit_ins -= 1;
                    }
                    continue;
                }
                filtered.push(input);
            }
            ins = filtered;
        }

        // The special variables expand to the explicit sections only.
        let join = |ids: &[NodeId], sep: &str| -> String {
            ids.iter()
                .map(|&id| self.graph.node(id).name.as_str())
                .collect::<Vec<_>>()
                .join(sep)
        };
        let explicit_ins = &ins[..ins.len().min(build.explicit_ins)];
        let scope = EdgeScope {
            locals: EdgeLocals {
                build_vars: &build_vars,
                in_str: join(explicit_ins, " "),
                in_newline: join(explicit_ins, "\n"),
                out_str: join(&outs[..build.explicit_outs], " "),
            },
            rule: self.rules.get(build.rule).unwrap(),
            globals: &self.vars,
        };
        let lookup = |name: &str| -> Option<String> {
            scope
                .get_var(name)
                .map(|val| val.into_owned())
                .filter(|val| !val.is_empty())
        };

        let cmdline = lookup("command");
        let desc = lookup("description");
        let depfile = lookup("depfile");
        let deps_type = match lookup("deps").as_deref() {
            None => None,
            Some("gcc") => Some(DepsType::Gcc),
            Some("msvc") => Some(DepsType::Msvc),
            Some(other) => bail!("unknown deps style '{}'", other),
        };
        let msvc_deps_prefix = lookup("msvc_deps_prefix");
        let restat = lookup("restat").is_some();
        let generator = lookup("generator").is_some();
        let rspfile = match (lookup("rspfile"), lookup("rspfile_content")) {
            (None, None) => None,
            (Some(path), Some(content)) => Some(RspFile { path, content }),
            _ => bail!("rspfile and rspfile_content need to be both specified"),
        };
        let pool = match lookup("pool") {
            None => DEFAULT_POOL,
            Some(name) => match self.graph.pool_named(&name) {
                Some(pool) => pool,
                None => bail!("unknown pool name '{}'", name),
            },
        };
        let dyndep_path = lookup("dyndep");

        if cmdline.is_none() && !is_phony {
            bail!("rule '{}' has no command", build.rule);
        }

        let dyndep = match dyndep_path {
            None => None,
            Some(path) => {
                let name = canon_path(path);
                let node = self.graph.node_id(&name);
                if !ins.contains(&node) {
                    bail!("dyndep '{}' is not an input", name);
                }
                Some(node)
            }
        };

        let edge = Edge {
            ins,
            implicit_ins,
            order_only_ins,
            implicit_outs: build.outs.len() - build.explicit_outs,
            outs,
            cmdline,
            desc,
            depfile,
            deps_type,
            msvc_deps_prefix,
            rspfile,
            restat,
            generator,
            pool,
            dyndep,
            ..Edge::default()
        };
        self.graph.add_edge(edge)?;
        Ok(())
    }
}

/// Read the manifest at `build_filename` and everything it includes.
pub fn read(disk: &dyn DiskInterface, build_filename: &str) -> anyhow::Result<Graph> {
    let mut loader = Loader::new();
    loader.read_file(disk, build_filename)?;
    Ok(loader.into_graph())
}
