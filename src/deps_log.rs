//! The persistent dependency log: per output, the implicit inputs a command
//! was discovered to read (think header files), and the output's mtime when
//! they were recorded.
//!
//! The on-disk shape is the ninja binary format: a magic line plus version,
//! then length-prefixed little-endian records.  The high bit of a record's
//! size word distinguishes the two kinds:
//!
//!   path record:  path bytes (NUL-padded to 4) | u32 checksum (= !id)
//!   deps record:  u32 out_id | u64 mtime | u32 in_ids[]
//!
//! A path's id is its position in the file, so the file is both a string
//! table and a dependency store.  Appends are a single write each; damaged
//! tails are truncated away on load.

use std::collections::HashMap;
use std::fs;
use std::io::Write;

use anyhow::{anyhow, bail};

use crate::graph::{Graph, MTime, NodeId};

const DEPS_MAGIC: &[u8] = b"# ninjadeps\n";
const DEPS_VERSION: u32 = 4;
const MAX_RECORD_SIZE: usize = 1 << 19;

/// Recompact when the file holds this many dead records per live one.
const COMPACTION_RATIO: usize = 3;
const MIN_COMPACTION_RECORDS: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deps {
    pub mtime: MTime,
    pub ins: Vec<NodeId>,
}

#[derive(Default)]
pub struct DepsLog {
    /// Log id -> node, in file order.
    nodes: Vec<NodeId>,
    ids: HashMap<NodeId, u32>,
    deps: HashMap<NodeId, Deps>,
    file: Option<fs::File>,
    needs_recompaction: bool,
}

fn read_u32(buf: &[u8], ofs: usize) -> u32 {
    u32::from_le_bytes(buf[ofs..ofs + 4].try_into().unwrap())
}

fn read_u64(buf: &[u8], ofs: usize) -> u64 {
    u64::from_le_bytes(buf[ofs..ofs + 8].try_into().unwrap())
}

impl DepsLog {
    pub fn new() -> DepsLog {
        DepsLog::default()
    }

    /// Read a deps log into memory, interning every path into the graph.
    /// A damaged tail is truncated away; returns a warning message when the
    /// file couldn't be used as-is.
    pub fn load(&mut self, path: &str, graph: &mut Graph) -> anyhow::Result<Option<String>> {
        let buf = match fs::read(path) {
            Ok(buf) => buf,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => bail!("read {}: {}", path, err),
        };

        let header_len = DEPS_MAGIC.len() + 4;
        if buf.len() < header_len
            || &buf[..DEPS_MAGIC.len()] != DEPS_MAGIC
            || read_u32(&buf, DEPS_MAGIC.len()) != DEPS_VERSION
        {
            let _ = fs::remove_file(path);
            return Ok(Some("deps log version changed; starting over".to_string()));
        }

        let mut total_records = 0usize;
        let mut ofs = header_len;
        let truncated_at = loop {
            if ofs + 4 > buf.len() {
                break if ofs == buf.len() { None } else { Some(ofs) };
            }
            let size_word = read_u32(&buf, ofs);
            let is_deps = size_word & 0x8000_0000 != 0;
            let size = (size_word & 0x7FFF_FFFF) as usize;
            if size > MAX_RECORD_SIZE || ofs + 4 + size > buf.len() {
                break Some(ofs);
            }
            let payload = &buf[ofs + 4..ofs + 4 + size];

            if is_deps {
                if size < 12 || size % 4 != 0 {
                    break Some(ofs);
                }
                let out_id = read_u32(payload, 0) as usize;
                let mtime = MTime::from_nanos(read_u64(payload, 4));
                if out_id >= self.nodes.len() {
                    break Some(ofs);
                }
                let mut ins = Vec::with_capacity((size - 12) / 4);
                let mut bad_id = false;
                for in_ofs in (12..size).step_by(4) {
                    let in_id = read_u32(payload, in_ofs) as usize;
                    if in_id >= self.nodes.len() {
                        bad_id = true;
                        break;
                    }
                    ins.push(self.nodes[in_id]);
                }
                if bad_id {
                    break Some(ofs);
                }
                total_records += 1;
                self.deps.insert(self.nodes[out_id], Deps { mtime, ins });
            } else {
                if size < 4 {
                    break Some(ofs);
                }
                let checksum = read_u32(payload, size - 4);
                let expected_id = self.nodes.len() as u32;
                if checksum != !expected_id {
                    break Some(ofs);
                }
                let mut path_bytes = &payload[..size - 4];
                while let [rest @ .., 0] = path_bytes {
                    path_bytes = rest;
                }
                let path = String::from_utf8_lossy(path_bytes);
                let node = graph.node_id(&path);
                if self.ids.contains_key(&node) {
                    break Some(ofs);
                }
                self.ids.insert(node, expected_id);
                self.nodes.push(node);
            }
            ofs += 4 + size;
        };

        if let Some(at) = truncated_at {
            // Chop off the damaged tail so the next append lands cleanly.
            let file = fs::OpenOptions::new().write(true).open(path)?;
            file.set_len(at as u64)?;
            return Ok(Some("premature end of file; recovering".to_string()));
        }

        if total_records > MIN_COMPACTION_RECORDS
            && total_records > self.deps.len() * COMPACTION_RATIO
        {
            self.needs_recompaction = true;
        }

        Ok(None)
    }

    pub fn lookup(&self, output: NodeId) -> Option<&Deps> {
        self.deps.get(&output)
    }

    pub fn open_for_write(
        &mut self,
        path: &str,
        graph: &Graph,
        is_live: impl Fn(NodeId) -> bool,
    ) -> anyhow::Result<()> {
        if self.needs_recompaction {
            self.recompact(path, graph, &is_live)?;
        }
        let mut file = fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)
            .map_err(|err| anyhow!("opening deps log: {}", err))?;
        if file.metadata()?.len() == 0 {
            let mut header = DEPS_MAGIC.to_vec();
            header.extend_from_slice(&DEPS_VERSION.to_le_bytes());
            file.write_all(&header)?;
        }
        self.file = Some(file);
        Ok(())
    }

    /// Record the discovered inputs for an output.  Unchanged entries are
    /// not rewritten.
    pub fn record_deps(
        &mut self,
        graph: &Graph,
        output: NodeId,
        mtime: MTime,
        ins: &[NodeId],
    ) -> anyhow::Result<()> {
        if let Some(existing) = self.deps.get(&output) {
            if existing.mtime == mtime && existing.ins == ins {
                return Ok(());
            }
        }

        let out_id = self.ensure_id(graph, output)?;
        let mut in_ids = Vec::with_capacity(ins.len());
        for &input in ins {
            in_ids.push(self.ensure_id(graph, input)?);
        }

        let size = 4 + 8 + 4 * in_ids.len();
        let mut record = Vec::with_capacity(4 + size);
        record.extend_from_slice(&(size as u32 | 0x8000_0000).to_le_bytes());
        record.extend_from_slice(&out_id.to_le_bytes());
        record.extend_from_slice(&mtime.nanos().to_le_bytes());
        for in_id in in_ids {
            record.extend_from_slice(&in_id.to_le_bytes());
        }
        if let Some(file) = &mut self.file {
            file.write_all(&record)
                .map_err(|err| anyhow!("writing deps log: {}", err))?;
        }

        self.deps.insert(
            output,
            Deps {
                mtime,
                ins: ins.to_vec(),
            },
        );
        Ok(())
    }

    fn ensure_id(&mut self, graph: &Graph, node: NodeId) -> anyhow::Result<u32> {
        if let Some(&id) = self.ids.get(&node) {
            return Ok(id);
        }
        let id = self.nodes.len() as u32;
        let name = graph.node(node).name.as_bytes();
        let padding = (4 - name.len() % 4) % 4;
        let size = name.len() + padding + 4;
        if size > MAX_RECORD_SIZE {
            bail!("path too long: {}", graph.node(node).name);
        }
        let mut record = Vec::with_capacity(4 + size);
        record.extend_from_slice(&(size as u32).to_le_bytes());
        record.extend_from_slice(name);
        record.extend_from_slice(&b"\0\0\0"[..padding]);
        record.extend_from_slice(&(!id).to_le_bytes());
        if let Some(file) = &mut self.file {
            file.write_all(&record)
                .map_err(|err| anyhow!("writing deps log: {}", err))?;
        }
        self.ids.insert(node, id);
        self.nodes.push(node);
        Ok(id)
    }

    pub fn close(&mut self) {
        self.file = None;
    }

    /// Rewrite the file keeping only live outputs, renumbering ids densely,
    /// and rename it into place.
    pub fn recompact(
        &mut self,
        path: &str,
        graph: &Graph,
        is_live: impl Fn(NodeId) -> bool,
    ) -> anyhow::Result<()> {
        let temp_path = format!("{}.recompact", path);
        let mut fresh = DepsLog::new();
        let file = fs::File::create(&temp_path)
            .map_err(|err| anyhow!("opening {}: {}", temp_path, err))?;
        fresh.file = Some(file);
        if let Some(file) = &mut fresh.file {
            let mut header = DEPS_MAGIC.to_vec();
            header.extend_from_slice(&DEPS_VERSION.to_le_bytes());
            file.write_all(&header)?;
        }

        let mut outputs: Vec<NodeId> = self.deps.keys().copied().collect();
        outputs.sort();
        for output in outputs {
            if !is_live(output) {
                continue;
            }
            let deps = self.deps[&output].clone();
            fresh.record_deps(graph, output, deps.mtime, &deps.ins)?;
        }
        fresh.close();
        fs::rename(&temp_path, path).map_err(|err| anyhow!("rename {}: {}", temp_path, err))?;
        fresh.needs_recompaction = false;
        *self = fresh;
        Ok(())
    }
}
