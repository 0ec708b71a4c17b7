//! Shared helpers for unit tests: an in-memory filesystem, a command runner
//! that interprets a tiny command vocabulary, and manifest loading from
//! strings.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::collections::VecDeque;

use crate::disk::DiskInterface;
use crate::graph::{Edge, EdgeId, Graph, MTime};
use crate::load::Loader;
use crate::process::Termination;
use crate::runner::{CommandResult, CommandRunner};
use crate::status::Progress;

/// An in-memory filesystem whose clock ticks once per mutation, so tests
/// control mtime ordering exactly.
#[derive(Default)]
pub struct VirtualDisk {
    files: RefCell<HashMap<String, (MTime, Vec<u8>)>>,
    tick: Cell<u64>,
}

impl VirtualDisk {
    pub fn new() -> VirtualDisk {
        VirtualDisk::default()
    }

    fn next_tick(&self) -> MTime {
        self.tick.set(self.tick.get() + 1);
        MTime::Stamp(self.tick.get())
    }

    pub fn add_file(&self, path: &str, content: impl Into<Vec<u8>>) {
        let mtime = self.next_tick();
        self.files
            .borrow_mut()
            .insert(path.to_string(), (mtime, content.into()));
    }

    /// Bump a file's mtime, creating it if needed.
    pub fn touch(&self, path: &str) {
        let mtime = self.next_tick();
        let mut files = self.files.borrow_mut();
        let entry = files
            .entry(path.to_string())
            .or_insert_with(|| (MTime::Missing, Vec::new()));
        entry.0 = mtime;
    }

    pub fn remove(&self, path: &str) -> bool {
        self.files.borrow_mut().remove(path).is_some()
    }

    pub fn mtime(&self, path: &str) -> MTime {
        self.files
            .borrow()
            .get(path)
            .map(|(mtime, _)| *mtime)
            .unwrap_or(MTime::Missing)
    }

    pub fn exists(&self, path: &str) -> bool {
        self.files.borrow().contains_key(path)
    }

    pub fn content(&self, path: &str) -> Option<Vec<u8>> {
        self.files.borrow().get(path).map(|(_, c)| c.clone())
    }
}

impl DiskInterface for VirtualDisk {
    fn stat(&self, path: &str) -> anyhow::Result<MTime> {
        Ok(self.mtime(path))
    }

    fn read_file(&self, path: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.content(path))
    }

    fn write_file(&self, path: &str, contents: &str) -> anyhow::Result<()> {
        self.add_file(path, contents.as_bytes().to_vec());
        Ok(())
    }

    fn make_dirs(&self, _dir: &str) -> anyhow::Result<()> {
        Ok(())
    }

    fn remove_file(&self, path: &str) -> anyhow::Result<bool> {
        Ok(self.remove(path))
    }
}

/// Load a manifest from a string, panicking on parse errors.
pub fn load_manifest(text: &str) -> Graph {
    try_load_manifest(text).unwrap()
}

pub fn try_load_manifest(text: &str) -> anyhow::Result<Graph> {
    let disk = VirtualDisk::new();
    let mut loader = Loader::new();
    loader.parse_text(&disk, "build.ninja", text)?;
    Ok(loader.into_graph())
}

/// A command runner that interprets a tiny vocabulary against a
/// VirtualDisk:
///
///   true                 succeed without touching anything
///   touch PATH...        bump each path's mtime
///   cp SRC DST           copy a file
///   fail                 exit nonzero
///   interrupt            pretend the child died from SIGINT
///
/// Commands take effect when waited on, not when started, so tests see the
/// same interleaving the real runner produces.
pub struct FakeRunner<'a> {
    pub disk: &'a VirtualDisk,
    pub parallelism: usize,
    /// Every command ever started, in order.
    pub commands: Vec<String>,
    active: VecDeque<(EdgeId, String)>,
}

impl<'a> FakeRunner<'a> {
    pub fn new(disk: &'a VirtualDisk) -> FakeRunner<'a> {
        FakeRunner {
            disk,
            parallelism: 1,
            commands: Vec::new(),
            active: VecDeque::new(),
        }
    }

    pub fn with_parallelism(disk: &'a VirtualDisk, parallelism: usize) -> FakeRunner<'a> {
        FakeRunner {
            parallelism,
            ..FakeRunner::new(disk)
        }
    }

    fn interpret(&self, cmdline: &str) -> (Termination, Vec<u8>) {
        let mut words = cmdline.split_whitespace();
        match words.next() {
            Some("true") => (Termination::Success, Vec::new()),
            Some("touch") => {
                for path in words {
                    self.disk.touch(path);
                }
                (Termination::Success, Vec::new())
            }
            Some("cp") => {
                let src = words.next().expect("cp needs a source");
                let dst = words.next().expect("cp needs a destination");
                match self.disk.content(src) {
                    Some(content) => {
                        self.disk.add_file(dst, content);
                        (Termination::Success, Vec::new())
                    }
                    None => (
                        Termination::Failure,
                        format!("cp: {}: not found", src).into_bytes(),
                    ),
                }
            }
            Some("fail") => (Termination::Failure, b"boom\n".to_vec()),
            Some("interrupt") => (Termination::Interrupted, Vec::new()),
            other => panic!("fake runner got unknown command {:?}", other),
        }
    }
}

impl CommandRunner for FakeRunner<'_> {
    fn can_run_more(&self) -> bool {
        self.active.len() < self.parallelism
    }

    fn start_command(&mut self, edge: EdgeId, cmdline: String, _console: bool) -> anyhow::Result<()> {
        self.commands.push(cmdline.clone());
        self.active.push_back((edge, cmdline));
        Ok(())
    }

    fn wait_for_command(&mut self) -> Option<CommandResult> {
        let (edge, cmdline) = self.active.pop_front()?;
        let (termination, output) = self.interpret(&cmdline);
        Some(CommandResult {
            edge,
            termination,
            output,
        })
    }

    fn get_active_edges(&self) -> Vec<EdgeId> {
        self.active.iter().map(|&(edge, _)| edge).collect()
    }

    fn abort(&mut self) {
        self.active.clear();
    }
}

/// Progress sink that records counts and nothing else.
#[derive(Default)]
pub struct FakeProgress {
    pub started: usize,
    pub finished: usize,
    pub total: usize,
}

impl Progress for FakeProgress {
    fn plan_has_total_edges(&mut self, total: usize) {
        self.total = total;
    }

    fn build_started(&mut self) {}

    fn edge_started(&mut self, _id: EdgeId, _edge: &Edge) {
        self.started += 1;
    }

    fn edge_finished(
        &mut self,
        _id: EdgeId,
        _edge: &Edge,
        _success: bool,
        _output: &[u8],
    ) -> (i32, i32) {
        self.finished += 1;
        (0, self.finished as i32)
    }

    fn build_finished(&mut self) {}

    fn log(&mut self, _msg: &str) {}
}
