//! Runs build commands, potentially in parallel, and reports completions.
//! Unaware of the build graph beyond edge ids; the builder owns all policy.

use std::collections::HashSet;
use std::sync::mpsc;

use crate::graph::EdgeId;
use crate::process::{self, Termination};

pub struct CommandResult {
    pub edge: EdgeId,
    pub termination: Termination,
    /// Combined stdout and stderr of the command.
    pub output: Vec<u8>,
}

/// Wraps running the build's subcommands, so tests can substitute an
/// implementation that never touches the system.
pub trait CommandRunner {
    fn can_run_more(&self) -> bool;
    fn start_command(&mut self, edge: EdgeId, cmdline: String, console: bool)
        -> anyhow::Result<()>;
    /// Block until some running command finishes.  None when nothing is
    /// running.
    fn wait_for_command(&mut self) -> Option<CommandResult>;
    /// Commands started but not yet waited on; used for cleanup.
    fn get_active_edges(&self) -> Vec<EdgeId>;
    /// Forget all running commands.  The children themselves are left to
    /// the operating system.
    fn abort(&mut self);
}

/// Executes commands as subprocesses, one waiter thread each, reporting
/// completions over a channel.
pub struct RealCommandRunner {
    parallelism: usize,
    max_load_average: f64,
    active: HashSet<EdgeId>,
    finished_send: mpsc::Sender<CommandResult>,
    finished_recv: mpsc::Receiver<CommandResult>,
}

impl RealCommandRunner {
    pub fn new(parallelism: usize, max_load_average: f64) -> RealCommandRunner {
        let (finished_send, finished_recv) = mpsc::channel();
        RealCommandRunner {
            parallelism,
            max_load_average,
            active: HashSet::new(),
            finished_send,
            finished_recv,
        }
    }
}

impl CommandRunner for RealCommandRunner {
    fn can_run_more(&self) -> bool {
        if self.active.len() >= self.parallelism {
            return false;
        }
        if self.max_load_average > 0.0 {
            if let Some(load) = load_average() {
                if load > self.max_load_average {
                    return false;
                }
            }
        }
        true
    }

    fn start_command(
        &mut self,
        edge: EdgeId,
        cmdline: String,
        console: bool,
    ) -> anyhow::Result<()> {
        self.active.insert(edge);
        let send = self.finished_send.clone();
        std::thread::spawn(move || {
            let (termination, output) =
                process::run_command(&cmdline, console).unwrap_or_else(|err| {
                    (Termination::Failure, err.to_string().into_bytes())
                });
            // The send only fails if the receiver is gone, i.e. shutdown.
            let _ = send.send(CommandResult {
                edge,
                termination,
                output,
            });
        });
        Ok(())
    }

    fn wait_for_command(&mut self) -> Option<CommandResult> {
        if self.active.is_empty() {
            return None;
        }
        match self.finished_recv.recv() {
            Ok(result) => {
                self.active.remove(&result.edge);
                Some(result)
            }
            Err(_) => None,
        }
    }

    fn get_active_edges(&self) -> Vec<EdgeId> {
        self.active.iter().copied().collect()
    }

    fn abort(&mut self) {
        self.active.clear();
    }
}

#[cfg(unix)]
fn load_average() -> Option<f64> {
    let mut avg: [f64; 3] = [0.0; 3];
    // Safety: getloadavg fills at most the requested number of samples.
    let rc = unsafe { libc::getloadavg(avg.as_mut_ptr(), 1) };
    if rc < 1 {
        return None;
    }
    Some(avg[0])
}

#[cfg(not(unix))]
fn load_average() -> Option<f64> {
    None
}
