//! Implements run_command on posix using posix_spawn.
//!
//! We don't use Rust's process spawning because we want to feed both stdout
//! and stderr of the child into one pipe, which the std::process API cannot
//! express, and console-pool commands must inherit the terminal untouched.

use std::io::{Read, Write};
use std::os::fd::FromRawFd;
use std::os::unix::process::ExitStatusExt;

use crate::process::Termination;

fn check_posix(func: &str, ret: libc::c_int) -> anyhow::Result<()> {
    if ret < 0 {
        let err_str = unsafe { std::ffi::CStr::from_ptr(libc::strerror(ret)) };
        anyhow::bail!("{}: {}", func, err_str.to_str().unwrap_or("unknown error"));
    }
    Ok(())
}

/// Wraps libc::posix_spawn_file_actions_t, in particular to implement Drop.
struct PosixSpawnFileActions(libc::posix_spawn_file_actions_t);

impl PosixSpawnFileActions {
    fn new() -> anyhow::Result<Self> {
        unsafe {
            let mut actions: libc::posix_spawn_file_actions_t = std::mem::zeroed();
            check_posix(
                "posix_spawn_file_actions_init",
                libc::posix_spawn_file_actions_init(&mut actions),
            )?;
            Ok(Self(actions))
        }
    }

    fn as_ptr(&mut self) -> *mut libc::posix_spawn_file_actions_t {
        &mut self.0
    }

    fn adddup2(&mut self, fd: i32, newfd: i32) -> anyhow::Result<()> {
        unsafe {
            check_posix(
                "posix_spawn_file_actions_adddup2",
                libc::posix_spawn_file_actions_adddup2(&mut self.0, fd, newfd),
            )
        }
    }

    fn addclose(&mut self, fd: i32) -> anyhow::Result<()> {
        unsafe {
            check_posix(
                "posix_spawn_file_actions_addclose",
                libc::posix_spawn_file_actions_addclose(&mut self.0, fd),
            )
        }
    }
}

impl Drop for PosixSpawnFileActions {
    fn drop(&mut self) {
        unsafe { libc::posix_spawn_file_actions_destroy(&mut self.0) };
    }
}

fn spawn(
    cmdline: &str,
    actions: &mut PosixSpawnFileActions,
) -> anyhow::Result<libc::pid_t> {
    unsafe {
        let mut pid: libc::pid_t = 0;
        let path = "/bin/sh\0".as_ptr() as *const libc::c_char;
        let cmdline_nul = std::ffi::CString::new(cmdline)?;
        let argv: [*const libc::c_char; 4] = [
            path,
            "-c\0".as_ptr() as *const libc::c_char,
            cmdline_nul.as_ptr(),
            std::ptr::null(),
        ];

        // Unlike most posix calls, posix_spawn reports failure through a
        // positive return value rather than errno.
        let ret = libc::posix_spawn(
            &mut pid,
            path,
            actions.as_ptr(),
            std::ptr::null(),
            argv.as_ptr() as *const *mut libc::c_char,
            std::ptr::null(),
        );
        if ret != 0 {
            let err_str = std::ffi::CStr::from_ptr(libc::strerror(ret));
            anyhow::bail!("posix_spawn: {}", err_str.to_str().unwrap_or("unknown error"));
        }
        Ok(pid)
    }
}

fn wait_termination(pid: libc::pid_t, output: &mut Vec<u8>) -> anyhow::Result<Termination> {
    let status = unsafe {
        let mut status: i32 = 0;
        check_posix("waitpid", libc::waitpid(pid, &mut status, 0))?;
        std::process::ExitStatus::from_raw(status)
    };

    let mut termination = Termination::Success;
    if !status.success() {
        termination = Termination::Failure;
        if let Some(sig) = status.signal() {
            match sig {
                libc::SIGINT => {
                    write!(output, "interrupted").unwrap();
                    termination = Termination::Interrupted;
                }
                _ => write!(output, "signal {}", sig).unwrap(),
            }
        }
    }
    Ok(termination)
}

pub fn run_command(cmdline: &str, console: bool) -> anyhow::Result<(Termination, Vec<u8>)> {
    if console {
        // Console commands own the terminal: no redirection, no capture.
        let mut actions = PosixSpawnFileActions::new()?;
        let pid = spawn(cmdline, &mut actions)?;
        let mut output = Vec::new();
        let termination = wait_termination(pid, &mut output)?;
        return Ok((termination, output));
    }

    // Spawn the subprocess with stdout and stderr redirected into one pipe.
    let (pid, mut pipe) = unsafe {
        let mut pipe: [libc::c_int; 2] = std::mem::zeroed();
        check_posix("pipe", libc::pipe(&mut pipe as *mut i32))?;

        let mut actions = PosixSpawnFileActions::new()?;
        // stdout/stderr => pipe
        actions.adddup2(pipe[1], 1)?;
        actions.adddup2(pipe[1], 2)?;
        // close pipe in child
        actions.addclose(pipe[0])?;
        actions.addclose(pipe[1])?;

        let pid = spawn(cmdline, &mut actions)?;

        check_posix("close", libc::close(pipe[1]))?;

        (pid, std::fs::File::from_raw_fd(pipe[0]))
    };

    let mut output = Vec::new();
    pipe.read_to_end(&mut output)?;

    let termination = wait_termination(pid, &mut output)?;
    Ok((termination, output))
}
