//! src/runner.rs
//! The boundary where gbs hands control to external programs.

use std::ffi::OsStr;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};

use nix::libc::c_int;
use nix::sys::signal::{signal, SigHandler, Signal};
use tracing::debug;

use crate::errors::{GbsError, Result};

/// Human readable rendering of a command line for logs.
pub fn describe(cmd: &Command) -> String {
    std::iter::once(cmd.get_program())
        .chain(cmd.get_args())
        .map(OsStr::to_string_lossy)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Runs `cmd` with inherited stdio and waits for it.
pub fn run(cmd: &mut Command) -> Result<ExitStatus> {
    let shown = describe(cmd);
    run_as(cmd, &shown)
}

/// Like [`run`], logging `shown` instead of the real command line.
pub fn run_as(cmd: &mut Command, shown: &str) -> Result<ExitStatus> {
    debug!("running command: {}", shown);
    cmd.status()
        .map_err(|e| GbsError::ExternalTool(format!("failed to run {}: {}", cmd.get_program().to_string_lossy(), e)))
}

extern "C" fn ignore_interrupt(_: c_int) {}

/// Like [`run_as`], but a Ctrl-C only reaches the child; gbs survives to report
/// it. The handler is reset to default in the child by exec.
pub fn run_interruptible(cmd: &mut Command, shown: &str) -> Result<ExitStatus> {
    // SAFETY: the handler does nothing and is restored before returning.
    let previous = unsafe { signal(Signal::SIGINT, SigHandler::Handler(ignore_interrupt)) }.ok();
    let status = run_as(cmd, shown);
    if let Some(handler) = previous {
        // SAFETY: reinstalls the handler that was active before.
        let _ = unsafe { signal(Signal::SIGINT, handler) };
    }
    status
}

pub fn interrupted(status: &ExitStatus) -> bool {
    status.signal() == Some(Signal::SIGINT as i32)
}

/// Captured stdout of a command; empty when it cannot be run.
pub fn outs<I, S>(program: &str, args: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(program);
    cmd.args(args).stderr(Stdio::null());
    debug!("capturing output of: {}", describe(&cmd));
    match cmd.output() {
        Ok(out) => String::from_utf8_lossy(&out.stdout).into_owned(),
        Err(e) => {
            debug!("{} could not be run: {}", program, e);
            String::new()
        }
    }
}

pub fn find_binary(name: &str) -> Option<PathBuf> {
    which::which(name).ok()
}

pub fn is_root() -> bool {
    nix::unistd::geteuid().is_root()
}
