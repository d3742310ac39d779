//! src/cmd/chroot.rs
//! `gbs chroot`: opens a shell inside a build root prepared by `gbs build`.

use std::path::{Path, PathBuf};
use std::process::Command;

use clap::Args;
use tracing::debug;

use crate::errors::{GbsError, Result};
use crate::msger;
use crate::runner;

/// Prompt shown inside the build root.
const PROMPT: &str = r"(tizen-build-env)@\h \W]\$ ";

#[derive(Args, Debug, Clone)]
pub struct ChrootArgs {
    /// Path to the build root
    pub buildroot: PathBuf,

    /// Chroot as root instead of abuild
    #[arg(short = 'r', long = "root")]
    pub root: bool,
}

/// A build root created by depanneur.
pub struct ChrootEnv {
    root_path: PathBuf,
    elevate: bool,
}

impl ChrootEnv {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        ChrootEnv {
            root_path: path.as_ref().to_path_buf(),
            elevate: !runner::is_root(),
        }
    }

    fn command(&self, program: &str) -> Command {
        if self.elevate {
            let mut cmd = Command::new("sudo");
            cmd.arg(program);
            cmd
        } else {
            Command::new(program)
        }
    }

    /// depanneur leaves `not-ready` behind while it is still setting up.
    pub fn ensure_ready(&self) -> Result<()> {
        if self.root_path.join("not-ready").exists() {
            return Err(GbsError::ExternalTool(format!(
                "build root {} is not ready",
                self.root_path.display()
            )));
        }
        Ok(())
    }

    /// Copies the host DNS configuration in. Failure only warns.
    pub fn setup_resolv(&self) {
        let mut cmd = self.command("cp");
        cmd.arg("/etc/resolv.conf").arg(self.root_path.join("etc/resolv.conf"));
        match runner::run(&mut cmd) {
            Ok(status) if status.success() => {}
            Ok(status) => {
                debug!(%status, "copying resolv.conf failed");
                msger::warning("failed to setup /etc/resolv.conf");
            }
            Err(e) => {
                debug!("{}", e);
                msger::warning("failed to setup /etc/resolv.conf");
            }
        }
    }

    /// `chroot <root> su <user>` with the build prompt.
    pub fn shell_command(&self, user: &str) -> Command {
        let mut cmd = self.command("chroot");
        cmd.arg(&self.root_path).args(["su", user]).env("PS1", PROMPT);
        cmd
    }
}

pub fn run(args: &ChrootArgs) -> Result<()> {
    let env = ChrootEnv::new(&args.buildroot);
    env.ensure_ready()?;

    msger::info(format!("chroot {}", args.buildroot.display()));
    let user = if args.root { "root" } else { "abuild" };
    env.setup_resolv();

    let mut cmd = env.shell_command(user);
    let shown = runner::describe(&cmd);
    let status = runner::run_interruptible(&mut cmd, &shown).map_err(|e| {
        GbsError::ExternalTool(format!("failed to chroot to {}: {}", args.buildroot.display(), e))
    })?;
    if runner::interrupted(&status) {
        msger::info("keyboard interrupt ...");
    } else {
        // The shell reports whatever the last command inside returned.
        debug!(%status, "left build root");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn args_of(cmd: &Command) -> Vec<String> {
        cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn not_ready_marker_refuses_entry() {
        let root = tempfile::tempdir().unwrap();
        let env = ChrootEnv::new(root.path());
        assert!(env.ensure_ready().is_ok());

        fs::write(root.path().join("not-ready"), "").unwrap();
        let err = env.ensure_ready().unwrap_err();
        assert!(err.to_string().ends_with("is not ready"));
    }

    #[test]
    fn shell_runs_su_inside_the_root_with_prompt() {
        let env = ChrootEnv { root_path: PathBuf::from("/var/tmp/bob"), elevate: true };
        let cmd = env.shell_command("abuild");
        assert_eq!(cmd.get_program(), "sudo");
        assert_eq!(args_of(&cmd), vec!["chroot", "/var/tmp/bob", "su", "abuild"]);
        let ps1 = cmd.get_envs().find(|(k, _)| *k == "PS1").and_then(|(_, v)| v);
        assert_eq!(ps1.map(|v| v.to_string_lossy().into_owned()).as_deref(), Some(PROMPT));
    }

    #[test]
    fn root_user_skips_sudo() {
        let env = ChrootEnv { root_path: PathBuf::from("/srv/root"), elevate: false };
        let cmd = env.shell_command("root");
        assert_eq!(cmd.get_program(), "chroot");
        assert_eq!(args_of(&cmd), vec!["/srv/root", "su", "root"]);
    }
}
