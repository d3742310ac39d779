//! src/emulator.rs
//! Makes sure a statically linked qemu user-mode emulator is registered with
//! the kernel's binfmt_misc facility before a foreign-architecture build.
//!
//! The registration is host-global: other gbs invocations may change it at
//! any time, so state is always re-read from the backend, never cached.
//! Concurrent dynamic-to-static transitions can race; no lock is taken.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use crate::errors::{GbsError, Result};
use crate::msger;
use crate::runner;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmulatorState {
    Unregistered,
    /// Interpreter is dynamically linked; it cannot resolve its libraries
    /// once inside the build root and must be replaced.
    RegisteredDynamic,
    RegisteredStatic,
}

/// binfmt_misc parameters for one emulated architecture family.
#[derive(Debug)]
pub struct EmulatorSpec {
    pub name: &'static str,
    /// Tried in order; the first statically linked one wins.
    pub candidates: &'static [&'static str],
    pub magic: &'static str,
    pub mask: &'static str,
}

pub const ARM: EmulatorSpec = EmulatorSpec {
    name: "arm",
    candidates: &["/usr/bin/qemu-arm", "/usr/bin/qemu-arm-static"],
    magic: r"\x7fELF\x01\x01\x01\x00\x00\x00\x00\x00\x00\x00\x00\x00\x02\x00\x28\x00",
    mask: r"\xff\xff\xff\xff\xff\xff\xff\x00\xff\xff\xff\xff\xff\xff\xff\xff\xfa\xff\xff\xff",
};

impl EmulatorSpec {
    /// Line written to `binfmt_misc/register`.
    pub fn rule(&self, interpreter: &Path) -> String {
        format!(":{}:M::{}:{}:{}:", self.name, self.magic, self.mask, interpreter.display())
    }
}

pub fn spec_for(arch: &str) -> Option<&'static EmulatorSpec> {
    if arch.starts_with("arm") {
        Some(&ARM)
    } else {
        None
    }
}

/// Access to the kernel registration. Swapped for a fake in tests.
pub trait BinfmtBackend {
    fn dispatch_mounted(&self) -> bool;
    fn mount_dispatch(&mut self) -> Result<()>;
    /// False for missing files as well as dynamic executables.
    fn is_static_binary(&self, path: &Path) -> bool;
    fn registered_interpreter(&self, name: &str) -> Option<PathBuf>;
    fn relax_security_policy(&mut self) -> Result<()>;
    fn unregister(&mut self, name: &str) -> Result<()>;
    fn register(&mut self, rule: &str) -> Result<()>;
}

impl<T: BinfmtBackend + ?Sized> BinfmtBackend for &mut T {
    fn dispatch_mounted(&self) -> bool {
        (**self).dispatch_mounted()
    }
    fn mount_dispatch(&mut self) -> Result<()> {
        (**self).mount_dispatch()
    }
    fn is_static_binary(&self, path: &Path) -> bool {
        (**self).is_static_binary(path)
    }
    fn registered_interpreter(&self, name: &str) -> Option<PathBuf> {
        (**self).registered_interpreter(name)
    }
    fn relax_security_policy(&mut self) -> Result<()> {
        (**self).relax_security_policy()
    }
    fn unregister(&mut self, name: &str) -> Result<()> {
        (**self).unregister(name)
    }
    fn register(&mut self, rule: &str) -> Result<()> {
        (**self).register(rule)
    }
}

pub struct EmulatorManager<B> {
    backend: B,
    spec: &'static EmulatorSpec,
}

impl<B: BinfmtBackend> EmulatorManager<B> {
    pub fn new(backend: B, spec: &'static EmulatorSpec) -> Self {
        EmulatorManager { backend, spec }
    }

    pub fn state(&self) -> EmulatorState {
        match self.backend.registered_interpreter(self.spec.name) {
            None => EmulatorState::Unregistered,
            Some(p) if self.backend.is_static_binary(&p) => EmulatorState::RegisteredStatic,
            Some(_) => EmulatorState::RegisteredDynamic,
        }
    }

    pub fn find_interpreter(&self) -> Result<PathBuf> {
        self.spec
            .candidates
            .iter()
            .map(PathBuf::from)
            .find(|p| self.backend.is_static_binary(p))
            .ok_or_else(|| GbsError::Emulator(format!("Please install a statically-linked qemu-{}", self.spec.name)))
    }

    /// Drives the registration to `RegisteredStatic` and returns the
    /// interpreter the kernel ends up using.
    pub fn ensure_registered(&mut self) -> Result<PathBuf> {
        if !self.backend.dispatch_mounted() {
            self.backend.mount_dispatch()?;
        }
        let interpreter = self.find_interpreter()?;

        if let Err(e) = self.backend.relax_security_policy() {
            msger::warning(format!("failed to disable selinux: {}", e));
        }

        let state = self.state();
        debug!(?state, interpreter = %interpreter.display(), "binfmt registration");
        let name = self.spec.name;
        let setup_failed = |e: GbsError| {
            debug!("binfmt write failed: {}", e);
            GbsError::Emulator(format!("failed to set up qemu {} environment", name))
        };
        match state {
            EmulatorState::RegisteredStatic => {
                return Ok(self.backend.registered_interpreter(name).unwrap_or(interpreter));
            }
            EmulatorState::RegisteredDynamic => self.backend.unregister(name).map_err(setup_failed)?,
            EmulatorState::Unregistered => {}
        }
        self.backend.register(&self.spec.rule(&interpreter)).map_err(setup_failed)?;
        Ok(interpreter)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

/// The real `/proc/sys/fs/binfmt_misc`, written through an elevated shell.
pub struct HostBinfmt {
    root: PathBuf,
    stage_dir: PathBuf,
    elevate: bool,
}

impl HostBinfmt {
    pub fn new(stage_dir: &Path) -> Self {
        HostBinfmt {
            root: PathBuf::from("/proc/sys/fs/binfmt_misc"),
            stage_dir: stage_dir.to_path_buf(),
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

    /// Writes `content` to `target` via a staged script run with elevated
    /// rights. The script is removed however the write ends.
    fn elevated_write(&self, content: &str, target: &Path) -> Result<()> {
        let failed = || GbsError::Emulator(format!("failed to write {}", target.display()));

        fs::create_dir_all(&self.stage_dir).map_err(|_| failed())?;
        let mut script = tempfile::Builder::new()
            .prefix("gbs-binfmt-")
            .suffix(".sh")
            .tempfile_in(&self.stage_dir)
            .map_err(|_| failed())?;
        writeln!(script, "printf '%s\\n' '{}' > {}", content, target.display()).map_err(|_| failed())?;
        script.flush().map_err(|_| failed())?;

        let mut cmd = self.command("sh");
        cmd.arg(script.path());
        let status = runner::run(&mut cmd).map_err(|_| failed())?;
        if !status.success() {
            return Err(failed());
        }
        Ok(())
    }
}

impl BinfmtBackend for HostBinfmt {
    fn dispatch_mounted(&self) -> bool {
        self.root.join("register").exists()
    }

    fn mount_dispatch(&mut self) -> Result<()> {
        let failed = |what: &str| GbsError::Emulator(format!("failed to {} binfmt_misc", what));
        if !self.root.exists() {
            let modprobe = runner::find_binary("modprobe").unwrap_or_else(|| PathBuf::from("/sbin/modprobe"));
            let mut cmd = self.command(&modprobe.to_string_lossy());
            cmd.arg("binfmt_misc");
            if !runner::run(&mut cmd)?.success() {
                return Err(failed("load"));
            }
        }
        if !self.dispatch_mounted() {
            let mount = runner::find_binary("mount").unwrap_or_else(|| PathBuf::from("/bin/mount"));
            let mut cmd = self.command(&mount.to_string_lossy());
            cmd.args(["-t", "binfmt_misc", "none"]).arg(&self.root);
            if !runner::run(&mut cmd)?.success() {
                return Err(failed("mount"));
            }
        }
        Ok(())
    }

    fn is_static_binary(&self, path: &Path) -> bool {
        if !path.exists() {
            return false;
        }
        let out = runner::outs("file", [Path::new("-L"), path]);
        out.contains("statically linked") || out.contains("static-pie linked")
    }

    fn registered_interpreter(&self, name: &str) -> Option<PathBuf> {
        let content = fs::read_to_string(self.root.join(name)).ok()?;
        parse_interpreter(&content)
    }

    fn relax_security_policy(&mut self) -> Result<()> {
        let setenforce = Path::new("/usr/sbin/setenforce");
        if !setenforce.exists() {
            return Ok(());
        }
        msger::info("Try to disable selinux");
        let mut cmd = self.command(&setenforce.to_string_lossy());
        cmd.arg("0");
        if runner::run(&mut cmd)?.success() {
            Ok(())
        } else {
            Err(GbsError::ExternalTool("setenforce 0 returned non-zero".to_string()))
        }
    }

    fn unregister(&mut self, name: &str) -> Result<()> {
        self.elevated_write("-1", &self.root.join(name))
    }

    fn register(&mut self, rule: &str) -> Result<()> {
        self.elevated_write(rule, &self.root.join("register"))
    }
}

fn parse_interpreter(node: &str) -> Option<PathBuf> {
    node.lines()
        .find_map(|l| l.strip_prefix("interpreter "))
        .map(|p| PathBuf::from(p.trim()))
}
