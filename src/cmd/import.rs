//! src/cmd/import.rs
//! `gbs import`: hands a source rpm, spec file or upstream tarball to gbp.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use clap::Args;

use crate::config::ConfigManager;
use crate::errors::{GbsError, Result};
use crate::msger;
use crate::runner;

const PRISTINE_TAR: &str = "/usr/bin/pristine-tar";

/// gbp import-srpm exit code for "imported, but the patches were not".
const PATCH_IMPORT_FAILED: i32 = 2;

#[derive(Args, Debug, Clone, Default)]
pub struct ImportArgs {
    /// Path to a .src.rpm, a .spec file or an upstream tarball
    pub path: PathBuf,

    /// Author name of git commit
    #[arg(long = "author-name")]
    pub author_name: Option<String>,

    /// Author email of git commit
    #[arg(long = "author-email")]
    pub author_email: Option<String>,

    /// Upstream branch
    #[arg(long = "upstream-branch", default_value = "upstream")]
    pub upstream_branch: String,

    /// Directory containing packaging files
    #[arg(long = "packaging-dir")]
    pub packaging_dir: Option<String>,

    /// Don't use pristine-tar to import source
    #[arg(long = "no-pristine-tar")]
    pub no_pristine_tar: bool,

    /// Merge new upstream branch to master
    #[arg(long)]
    pub merge: bool,
}

impl ImportArgs {
    fn is_source_package(&self) -> bool {
        let name = self.path.to_string_lossy();
        name.ends_with(".src.rpm") || name.ends_with(".spec")
    }
}

/// The gbp command for `args`, staging into `tmp_dir`.
pub fn import_command(args: &ImportArgs, packaging_dir: &str, tmp_dir: &Path, pristine_tar: bool) -> Command {
    let mut cmd = Command::new("gbp");
    cmd.arg(if args.is_source_package() { "import-srpm" } else { "import-orig" });
    cmd.arg("--color-scheme=magenta:green:yellow:red")
        .arg(format!("--packaging-dir={}", packaging_dir))
        .arg(format!("--upstream-branch={}", args.upstream_branch))
        .arg(&args.path)
        .arg(format!("--tmp-dir={}", tmp_dir.display()));
    if pristine_tar && !args.no_pristine_tar {
        cmd.arg("--pristine-tar");
    }
    if !args.is_source_package() {
        cmd.arg(if args.merge { "--merge" } else { "--no-merge" });
    }
    if let Some(name) = &args.author_name {
        cmd.env("GIT_AUTHOR_NAME", name);
    }
    if let Some(email) = &args.author_email {
        cmd.env("GIT_AUTHOR_EMAIL", email);
    }
    cmd
}

pub fn run(args: &ImportArgs, cfg: &ConfigManager) -> Result<()> {
    let tmpdir = cfg.tmpdir();
    fs::create_dir_all(&tmpdir)?;
    let tmp = tempfile::Builder::new().prefix("gbp_").tempdir_in(&tmpdir)?;

    let packaging_dir = args
        .packaging_dir
        .as_deref()
        .or_else(|| cfg.get("general", "packaging_dir"))
        .unwrap_or("packaging");
    let mut cmd = import_command(args, packaging_dir, tmp.path(), Path::new(PRISTINE_TAR).exists());
    let status = runner::run(&mut cmd)?;

    match status.code() {
        Some(0) => {}
        Some(PATCH_IMPORT_FAILED) if args.is_source_package() => msger::warning(
            "Importing of patches into packaging branch failed! Please import manually \
             (apply and commit to git, remove files from packaging dir and spec) in order \
             to enable automatic patch generation.",
        ),
        _ => {
            return Err(GbsError::ExternalTool(format!("Failed to import {}", args.path.display())));
        }
    }
    msger::info("done.");
    Ok(())
}
