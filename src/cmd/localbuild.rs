//! src/cmd/localbuild.rs
//! `gbs build`: resolves architecture, repositories and build conf, makes
//! sure foreign binaries can run, then hands over to depanneur.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use tempfile::TempDir;
use tracing::debug;
use walkdir::WalkDir;

use crate::arch;
use crate::build::env::InvocationEnv;
use crate::build::{BuildInvocation, BuildOptions, BuildPlan};
use crate::config::ConfigManager;
use crate::emulator::{self, BinfmtBackend, EmulatorManager};
use crate::errors::{GbsError, Result};
use crate::msger;
use crate::repo::parser::{Fetcher, RepoParser};
use crate::repo::passwd::Base64Bzip2;
use crate::repo::{self, auth};
use crate::runner;

#[derive(Args, Debug, Clone, Default)]
pub struct BuildArgs {
    /// Git work directory to build; defaults to the current directory
    pub gitdir: Option<PathBuf>,

    /// Build target arch
    #[arg(short = 'A', long = "arch")]
    pub arch: Option<String>,

    /// Specify build root to setup chroot environment
    #[arg(short = 'B', long = "buildroot")]
    pub buildroot: Option<PathBuf>,

    /// Specify package repositories, only rpm-md format is supported
    #[arg(short = 'R', long = "repository")]
    pub repositories: Vec<String>,

    /// Skip repositories specified in the config file
    #[arg(long = "skip-conf-repos")]
    pub skip_conf_repos: bool,

    /// Specify distribution configuration file
    #[arg(short = 'D', long = "dist")]
    pub dist: Option<PathBuf>,

    /// Delete old build root before initialization
    #[arg(long)]
    pub clean: bool,

    /// Skip initialization of build root and start rpmbuild directly
    #[arg(long)]
    pub noinit: bool,

    /// Use ccache to speed up rebuilds
    #[arg(long)]
    pub ccache: bool,

    /// Comma separated list of extra packages to install into the build root
    #[arg(long = "extra-packs")]
    pub extra_packs: Option<String>,

    /// Number of parallel builds
    #[arg(long, default_value_t = 1)]
    pub threads: usize,

    /// Build a package from the local git tree incrementally
    #[arg(long)]
    pub incremental: bool,

    /// Overwrite existing binaries
    #[arg(long)]
    pub overwrite: bool,

    /// Clean up the build root after each package
    #[arg(long = "clean-once")]
    pub clean_once: bool,

    /// Build debuginfo packages as well
    #[arg(long)]
    pub debug: bool,

    /// Build the given commit instead of the working tree
    #[arg(long)]
    pub commit: Option<String>,

    /// Uncommitted changes and untracked files are included
    #[arg(long = "include-all")]
    pub include_all: bool,

    /// Output directory the built rpms are copied to
    #[arg(long)]
    pub out: Option<PathBuf>,
}

/// A build ready to run. `cache` holds the build conf the invocation
/// points at and must outlive the builder process.
#[derive(Debug)]
pub struct Prepared {
    pub invocation: BuildInvocation,
    pub build_root: PathBuf,
    pub arch: String,
    cache: Option<TempDir>,
}

impl Prepared {
    pub fn cache_dir(&self) -> Option<&Path> {
        self.cache.as_ref().map(TempDir::path)
    }
}

/// Everything up to, but not including, running the builder.
pub fn prepare(
    args: &BuildArgs,
    cfg: &ConfigManager,
    ambient: &InvocationEnv,
    fetcher: &dyn Fetcher,
    binfmt: &mut dyn BinfmtBackend,
) -> Result<Prepared> {
    if args.commit.is_some() && args.include_all {
        return Err(GbsError::usage("--commit can't be specified together with --include-all"));
    }
    if let Some(out) = &args.out {
        if !out.exists() {
            return Err(GbsError::usage(format!("Output directory {} doesn't exist", out.display())));
        }
        if !out.is_dir() {
            return Err(GbsError::usage(format!("{} is not a directory", out.display())));
        }
    }
    let workdir = work_directory(args.gitdir.as_deref())?;

    let requested = match &args.arch {
        Some(a) => a.clone(),
        None => {
            msger::info(format!("No arch specified, using system arch: {}", ambient.host_arch));
            ambient.host_arch.clone()
        }
    };
    let arch = arch::resolve(&requested)?;

    let tmpdir = cfg.tmpdir();
    let build_root = args.buildroot.clone().unwrap_or_else(|| tmpdir.join(cfg.remote_user()));

    if arch::is_foreign(&arch) {
        if let Some(spec) = emulator::spec_for(&arch) {
            let interpreter = EmulatorManager::new(binfmt, spec).ensure_registered()?;
            debug!(interpreter = %interpreter.display(), "emulator ready");
        }
    }

    let mut cache = None;
    let mut repos = Vec::new();
    let mut distconf = None;
    if !args.noinit {
        fs::create_dir_all(&tmpdir)?;
        let dir = tempfile::Builder::new().prefix("gbscache").tempdir_in(&tmpdir)?;
        msger::info("generate repositories ...");

        let collected = repo::collect_repos(
            cfg.options("build"),
            &args.repositories,
            args.skip_conf_repos,
            &Base64Bzip2,
        )?;

        let pb = ProgressBar::new_spinner();
        pb.enable_steady_tick(Duration::from_millis(120));
        pb.set_style(
            ProgressStyle::with_template("{spinner:.blue} {elapsed_precise} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message("Inspecting repositories...");
        let parsed = RepoParser::parse(&collected, dir.path(), fetcher);
        pb.finish_and_clear();
        let parser = parsed?;

        repos = parser.repos_by_arch(&arch);
        if repos.is_empty() {
            return Err(GbsError::config(format!(
                "no repositories found for arch: {} under the following repos:\n      {}",
                arch,
                auth::strip_all(&collected).join("\n")
            )));
        }
        distconf = Some(repo::resolve_distconf(
            args.dist.as_deref(),
            parser.buildconf(),
            cfg.distconf().as_deref(),
            dir.path(),
        )?);
        cache = Some(dir);
    }

    let plan = BuildPlan {
        builder: cfg.build_cmd(),
        arch: arch.clone(),
        build_root: build_root.clone(),
        repos,
        distconf,
    };
    let opts = BuildOptions {
        clean: args.clean,
        noinit: args.noinit,
        ccache: args.ccache,
        extra_packs: args.extra_packs.clone(),
        threads: args.threads,
        incremental: args.incremental,
        overwrite: args.overwrite,
        clean_once: args.clean_once,
        debug: args.debug,
        commit: args.commit.clone(),
        include_all: args.include_all,
        workdir,
    };

    Ok(Prepared {
        invocation: BuildInvocation::synthesize(&plan, &opts, ambient),
        build_root,
        arch,
        cache,
    })
}

/// Top of the git tree containing `gitdir`, or the directory itself when
/// it is not under git.
fn work_directory(gitdir: Option<&Path>) -> Result<PathBuf> {
    let dir = match gitdir {
        Some(p) if p.is_absolute() => p.to_path_buf(),
        Some(p) => std::env::current_dir()?.join(p),
        None => std::env::current_dir()?,
    };
    let toplevel = runner::outs("git", [Path::new("-C"), dir.as_path(), Path::new("rev-parse"), Path::new("--show-toplevel")]);
    let toplevel = toplevel.trim();
    if toplevel.is_empty() {
        Ok(dir)
    } else {
        Ok(PathBuf::from(toplevel))
    }
}

pub fn run(args: &BuildArgs, cfg: &ConfigManager, ambient: &InvocationEnv) -> Result<()> {
    let fetcher = repo::parser::UrlFetcher::new();
    let mut binfmt = emulator::HostBinfmt::new(&cfg.tmpdir());
    let prepared = prepare(args, cfg, ambient, &fetcher, &mut binfmt)?;
    debug!(arch = %prepared.arch, cache = ?prepared.cache_dir(), "build prepared");

    let mut cmd = prepared.invocation.command();
    let status = runner::run_interruptible(&mut cmd, &prepared.invocation.redacted())?;
    if runner::interrupted(&status) {
        msger::info("keyboard interrupt ...");
        return Ok(());
    }
    if !status.success() {
        return Err(GbsError::ExternalTool("rpmbuild fails".to_string()));
    }

    let repodir = prepared.build_root.join("local/repos/tizen/");
    msger::info(format!("Local repo can be found here:\n     {}", repodir.display()));
    if let Some(out) = &args.out {
        let copied = copy_rpms(&repodir, out)?;
        msger::info(format!("{} rpm(s) copied to {}", copied, out.display()));
    }
    msger::info("Done");
    Ok(())
}

/// Copies every `.rpm` found below `from` into `to`, flattened.
fn copy_rpms(from: &Path, to: &Path) -> Result<usize> {
    let mut copied = 0;
    for entry in WalkDir::new(from).into_iter().filter_map(|e| e.ok()) {
        let path = entry.path();
        if !entry.file_type().is_file() || path.extension().map_or(true, |e| e != "rpm") {
            continue;
        }
        if let Some(name) = path.file_name() {
            fs::copy(path, to.join(name))?;
            copied += 1;
        }
    }
    Ok(copied)
}
