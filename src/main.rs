mod arch;
mod build;
mod cmd;
mod config;
mod emulator;
mod errors;
mod msger;
mod repo;
mod runner;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use colored::*;
use tracing_subscriber::EnvFilter;

use crate::build::env::InvocationEnv;
use crate::cmd::chroot::ChrootArgs;
use crate::cmd::import::ImportArgs;
use crate::cmd::localbuild::BuildArgs;
use crate::config::ConfigManager;
use crate::errors::Result;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "gbs")]
#[command(about = "git build system: build, chroot into and import Tizen packages")]
struct Cli {
    /// Use the given config file only
    #[arg(short = 'c', long = "conf", global = true)]
    conf: Option<PathBuf>,

    /// Print debug messages
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the package in the current git tree locally
    #[command(visible_alias = "lb")]
    Build(BuildArgs),
    /// Open a shell inside a build root
    Chroot(ChrootArgs),
    /// Import a source rpm, spec file or tarball into git
    #[command(visible_alias = "im")]
    Import(ImportArgs),
    // Show version of gbs
    Version,
}

fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();

    if let Err(e) = dispatch(cli) {
        msger::error(e.to_string());
        std::process::exit(1);
    }
}

fn dispatch(cli: Cli) -> Result<()> {
    if let Commands::Version = cli.command {
        println!("{} {}", "gbs".bold(), VERSION);
        return Ok(());
    }

    let cfg = ConfigManager::load(cli.conf.as_deref())?;
    match &cli.command {
        Commands::Build(args) => cmd::localbuild::run(args, &cfg, &InvocationEnv::capture()),
        Commands::Chroot(args) => cmd::chroot::run(args),
        Commands::Import(args) => cmd::import::run(args, &cfg),
        Commands::Version => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn build_flags_parse() {
        let cli = Cli::try_parse_from([
            "gbs", "-v", "build", "-A", "armv7l", "-R", "http://a", "-R", "/srv/b", "--threads", "4",
            "--extra-packs", "vim,gdb", "--skip-conf-repos", "pkgdir",
        ])
        .unwrap();
        assert!(cli.verbose);
        let Commands::Build(args) = cli.command else { panic!("expected build") };
        assert_eq!(args.arch.as_deref(), Some("armv7l"));
        assert_eq!(args.repositories, vec!["http://a", "/srv/b"]);
        assert_eq!(args.threads, 4);
        assert!(args.skip_conf_repos);
        assert_eq!(args.gitdir, Some(PathBuf::from("pkgdir")));
    }

    #[test]
    fn build_defaults_to_one_thread() {
        let cli = Cli::try_parse_from(["gbs", "build"]).unwrap();
        let Commands::Build(args) = cli.command else { panic!("expected build") };
        assert_eq!(args.threads, 1);
        assert!(args.gitdir.is_none());
    }

    #[test]
    fn chroot_and_import_parse() {
        let cli = Cli::try_parse_from(["gbs", "chroot", "-r", "/var/tmp/bob"]).unwrap();
        let Commands::Chroot(args) = cli.command else { panic!("expected chroot") };
        assert!(args.root);
        assert_eq!(args.buildroot, PathBuf::from("/var/tmp/bob"));

        let cli = Cli::try_parse_from(["gbs", "--conf", "/etc/x.conf", "import", "--merge", "foo.tar.gz"]).unwrap();
        assert_eq!(cli.conf, Some(PathBuf::from("/etc/x.conf")));
        let Commands::Import(args) = cli.command else { panic!("expected import") };
        assert!(args.merge);
        assert_eq!(args.upstream_branch, "upstream");
    }
}
