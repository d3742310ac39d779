//! src/build/mod.rs
//! Composes the depanneur invocation from the resolved architecture,
//! repositories and command line switches. Nothing here runs a process.

pub mod env;

use std::path::PathBuf;
use std::process::Command;

use crate::repo::auth;
use crate::repo::DistConf;
use env::InvocationEnv;

/// Command line switches forwarded to the builder.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    pub clean: bool,
    pub noinit: bool,
    pub ccache: bool,
    /// Comma separated, as typed by the user.
    pub extra_packs: Option<String>,
    pub threads: usize,
    pub incremental: bool,
    pub overwrite: bool,
    pub clean_once: bool,
    pub debug: bool,
    pub commit: Option<String>,
    pub include_all: bool,
    pub workdir: PathBuf,
}

/// Everything resolved before synthesis.
#[derive(Debug, Clone)]
pub struct BuildPlan {
    pub builder: String,
    pub arch: String,
    pub build_root: PathBuf,
    pub repos: Vec<String>,
    /// `None` together with `noinit`.
    pub distconf: Option<DistConf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildInvocation {
    pub builder: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub personality: Option<String>,
    pub elevate: bool,
}

impl BuildInvocation {
    pub fn synthesize(plan: &BuildPlan, opts: &BuildOptions, ambient: &InvocationEnv) -> Self {
        let mut args = vec![format!("--arch={}", plan.arch)];

        if opts.clean {
            args.push("--clean".to_string());
        }
        if opts.noinit {
            args.push("--no-init".to_string());
        } else {
            args.extend(plan.repos.iter().map(|r| format!("--repository={}", r)));
            if let Some(conf) = &plan.distconf {
                args.push(format!("--dist={}", conf.dist));
                args.push(format!("--configdir={}", conf.configdir.display()));
            }
        }
        args.push(format!("--path={}", opts.workdir.display()));
        if opts.ccache {
            args.push("--ccache".to_string());
        }
        if let Some(extra) = opts.extra_packs.as_deref().filter(|e| !e.is_empty()) {
            args.push(format!("--extra-packs={}", extra.split(',').collect::<Vec<_>>().join(" ")));
        }
        if opts.overwrite {
            args.push("--overwrite".to_string());
        }
        if opts.clean_once {
            args.push("--clean-once".to_string());
        }
        if opts.debug {
            args.push("--debug".to_string());
        }
        args.push(format!("--threads={}", opts.threads));
        if opts.incremental {
            args.push("--incremental".to_string());
        }
        if opts.include_all {
            args.push("--include-all".to_string());
        }
        if let Some(commit) = &opts.commit {
            args.push(format!("--commit={}", commit));
        }

        let mut env = vec![
            ("VIRTUAL_ENV".to_string(), ambient.virtual_env.clone().unwrap_or_else(|| "/".to_string())),
            (
                "TIZEN_BUILD_ROOT".to_string(),
                ambient.build_root.clone().unwrap_or_else(|| plan.build_root.display().to_string()),
            ),
        ];
        env.extend(ambient.proxies.iter().cloned());

        BuildInvocation {
            builder: plan.builder.clone(),
            args,
            env,
            personality: crate::arch::personality(&ambient.host_arch, &plan.arch).map(str::to_string),
            elevate: !ambient.is_root,
        }
    }

    /// Full argument vector. sudo may drop the environment, so when
    /// elevating the overlay is passed as `NAME=value` arguments.
    pub fn argv(&self) -> Vec<String> {
        let mut argv = Vec::new();
        if self.elevate {
            argv.push("sudo".to_string());
            argv.extend(self.env.iter().map(|(k, v)| format!("{}={}", k, v)));
        }
        argv.extend(self.personality.iter().cloned());
        argv.push(self.builder.clone());
        argv.extend(self.args.iter().cloned());
        argv
    }

    /// [`argv`](Self::argv) joined for logs, with credentials stripped
    /// from every URL, including those in `NAME=value` tokens.
    pub fn redacted(&self) -> String {
        self.argv()
            .iter()
            .map(|token| match token.split_once('=') {
                Some((name, value)) => format!("{}={}", name, auth::strip_credentials(value)),
                None => auth::strip_credentials(token),
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn command(&self) -> Command {
        let argv = self.argv();
        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..]).envs(self.env.iter().map(|(k, v)| (k, v)));
        cmd
    }

    pub fn repositories(&self) -> impl Iterator<Item = &str> {
        self.args.iter().filter_map(|a| a.strip_prefix("--repository="))
    }
}
