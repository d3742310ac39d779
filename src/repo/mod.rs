//! src/repo/mod.rs
//! Turns `repo<key>.url/user/passwdx` options of the `[build]` section into
//! authenticated repository URLs, and picks the build configuration file.

pub mod auth;
pub mod parser;
pub mod passwd;

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::ConfigOption;
use crate::errors::{GbsError, Result};
use crate::msger;
use passwd::PasswordCodec;

/// Fixed name the build configuration is copied to; its stem is the
/// distribution name handed to the builder.
pub const DIST_CONF_NAME: &str = "tizen.conf";

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RepoEntry {
    pub key: String,
    pub url: Option<String>,
    pub user: Option<String>,
    pub passwd: Option<String>,
}

impl RepoEntry {
    fn new(key: &str) -> Self {
        RepoEntry { key: key.to_string(), ..Default::default() }
    }

    /// Merges the explicit fields with credentials already in `url`.
    pub fn resolve(&self) -> Result<String> {
        let url = self
            .url
            .as_deref()
            .ok_or_else(|| GbsError::config(format!("Url is not specified for {}", self.key)))?;

        let explicit_user = self.user.as_deref().filter(|u| !u.is_empty());
        let explicit_passwd = self.passwd.as_deref().filter(|p| !p.is_empty());
        let (url_user, url_passwd) = auth::embedded_credentials(url);

        if (url_user.is_some() && explicit_user.is_some()) || (url_passwd.is_some() && explicit_passwd.is_some()) {
            return Err(GbsError::config(format!("Auth info specified twice for {}", self.key)));
        }

        let user = explicit_user.or(url_user.as_deref());
        let passwd = explicit_passwd.or(url_passwd.as_deref());
        match user {
            None if passwd.is_some() => Err(GbsError::config(format!(
                "No user is specified for {}, only password",
                self.key
            ))),
            None => Ok(url.to_string()),
            // Nothing to merge: keep the URL exactly as written.
            Some(_) if explicit_user.is_none() && explicit_passwd.is_none() => Ok(url.to_string()),
            Some(user) => auth::with_credentials(url, user, passwd),
        }
    }
}

/// Groups `repo<key>.<attr>` options into entries, in order of first
/// appearance. Options not starting with `repo` are ignored.
pub fn parse_repo_entries(options: &[ConfigOption], codec: &dyn PasswordCodec) -> Result<Vec<RepoEntry>> {
    let mut entries: Vec<RepoEntry> = Vec::new();

    for opt in options.iter().filter(|o| o.name.starts_with("repo")) {
        let invalid = || GbsError::config(format!("invalid repo option: {}", opt.name));
        let (key, attr) = opt.name["repo".len()..].split_once('.').ok_or_else(invalid)?;
        if key.is_empty() || attr.contains('.') {
            return Err(invalid());
        }

        let idx = match entries.iter().position(|e| e.key == key) {
            Some(i) => i,
            None => {
                entries.push(RepoEntry::new(key));
                entries.len() - 1
            }
        };
        let entry = &mut entries[idx];

        let slot = match attr {
            "url" => &mut entry.url,
            "user" => &mut entry.user,
            "passwdx" => &mut entry.passwd,
            _ => return Err(invalid()),
        };
        if slot.is_some() {
            return Err(GbsError::config(format!("Duplicate entry {}", opt.name)));
        }

        let value = if attr == "passwdx" {
            codec
                .decode(&opt.value)
                .map_err(|e| GbsError::config(format!("Error decoding {}: {}", opt.name, e)))?
        } else {
            opt.value.clone()
        };
        *slot = Some(value);
    }

    Ok(entries)
}

/// Resolved URLs for every repository declared in `options`.
pub fn repos_from_config(options: &[ConfigOption], codec: &dyn PasswordCodec) -> Result<Vec<String>> {
    parse_repo_entries(options, codec)?.iter().map(RepoEntry::resolve).collect()
}

/// Config-derived repositories (unless skipped) followed by the ones given
/// on the command line, each validated.
pub fn collect_repos(
    options: &[ConfigOption],
    explicit: &[String],
    skip_conf_repos: bool,
    codec: &dyn PasswordCodec,
) -> Result<Vec<String>> {
    let mut repos = if skip_conf_repos { Vec::new() } else { repos_from_config(options, codec)? };
    repos.extend(explicit.iter().cloned());

    if repos.is_empty() {
        return Err(GbsError::config("No package repository specified."));
    }
    for url in &repos {
        validate_repo_url(url)?;
    }
    debug!(repos = ?auth::strip_all(&repos), "collected repositories");
    Ok(repos)
}

/// A repository is either an http(s) URL or an existing absolute path.
pub fn validate_repo_url(url: &str) -> Result<()> {
    let is_http = url.starts_with("http://") || url.starts_with("https://");
    let is_local = url.starts_with('/') && Path::new(url).exists();
    if is_http || is_local {
        Ok(())
    } else {
        Err(GbsError::config(format!("Invalid repo url: {}", auth::strip_credentials(url))))
    }
}

/// Where the builder finds the distribution configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistConf {
    pub configdir: PathBuf,
    pub dist: String,
}

/// Picks the build conf: an explicit override, then the one found in the
/// repositories, then the configured default. The winner is copied into
/// `workdir` as [`DIST_CONF_NAME`]; the source file is left untouched.
pub fn resolve_distconf(
    explicit: Option<&Path>,
    discovered: Option<&Path>,
    fallback: Option<&Path>,
    workdir: &Path,
) -> Result<DistConf> {
    let chosen = match (explicit, discovered) {
        (Some(p), _) => Some(p),
        (None, Some(p)) => Some(p),
        (None, None) => {
            msger::warning("failed to get build conf, use default build conf");
            fallback
        }
    };
    let chosen = chosen.ok_or_else(|| {
        GbsError::config("No build config file specified, please specify in ~/.gbs.conf or command line using -D")
    })?;
    if !chosen.is_file() {
        return Err(GbsError::config(format!("build config file {} doesn't exist", chosen.display())));
    }

    let target = workdir.join(DIST_CONF_NAME);
    if chosen != target.as_path() {
        fs::copy(chosen, &target)?;
    }
    let dist = DIST_CONF_NAME.rsplit_once('.').map_or(DIST_CONF_NAME, |(stem, _)| stem);
    Ok(DistConf { configdir: workdir.to_path_buf(), dist: dist.to_string() })
}
