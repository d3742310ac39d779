// src/config.rs
// Loads gbs configuration from /etc, the user's home and the current
// directory; later files override earlier ones.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::errors::{GbsError, Result};

const DEFAULT_TMPDIR: &str = "/var/tmp";
const DEFAULT_BUILD_CMD: &str = "/usr/bin/depanneur";

/// A single `key = value` line, remembering which file it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigOption {
    pub name: String,
    pub value: String,
    source: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigManager {
    sections: BTreeMap<String, Vec<ConfigOption>>,
    loaded: Vec<PathBuf>,
}

impl ConfigManager {
    /// Loads `explicit` (or `$GBS_CONF`) alone when given, otherwise the
    /// system, user and project files in that order.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut cfg = ConfigManager::default();

        let explicit = explicit
            .map(Path::to_path_buf)
            .or_else(|| env::var_os("GBS_CONF").map(PathBuf::from));

        let paths = match explicit {
            Some(p) => {
                if !p.exists() {
                    return Err(GbsError::config(format!("config file {} doesn't exist", p.display())));
                }
                vec![p]
            }
            None => vec![
                PathBuf::from("/etc/gbs.conf"),
                PathBuf::from("~/.gbs.conf").expand_home(),
                PathBuf::from(".gbs.conf"),
            ],
        };

        for path in paths.iter().filter(|p| p.exists()) {
            let content = fs::read_to_string(path)
                .map_err(|e| GbsError::config(format!("failed to read {}: {}", path.display(), e)))?;
            cfg.apply_str(&content);
            cfg.loaded.push(path.clone());
            debug!(path = %path.display(), "loaded config file");
        }

        // Environment overrides (highest priority)
        if let Ok(v) = env::var("GBS_TMPDIR") {
            cfg.set("general", "tmpdir", &v);
        }

        Ok(cfg)
    }

    /// Parses INI-style `content` as one more config file layered on top.
    pub fn apply_str(&mut self, content: &str) {
        let source = self.loaded.len();
        let mut section = String::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if line.starts_with('[') && line.ends_with(']') {
                section = line[1..line.len() - 1].trim().to_lowercase();
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                self.push(&section, key.trim(), value.trim(), source);
            }
        }
    }

    fn push(&mut self, section: &str, name: &str, value: &str, source: usize) {
        let options = self.sections.entry(section.to_string()).or_default();
        // A later file replaces the option; a repeat within one file is kept
        // so that duplicate detection downstream can see it.
        options.retain(|o| o.name != name || o.source == source);
        options.push(ConfigOption { name: name.to_string(), value: value.to_string(), source });
    }

    fn set(&mut self, section: &str, name: &str, value: &str) {
        let options = self.sections.entry(section.to_string()).or_default();
        options.retain(|o| o.name != name);
        options.push(ConfigOption { name: name.to_string(), value: value.to_string(), source: usize::MAX });
    }

    /// All options of `section` in file order, duplicates included.
    pub fn options(&self, section: &str) -> &[ConfigOption] {
        self.sections.get(section).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn get(&self, section: &str, name: &str) -> Option<&str> {
        self.options(section)
            .iter()
            .rev()
            .find(|o| o.name == name)
            .map(|o| o.value.as_str())
            .filter(|v| !v.is_empty())
    }

    pub fn tmpdir(&self) -> PathBuf {
        PathBuf::from(self.get("general", "tmpdir").unwrap_or(DEFAULT_TMPDIR)).expand_home()
    }

    pub fn build_cmd(&self) -> String {
        self.get("build", "build_cmd").unwrap_or(DEFAULT_BUILD_CMD).to_string()
    }

    pub fn distconf(&self) -> Option<PathBuf> {
        self.get("build", "distconf").map(|p| PathBuf::from(p).expand_home())
    }

    /// User name the default build root is keyed on.
    pub fn remote_user(&self) -> String {
        self.get("remotebuild", "user")
            .map(str::to_string)
            .or_else(|| env::var("USER").ok())
            .unwrap_or_else(|| "gbs".to_string())
    }
}

// Small helper to expand leading ~ in paths
trait ExpandHome {
    fn expand_home(self) -> PathBuf;
}

impl ExpandHome for PathBuf {
    fn expand_home(self) -> PathBuf {
        let s = self.to_string_lossy().to_string();
        if let Some(rest) = s.strip_prefix("~/") {
            if let Some(home) = dirs_next::home_dir() {
                return home.join(rest);
            }
        }
        PathBuf::from(s)
    }
}
