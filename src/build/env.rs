//! src/build/env.rs
//! Snapshot of the ambient environment, taken once when gbs starts so the
//! command synthesizer never reads process state itself.

use std::collections::BTreeMap;
use std::env;

use crate::arch;
use crate::runner;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvocationEnv {
    /// `*_proxy` variables, names lowercased, empty values dropped.
    pub proxies: Vec<(String, String)>,
    pub virtual_env: Option<String>,
    pub build_root: Option<String>,
    pub is_root: bool,
    pub host_arch: String,
}

impl InvocationEnv {
    pub fn capture() -> Self {
        Self::from_vars(env::vars(), runner::is_root(), arch::host_arch())
    }

    pub fn from_vars<I>(vars: I, is_root: bool, host_arch: String) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut proxies = BTreeMap::new();
        let mut virtual_env = None;
        let mut build_root = None;

        for (name, value) in vars {
            match name.as_str() {
                "VIRTUAL_ENV" => virtual_env = Some(value),
                "TIZEN_BUILD_ROOT" => build_root = Some(value),
                _ => {
                    let lower = name.to_lowercase();
                    if value.is_empty() || !lower.ends_with("_proxy") {
                        continue;
                    }
                    // http_proxy beats HTTP_PROXY when both are set.
                    if lower == name || !proxies.contains_key(&lower) {
                        proxies.insert(lower, value);
                    }
                }
            }
        }

        InvocationEnv {
            proxies: proxies.into_iter().collect(),
            virtual_env,
            build_root,
            is_root,
            host_arch,
        }
    }
}
