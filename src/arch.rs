// src/arch.rs
// Target architecture canonicalization, validation and personality lookup.

use crate::errors::{GbsError, Result};

/// Aliases folded onto the architecture the builder actually targets.
const BUILD_ARCH_MAP: &[(&str, &str)] = &[("ia32", "i586"), ("i686", "i586"), ("i586", "i586"), ("i386", "i586")];

pub const SUPPORTED_ARCHS: &[&str] = &["ia32", "i686", "i586", "armv7hl", "armv7el", "armv7tnhl", "armv7nhl", "armv7l"];

/// Wrapper that makes a 64-bit host report the target's machine type.
const CHANGE_PERSONALITY: &[(&str, &str)] = &[
    ("i686", "linux32"),
    ("i586", "linux32"),
    ("i386", "linux32"),
    ("ppc", "powerpc32"),
    ("s390", "s390"),
    ("sparc", "linux32"),
    ("sparcv8", "linux32"),
];

pub fn canonicalize(arch: &str) -> String {
    BUILD_ARCH_MAP
        .iter()
        .find(|(alias, _)| *alias == arch)
        .map_or(arch, |(_, canonical)| *canonical)
        .to_string()
}

pub fn validate(arch: &str) -> Result<()> {
    if SUPPORTED_ARCHS.contains(&arch) {
        Ok(())
    } else {
        Err(GbsError::usage(format!(
            "arch {} not supported, supported archs are: {}",
            arch,
            SUPPORTED_ARCHS.join(",")
        )))
    }
}

/// Canonicalizes `requested` and checks it is buildable.
pub fn resolve(requested: &str) -> Result<String> {
    let arch = canonicalize(requested);
    validate(&arch)?;
    Ok(arch)
}

pub fn personality(host: &str, target: &str) -> Option<&'static str> {
    if host == target {
        return None;
    }
    CHANGE_PERSONALITY.iter().find(|(a, _)| *a == target).map(|(_, wrapper)| *wrapper)
}

/// Targets whose binaries the host can only run through an emulator.
pub fn is_foreign(target: &str) -> bool {
    target.starts_with("arm")
}

/// Machine name reported by the kernel, with `i686` folded to `i586`.
pub fn host_arch() -> String {
    let machine = nix::sys::utsname::uname()
        .map(|u| u.machine().to_string_lossy().into_owned())
        .unwrap_or_else(|_| std::env::consts::ARCH.to_string());
    if machine == "i686" {
        "i586".to_string()
    } else {
        machine
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_map_to_i586() {
        for a in ["ia32", "i686", "i586", "i386"] {
            assert_eq!(canonicalize(a), "i586");
        }
        assert_eq!(canonicalize("armv7l"), "armv7l");
        assert_eq!(canonicalize("x86_64"), "x86_64");
    }

    #[test]
    fn canonicalize_is_idempotent() {
        for a in ["ia32", "i686", "i386", "armv7hl", "x86_64", "", "ppc"] {
            let once = canonicalize(a);
            assert_eq!(canonicalize(&once), once);
        }
    }

    #[test]
    fn unsupported_arch_lists_supported_set() {
        let err = resolve("mips").unwrap_err();
        let msg = err.to_string();
        assert!(matches!(err, GbsError::Usage(_)));
        assert!(msg.contains("arch mips not supported"));
        for a in SUPPORTED_ARCHS {
            assert!(msg.contains(a));
        }
    }

    #[test]
    fn resolve_accepts_aliases() {
        assert_eq!(resolve("i686").unwrap(), "i586");
        assert_eq!(resolve("armv7hl").unwrap(), "armv7hl");
    }

    #[test]
    fn personality_only_when_arch_differs() {
        assert_eq!(personality("x86_64", "i586"), Some("linux32"));
        assert_eq!(personality("i586", "i586"), None);
        assert_eq!(personality("x86_64", "armv7l"), None);
        assert_eq!(personality("ppc64", "ppc"), Some("powerpc32"));
    }

    #[test]
    fn arm_targets_are_foreign() {
        assert!(is_foreign("armv7l"));
        assert!(is_foreign("armv7hl"));
        assert!(!is_foreign("i586"));
    }
}
