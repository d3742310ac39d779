//! src/errors.rs
//! Error kinds surfaced by every gbs subcommand.

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GbsError {
    /// Malformed, duplicate or missing repository / build configuration.
    #[error("<config>{0}")]
    Config(String),

    /// Mutually exclusive or invalid command line options.
    #[error("<usage>{0}, please use \"--help\" for more info")]
    Usage(String),

    /// The foreign-architecture emulator could not be set up.
    #[error("<qemu>{0}")]
    Emulator(String),

    /// An external tool (builder, chroot, importer) returned non-zero.
    #[error("{0}")]
    ExternalTool(String),

    #[error("failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl GbsError {
    pub fn config(msg: impl Into<String>) -> Self {
        GbsError::Config(msg.into())
    }

    pub fn usage(msg: impl Into<String>) -> Self {
        GbsError::Usage(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, GbsError>;
