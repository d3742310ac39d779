//! src/cmd/mod.rs
//! One module per gbs subcommand.

pub mod chroot;
pub mod import;
pub mod localbuild;
