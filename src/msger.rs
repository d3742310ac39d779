// src/msger.rs
// User-facing status lines. Diagnostics go through `tracing` instead.

use colored::*;

pub fn info(msg: impl AsRef<str>) {
    println!("{} {}", "info:".green(), msg.as_ref());
}

pub fn warning(msg: impl AsRef<str>) {
    eprintln!("{} {}", "Warning:".yellow(), msg.as_ref());
}

pub fn error(msg: impl AsRef<str>) {
    eprintln!("{} {}", "error:".red(), msg.as_ref().red());
}
