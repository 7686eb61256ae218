// src/commands/mod.rs
//! Command handlers for the caskgrant CLIs

mod generate;
pub mod progress;
mod reinstall;

pub use generate::{GenerateSummary, cmd_generate};
pub use reinstall::{cmd_import_log, cmd_reinstall, print_report};
