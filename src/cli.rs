// src/cli.rs
//! CLI definitions for the two caskgrant programs
//!
//! Every setting is available as a flag and as the environment variable the
//! shell scripts that preceded these tools used. The implementations are in
//! the `commands` module.

use crate::action::DEFAULT_TIMEOUT;
use crate::prefetch::DEFAULT_JOBS;
use crate::sudoers::DEFAULT_OUTPUT;
use clap::Parser;
use std::path::PathBuf;

/// `cask-reinstall`
#[derive(Parser, Debug, Clone)]
#[command(name = "cask-reinstall")]
#[command(version)]
#[command(
    about = "Reinstall Homebrew casks in a resumable batch, tracing every command run through sudo",
    long_about = None
)]
pub struct ReinstallArgs {
    /// Cask tokens to reinstall (default: $CASKS, then every installed cask)
    pub casks: Vec<String>,

    /// Whitespace-separated cask tokens, used when none are given as arguments
    #[arg(long = "cask-list", env = "CASKS", value_name = "LIST")]
    pub cask_list: Option<String>,

    /// Directory holding the checkpoint, trace log, install log and lock
    #[arg(short, long, env = "REINSTALL_WORKDIR", default_value = ".")]
    pub workdir: PathBuf,

    /// Download all installers in parallel before reinstalling
    #[arg(long, env = "PREFETCH")]
    pub prefetch: bool,

    /// Concurrent downloads during prefetch
    #[arg(short, long, env = "THREADS", default_value_t = DEFAULT_JOBS)]
    pub jobs: usize,

    /// Seconds before a single reinstall is killed
    #[arg(long, env = "REINSTALL_TIMEOUT", default_value_t = DEFAULT_TIMEOUT.as_secs())]
    pub timeout_secs: u64,

    /// brew executable
    #[arg(long, env = "BREW", default_value = "brew")]
    pub brew: String,

    /// Convert a raw install log from an older run into trace entries, then exit
    #[arg(long, value_name = "PATH")]
    pub import_log: Option<PathBuf>,

    /// Log progress instead of drawing a progress bar
    #[arg(short, long)]
    pub quiet: bool,
}

/// `cask-sudoers`
#[derive(Parser, Debug, Clone)]
#[command(name = "cask-sudoers")]
#[command(version)]
#[command(
    about = "Generate per-cask NOPASSWD sudoers rules from reinstall trace logs",
    long_about = None
)]
pub struct SudoersArgs {
    /// Trace logs to mine, ':'-separated (required)
    #[arg(long, env = "LOGS", value_delimiter = ':', value_name = "PATHS")]
    pub logs: Vec<PathBuf>,

    /// User the rules are granted to (required)
    #[arg(long, env = "TARGET_USER", value_name = "USER")]
    pub target_user: Option<String>,

    /// Only emit blocks for these casks (whitespace-separated)
    #[arg(long, env = "CASKS", value_name = "LIST")]
    pub casks: Option<String>,

    /// Output file, replaced atomically
    #[arg(short, long = "out", env = "SUDOERS_OUT", default_value = DEFAULT_OUTPUT)]
    pub out: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definitions_valid() {
        ReinstallArgs::command().debug_assert();
        SudoersArgs::command().debug_assert();
    }

    #[test]
    fn test_reinstall_defaults() {
        let args = ReinstallArgs::try_parse_from(["cask-reinstall", "alpha", "beta"]).unwrap();
        assert_eq!(args.casks, vec!["alpha", "beta"]);
        assert_eq!(args.timeout_secs, 3600);
        assert!(args.jobs > 0);
    }

    #[test]
    fn test_logs_split_on_colon() {
        let args = SudoersArgs::try_parse_from([
            "cask-sudoers",
            "--logs",
            "/tmp/a.log:/tmp/b.log",
            "--target-user",
            "alice",
        ])
        .unwrap();
        assert_eq!(args.logs, vec![PathBuf::from("/tmp/a.log"), PathBuf::from("/tmp/b.log")]);
        assert_eq!(args.target_user.as_deref(), Some("alice"));
    }
}
