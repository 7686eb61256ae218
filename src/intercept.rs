// src/intercept.rs

//! Recognition of privileged command invocations in package-manager output
//!
//! With `--verbose --debug`, brew echoes every command it runs through sudo
//! as a line containing `/usr/bin/sudo ...`. This module turns such a line
//! back into the argv of the command sudo executed, and converts raw install
//! logs from older runs into attributed command lists.

use tracing::debug;

/// Path brew uses to elevate commands
pub const SUDO_PATH: &str = "/usr/bin/sudo";

/// Prefix written before each reinstall's output in the install log
pub const RUN_HEADER_PREFIX: &str = "Running command: ";

/// Lines that mention sudo in prose rather than invoke it
const DESCRIPTIVE_MARKERS: &[&str] = &[
    "with `sudo`",
    "Uninstalling packages",
    "Changing ownership",
    "Running installer",
];

/// Ruby object dumps printed by `--debug`
const INSPECTOR_MARKERS: &[&str] = &["#<Cask", "Cask::", "@dsl_args", "@directives", "@cask="];

/// Extract the elevated command from one output line.
///
/// Returns the command followed by its arguments, or `None` when the line is
/// not an actual sudo invocation.
pub fn parse_privileged_line(line: &str) -> Option<Vec<String>> {
    if !line.contains(SUDO_PATH) {
        return None;
    }
    if DESCRIPTIVE_MARKERS.iter().any(|m| line.contains(m))
        || INSPECTOR_MARKERS.iter().any(|m| line.contains(m))
    {
        return None;
    }
    if line.trim_start().starts_with("sudo:") {
        return None;
    }

    let tokens = shlex::split(line)?;
    let argv = command_after_sudo(&tokens)?;
    debug!("Intercepted privileged command: {}", argv.join(" "));
    Some(argv)
}

/// Skip sudo's own environment assignments and options
fn command_after_sudo(tokens: &[String]) -> Option<Vec<String>> {
    let mut idx = tokens.iter().position(|t| t == SUDO_PATH)? + 1;

    while let Some(tok) = tokens.get(idx) {
        if tok.contains('=') && !tok.starts_with('/') {
            idx += 1;
        } else if tok == "-u" {
            idx += 2;
        } else if tok.starts_with('-') {
            // Includes `--`
            idx += 1;
        } else {
            break;
        }
    }

    match tokens.get(idx..) {
        Some(rest) if !rest.is_empty() => Some(rest.to_vec()),
        _ => None,
    }
}

/// Privileged commands recovered from a raw install log
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LegacyImport {
    /// (package, argv) in log order
    pub commands: Vec<(String, Vec<String>)>,
    /// Privileged lines seen before any reinstall header
    pub unattributed: usize,
}

/// Attribute each privileged line of an install log to the package named by
/// the most recent `Running command: brew reinstall ... <id>` header.
pub fn import_install_log(text: &str) -> LegacyImport {
    let mut import = LegacyImport::default();
    let mut current: Option<String> = None;

    for line in text.lines() {
        if let Some(package) = header_package(line) {
            current = Some(package);
            continue;
        }
        let Some(argv) = parse_privileged_line(line) else {
            continue;
        };
        match &current {
            Some(package) => import.commands.push((package.clone(), argv)),
            None => import.unattributed += 1,
        }
    }

    import
}

/// Package named by a reinstall header line
fn header_package(line: &str) -> Option<String> {
    let command = line.trim().strip_prefix(RUN_HEADER_PREFIX)?;
    let mut words = command.split_whitespace();
    let program = words.next()?;
    if !program.ends_with("brew") || words.next()? != "reinstall" {
        return None;
    }
    words
        .filter(|w| !w.starts_with('-'))
        .last()
        .map(str::to_string)
}
