// src/action.rs

//! The external reinstall action
//!
//! `ReinstallAction` is the seam between the orchestrator and the package
//! manager. An action reports every privileged command it attempts through a
//! sink before it returns, so the orchestrator can record them while the
//! action is still running.
//!
//! `BrewReinstall` drives `brew reinstall --cask --verbose --debug` and
//! recognizes sudo invocations in its output:
//!
//! - stdin is closed so a password prompt fails instead of hanging
//! - stdout and stderr are drained by two reader threads into one channel
//! - every line is appended to the install log
//! - a hung reinstall is killed after the configured timeout

use crate::error::{Error, Result};
use crate::intercept::{RUN_HEADER_PREFIX, parse_privileged_line};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

/// Default limit for one reinstall (one hour)
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3600);

/// Fixed install log filename inside the working directory
pub const INSTALL_LOG_FILE: &str = "reinstall_casks_install.log";

/// Receiver of intercepted privileged commands
pub type CommandSink<'a> = dyn FnMut(Vec<String>) -> Result<()> + 'a;

/// Result of one reinstall attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    Succeeded,
    Failed { reason: String },
}

impl ActionOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

/// Something that can reinstall a package and report its privileged commands
pub trait ReinstallAction: Send + Sync {
    /// Reinstall `package`, passing each attempted privileged command to
    /// `sink` in the order it was attempted.
    ///
    /// A non-zero exit or a timeout is an `Ok(Failed)` outcome; `Err` is
    /// reserved for failures to run the action at all.
    fn reinstall(&mut self, package: &str, sink: &mut CommandSink<'_>) -> Result<ActionOutcome>;

    /// Download the installer for `package` without installing it.
    /// Returns whether the download succeeded.
    fn fetch(&self, package: &str) -> Result<bool>;
}

/// Reinstall through the brew command line
pub struct BrewReinstall {
    brew: String,
    timeout: Duration,
    install_log: Option<File>,
}

impl BrewReinstall {
    pub fn new(brew: impl Into<String>) -> Self {
        Self {
            brew: brew.into(),
            timeout: DEFAULT_TIMEOUT,
            install_log: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Append all reinstall output to `path`
    pub fn with_install_log(mut self, path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        self.install_log = Some(file);
        Ok(self)
    }

    fn log_line(&mut self, line: &str) -> Result<()> {
        if let Some(log) = self.install_log.as_mut() {
            writeln!(log, "{}", line)?;
        }
        Ok(())
    }

    /// Forward output lines until both streams close or the deadline passes.
    /// Returns true on timeout.
    fn pump(
        &mut self,
        rx: &Receiver<String>,
        deadline: Instant,
        sink: &mut CommandSink<'_>,
    ) -> Result<bool> {
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(true);
            }
            match rx.recv_timeout(remaining) {
                Ok(line) => {
                    self.log_line(&line)?;
                    if let Some(argv) = parse_privileged_line(&line) {
                        sink(argv)?;
                    }
                }
                Err(RecvTimeoutError::Timeout) => return Ok(true),
                Err(RecvTimeoutError::Disconnected) => return Ok(false),
            }
        }
    }

    fn timed_out(&self, package: &str, child: &mut Child) -> ActionOutcome {
        warn!(
            "Reinstall of {} timed out after {} seconds, killing it",
            package,
            self.timeout.as_secs()
        );
        let _ = child.kill();
        let _ = child.wait();
        ActionOutcome::failed(format!("timed out after {} seconds", self.timeout.as_secs()))
    }
}

impl ReinstallAction for BrewReinstall {
    fn reinstall(&mut self, package: &str, sink: &mut CommandSink<'_>) -> Result<ActionOutcome> {
        let args = ["reinstall", "--cask", "--verbose", "--debug", package];
        let header = format!("{}{} {}", RUN_HEADER_PREFIX, self.brew, args.join(" "));
        info!("{}", header);
        self.log_line("")?;
        self.log_line(&header)?;
        if let Some(log) = self.install_log.as_mut() {
            log.flush()?;
        }

        let mut child = Command::new(&self.brew)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::ActionError(format!("failed to spawn {}: {}", self.brew, e)))?;

        let (tx, rx) = mpsc::channel();
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(stderr, tx.clone()));
        }
        drop(tx);

        let deadline = Instant::now() + self.timeout;
        let pumped = self.pump(&rx, deadline, sink);
        if let Some(log) = self.install_log.as_mut() {
            let _ = log.flush();
        }

        match pumped {
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(e);
            }
            // Reader threads are left behind: a grandchild may still hold the pipes
            Ok(true) => return Ok(self.timed_out(package, &mut child)),
            Ok(false) => {}
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        let status = match child.wait_timeout(remaining)? {
            Some(status) => status,
            None => return Ok(self.timed_out(package, &mut child)),
        };
        for reader in readers {
            let _ = reader.join();
        }

        if status.success() {
            debug!("brew reinstall {} exited successfully", package);
            Ok(ActionOutcome::Succeeded)
        } else {
            let reason = match status.code() {
                Some(code) => format!("exit code {}", code),
                None => "terminated by signal".to_string(),
            };
            Ok(ActionOutcome::failed(reason))
        }
    }

    fn fetch(&self, package: &str) -> Result<bool> {
        debug!("{} fetch --cask {}", self.brew, package);
        let status = Command::new(&self.brew)
            .args(["fetch", "--cask", package])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| Error::ActionError(format!("failed to spawn {}: {}", self.brew, e)))?;
        Ok(status.success())
    }
}

/// Send each line of `stream` down `tx`, lossily decoded
fn spawn_reader<R: Read + Send + 'static>(stream: R, tx: Sender<String>) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(['\n', '\r']).to_string();
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    /// Write an executable stand-in for brew
    fn fake_brew(dir: &Path, body: &str) -> String {
        let path = dir.join("brew");
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_privileged_lines_reach_sink() {
        let dir = TempDir::new().unwrap();
        let brew = fake_brew(
            dir.path(),
            r#"echo "==> Downloading $5"
echo "==> /usr/bin/sudo -E -- /bin/rm -rf /Applications/Alpha.app"
echo "==> /usr/bin/sudo -E -- /usr/sbin/installer -pkg /tmp/a.pkg -target /" >&2
exit 0"#,
        );
        let log_path = dir.path().join(INSTALL_LOG_FILE);
        let mut action = BrewReinstall::new(brew).with_install_log(&log_path).unwrap();

        let mut seen = Vec::new();
        let outcome = action
            .reinstall("alpha", &mut |argv| {
                seen.push(argv);
                Ok(())
            })
            .unwrap();

        assert_eq!(outcome, ActionOutcome::Succeeded);
        let commands: Vec<_> = seen.iter().map(|a| a[0].as_str()).collect();
        assert_eq!(seen.len(), 2);
        assert!(commands.contains(&"/bin/rm"));
        assert!(commands.contains(&"/usr/sbin/installer"));

        let log = fs::read_to_string(&log_path).unwrap();
        assert!(log.contains("Running command: "));
        assert!(log.contains("reinstall --cask --verbose --debug alpha"));
        assert!(log.contains("==> Downloading alpha"));
    }

    #[test]
    fn test_nonzero_exit_is_failed_outcome() {
        let dir = TempDir::new().unwrap();
        let brew = fake_brew(dir.path(), "exit 3");
        let mut action = BrewReinstall::new(brew);
        let outcome = action.reinstall("beta", &mut |_| Ok(())).unwrap();
        assert_eq!(outcome, ActionOutcome::failed("exit code 3"));
    }

    #[test]
    fn test_timeout_kills_action() {
        let dir = TempDir::new().unwrap();
        let brew = fake_brew(dir.path(), "exec sleep 30");
        let mut action = BrewReinstall::new(brew).with_timeout(Duration::from_millis(200));
        let started = Instant::now();
        let outcome = action.reinstall("slow", &mut |_| Ok(())).unwrap();
        assert!(!outcome.is_success());
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_missing_binary_is_error() {
        let mut action = BrewReinstall::new("/nonexistent/brew");
        assert!(action.reinstall("alpha", &mut |_| Ok(())).is_err());
    }

    #[test]
    fn test_fetch_reports_status() {
        let dir = TempDir::new().unwrap();
        let brew = fake_brew(dir.path(), r#"[ "$3" = "good" ]"#);
        let action = BrewReinstall::new(brew);
        assert!(action.fetch("good").unwrap());
        assert!(!action.fetch("bad").unwrap());
    }
}
