// tests/pipeline.rs

//! Integration tests from trace log to sudoers fragment.

mod common;

use caskgrant::cli::SudoersArgs;
use caskgrant::commands::{cmd_generate, cmd_import_log};
use caskgrant::trace::{TRACE_FILE, read_trace};
use caskgrant::{LogMiner, RuleGeneralizer, Selection};
use common::{FixedCatalog, ScriptedAction, Step, argv, orchestrator, setup_workdir, write_trace};
use std::fs;
use std::path::{Path, PathBuf};

fn sudoers_args(logs: Vec<PathBuf>, user: Option<&str>, out: &Path) -> SudoersArgs {
    SudoersArgs {
        logs,
        target_user: user.map(str::to_string),
        casks: None,
        out: out.to_path_buf(),
    }
}

/// Rule lines of the block for `package`, header comments excluded
fn block_lines(doc: &str, package: &str) -> Vec<String> {
    let start = format!("# ---- cask: {} ----", package);
    let end = format!("# ---- end: {} ----", package);
    doc.lines()
        .skip_while(|l| *l != start)
        .skip(1)
        .take_while(|l| *l != end)
        .filter(|l| !l.starts_with('#'))
        .map(str::to_string)
        .collect()
}

#[test]
fn test_every_rule_backed_by_its_own_package() {
    let dir = setup_workdir();
    let trace = dir.path().join(TRACE_FILE);
    write_trace(
        &trace,
        &[
            ("alpha", &["/bin/rm", "-f", "/opt/alpha-1.2.3/bin/helper"]),
            ("alpha", &["/bin/rm", "-f", "/opt/alpha-1.4.0/bin/helper"]),
            ("alpha", &["/usr/sbin/chown", "-R", "alice:staff", "/Applications/Alpha.app"]),
            ("beta", &["/usr/sbin/installer", "-pkg", "/tmp/Beta-2024.pkg", "-target", "/"]),
            ("beta", &["/bin/launchctl", "bootout", "system/com.beta.agent"]),
        ],
    );

    let readout = read_trace(&trace).unwrap();
    let blocks = RuleGeneralizer::new().generalize_all(&LogMiner::new().mine(&readout));
    assert_eq!(blocks.len(), 2);

    for block in &blocks {
        assert!(!block.lines.is_empty());
        for line in &block.lines {
            let backed = readout.entries.iter().any(|e| {
                e.package == block.package && line.matches(&e.argv[0], &e.argv[1..])
            });
            assert!(backed, "{}: {:?} has no observation", block.package, line);
        }
    }
}

#[test]
fn test_identical_commands_stay_in_each_block() {
    let dir = setup_workdir();
    let trace = dir.path().join(TRACE_FILE);
    let out = dir.path().join("casks.sudoers");
    write_trace(
        &trace,
        &[
            ("alpha", &["/usr/bin/xattr", "-dr", "com.apple.quarantine", "/Applications/Shared.app"]),
            ("beta", &["/usr/bin/xattr", "-dr", "com.apple.quarantine", "/Applications/Shared.app"]),
        ],
    );

    cmd_generate(&sudoers_args(vec![trace], Some("alice"), &out)).unwrap();
    let doc = fs::read_to_string(&out).unwrap();

    let expected = "alice ALL=(ALL) NOPASSWD: /usr/bin/xattr -dr com.apple.quarantine /Applications/Shared.app";
    assert_eq!(block_lines(&doc, "alpha"), vec![expected]);
    assert_eq!(block_lines(&doc, "beta"), vec![expected]);
}

#[test]
fn test_version_wildcard_never_widens_to_directory() {
    let dir = setup_workdir();
    let trace = dir.path().join(TRACE_FILE);
    let out = dir.path().join("casks.sudoers");
    write_trace(
        &trace,
        &[
            ("app", &["/bin/rm", "-rf", "/opt/app-1.2.3/bin/helper"]),
            ("app", &["/bin/rm", "-rf", "/opt/app-1.3.0/bin/helper"]),
        ],
    );

    let summary = cmd_generate(&sudoers_args(vec![trace], Some("alice"), &out)).unwrap();
    assert_eq!(summary.rules, 1);
    assert_eq!(summary.flagged, 0);

    let lines = block_lines(&fs::read_to_string(&out).unwrap(), "app");
    assert_eq!(lines, vec!["alice ALL=(ALL) NOPASSWD: /bin/rm -rf /opt/app-*/bin/helper"]);
    assert!(!lines[0].contains("/opt/* "));
    assert!(!lines[0].contains("/opt/app-1.2.3/*"));
}

#[test]
fn test_missing_logs_setting_writes_nothing() {
    let dir = setup_workdir();
    let out = dir.path().join("casks.sudoers");

    let err = cmd_generate(&sudoers_args(Vec::new(), Some("alice"), &out)).unwrap_err();
    assert!(err.to_string().contains("LOGS"));
    assert!(!out.exists());
}

#[test]
fn test_missing_target_user_writes_nothing() {
    let dir = setup_workdir();
    let trace = dir.path().join(TRACE_FILE);
    let out = dir.path().join("casks.sudoers");
    write_trace(&trace, &[("alpha", &["/bin/mkdir", "-p", "/Library/Alpha"])]);

    let err = cmd_generate(&sudoers_args(vec![trace.clone()], None, &out)).unwrap_err();
    assert!(err.to_string().contains("TARGET_USER"));
    let err = cmd_generate(&sudoers_args(vec![trace], Some("  "), &out)).unwrap_err();
    assert!(err.to_string().contains("TARGET_USER"));
    assert!(!out.exists());
}

#[test]
fn test_unreadable_log_is_fatal() {
    let dir = setup_workdir();
    let trace = dir.path().join(TRACE_FILE);
    let out = dir.path().join("casks.sudoers");
    fs::write(&out, "# previous fragment\n").unwrap();
    write_trace(&trace, &[("alpha", &["/bin/mkdir", "-p", "/Library/Alpha"])]);

    let logs = vec![trace, dir.path().join("missing.log")];
    assert!(cmd_generate(&sudoers_args(logs, Some("alice"), &out)).is_err());
    assert_eq!(fs::read_to_string(&out).unwrap(), "# previous fragment\n");
}

#[test]
fn test_corrupt_lines_skipped_and_counted() {
    let dir = setup_workdir();
    let trace = dir.path().join(TRACE_FILE);
    let out = dir.path().join("casks.sudoers");
    write_trace(&trace, &[("alpha", &["/bin/mkdir", "-p", "/Library/Alpha"])]);
    let mut text = fs::read_to_string(&trace).unwrap();
    text.push_str("deadbeef|{\"truncated\n");
    fs::write(&trace, text).unwrap();

    let summary = cmd_generate(&sudoers_args(vec![trace], Some("alice"), &out)).unwrap();
    assert_eq!(summary.entries, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.rules, 1);
}

#[test]
fn test_cask_filter_limits_blocks() {
    let dir = setup_workdir();
    let trace = dir.path().join(TRACE_FILE);
    let out = dir.path().join("casks.sudoers");
    write_trace(
        &trace,
        &[
            ("alpha", &["/bin/mkdir", "-p", "/Library/Alpha"]),
            ("beta", &["/bin/mkdir", "-p", "/Library/Beta"]),
        ],
    );

    let mut args = sudoers_args(vec![trace], Some("alice"), &out);
    args.casks = Some("beta gamma".to_string());
    let summary = cmd_generate(&args).unwrap();
    assert_eq!(summary.blocks, 1);

    let doc = fs::read_to_string(&out).unwrap();
    assert!(!doc.contains("cask: alpha"));
    assert_eq!(block_lines(&doc, "beta").len(), 1);
}

#[test]
fn test_logs_from_several_runs_merged() {
    let dir = setup_workdir();
    let first = dir.path().join("machine-a.log");
    let second = dir.path().join("machine-b.log");
    let out = dir.path().join("casks.sudoers");
    write_trace(&first, &[("app", &["/bin/rm", "-f", "/tmp/app-1.0.pkg"])]);
    write_trace(&second, &[("app", &["/bin/rm", "-f", "/tmp/app-2.5.pkg"])]);

    let summary = cmd_generate(&sudoers_args(vec![first.clone(), second], Some("alice"), &out)).unwrap();
    assert_eq!(summary.entries, 2);
    let doc = fs::read_to_string(&out).unwrap();
    assert!(doc.contains(&format!("# Source trace: {}", first.display())));
    assert_eq!(
        block_lines(&doc, "app"),
        vec!["alice ALL=(ALL) NOPASSWD: /bin/rm -f /tmp/app-*.pkg"]
    );
}

#[test]
fn test_imported_install_log_feeds_generation() {
    let dir = setup_workdir();
    let log = dir.path().join("reinstall_casks_install.log");
    fs::write(
        &log,
        "\
Running command: brew reinstall --cask --verbose --debug alpha
==> Downloading https://example.com/alpha.dmg
==> /usr/bin/sudo -E -- /bin/mkdir -p /Library/Alpha
Running command: brew reinstall --cask --verbose --debug beta
==> Running installer for beta with `sudo` (which may request your password)...
==> /usr/bin/sudo -E -- /usr/sbin/installer -pkg '/tmp/Beta Setup.pkg' -target /
",
    )
    .unwrap();

    cmd_import_log(dir.path(), &log).unwrap();
    let readout = read_trace(&dir.path().join(TRACE_FILE)).unwrap();
    assert_eq!(readout.entries.len(), 2);
    assert_eq!(readout.entries[1].argv, argv(&["/usr/sbin/installer", "-pkg", "/tmp/Beta Setup.pkg", "-target", "/"]));

    let out = dir.path().join("casks.sudoers");
    cmd_generate(&sudoers_args(vec![dir.path().join(TRACE_FILE)], Some("alice"), &out)).unwrap();
    let doc = fs::read_to_string(&out).unwrap();
    assert_eq!(
        block_lines(&doc, "beta"),
        vec!["alice ALL=(ALL) NOPASSWD: /usr/sbin/installer -pkg /tmp/Beta\\ Setup.pkg -target /"]
    );
}

#[test]
fn test_reinstall_then_generate() {
    let dir = setup_workdir();
    let action = ScriptedAction::new()
        .script(
            "alpha",
            vec![Step::succeed(&[&["/usr/sbin/chown", "-R", "alice:staff", "/Applications/Alpha.app"]])],
        )
        .script(
            "beta",
            vec![
                Step::fail(&[&["/bin/rm", "-f", "/tmp/beta-1.0.pkg"]], "exit code 1"),
                Step::succeed(&[&["/bin/rm", "-f", "/tmp/beta-1.1.pkg"]]),
            ],
        );
    let selection = Selection::All;
    let catalog = FixedCatalog::new(&["alpha", "beta", "gamma"]);

    orchestrator(dir.path(), &action).run(&selection, &catalog).unwrap();
    orchestrator(dir.path(), &action).run(&selection, &catalog).unwrap();

    let out = dir.path().join("casks.sudoers");
    let summary = cmd_generate(&sudoers_args(vec![dir.path().join(TRACE_FILE)], Some("alice"), &out)).unwrap();
    assert_eq!(summary.entries, 3);
    assert_eq!(summary.blocks, 2);

    let doc = fs::read_to_string(&out).unwrap();
    assert_eq!(
        block_lines(&doc, "alpha"),
        vec!["alice ALL=(ALL) NOPASSWD: /usr/sbin/chown -R *\\:staff /Applications/Alpha.app"]
    );
    assert_eq!(
        block_lines(&doc, "beta"),
        vec!["alice ALL=(ALL) NOPASSWD: /bin/rm -f /tmp/beta-*.pkg"]
    );
    assert!(!doc.contains("cask: gamma"));
}

#[test]
fn test_bracketed_app_name_matches_only_itself() {
    let dir = setup_workdir();
    let trace = dir.path().join(TRACE_FILE);
    let out = dir.path().join("casks.sudoers");
    write_trace(
        &trace,
        &[
            ("foo", &["/usr/bin/xattr", "-dr", "com.apple.quarantine", "/Applications/Foo [Beta].app"]),
            ("foo", &["/usr/bin/true"]),
        ],
    );

    cmd_generate(&sudoers_args(vec![trace], Some("alice"), &out)).unwrap();
    let doc = fs::read_to_string(&out).unwrap();
    assert_eq!(
        block_lines(&doc, "foo"),
        vec![
            "alice ALL=(ALL) NOPASSWD: /usr/bin/xattr -dr com.apple.quarantine /Applications/Foo\\ \\[Beta\\].app",
            "alice ALL=(ALL) NOPASSWD: /usr/bin/true \"\"",
        ]
    );
}
