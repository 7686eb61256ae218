// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Common argument: whitespace-separated cask list
fn casks_arg(long: &'static str) -> Arg {
    Arg::new("casks_list")
        .long(long)
        .env("CASKS")
        .value_name("LIST")
        .help("Whitespace-separated cask tokens")
}

fn reinstall_cli() -> Command {
    Command::new("cask-reinstall")
        .version(env!("CARGO_PKG_VERSION"))
        .author("caskgrant Contributors")
        .about("Reinstall Homebrew casks in a resumable batch, tracing every command run through sudo")
        .arg(Arg::new("casks").num_args(0..).help("Cask tokens to reinstall"))
        .arg(casks_arg("cask-list"))
        .arg(
            Arg::new("workdir")
                .short('w')
                .long("workdir")
                .env("REINSTALL_WORKDIR")
                .default_value(".")
                .help("Directory holding the checkpoint, trace log, install log and lock"),
        )
        .arg(
            Arg::new("prefetch")
                .long("prefetch")
                .env("PREFETCH")
                .action(ArgAction::SetTrue)
                .help("Download all installers in parallel before reinstalling"),
        )
        .arg(
            Arg::new("jobs")
                .short('j')
                .long("jobs")
                .env("THREADS")
                .default_value("32")
                .help("Concurrent downloads during prefetch"),
        )
        .arg(
            Arg::new("timeout_secs")
                .long("timeout-secs")
                .env("REINSTALL_TIMEOUT")
                .default_value("3600")
                .help("Seconds before a single reinstall is killed"),
        )
        .arg(
            Arg::new("brew")
                .long("brew")
                .env("BREW")
                .default_value("brew")
                .help("brew executable"),
        )
        .arg(
            Arg::new("import_log")
                .long("import-log")
                .value_name("PATH")
                .help("Convert a raw install log from an older run into trace entries, then exit"),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .action(ArgAction::SetTrue)
                .help("Log progress instead of drawing a progress bar"),
        )
}

fn sudoers_cli() -> Command {
    Command::new("cask-sudoers")
        .version(env!("CARGO_PKG_VERSION"))
        .author("caskgrant Contributors")
        .about("Generate per-cask NOPASSWD sudoers rules from reinstall trace logs")
        .arg(
            Arg::new("logs")
                .long("logs")
                .env("LOGS")
                .value_name("PATHS")
                .help("Trace logs to mine, ':'-separated (required)"),
        )
        .arg(
            Arg::new("target_user")
                .long("target-user")
                .env("TARGET_USER")
                .value_name("USER")
                .help("User the rules are granted to (required)"),
        )
        .arg(casks_arg("casks"))
        .arg(
            Arg::new("out")
                .short('o')
                .long("out")
                .env("SUDOERS_OUT")
                .default_value("./homebrew-cask.nopasswd.sudoers")
                .help("Output file, replaced atomically"),
        )
}

fn render(cmd: Command, man_dir: &Path) {
    let name = cmd.get_name().to_string();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();

    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page for {}: {}", name, e);
        return;
    }

    let man_path = man_dir.join(format!("{}.1", name));
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Create man directory - use CARGO_MANIFEST_DIR which is always set by cargo
    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=CARGO_MANIFEST_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = manifest_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    render(reinstall_cli(), &man_dir);
    render(sudoers_cli(), &man_dir);
}
