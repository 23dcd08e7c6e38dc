// build.rs

use clap::{Arg, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Common argument: index store path
fn db_path_arg() -> Arg {
    Arg::new("db_path")
        .short('d')
        .long("db-path")
        .value_name("PATH")
        .default_value("/var/lib/lure/db")
        .help("Index store path")
}

/// Common argument: repository clone directory
fn repo_dir_arg() -> Arg {
    Arg::new("repo_dir")
        .short('r')
        .long("repo-dir")
        .default_value("/var/lib/lure/repo")
        .help("Directory holding repository clones")
}

fn build_cli() -> Command {
    Command::new("lure-index")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Repository index for the LURE user package repository")
        .subcommand(
            Command::new("sync")
                .about("Run one sync cycle over the configured repositories")
                .arg(db_path_arg())
                .arg(repo_dir_arg())
                .arg(
                    Arg::new("repos")
                        .long("repo")
                        .action(clap::ArgAction::Append)
                        .help("Repository to sync, as name=url"),
                )
                .arg(
                    Arg::new("keep_going")
                        .long("keep-going")
                        .action(clap::ArgAction::SetTrue)
                        .help("Keep syncing remaining repositories when one fails"),
                ),
        )
        .subcommand(
            Command::new("serve")
                .about("Serve the webhook endpoint and sync on push events")
                .arg(db_path_arg())
                .arg(repo_dir_arg())
                .arg(
                    Arg::new("addr")
                        .short('a')
                        .long("addr")
                        .default_value("0.0.0.0:8080")
                        .help("Address to bind to"),
                ),
        )
        .subcommand(
            Command::new("query")
                .about("Look up a package in the index")
                .arg(Arg::new("name").required(true).help("Package name"))
                .arg(db_path_arg()),
        )
        .subcommand(
            Command::new("completions")
                .about("Generate shell completion scripts")
                .arg(
                    Arg::new("shell")
                        .required(true)
                        .value_parser(["bash", "zsh", "fish", "powershell"])
                        .help("Shell type"),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

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

    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();

    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("lure-index.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
