// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Common argument: a digest such as sha256new_ABC...
fn digest_arg() -> Arg {
    Arg::new("digest")
        .required(true)
        .help("Implementation digest")
}

fn build_cli() -> Command {
    Command::new("zerostore")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Zerostore Contributors")
        .about("Content-addressed cache of verified implementation trees")
        .arg(
            Arg::new("store")
                .long("store")
                .value_name("DIR")
                .action(ArgAction::Append)
                .help("Cache directory; repeat to search several, the first one receives new entries"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Show debug output"),
        )
        .subcommand(
            Command::new("add")
                .about("Add an archive or a directory under its digest")
                .arg(digest_arg())
                .arg(Arg::new("source").required(true).help("Archive file or directory to add"))
                .arg(Arg::new("extract").help("Only extract this sub-directory of the archive"))
                .arg(Arg::new("mime_type").help("Archive MIME type")),
        )
        .subcommand(
            Command::new("copy")
                .about("Copy a directory that is named after its own digest into the cache")
                .arg(Arg::new("source").required(true).help("Directory named like sha256new_ABC...")),
        )
        .subcommand(
            Command::new("find")
                .about("Print the path of a cached implementation")
                .arg(digest_arg()),
        )
        .subcommand(Command::new("list").about("List all cached digests"))
        .subcommand(
            Command::new("remove")
                .about("Delete cached implementations")
                .arg(digest_arg().action(ArgAction::Append)),
        )
        .subcommand(
            Command::new("verify")
                .about("Re-check implementations against their digests")
                .arg(
                    Arg::new("targets")
                        .action(ArgAction::Append)
                        .help("Digests, or directories named after their digest"),
                ),
        )
        .subcommand(Command::new("audit").about("Verify every cached implementation and report failures"))
        .subcommand(Command::new("optimise").about("Hard-link identical files across cached implementations"))
        .subcommand(
            Command::new("purge")
                .about("Delete every cached implementation and leftover temporary directory")
                .arg(
                    Arg::new("yes")
                        .short('y')
                        .long("yes")
                        .action(ArgAction::SetTrue)
                        .help("Do not ask for confirmation"),
                ),
        )
        .subcommand(
            Command::new("manifest")
                .about("Print the manifest of a directory and its digest")
                .arg(Arg::new("directory").required(true).help("Directory to describe"))
                .arg(Arg::new("format").default_value("sha256new").help("Manifest format")),
        )
        .subcommand(
            Command::new("fetch")
                .about("Download implementations listed in a JSON file into the cache")
                .arg(Arg::new("file").required(true).help("JSON file holding a list of implementations"))
                .arg(
                    Arg::new("no_progress")
                        .long("no-progress")
                        .action(ArgAction::SetTrue)
                        .help("Do not draw progress bars"),
                ),
        )
        .subcommand(
            Command::new("serve")
                .about("Run the shared store service")
                .arg(
                    Arg::new("socket")
                        .long("socket")
                        .default_value("/run/zerostore/store.sock")
                        .help("Unix socket to listen on"),
                )
                .arg(
                    Arg::new("root")
                        .long("root")
                        .default_value("/var/cache/0install.net/implementations")
                        .help("Root directory of the shared cache"),
                )
                .arg(
                    Arg::new("socket_mode")
                        .long("socket-mode")
                        .default_value("660")
                        .help("Socket file permissions (octal)"),
                )
                .arg(
                    Arg::new("admin_gid")
                        .long("admin-gid")
                        .action(ArgAction::Append)
                        .help("Group allowed to remove and optimise entries"),
                )
                .arg(
                    Arg::new("no_contributions")
                        .long("no-contributions")
                        .action(ArgAction::SetTrue)
                        .help("Refuse additions from ordinary users"),
                ),
        )
        .subcommand(
            Command::new("completions")
                .about("Generate shell completion scripts")
                .arg(
                    Arg::new("shell")
                        .required(true)
                        .value_parser(["bash", "elvish", "fish", "powershell", "zsh"])
                        .help("Shell type"),
                ),
        )
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

    // Generate main man page
    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();

    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("zerostore.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
        return;
    }

    println!("cargo:warning=Man page generated at {}", man_path.display());
}
