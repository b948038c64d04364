// src/main.rs

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use commands::ExitStatus;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize tracing subscriber for logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(status) => status.into(),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            match e.downcast_ref::<zerostore::Error>() {
                Some(error) => ExitStatus::for_error(error).into(),
                None => ExitStatus::IoError.into(),
            }
        }
    }
}

fn run(cli: Cli) -> Result<ExitStatus> {
    let status = match cli.command {
        Commands::Add {
            digest,
            source,
            extract,
            mime_type,
        } => {
            let store = commands::open_cli_store(&cli.stores)?;
            commands::cmd_add(&store, &digest, &source, extract.as_deref(), mime_type.as_deref())?
        }
        Commands::Copy { source } => {
            let store = commands::open_cli_store(&cli.stores)?;
            commands::cmd_copy(&store, &source)?
        }
        Commands::Find { digest } => {
            let store = commands::open_cli_store(&cli.stores)?;
            commands::cmd_find(&store, &digest)?
        }
        Commands::List => {
            let store = commands::open_cli_store(&cli.stores)?;
            commands::cmd_list(&store)?
        }
        Commands::Remove { digests } => {
            let store = commands::open_cli_store(&cli.stores)?;
            commands::cmd_remove(&store, &digests)?
        }
        Commands::Verify { targets } => {
            let store = commands::open_cli_store(&cli.stores)?;
            commands::cmd_verify(&store, &targets)?
        }
        Commands::Audit => {
            let store = commands::open_cli_store(&cli.stores)?;
            commands::cmd_audit(&store)?
        }
        Commands::Optimise => {
            let store = commands::open_cli_store(&cli.stores)?;
            commands::cmd_optimise(&store)?
        }
        Commands::Purge { yes } => {
            let store = commands::open_cli_store(&cli.stores)?;
            commands::cmd_purge(&store, yes)?
        }
        Commands::Manifest { directory, format } => commands::cmd_manifest(&directory, &format)?,
        Commands::Fetch { file, no_progress } => {
            let store = commands::open_cli_store(&cli.stores)?;
            commands::cmd_fetch(&store, &file, no_progress)?
        }
        Commands::Serve {
            socket,
            root,
            socket_mode,
            admin_gids,
            no_contributions,
        } => commands::cmd_serve(&socket, &root, &socket_mode, &admin_gids, no_contributions)?,
        Commands::Completions { shell } => commands::cmd_completions(shell)?,
    };
    Ok(status)
}
