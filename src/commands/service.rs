// src/commands/service.rs
//! Store service and shell integration commands

use super::ExitStatus;
use crate::cli::Cli;
use clap::CommandFactory;
use std::io;
use std::path::Path;
use tracing::info;
use zerostore::service::{ServiceConfig, StoreServer};
use zerostore::{Error, Result};

/// Run the shared store service until the listener fails
pub fn cmd_serve(
    socket: &Path,
    root: &Path,
    socket_mode: &str,
    admin_gids: &[u32],
    no_contributions: bool,
) -> Result<ExitStatus> {
    let mode = u32::from_str_radix(socket_mode, 8)
        .map_err(|_| Error::ParseError(format!("Invalid socket mode: {}", socket_mode)))?;

    let mut config = ServiceConfig::new()
        .with_socket_path(socket)
        .with_store_root(root)
        .with_socket_mode(mode)
        .with_contributions(!no_contributions);
    if !admin_gids.is_empty() {
        config = config.with_admin_gids(admin_gids.to_vec());
    }

    info!("Starting store service for {}", root.display());
    StoreServer::new(config)?.run()?;
    Ok(ExitStatus::Ok)
}

pub fn cmd_completions(shell: clap_complete::Shell) -> Result<ExitStatus> {
    clap_complete::generate(shell, &mut Cli::command(), "zerostore", &mut io::stdout());
    Ok(ExitStatus::Ok)
}
