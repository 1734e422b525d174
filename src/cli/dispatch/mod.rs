//! Command-line argument dispatch.
//!
//! Maps validated CLI matches to the action the binary executes.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::{auth, storage};
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;

    let storage_opts = storage::Options::parse(matches)?;
    let auth_opts = auth::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        db_max_connections: storage_opts.max_connections,
        db_max_lifetime_seconds: storage_opts.max_lifetime_seconds,
        gc_interval_seconds: storage_opts.gc_interval_seconds,
        token_secret: auth_opts.token_secret,
        token_issuer: auth_opts.token_issuer,
        session_ttl_seconds: auth_opts.session_ttl_seconds,
        totp_issuer: auth_opts.totp_issuer,
    }))
}
