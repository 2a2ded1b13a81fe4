//! Command-line argument dispatch.
//!
//! Maps validated CLI matches to an [`Action`] carrying the server
//! configuration.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::auth;
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;

    let auth_opts = auth::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        frontend_base_url: auth_opts.frontend_base_url,
        access_token_secret: auth_opts.access_token_secret,
        refresh_token_secret: auth_opts.refresh_token_secret,
        access_token_ttl_seconds: auth_opts.access_token_ttl_seconds,
        refresh_token_ttl_seconds: auth_opts.refresh_token_ttl_seconds,
        access_cookie_name: auth_opts.access_cookie_name,
        refresh_cookie_name: auth_opts.refresh_cookie_name,
        login_throttle_limit: auth_opts.login_throttle_limit,
        login_throttle_window_seconds: auth_opts.login_throttle_window_seconds,
    }))
}
