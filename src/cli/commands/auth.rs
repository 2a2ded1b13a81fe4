use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

use crate::auth::config::MAX_TTL_SECONDS;

pub const ARG_FRONTEND_BASE_URL: &str = "frontend-base-url";
pub const ARG_ACCESS_TOKEN_SECRET: &str = "access-token-secret";
pub const ARG_REFRESH_TOKEN_SECRET: &str = "refresh-token-secret";
pub const ARG_ACCESS_TOKEN_TTL_SECONDS: &str = "access-token-ttl-seconds";
pub const ARG_REFRESH_TOKEN_TTL_SECONDS: &str = "refresh-token-ttl-seconds";
pub const ARG_ACCESS_COOKIE_NAME: &str = "access-cookie-name";
pub const ARG_REFRESH_COOKIE_NAME: &str = "refresh-cookie-name";
pub const ARG_LOGIN_THROTTLE_LIMIT: &str = "login-throttle-limit";
pub const ARG_LOGIN_THROTTLE_WINDOW_SECONDS: &str = "login-throttle-window-seconds";

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_token_args(command);
    let command = with_cookie_args(command);
    with_throttle_args(command)
}

fn with_token_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_ACCESS_TOKEN_SECRET)
                .long(ARG_ACCESS_TOKEN_SECRET)
                .help("HS256 secret for access tokens")
                .env("SESAME_ACCESS_TOKEN_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_REFRESH_TOKEN_SECRET)
                .long(ARG_REFRESH_TOKEN_SECRET)
                .help("HS256 secret for refresh tokens, must differ from the access secret")
                .env("SESAME_REFRESH_TOKEN_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_ACCESS_TOKEN_TTL_SECONDS)
                .long(ARG_ACCESS_TOKEN_TTL_SECONDS)
                .help("Access token TTL in seconds")
                .env("SESAME_ACCESS_TOKEN_TTL_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_TTL_SECONDS)),
        )
        .arg(
            Arg::new(ARG_REFRESH_TOKEN_TTL_SECONDS)
                .long(ARG_REFRESH_TOKEN_TTL_SECONDS)
                .help("Refresh token TTL in seconds")
                .env("SESAME_REFRESH_TOKEN_TTL_SECONDS")
                .default_value("604800")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_TTL_SECONDS)),
        )
}

fn with_cookie_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_FRONTEND_BASE_URL)
                .long(ARG_FRONTEND_BASE_URL)
                .help("Frontend base URL, used as the CORS origin; https marks cookies Secure")
                .env("SESAME_FRONTEND_BASE_URL")
                .default_value("http://localhost:5173"),
        )
        .arg(
            Arg::new(ARG_ACCESS_COOKIE_NAME)
                .long(ARG_ACCESS_COOKIE_NAME)
                .help("Cookie name for the access token")
                .env("SESAME_ACCESS_COOKIE_NAME")
                .default_value("access_token"),
        )
        .arg(
            Arg::new(ARG_REFRESH_COOKIE_NAME)
                .long(ARG_REFRESH_COOKIE_NAME)
                .help("Cookie name for the refresh token")
                .env("SESAME_REFRESH_COOKIE_NAME")
                .default_value("refresh_token"),
        )
}

fn with_throttle_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_LOGIN_THROTTLE_LIMIT)
                .long(ARG_LOGIN_THROTTLE_LIMIT)
                .help("Login attempts allowed per username and IP within the window, 0 disables")
                .env("SESAME_LOGIN_THROTTLE_LIMIT")
                .default_value("5")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_LOGIN_THROTTLE_WINDOW_SECONDS)
                .long(ARG_LOGIN_THROTTLE_WINDOW_SECONDS)
                .help("Login throttle window in seconds")
                .env("SESAME_LOGIN_THROTTLE_WINDOW_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_TTL_SECONDS)),
        )
}

#[derive(Debug)]
pub struct Options {
    pub frontend_base_url: String,
    pub access_token_secret: SecretString,
    pub refresh_token_secret: SecretString,
    pub access_token_ttl_seconds: i64,
    pub refresh_token_ttl_seconds: i64,
    pub access_cookie_name: String,
    pub refresh_cookie_name: String,
    pub login_throttle_limit: u32,
    pub login_throttle_window_seconds: i64,
}

impl Options {
    /// # Errors
    /// Returns an error if a required argument is missing.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let string = |id: &str| -> Result<String> {
            matches
                .get_one::<String>(id)
                .cloned()
                .with_context(|| format!("missing required argument: --{id}"))
        };
        let number = |id: &str| -> Result<i64> {
            matches
                .get_one::<i64>(id)
                .copied()
                .with_context(|| format!("missing required argument: --{id}"))
        };

        Ok(Self {
            frontend_base_url: string(ARG_FRONTEND_BASE_URL)?,
            access_token_secret: SecretString::from(string(ARG_ACCESS_TOKEN_SECRET)?),
            refresh_token_secret: SecretString::from(string(ARG_REFRESH_TOKEN_SECRET)?),
            access_token_ttl_seconds: number(ARG_ACCESS_TOKEN_TTL_SECONDS)?,
            refresh_token_ttl_seconds: number(ARG_REFRESH_TOKEN_TTL_SECONDS)?,
            access_cookie_name: string(ARG_ACCESS_COOKIE_NAME)?,
            refresh_cookie_name: string(ARG_REFRESH_COOKIE_NAME)?,
            login_throttle_limit: matches
                .get_one::<u32>(ARG_LOGIN_THROTTLE_LIMIT)
                .copied()
                .unwrap_or(5),
            login_throttle_window_seconds: number(ARG_LOGIN_THROTTLE_WINDOW_SECONDS)?,
        })
    }
}
