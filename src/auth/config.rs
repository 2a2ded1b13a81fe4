//! Token lifetimes, cookie names, and login throttling settings.

use anyhow::{bail, Result};
use secrecy::{ExposeSecret, SecretString};

const DEFAULT_ACCESS_TOKEN_TTL_SECONDS: i64 = 15 * 60;
const DEFAULT_REFRESH_TOKEN_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;
const DEFAULT_ACCESS_COOKIE_NAME: &str = "access_token";
const DEFAULT_REFRESH_COOKIE_NAME: &str = "refresh_token";
const DEFAULT_LOGIN_THROTTLE_LIMIT: u32 = 5;
const DEFAULT_LOGIN_THROTTLE_WINDOW_SECONDS: i64 = 5 * 60;

/// Upper bound for token TTLs and the throttle window: ten years.
pub const MAX_TTL_SECONDS: i64 = 10 * 365 * 24 * 60 * 60;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    frontend_base_url: String,
    access_token_secret: SecretString,
    refresh_token_secret: SecretString,
    access_token_ttl_seconds: i64,
    refresh_token_ttl_seconds: i64,
    access_cookie_name: String,
    refresh_cookie_name: String,
    login_throttle_limit: u32,
    login_throttle_window_seconds: i64,
}

impl AuthConfig {
    #[must_use]
    pub fn new(
        frontend_base_url: String,
        access_token_secret: SecretString,
        refresh_token_secret: SecretString,
    ) -> Self {
        Self {
            frontend_base_url,
            access_token_secret,
            refresh_token_secret,
            access_token_ttl_seconds: DEFAULT_ACCESS_TOKEN_TTL_SECONDS,
            refresh_token_ttl_seconds: DEFAULT_REFRESH_TOKEN_TTL_SECONDS,
            access_cookie_name: DEFAULT_ACCESS_COOKIE_NAME.to_string(),
            refresh_cookie_name: DEFAULT_REFRESH_COOKIE_NAME.to_string(),
            login_throttle_limit: DEFAULT_LOGIN_THROTTLE_LIMIT,
            login_throttle_window_seconds: DEFAULT_LOGIN_THROTTLE_WINDOW_SECONDS,
        }
    }

    #[must_use]
    pub fn with_access_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.access_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_refresh_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.refresh_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_access_cookie_name(mut self, name: String) -> Self {
        self.access_cookie_name = name;
        self
    }

    #[must_use]
    pub fn with_refresh_cookie_name(mut self, name: String) -> Self {
        self.refresh_cookie_name = name;
        self
    }

    #[must_use]
    pub fn with_login_throttle(mut self, limit: u32, window_seconds: i64) -> Self {
        self.login_throttle_limit = limit;
        self.login_throttle_window_seconds = window_seconds;
        self
    }

    /// Reject settings that would weaken the token scheme.
    ///
    /// # Errors
    /// Returns an error for identical or empty secrets and for TTLs outside
    /// `1..=MAX_TTL_SECONDS`.
    pub fn validate(&self) -> Result<()> {
        let access = self.access_token_secret.expose_secret();
        let refresh = self.refresh_token_secret.expose_secret();
        if access.is_empty() || refresh.is_empty() {
            bail!("token secrets must not be empty");
        }
        if access == refresh {
            bail!("access and refresh token secrets must differ");
        }
        let bounded = 1..=MAX_TTL_SECONDS;
        if !bounded.contains(&self.access_token_ttl_seconds)
            || !bounded.contains(&self.refresh_token_ttl_seconds)
        {
            bail!("token TTLs must be between 1 and {MAX_TTL_SECONDS} seconds");
        }
        if !bounded.contains(&self.login_throttle_window_seconds) {
            bail!("login throttle window must be between 1 and {MAX_TTL_SECONDS} seconds");
        }
        if self.access_cookie_name == self.refresh_cookie_name {
            bail!("access and refresh cookie names must differ");
        }
        Ok(())
    }

    #[must_use]
    pub fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    #[must_use]
    pub fn access_token_secret(&self) -> &SecretString {
        &self.access_token_secret
    }

    #[must_use]
    pub fn refresh_token_secret(&self) -> &SecretString {
        &self.refresh_token_secret
    }

    #[must_use]
    pub fn access_token_ttl_seconds(&self) -> i64 {
        self.access_token_ttl_seconds
    }

    #[must_use]
    pub fn refresh_token_ttl_seconds(&self) -> i64 {
        self.refresh_token_ttl_seconds
    }

    #[must_use]
    pub fn access_cookie_name(&self) -> &str {
        &self.access_cookie_name
    }

    #[must_use]
    pub fn refresh_cookie_name(&self) -> &str {
        &self.refresh_cookie_name
    }

    #[must_use]
    pub fn login_throttle_limit(&self) -> u32 {
        self.login_throttle_limit
    }

    #[must_use]
    pub fn login_throttle_window_seconds(&self) -> i64 {
        self.login_throttle_window_seconds
    }

    /// Cookies are only marked secure when the frontend is served over HTTPS.
    #[must_use]
    pub fn cookie_secure(&self) -> bool {
        self.frontend_base_url.starts_with("https://")
    }
}
