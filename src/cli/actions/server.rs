use crate::{auth::AuthConfig, sesame};
use anyhow::Result;
use secrecy::SecretString;
use tracing::debug;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
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

impl Args {
    #[must_use]
    pub fn auth_config(&self) -> AuthConfig {
        AuthConfig::new(
            self.frontend_base_url.clone(),
            self.access_token_secret.clone(),
            self.refresh_token_secret.clone(),
        )
        .with_access_token_ttl_seconds(self.access_token_ttl_seconds)
        .with_refresh_token_ttl_seconds(self.refresh_token_ttl_seconds)
        .with_access_cookie_name(self.access_cookie_name.clone())
        .with_refresh_cookie_name(self.refresh_cookie_name.clone())
        .with_login_throttle(self.login_throttle_limit, self.login_throttle_window_seconds)
    }
}

/// Execute the server action.
/// # Errors
/// Returns an error if the configuration is invalid or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let auth_config = args.auth_config();
    auth_config.validate()?;
    debug!(
        port = args.port,
        frontend_base_url = auth_config.frontend_base_url(),
        "Starting server"
    );
    sesame::new(args.port, args.dsn, auth_config).await
}
