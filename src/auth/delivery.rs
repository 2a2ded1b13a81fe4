//! Per-channel delivery of a token pair.
//!
//! Web clients receive two `HttpOnly` cookies. The access cookie is sent on
//! every path; the refresh cookie is scoped to the kind's `/session` routes so
//! the browser never attaches it elsewhere. Mobile clients receive both
//! tokens in the body, then send the access token as a bearer token and the
//! refresh token in [`REFRESH_TOKEN_HEADER`].

use axum::http::{
    header::{AUTHORIZATION, COOKIE},
    HeaderMap, HeaderValue,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{clock::Clock, token::expires_after};
use crate::error::{Error, Result};

pub const REFRESH_TOKEN_HEADER: &str = "x-refresh-token";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Channel {
    Web,
    Mobile,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// What a handler attaches to its response.
#[derive(Clone, Debug, Default)]
pub struct Delivered {
    pub cookies: Vec<HeaderValue>,
    pub body: Option<TokenPair>,
}

pub trait DeliveryStrategy: Send + Sync {
    /// # Errors
    /// `Error::Internal` when a cookie value cannot be encoded as a header.
    fn deliver(&self, tokens: TokenPair) -> Result<Delivered>;

    /// # Errors
    /// `Error::Internal` when a cookie value cannot be encoded as a header.
    fn clear(&self) -> Result<Delivered>;
}

#[derive(Clone, Debug)]
pub struct CookieSettings {
    pub access_name: String,
    pub refresh_name: String,
    /// Path the refresh cookie is scoped to, e.g. `/v1/auth/user/session`.
    pub refresh_path: String,
    pub secure: bool,
}

pub struct WebDelivery {
    cookies: CookieSettings,
    access_ttl: Duration,
    refresh_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl WebDelivery {
    #[must_use]
    pub fn new(
        cookies: CookieSettings,
        access_ttl: Duration,
        refresh_ttl: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            cookies,
            access_ttl,
            refresh_ttl,
            clock,
        }
    }

    fn cookie(
        &self,
        name: &str,
        value: &str,
        path: &str,
        expires: DateTime<Utc>,
        max_age: i64,
    ) -> Result<HeaderValue> {
        let mut cookie = format!(
            "{name}={value}; Path={path}; HttpOnly; SameSite=Lax; Expires={}; Max-Age={max_age}",
            expires.format("%a, %d %b %Y %H:%M:%S GMT")
        );
        if self.cookies.secure {
            cookie.push_str("; Secure");
        }
        HeaderValue::from_str(&cookie)
            .map_err(|err| Error::Internal(anyhow::anyhow!("invalid cookie header: {err}")))
    }
}

impl DeliveryStrategy for WebDelivery {
    fn deliver(&self, tokens: TokenPair) -> Result<Delivered> {
        let now = self.clock.now();
        let access = self.cookie(
            &self.cookies.access_name,
            &tokens.access_token,
            "/",
            expires_after(now, self.access_ttl)?,
            self.access_ttl.num_seconds(),
        )?;
        let refresh = self.cookie(
            &self.cookies.refresh_name,
            &tokens.refresh_token,
            &self.cookies.refresh_path,
            expires_after(now, self.refresh_ttl)?,
            self.refresh_ttl.num_seconds(),
        )?;
        Ok(Delivered {
            cookies: vec![access, refresh],
            body: None,
        })
    }

    fn clear(&self) -> Result<Delivered> {
        let epoch = DateTime::<Utc>::UNIX_EPOCH;
        let access = self.cookie(&self.cookies.access_name, "", "/", epoch, 0)?;
        let refresh = self.cookie(
            &self.cookies.refresh_name,
            "",
            &self.cookies.refresh_path,
            epoch,
            0,
        )?;
        Ok(Delivered {
            cookies: vec![access, refresh],
            body: None,
        })
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct MobileDelivery;

impl DeliveryStrategy for MobileDelivery {
    fn deliver(&self, tokens: TokenPair) -> Result<Delivered> {
        Ok(Delivered {
            cookies: Vec::new(),
            body: Some(tokens),
        })
    }

    fn clear(&self) -> Result<Delivered> {
        Ok(Delivered::default())
    }
}

/// Both strategies for one principal kind.
pub struct SessionDelivery {
    web: WebDelivery,
    mobile: MobileDelivery,
}

impl SessionDelivery {
    #[must_use]
    pub fn new(web: WebDelivery) -> Self {
        Self {
            web,
            mobile: MobileDelivery,
        }
    }

    #[must_use]
    pub fn for_channel(&self, channel: Channel) -> &dyn DeliveryStrategy {
        match channel {
            Channel::Web => &self.web,
            Channel::Mobile => &self.mobile,
        }
    }
}

/// Value of a named cookie from the `Cookie` request header(s).
#[must_use]
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

#[must_use]
pub fn refresh_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(REFRESH_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
