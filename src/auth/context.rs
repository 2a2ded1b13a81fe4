//! Connection metadata captured when a refresh record is created.

use axum::http::{header::USER_AGENT, HeaderMap};
use regex::Regex;
use std::sync::OnceLock;

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SessionContext {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub browser: Option<String>,
    pub os: Option<String>,
}

impl SessionContext {
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let user_agent = headers
            .get(USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);
        Self {
            ip_address: extract_client_ip(headers),
            browser: user_agent.as_deref().and_then(browser_name),
            os: user_agent.as_deref().and_then(os_name),
            user_agent,
        }
    }
}

/// First hop of `x-forwarded-for`, else `x-real-ip`.
#[must_use]
pub fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

// Order matters: Edge and Opera also advertise Chrome, Chrome also advertises Safari.
const BROWSERS: &[(&str, &str)] = &[
    ("Edge", r"Edg(?:e|A|iOS)?/"),
    ("Opera", r"(?:OPR|Opera)/"),
    ("Firefox", r"(?:Firefox|FxiOS)/"),
    ("Chrome", r"(?:Chrome|CriOS)/"),
    ("Safari", r"Version/[\d.]+.*Safari/"),
    ("Internet Explorer", r"(?:MSIE |Trident/)"),
];

const SYSTEMS: &[(&str, &str)] = &[
    ("Windows", r"Windows NT"),
    ("iOS", r"(?:iPhone|iPad|iPod)"),
    ("Mac OS", r"Mac OS X"),
    ("Android", r"Android"),
    ("Linux", r"Linux"),
];

fn compiled(table: &'static [(&'static str, &'static str)]) -> Vec<(&'static str, Regex)> {
    table
        .iter()
        .filter_map(|(name, pattern)| Regex::new(pattern).ok().map(|re| (*name, re)))
        .collect()
}

fn first_match(rules: &[(&'static str, Regex)], user_agent: &str) -> Option<String> {
    rules
        .iter()
        .find(|(_, re)| re.is_match(user_agent))
        .map(|(name, _)| (*name).to_string())
}

fn browser_name(user_agent: &str) -> Option<String> {
    static RULES: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    first_match(RULES.get_or_init(|| compiled(BROWSERS)), user_agent)
}

fn os_name(user_agent: &str) -> Option<String> {
    static RULES: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    first_match(RULES.get_or_init(|| compiled(SYSTEMS)), user_agent)
}
