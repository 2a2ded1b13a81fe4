//! End-to-end session flows through the HTTP router, backed by in-memory
//! directories and token store and a manual clock.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE, COOKIE, SET_COOKIE},
        Method, Request, Response, StatusCode,
    },
    Router,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use secrecy::SecretString;
use serde_json::{json, Value};
use sesame::auth::{
    clock::ManualClock,
    delivery::REFRESH_TOKEN_HEADER,
    principal::{MemoryDirectory, Profile},
    refresh::store::{MemoryTokenStore, RefreshTokenRecord, RotateOutcome, TokenStore},
    throttle::{FixedWindowThrottle, LoginThrottle, NoopThrottle},
    AuthConfig, AuthState, PrincipalKind, Principals,
};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

const PASSWORD: &str = "correct horse battery staple";

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0)
        .single()
        .unwrap_or_default()
}

struct Harness {
    app: Router,
    store: Arc<MemoryTokenStore>,
    users: Arc<MemoryDirectory>,
    clock: Arc<ManualClock>,
    alice: Profile,
    root: Profile,
}

async fn harness_with(
    clock: Arc<ManualClock>,
    store: Arc<dyn TokenStore>,
    memory: Arc<MemoryTokenStore>,
    throttle: Option<(u32, i64)>,
) -> Result<Harness> {
    let users = Arc::new(MemoryDirectory::new(PrincipalKind::User));
    let admins = Arc::new(MemoryDirectory::new(PrincipalKind::Admin));
    let alice = users.add("alice", "alice@example.com", PASSWORD).await;
    let root = admins.add("root", "root@example.com", PASSWORD).await;

    let config = AuthConfig::new(
        "https://app.example.com".to_string(),
        SecretString::from("access-signing-secret".to_string()),
        SecretString::from("refresh-signing-secret".to_string()),
    );
    let throttle: Arc<dyn LoginThrottle> = match throttle {
        Some((limit, window)) => Arc::new(FixedWindowThrottle::new(
            limit,
            Duration::seconds(window),
            clock.clone(),
        )),
        None => Arc::new(NoopThrottle),
    };
    let state = AuthState::build(
        &config,
        store,
        Principals {
            directory: users.clone(),
            credentials: users.clone(),
        },
        Principals {
            directory: admins.clone(),
            credentials: admins.clone(),
        },
        throttle,
        clock.clone(),
    )?;

    Ok(Harness {
        app: sesame::sesame::router(&state),
        store: memory,
        users,
        clock,
        alice,
        root,
    })
}

async fn harness() -> Result<Harness> {
    let clock = Arc::new(ManualClock::new(start()));
    let store = Arc::new(MemoryTokenStore::new(clock.clone()));
    harness_with(clock, store.clone(), store, None).await
}

fn login_request(path: &str, username: &str, password: &str) -> Result<Request<Body>> {
    let body = json!({ "username": username, "password": password }).to_string();
    Ok(Request::builder()
        .method(Method::POST)
        .uri(path)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body))?)
}

fn post(path: &str, header: (&str, String)) -> Result<Request<Body>> {
    Ok(Request::builder()
        .method(Method::POST)
        .uri(path)
        .header(header.0, header.1)
        .body(Body::empty())?)
}

async fn send(app: &Router, request: Request<Body>) -> Result<Response<Body>> {
    Ok(app.clone().oneshot(request).await?)
}

async fn json_body(response: Response<Body>) -> Result<Value> {
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn set_cookies(response: &Response<Body>) -> Vec<String> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .map(str::to_string)
        .collect()
}

fn cookie_value(cookies: &[String], name: &str) -> Result<String> {
    cookies
        .iter()
        .filter_map(|cookie| cookie.split(';').next())
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
        .with_context(|| format!("no {name} cookie in {cookies:?}"))
}

fn string_field(body: &Value, field: &str) -> Result<String> {
    body.get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| anyhow!("missing {field} in {body}"))
}

async fn mobile_login(harness: &Harness, prefix: &str, username: &str) -> Result<Value> {
    let response = send(
        &harness.app,
        login_request(&format!("{prefix}/login/mobile"), username, PASSWORD)?,
    )
    .await?;
    assert_eq!(response.status(), StatusCode::OK);
    json_body(response).await
}

#[tokio::test]
async fn web_login_sets_scoped_cookies() -> Result<()> {
    let harness = harness().await?;

    let response = send(
        &harness.app,
        login_request("/v1/auth/user/login/web", " alice ", PASSWORD)?,
    )
    .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let cookies = set_cookies(&response);
    assert_eq!(cookies.len(), 2);
    let access = cookie_value(&cookies, "access_token")?;
    let refresh = cookie_value(&cookies, "refresh_token")?;
    assert_eq!(
        cookies[0],
        format!(
            "access_token={access}; Path=/; HttpOnly; SameSite=Lax; \
             Expires=Sat, 01 Jun 2024 12:15:00 GMT; Max-Age=900; Secure"
        )
    );
    assert_eq!(
        cookies[1],
        format!(
            "refresh_token={refresh}; Path=/v1/auth/user/session; HttpOnly; SameSite=Lax; \
             Expires=Sat, 08 Jun 2024 12:00:00 GMT; Max-Age=604800; Secure"
        )
    );

    let body = json_body(response).await?;
    assert_eq!(body["data"]["username"], "alice");
    assert!(body.get("accessToken").is_none());

    let records = harness.store.records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].principal_id, harness.alice.id);
    assert!(!records[0].is_revoked);
    Ok(())
}

#[tokio::test]
async fn wrong_password_is_rejected() -> Result<()> {
    let harness = harness().await?;
    let response = send(
        &harness.app,
        login_request("/v1/auth/user/login/web", "alice", "nope")?,
    )
    .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(set_cookies(&response).is_empty());

    // Admin credentials do not log in on the user routes.
    let response = send(
        &harness.app,
        login_request("/v1/auth/user/login/mobile", "root", PASSWORD)?,
    )
    .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(response).await?;
    assert_eq!(body["statusCode"], 401);
    assert!(harness.store.records().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn web_refresh_is_single_use() -> Result<()> {
    let harness = harness().await?;
    let response = send(
        &harness.app,
        login_request("/v1/auth/user/login/web", "alice", PASSWORD)?,
    )
    .await?;
    let first = cookie_value(&set_cookies(&response), "refresh_token")?;

    let refresh = |token: &str| {
        post(
            "/v1/auth/user/session/refresh/web",
            (COOKIE.as_str(), format!("refresh_token={token}")),
        )
    };

    let response = send(&harness.app, refresh(&first)?).await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let second = cookie_value(&set_cookies(&response), "refresh_token")?;
    assert_ne!(first, second);

    // Replaying the consumed token is treated as theft.
    let response = send(&harness.app, refresh(&first)?).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // The successor went down with it.
    let response = send(&harness.app, refresh(&second)?).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let records = harness.store.records().await;
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|record| record.is_revoked));
    assert_eq!(
        records.iter().filter(|record| record.is_superseded()).count(),
        1
    );
    Ok(())
}

#[tokio::test]
async fn mobile_refresh_returns_a_new_pair() -> Result<()> {
    let harness = harness().await?;
    let body = mobile_login(&harness, "/v1/auth/user", "alice").await?;
    assert_eq!(body["data"]["email"], "alice@example.com");
    let refresh = string_field(&body, "refreshToken")?;

    let response = send(
        &harness.app,
        post(
            "/v1/auth/user/session/refresh/mobile",
            (REFRESH_TOKEN_HEADER, refresh.clone()),
        )?,
    )
    .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(set_cookies(&response).is_empty());
    let pair = json_body(response).await?;
    let access = string_field(&pair, "accessToken")?;
    assert_ne!(string_field(&pair, "refreshToken")?, refresh);

    let response = send(
        &harness.app,
        Request::builder()
            .uri("/v1/auth/user/profile")
            .header(AUTHORIZATION, format!("Bearer {access}"))
            .body(Body::empty())?,
    )
    .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let profile = json_body(response).await?;
    assert_eq!(profile["id"], harness.alice.id.to_string());
    Ok(())
}

#[tokio::test]
async fn refresh_tokens_do_not_cross_kinds() -> Result<()> {
    let harness = harness().await?;
    let body = mobile_login(&harness, "/v1/auth/admin", "root").await?;
    let refresh = string_field(&body, "refreshToken")?;

    let response = send(
        &harness.app,
        post(
            "/v1/auth/user/session/refresh/mobile",
            (REFRESH_TOKEN_HEADER, refresh.clone()),
        )?,
    )
    .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Logging out on the wrong kind leaves the admin session alone.
    let response = send(
        &harness.app,
        post(
            "/v1/auth/user/session/logout/mobile",
            (REFRESH_TOKEN_HEADER, refresh.clone()),
        )?,
    )
    .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let records = harness.store.records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].principal_id, harness.root.id);
    assert!(!records[0].is_revoked);

    let response = send(
        &harness.app,
        post(
            "/v1/auth/admin/session/refresh/mobile",
            (REFRESH_TOKEN_HEADER, refresh),
        )?,
    )
    .await?;
    assert_eq!(response.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn expired_refresh_is_rejected_without_writes() -> Result<()> {
    let harness = harness().await?;
    let body = mobile_login(&harness, "/v1/auth/user", "alice").await?;
    let refresh = string_field(&body, "refreshToken")?;

    harness.clock.advance(Duration::seconds(604_800));

    let response = send(
        &harness.app,
        post(
            "/v1/auth/user/session/refresh/mobile",
            (REFRESH_TOKEN_HEADER, refresh),
        )?,
    )
    .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let records = harness.store.records().await;
    assert_eq!(records.len(), 1);
    assert!(!records[0].is_revoked);
    Ok(())
}

#[tokio::test]
async fn blocked_principal_cannot_refresh() -> Result<()> {
    let harness = harness().await?;
    let body = mobile_login(&harness, "/v1/auth/user", "alice").await?;
    let refresh = string_field(&body, "refreshToken")?;
    let access = string_field(&body, "accessToken")?;

    harness.users.set_active(harness.alice.id, false).await;

    let response = send(
        &harness.app,
        post(
            "/v1/auth/user/session/refresh/mobile",
            (REFRESH_TOKEN_HEADER, refresh),
        )?,
    )
    .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = send(
        &harness.app,
        Request::builder()
            .uri("/v1/auth/user/profile")
            .header(AUTHORIZATION, format!("Bearer {access}"))
            .body(Body::empty())?,
    )
    .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn logout_is_idempotent_and_clears_cookies() -> Result<()> {
    let harness = harness().await?;
    let response = send(
        &harness.app,
        login_request("/v1/auth/user/login/web", "alice", PASSWORD)?,
    )
    .await?;
    let refresh = cookie_value(&set_cookies(&response), "refresh_token")?;

    let logout = || {
        post(
            "/v1/auth/user/session/logout/web",
            (COOKIE.as_str(), format!("refresh_token={refresh}")),
        )
    };

    for _ in 0..2 {
        let response = send(&harness.app, logout()?).await?;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let cookies = set_cookies(&response);
        assert_eq!(cookies.len(), 2);
        assert!(cookies
            .iter()
            .all(|cookie| cookie.contains("Expires=Thu, 01 Jan 1970 00:00:00 GMT; Max-Age=0")));
    }

    let records = harness.store.records().await;
    assert!(records[0].is_revoked);
    assert!(!records[0].is_superseded());
    assert_eq!(records[0].revoked_at, Some(start()));

    let response = send(
        &harness.app,
        post(
            "/v1/auth/user/session/refresh/web",
            (COOKIE.as_str(), format!("refresh_token={refresh}")),
        )?,
    )
    .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn logout_without_token_still_clears_cookies() -> Result<()> {
    let harness = harness().await?;
    let response = send(
        &harness.app,
        Request::builder()
            .method(Method::POST)
            .uri("/v1/auth/admin/session/logout/web")
            .body(Body::empty())?,
    )
    .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let cookies = set_cookies(&response);
    assert_eq!(cookies.len(), 2);
    assert!(cookies[1].contains("Path=/v1/auth/admin/session"));
    Ok(())
}

/// Delegates to memory but cannot revoke.
struct RevokeFails(Arc<MemoryTokenStore>);

#[async_trait]
impl TokenStore for RevokeFails {
    async fn insert(&self, record: &RefreshTokenRecord) -> Result<()> {
        self.0.insert(record).await
    }

    async fn find(&self, id: Uuid, kind: PrincipalKind) -> Result<Option<RefreshTokenRecord>> {
        self.0.find(id, kind).await
    }

    async fn revoke(&self, _id: Uuid, _kind: PrincipalKind) -> Result<()> {
        Err(anyhow!("connection reset by peer"))
    }

    async fn rotate(
        &self,
        predecessor: Uuid,
        kind: PrincipalKind,
        successor: &RefreshTokenRecord,
    ) -> Result<RotateOutcome> {
        self.0.rotate(predecessor, kind, successor).await
    }

    async fn revoke_lineage(&self, id: Uuid, kind: PrincipalKind) -> Result<u64> {
        self.0.revoke_lineage(id, kind).await
    }
}

#[tokio::test]
async fn logout_store_failure_is_retryable_and_clears_cookies() -> Result<()> {
    let clock = Arc::new(ManualClock::new(start()));
    let memory = Arc::new(MemoryTokenStore::new(clock.clone()));
    let failing = Arc::new(RevokeFails(memory.clone()));
    let harness = harness_with(clock, failing, memory, None).await?;
    let response = send(
        &harness.app,
        login_request("/v1/auth/user/login/web", "alice", PASSWORD)?,
    )
    .await?;
    let refresh = cookie_value(&set_cookies(&response), "refresh_token")?;

    let response = send(
        &harness.app,
        post(
            "/v1/auth/user/session/logout/web",
            (COOKIE.as_str(), format!("refresh_token={refresh}")),
        )?,
    )
    .await?;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(set_cookies(&response).len(), 2);

    let records = harness.store.records().await;
    assert!(!records[0].is_revoked);
    Ok(())
}

#[tokio::test]
async fn profile_enforces_roles() -> Result<()> {
    let harness = harness().await?;
    let user = mobile_login(&harness, "/v1/auth/user", "alice").await?;
    let admin = mobile_login(&harness, "/v1/auth/admin", "root").await?;
    let user_access = string_field(&user, "accessToken")?;
    let admin_access = string_field(&admin, "accessToken")?;

    let profile = |path: &str, access: Option<&str>| {
        let mut builder = Request::builder().uri(path);
        if let Some(access) = access {
            builder = builder.header(AUTHORIZATION, format!("Bearer {access}"));
        }
        builder.body(Body::empty())
    };

    let response = send(&harness.app, profile("/v1/auth/admin/profile", None)?).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = send(
        &harness.app,
        profile("/v1/auth/admin/profile", Some(&user_access))?,
    )
    .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = send(
        &harness.app,
        profile("/v1/auth/admin/profile", Some(&admin_access))?,
    )
    .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await?["username"], "root");

    // The access cookie works in place of a bearer token.
    let response = send(
        &harness.app,
        Request::builder()
            .uri("/v1/auth/user/profile")
            .header(COOKIE, format!("access_token={user_access}"))
            .body(Body::empty())?,
    )
    .await?;
    assert_eq!(response.status(), StatusCode::OK);

    harness.clock.advance(Duration::seconds(900));
    let response = send(
        &harness.app,
        profile("/v1/auth/user/profile", Some(&user_access))?,
    )
    .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn repeated_failed_logins_are_throttled() -> Result<()> {
    let clock = Arc::new(ManualClock::new(start()));
    let store = Arc::new(MemoryTokenStore::new(clock.clone()));
    let harness = harness_with(clock, store.clone(), store, Some((2, 300))).await?;

    for _ in 0..2 {
        let response = send(
            &harness.app,
            login_request("/v1/auth/user/login/web", "alice", "guess")?,
        )
        .await?;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    // Even the right password is refused until the window passes.
    let response = send(
        &harness.app,
        login_request("/v1/auth/user/login/web", "alice", PASSWORD)?,
    )
    .await?;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    // The admin kind keeps its own counters.
    let response = send(
        &harness.app,
        login_request("/v1/auth/admin/login/web", "alice", "guess")?,
    )
    .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    harness.clock.advance(Duration::seconds(300));
    let response = send(
        &harness.app,
        login_request("/v1/auth/user/login/web", "alice", PASSWORD)?,
    )
    .await?;
    assert_eq!(response.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn oversized_ttl_is_refused_at_build() {
    let clock = Arc::new(ManualClock::new(start()));
    let users = Arc::new(MemoryDirectory::new(PrincipalKind::User));
    let admins = Arc::new(MemoryDirectory::new(PrincipalKind::Admin));
    let config = AuthConfig::new(
        "https://app.example.com".to_string(),
        SecretString::from("access-signing-secret".to_string()),
        SecretString::from("refresh-signing-secret".to_string()),
    )
    .with_refresh_token_ttl_seconds(10_000_000_000_000);

    let built = AuthState::build(
        &config,
        Arc::new(MemoryTokenStore::new(clock.clone())),
        Principals {
            directory: users.clone(),
            credentials: users,
        },
        Principals {
            directory: admins.clone(),
            credentials: admins,
        },
        Arc::new(NoopThrottle),
        clock,
    );
    assert!(built.is_err());
}
