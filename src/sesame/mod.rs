use crate::{
    auth::{
        clock::{Clock, SystemClock},
        rbac::{enforce, AccessRule, Enforcement, Policy},
        refresh::postgres::PgTokenStore,
        route_prefix,
        throttle::{FixedWindowThrottle, LoginThrottle, NoopThrottle},
        AuthConfig, AuthState, Principals, PrincipalKind,
    },
    directory::PgDirectory,
};
use anyhow::{anyhow, Context, Result};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderName, HeaderValue, Method, Request,
    },
    middleware::from_fn_with_state,
    routing::{get, post},
    Extension, Router,
};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;
use url::Url;

pub mod handlers;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

/// Auth routes for both kinds, each under its own prefix.
#[must_use]
pub fn router(auth: &AuthState) -> Router {
    Router::new()
        .nest(
            route_prefix(PrincipalKind::User),
            kind_router(auth, PrincipalKind::User),
        )
        .nest(
            route_prefix(PrincipalKind::Admin),
            kind_router(auth, PrincipalKind::Admin),
        )
}

fn kind_router(auth: &AuthState, kind: PrincipalKind) -> Router {
    let profile_policy = Policy::operation(AccessRule::roles([kind]));
    Router::new()
        .route("/login/web", post(handlers::auth::login_web))
        .route("/login/mobile", post(handlers::auth::login_mobile))
        .route("/session/refresh/web", post(handlers::auth::refresh_web))
        .route(
            "/session/refresh/mobile",
            post(handlers::auth::refresh_mobile),
        )
        .route("/session/logout/web", post(handlers::auth::logout_web))
        .route("/session/logout/mobile", post(handlers::auth::logout_mobile))
        .route(
            "/profile",
            get(handlers::auth::profile).layer(from_fn_with_state(
                Enforcement::new(auth.access_guard.clone(), profile_policy),
                enforce,
            )),
        )
        .layer(Extension(auth.for_kind(kind).clone()))
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(port: u16, dsn: String, auth_config: AuthConfig) -> Result<()> {
    // Connect to database
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&dsn)
        .await
        .context("Failed to connect to database")?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let throttle: Arc<dyn LoginThrottle> = if auth_config.login_throttle_limit() == 0 {
        Arc::new(NoopThrottle)
    } else {
        Arc::new(FixedWindowThrottle::new(
            auth_config.login_throttle_limit(),
            chrono::Duration::seconds(auth_config.login_throttle_window_seconds()),
            clock.clone(),
        ))
    };
    let principals = |kind| {
        let directory = Arc::new(PgDirectory::new(pool.clone(), kind));
        Principals {
            directory: directory.clone(),
            credentials: directory,
        }
    };
    let auth_state = AuthState::build(
        &auth_config,
        Arc::new(PgTokenStore::new(pool.clone())),
        principals(PrincipalKind::User),
        principals(PrincipalKind::Admin),
        throttle,
        clock,
    )
    .context("Invalid auth configuration")?;

    let frontend_origin = frontend_origin(auth_config.frontend_base_url())?;
    let cors = CorsLayer::new()
        .allow_headers([
            CONTENT_TYPE,
            AUTHORIZATION,
            HeaderName::from_static(crate::auth::delivery::REFRESH_TOKEN_HEADER),
        ])
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(AllowOrigin::exact(frontend_origin))
        .allow_credentials(true);

    let app = router(&auth_state)
        .route(
            "/health",
            get(handlers::health).options(handlers::health),
        )
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors),
        )
        .layer(Extension(pool));

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Gracefully shutdown");
            }
        })
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

fn frontend_origin(frontend_base_url: &str) -> Result<HeaderValue> {
    let parsed = Url::parse(frontend_base_url)
        .with_context(|| format!("Invalid frontend base URL: {frontend_base_url}"))?;
    let host = parsed.host_str().ok_or_else(|| {
        anyhow!("Frontend base URL must include a valid host: {frontend_base_url}")
    })?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build frontend origin header")
}
