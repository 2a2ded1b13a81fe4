//! Per-kind login, session, and profile endpoints.
//!
//! The same handlers serve both kinds; the router mounts them twice and
//! injects the kind's [`KindAuth`] as an extension.

use axum::{
    extract::Extension,
    http::{header::SET_COOKIE, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};

use super::types::{LoginRequest, MobileLoginResponse, WebLoginResponse};
use crate::{
    auth::{
        context::SessionContext,
        delivery::{Channel, TokenPair},
        gateway::LogoutOutcome,
        principal::AuthenticatedPrincipal,
        KindAuth,
    },
    error::{Error, Result},
};

fn with_cookies(mut response: Response, cookies: Vec<HeaderValue>) -> Response {
    let headers = response.headers_mut();
    for cookie in cookies {
        headers.append(SET_COOKIE, cookie);
    }
    response
}

pub async fn login_web(
    headers: HeaderMap,
    auth: Extension<KindAuth>,
    Json(request): Json<LoginRequest>,
) -> Result<Response> {
    let context = SessionContext::from_headers(&headers);
    let outcome = auth
        .gateway
        .web_login(&request.into(), &context)
        .await?;
    let body = Json(WebLoginResponse {
        data: outcome.profile,
    });
    Ok(with_cookies(
        (StatusCode::OK, body).into_response(),
        outcome.delivered.cookies,
    ))
}

pub async fn login_mobile(
    headers: HeaderMap,
    auth: Extension<KindAuth>,
    Json(request): Json<LoginRequest>,
) -> Result<Response> {
    let context = SessionContext::from_headers(&headers);
    let outcome = auth
        .gateway
        .mobile_login(&request.into(), &context)
        .await?;
    let tokens = outcome
        .delivered
        .body
        .ok_or_else(|| Error::Internal(anyhow::anyhow!("mobile delivery produced no tokens")))?;
    let body = Json(MobileLoginResponse {
        data: outcome.profile,
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token,
    });
    Ok((StatusCode::OK, body).into_response())
}

pub async fn refresh_web(headers: HeaderMap, auth: Extension<KindAuth>) -> Result<Response> {
    let presented = auth.refresh_guard.check(&headers, Channel::Web).await?;
    let context = SessionContext::from_headers(&headers);
    let delivered = auth
        .gateway
        .refresh(Channel::Web, &presented, &context)
        .await?;
    Ok(with_cookies(
        StatusCode::NO_CONTENT.into_response(),
        delivered.cookies,
    ))
}

pub async fn refresh_mobile(headers: HeaderMap, auth: Extension<KindAuth>) -> Result<Response> {
    let presented = auth.refresh_guard.check(&headers, Channel::Mobile).await?;
    let context = SessionContext::from_headers(&headers);
    let delivered = auth
        .gateway
        .refresh(Channel::Mobile, &presented, &context)
        .await?;
    let tokens: TokenPair = delivered
        .body
        .ok_or_else(|| Error::Internal(anyhow::anyhow!("mobile delivery produced no tokens")))?;
    Ok((StatusCode::OK, Json(tokens)).into_response())
}

fn logout_response(outcome: LogoutOutcome) -> Response {
    let response = match outcome.result {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => err.into_response(),
    };
    with_cookies(response, outcome.delivered.cookies)
}

pub async fn logout_web(headers: HeaderMap, auth: Extension<KindAuth>) -> Response {
    let presented = auth.refresh_guard.decode(&headers, Channel::Web);
    logout_response(auth.gateway.logout(Channel::Web, presented).await)
}

pub async fn logout_mobile(headers: HeaderMap, auth: Extension<KindAuth>) -> Response {
    let presented = auth.refresh_guard.decode(&headers, Channel::Mobile);
    logout_response(auth.gateway.logout(Channel::Mobile, presented).await)
}

pub async fn profile(
    Extension(principal): Extension<AuthenticatedPrincipal>,
    auth: Extension<KindAuth>,
) -> Result<Response> {
    let profile = auth.gateway.profile(principal.principal_id).await?;
    Ok(Json(profile).into_response())
}
