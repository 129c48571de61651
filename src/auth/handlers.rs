use anyhow::Context;
use axum::{
    extract::{DefaultBodyLimit, FromRef, State},
    http::{header::SET_COOKIE, HeaderMap, HeaderName, HeaderValue},
    response::AppendHeaders,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tracing::instrument;

use super::{
    cookies::{self, ACCESS_COOKIE, REFRESH_COOKIE},
    dto::{ChangePasswordRequest, LoginData, LoginRequest, RefreshRequest, TokenPair},
    extractors::AuthUser,
    jwt::JwtKeys,
    services,
};
use crate::{
    error::AppError, extract::AppJson, response::ApiResponse, state::AppState,
    users::repo_types::PublicUser,
};

const JSON_BODY_LIMIT: usize = 16 * 1024;

type CookieHeaders = AppendHeaders<[(HeaderName, HeaderValue); 2]>;

pub fn session_routes() -> Router<AppState> {
    Router::new()
        .route("/users/login", post(login))
        .route("/users/logout", post(logout))
        .route("/users/refresh-token", post(refresh_token))
        .route("/users/change-password", post(change_password))
        .route("/users/current-user", get(current_user))
        .layer(DefaultBodyLimit::max(JSON_BODY_LIMIT))
}

fn session_cookies(st: &AppState, tokens: &TokenPair) -> Result<CookieHeaders, AppError> {
    let keys = JwtKeys::from_ref(st);
    let secure = st.config.cookie_secure;
    let access = cookies::token_cookie(ACCESS_COOKIE, &tokens.access_token, keys.access_ttl(), secure)
        .context("access token cookie")?;
    let refresh =
        cookies::token_cookie(REFRESH_COOKIE, &tokens.refresh_token, keys.refresh_ttl(), secure)
            .context("refresh token cookie")?;
    Ok(AppendHeaders([(SET_COOKIE, access), (SET_COOKIE, refresh)]))
}

fn cleared_cookies(st: &AppState) -> Result<CookieHeaders, AppError> {
    let secure = st.config.cookie_secure;
    let access = cookies::clear_cookie(ACCESS_COOKIE, secure).context("clear access cookie")?;
    let refresh = cookies::clear_cookie(REFRESH_COOKIE, secure).context("clear refresh cookie")?;
    Ok(AppendHeaders([(SET_COOKIE, access), (SET_COOKIE, refresh)]))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    AppJson(payload): AppJson<LoginRequest>,
) -> Result<(CookieHeaders, ApiResponse<LoginData>), AppError> {
    let (user, tokens) = services::login(&state, payload).await?;
    let headers = session_cookies(&state, &tokens)?;
    Ok((
        headers,
        ApiResponse::ok(LoginData { user, tokens }, "User logged In Successfully"),
    ))
}

#[instrument(skip_all)]
pub async fn logout(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<(CookieHeaders, ApiResponse<Value>), AppError> {
    services::logout(&state, user.id).await?;
    Ok((cleared_cookies(&state)?, ApiResponse::ok(json!({}), "User logged Out")))
}

/// The cookie wins over the body when both carry a token.
#[instrument(skip_all)]
pub async fn refresh_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<RefreshRequest>>,
) -> Result<(CookieHeaders, ApiResponse<TokenPair>), AppError> {
    let presented = cookies::read_cookie(&headers, REFRESH_COOKIE)
        .or_else(|| body.and_then(|Json(b)| b.refresh_token));
    let tokens = services::refresh(&state, presented).await?;
    let cookies = session_cookies(&state, &tokens)?;
    Ok((cookies, ApiResponse::ok(tokens, "Access token refreshed")))
}

#[instrument(skip_all)]
pub async fn change_password(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    AppJson(payload): AppJson<ChangePasswordRequest>,
) -> Result<ApiResponse<Value>, AppError> {
    services::change_password(&state, user.id, payload).await?;
    Ok(ApiResponse::ok(json!({}), "Password changed successfully"))
}

pub async fn current_user(AuthUser(user): AuthUser) -> ApiResponse<PublicUser> {
    ApiResponse::ok(user, "User fetched successfully")
}
