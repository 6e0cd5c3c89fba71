//! Registration, login and logout.

use axum::{
    Extension, Json,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;

use crate::{
    app::AppState,
    error::AppError,
    middleware::auth::{AuthContext, SESSION_COOKIE},
    models::account::{AccountResponse, CreateAccountRequest, LoginRequest},
    services::account_service,
};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    #[serde(rename = "accountID")]
    pub account_id: i64,
    pub expires_at: DateTime<Utc>,
}

/// Register a new account.
///
/// # Endpoint
///
/// `POST /register`
///
/// # Response (201)
///
/// The created account, without cards yet.
pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<CreateAccountRequest>,
) -> Result<(StatusCode, Json<AccountResponse>), AppError> {
    let account =
        account_service::register(state.store.as_ref(), state.hasher.as_ref(), request).await?;
    Ok((
        StatusCode::CREATED,
        Json(AccountResponse::new(account, Vec::new())),
    ))
}

/// Log in with email and password.
///
/// # Endpoint
///
/// `POST /login`
///
/// The session token is returned in the body and set as the `token` cookie.
/// Either one authenticates later requests.
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let session = account_service::login(
        state.store.as_ref(),
        state.hasher.as_ref(),
        state.config.session_ttl(),
        &request.email,
        &request.password,
    )
    .await?;

    let cookie = session_cookie(&session.token, state.config.session_ttl().num_seconds());
    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(LoginResponse {
            token: session.token,
            account_id: session.account_id,
            expires_at: session.expires_at,
        }),
    ))
}

/// End the current session and expire the cookie.
///
/// # Endpoint
///
/// `POST /api/logout`
pub async fn logout(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<impl IntoResponse, AppError> {
    account_service::logout(state.store.as_ref(), &auth.token_hash).await?;
    Ok((
        [(header::SET_COOKIE, session_cookie("", 0))],
        Json(json!({ "message": "Logged out" })),
    ))
}

fn session_cookie(token: &str, max_age_secs: i64) -> String {
    format!("{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age_secs}")
}
