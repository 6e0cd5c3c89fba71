//! Account settings and password recovery.

use axum::{
    Extension, Json,
    extract::{Path, State},
};
use serde_json::{Value, json};

use crate::{
    app::AppState,
    error::AppError,
    middleware::auth::AuthContext,
    models::{
        account::ChangePasswordRequest,
        credential::{ForgotPasswordRequest, ResetPasswordRequest},
    },
    services::{account_service, password_reset},
};

/// Set the caller's default card; `0` clears it.
///
/// # Endpoint
///
/// `POST /api/accounts/settings/default-card/{cardId}`
pub async fn set_default_card(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(card_id): Path<i64>,
) -> Result<Json<Value>, AppError> {
    account_service::set_default_card(state.store.as_ref(), auth.account_id, card_id).await?;
    Ok(Json(json!({ "message": "Default card updated" })))
}

/// # Endpoint
///
/// `PUT /api/accounts/settings/change-password/{id}`
pub async fn change_password(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<i64>,
    Json(request): Json<ChangePasswordRequest>,
) -> Result<Json<Value>, AppError> {
    account_service::change_password(
        state.store.as_ref(),
        state.hasher.as_ref(),
        auth.account_id,
        id,
        request,
    )
    .await?;
    Ok(Json(json!({ "message": "Password changed" })))
}

/// Mail a recovery link to the account's address.
///
/// # Endpoint
///
/// `POST /accounts/forgetpw`
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(request): Json<ForgotPasswordRequest>,
) -> Result<Json<Value>, AppError> {
    password_reset::request_reset(
        state.store.as_ref(),
        state.mailer.as_ref(),
        &state.config.password_recovery_url,
        state.config.reset_token_ttl(),
        &request.email,
    )
    .await?;
    Ok(Json(json!({ "message": "Password recovery email sent" })))
}

/// # Endpoint
///
/// `POST /accounts/reset-password`
pub async fn reset_password(
    State(state): State<AppState>,
    Json(request): Json<ResetPasswordRequest>,
) -> Result<Json<Value>, AppError> {
    password_reset::reset_password(
        state.store.as_ref(),
        state.hasher.as_ref(),
        &request.token,
        &request.password,
    )
    .await?;
    Ok(Json(json!({ "message": "Password reset successful" })))
}
