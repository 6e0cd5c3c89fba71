//! Account HTTP handlers.
//!
//! This module implements account-related API endpoints:
//! - GET /api/accounts/{id} - Get the caller's account with its cards
//! - PUT /api/accounts/{id} - Update the caller's profile
//! - DELETE /api/accounts/{id} - Soft delete the caller's account
//!
//! An account can only address itself; any other id yields 403.

use crate::{
    app::AppState,
    error::AppError,
    middleware::auth::AuthContext,
    models::account::{AccountResponse, UpdateAccountRequest},
    services::account_service,
};
use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};

/// Get account details.
///
/// # Response (200)
///
/// ```json
/// {
///   "id": 7,
///   "email": "ada@example.com",
///   "firstName": "Ada",
///   "lastName": "Lovelace",
///   "birthday": "1815-12-10",
///   "phoneNumber": "+44 20 0000 0000",
///   "defaultCardID": 12,
///   "createdAt": "2025-12-21T16:00:00Z",
///   "cards": [{ "id": 12, "cardNumber": "4000", "cardBalance": "350.00", ... }]
/// }
/// ```
pub async fn get_account(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<i64>,
) -> Result<Json<AccountResponse>, AppError> {
    let account = account_service::get_account(state.store.as_ref(), auth.account_id, id).await?;
    Ok(Json(account))
}

pub async fn update_account(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<i64>,
    Json(request): Json<UpdateAccountRequest>,
) -> Result<Json<AccountResponse>, AppError> {
    let account =
        account_service::update_account(state.store.as_ref(), auth.account_id, id, request)
            .await?;
    Ok(Json(account))
}

/// Delete the account. Its sessions stop working immediately.
pub async fn delete_account(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    account_service::delete_account(state.store.as_ref(), auth.account_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
